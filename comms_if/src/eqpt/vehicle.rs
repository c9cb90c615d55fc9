//! # Vehicle Equipment Messages
//!
//! Telemetry received from the vehicle once per control cycle and the steering command sent back
//! in response. Field names follow the vehicle simulator's JSON schema.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Ground truth telemetry of the vehicle for one control cycle.
///
/// All positions are in the world frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// World frame x coordinates of the reference waypoints.
    pub ptsx: Vec<f64>,

    /// World frame y coordinates of the reference waypoints, matching `ptsx`.
    pub ptsy: Vec<f64>,

    /// Vehicle world position x.
    pub x: f64,

    /// Vehicle world position y.
    pub y: f64,

    /// Vehicle heading in radians, anticlockwise from the world x axis.
    pub psi: f64,

    /// Vehicle speed.
    ///
    /// Units: meters/second
    pub speed: f64,

    /// The last applied steering command.
    ///
    /// Units: radians, positive steers to the right.
    pub steering_angle: f64,

    /// The last applied throttle command, in the range [-1, 1].
    pub throttle: f64,
}

/// The command sent back to the vehicle.
///
/// The `mpc_*` and `next_*` points are in the vehicle frame and are only used for display.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SteerCmd {
    /// Normalised steering demand in [-1, 1], positive steers to the right.
    pub steering_angle: f64,

    /// Throttle demand in [-1, 1].
    pub throttle: f64,

    /// Predicted trajectory x coordinates over the horizon.
    pub mpc_x: Vec<f64>,

    /// Predicted trajectory y coordinates over the horizon.
    pub mpc_y: Vec<f64>,

    /// Reference path x coordinates.
    pub next_x: Vec<f64>,

    /// Reference path y coordinates.
    pub next_y: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message received from the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleMsg {
    /// New telemetry which must be answered with a steering command.
    Telemetry(Telemetry),

    /// No data was present, the vehicle is under manual control.
    Manual,
}

/// A response sent to the vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleResponse {
    /// A steering command computed for the last telemetry.
    Steer(SteerCmd),

    /// Placeholder acknowledgement when no command was computed.
    Manual,
}

/// Errors that can occur while decoding vehicle messages.
#[derive(Debug, thiserror::Error)]
pub enum VehicleMsgError {
    #[error("Could not deserialise the vehicle message: {0}")]
    DeserialiseError(serde_json::Error),

    #[error("Could not serialise the vehicle response: {0}")]
    SerialiseError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleMsg {
    /// Parse a single JSON record received from the vehicle.
    ///
    /// An empty record or a JSON `null` is interpreted as manual driving.
    pub fn parse(record: &str) -> Result<Self, VehicleMsgError> {
        let record = record.trim();

        if record.is_empty() {
            return Ok(VehicleMsg::Manual);
        }

        let telem: Option<Telemetry> = serde_json::from_str(record)
            .map_err(VehicleMsgError::DeserialiseError)?;

        Ok(match telem {
            Some(t) => VehicleMsg::Telemetry(t),
            None => VehicleMsg::Manual,
        })
    }
}

impl VehicleResponse {
    /// The event name used on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            VehicleResponse::Steer(_) => "steer",
            VehicleResponse::Manual => "manual",
        }
    }

    /// Serialise the response as a JSON `[event, data]` pair.
    pub fn to_json(&self) -> Result<String, VehicleMsgError> {
        let data = match self {
            VehicleResponse::Steer(cmd) => {
                serde_json::to_value(cmd).map_err(VehicleMsgError::SerialiseError)?
            }
            VehicleResponse::Manual => Value::Object(Map::new()),
        };

        serde_json::to_string(&(self.event_name(), data))
            .map_err(VehicleMsgError::SerialiseError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
