//! # Vehicle state, tracking errors and latency prediction

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use super::PathPolynomial;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The vehicle's kinematic state together with its tracking errors, expressed
/// in the vehicle frame of the current cycle.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub x_m: f64,
    pub y_m: f64,

    /// Heading anticlockwise from the vehicle frame's X axis.
    ///
    /// Units: radians
    pub psi_rad: f64,

    /// Units: meters/second
    pub v_ms: f64,

    /// Cross track error, the lateral offset of the path from the vehicle.
    ///
    /// Units: meters
    pub cte_m: f64,

    /// Heading error between the vehicle and the path tangent.
    ///
    /// Units: radians
    pub epsi_rad: f64,
}

/// Cross track and heading errors of the vehicle against a fitted path.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingErrors {
    pub cte_m: f64,
    pub epsi_rad: f64,
}

/// The actuator values last applied to the vehicle, as reported in telemetry.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedActuation {
    /// Steering angle in the actuator convention (positive steers right).
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// Throttle, used as the longitudinal acceleration.
    pub throttle: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrackingErrors {
    /// Estimate the errors of a vehicle at the origin of the frame `path` was
    /// fitted in.
    ///
    /// The cross track error is the path's value at `x = 0` and the heading
    /// error is the negative angle of the path tangent there.
    pub fn estimate(path: &PathPolynomial) -> Self {
        Self {
            cte_m: path.eval(0.0),
            epsi_rad: -path.slope(0.0).atan(),
        }
    }
}

impl VehicleState {
    /// Build the measured state at the moment telemetry was received.
    ///
    /// In the vehicle frame the vehicle is always at the origin with zero
    /// heading.
    pub fn measured(v_ms: f64, errors: TrackingErrors) -> Self {
        Self {
            x_m: 0.0,
            y_m: 0.0,
            psi_rad: 0.0,
            v_ms,
            cte_m: errors.cte_m,
            epsi_rad: errors.epsi_rad,
        }
    }

    /// Propagate the state forward by the actuation latency using the
    /// kinematic model and the actuation currently applied to the vehicle.
    ///
    /// The result is still expressed in this cycle's vehicle frame. Zero
    /// speed with zero latency leaves the state unchanged.
    pub fn predict(
        &self,
        applied: &AppliedActuation,
        latency_s: f64,
        wheelbase_m: f64,
    ) -> Self {
        let v = self.v_ms;
        let l = latency_s;

        // Convert the applied steering into the model convention
        // (positive anticlockwise).
        let delta = -applied.steer_rad;

        Self {
            x_m: self.x_m + v * self.psi_rad.cos() * l,
            y_m: self.y_m + v * self.psi_rad.sin() * l,
            psi_rad: self.psi_rad + (v / wheelbase_m) * delta * l,
            v_ms: v + applied.throttle * l,
            cte_m: self.cte_m + v * self.epsi_rad.sin() * l,
            epsi_rad: self.epsi_rad - delta * (v / wheelbase_m) * l,
        }
    }

    /// Returns true if all fields are finite.
    pub fn is_finite(&self) -> bool {
        [
            self.x_m,
            self.y_m,
            self.psi_rad,
            self.v_ms,
            self.cte_m,
            self.epsi_rad,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
