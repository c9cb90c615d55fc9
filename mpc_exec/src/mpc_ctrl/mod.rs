//! # MPC control module
//!
//! MPC control keeps the vehicle on a reference path while compensating for
//! the delay between a command being computed and it acting on the vehicle.
//!
//! Each cycle the vehicle reports its pose, speed, current actuator values and
//! a handful of waypoints ahead of it. Processing then runs the following
//! pipeline:
//!
//!  1. The waypoints are transformed into the vehicle frame, in which the
//!     vehicle sits at the origin looking along the X axis.
//!  2. A polynomial (cubic by default) is fitted through the waypoints.
//!  3. The cross track and heading errors are read off the polynomial at the
//!     vehicle's position.
//!  4. The state is predicted forward by the actuation latency, since any
//!     command computed now will only take effect after that delay.
//!  5. A finite horizon optimisation finds the steering and throttle sequence
//!     that best tracks the path from the predicted state.
//!  6. The first step of that sequence is mapped into the vehicle's
//!     normalised command units.
//!
//! If the optimisation fails the last good command (or the neutral command
//! if there hasn't been one) is sent instead, so the vehicle is never left
//! without a command.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod actuator;
pub mod frame;
pub mod model;
pub mod optimizer;
pub mod params;
pub mod path_fit;
pub mod state;
pub mod vehicle_state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use actuator::*;
pub use frame::*;
pub use model::HorizonModel;
pub use optimizer::*;
pub use params::*;
pub use path_fit::*;
pub use state::*;
pub use vehicle_state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Telemetry which cannot be processed.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InputError {
    #[error("The telemetry contains no waypoints")]
    NoWaypoints,

    #[error("Expected as many waypoint y values as x values, found {ptsy} y and {ptsx} x")]
    MismatchedWaypoints { ptsx: usize, ptsy: usize },

    #[error("Expected at least {required} waypoints, found {found}")]
    TooFewWaypoints { required: usize, found: usize },

    #[error("Telemetry field {0} is not finite")]
    NonFinite(&'static str),
}

/// Errors which can occur during MPC control.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid parameters: {0}")]
    ConfigError(ConfigError),

    #[error("Invalid telemetry: {0}")]
    InputError(#[from] InputError),

    #[error("Could not fit the reference path: {0}")]
    FittingError(#[from] FittingError),
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Parameters with a solver budget large enough that tests don't depend on
/// the speed of the machine running them.
#[cfg(test)]
pub(crate) fn test_params() -> MpcParams {
    let mut params = MpcParams::default();
    params.control_period_s = 60.0;
    params.solver.solve_timeout_s = 60.0;
    params.solver.max_iters = 5000;
    params
}
