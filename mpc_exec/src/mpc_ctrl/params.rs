//! MPC control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Internal
use util::maths::deg_to_rad;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Longest accepted control period.
///
/// Units: seconds
pub const MAX_CONTROL_PERIOD_S: f64 = 3600.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for MPC control.
///
/// All fields are optional in the parameter file, any missing field takes the
/// value given by `MpcParams::default()`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MpcParams {

    // ---- HORIZON ----

    /// Number of steps in the prediction horizon (N).
    pub horizon_steps: usize,

    /// Duration of a single horizon step (dt).
    ///
    /// Units: seconds
    pub step_dt_s: f64,

    /// Period of one control cycle, the time between telemetry records.
    ///
    /// Units: seconds
    pub control_period_s: f64,

    /// Delay between computing a command and it acting on the vehicle (L).
    ///
    /// Units: seconds
    pub latency_s: f64,

    // ---- VEHICLE ----

    /// Distance between the front axle and the centre of gravity (Lf).
    ///
    /// Units: meters
    pub wheelbase_m: f64,

    /// Maximum absolute steering angle.
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Minimum (most negative) throttle demand.
    pub min_throttle: f64,

    /// Maximum throttle demand.
    pub max_throttle: f64,

    /// The speed the controller attempts to hold.
    ///
    /// Units: meters/second
    pub ref_speed_ms: f64,

    // ---- PATH FITTING ----

    /// Degree of the polynomial fitted to the reference waypoints.
    pub fit_degree: usize,

    /// Minimum number of waypoints accepted in a telemetry record.
    ///
    /// Must be at least `fit_degree + 1`.
    pub min_waypoints: usize,

    // ---- SUB-PARAMETERS ----

    /// Cost function weights.
    pub weights: CostWeights,

    /// Nonlinear solver settings.
    pub solver: SolverParams,

    /// Settings for the reference path points sent back for display.
    pub display: DisplayParams,
}

/// Weights of each term in the horizon cost function.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CostWeights {
    /// Squared cross track error
    pub cte: f64,

    /// Squared heading error
    pub epsi: f64,

    /// Squared deviation from the reference speed
    pub speed: f64,

    /// Squared steering demand
    pub steer: f64,

    /// Squared throttle demand
    pub throttle: f64,

    /// Squared change in steering between consecutive steps
    pub steer_rate: f64,

    /// Squared change in throttle between consecutive steps
    pub throttle_rate: f64,
}

/// Settings for the PANOC solver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SolverParams {
    /// Convergence tolerance on the fixed point residual.
    pub tolerance: f64,

    /// Maximum number of solver iterations before the solve is failed.
    pub max_iters: usize,

    /// Number of L-BFGS memory pairs.
    pub lbfgs_memory: usize,

    /// Wall clock budget for a single solve, must not exceed the control
    /// period.
    ///
    /// Units: seconds
    pub solve_timeout_s: f64,
}

/// Settings for the resampled reference path.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DisplayParams {
    /// Spacing in x between reference points.
    ///
    /// Units: meters
    pub ref_step_m: f64,

    /// Number of reference points.
    pub ref_num_points: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Invalid parameter values. These are fatal at startup.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("The horizon must contain at least one step")]
    ZeroHorizon,

    #[error("Expected {0} to be positive and finite, found {1}")]
    NotPositive(&'static str, f64),

    #[error("Expected {0} to be finite, found {1}")]
    NotFinite(&'static str, f64),

    #[error("Expected the latency to be non-negative and finite, found {0}")]
    InvalidLatency(f64),

    #[error("Throttle bounds [{0}, {1}] must be a non-empty range within [-1, 1]")]
    InvalidThrottleBounds(f64, f64),

    #[error("The fit degree must be at least 1")]
    ZeroFitDegree,

    #[error(
        "A degree {fit_degree} fit needs more than {fit_degree} waypoints but min_waypoints is \
         {min_waypoints}"
    )]
    DegreeExceedsWaypoints {
        fit_degree: usize,
        min_waypoints: usize
    },

    #[error("Cost weight {0} must be non-negative and finite, found {1}")]
    InvalidWeight(&'static str, f64),

    #[error("The control period must not exceed one hour, found {0} s")]
    ControlPeriodTooLong(f64),

    #[error("The solve timeout ({0} s) must not exceed the control period ({1} s)")]
    TimeoutExceedsPeriod(f64, f64),

    #[error("Solver setting {0} must be at least 1")]
    ZeroSolverSetting(&'static str),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for MpcParams {
    fn default() -> Self {
        Self {
            horizon_steps: 10,
            step_dt_s: 0.1,
            control_period_s: 0.1,
            latency_s: 0.1,
            wheelbase_m: 2.67,
            max_steer_rad: deg_to_rad(25.0),
            min_throttle: -1.0,
            max_throttle: 1.0,
            ref_speed_ms: 20.0,
            fit_degree: 3,
            min_waypoints: 4,
            weights: CostWeights::default(),
            solver: SolverParams::default(),
            display: DisplayParams::default(),
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steer: 5.0,
            throttle: 5.0,
            steer_rate: 200.0,
            throttle_rate: 10.0,
        }
    }
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iters: 1000,
            lbfgs_memory: 10,
            solve_timeout_s: 0.1,
        }
    }
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            ref_step_m: 2.5,
            ref_num_points: 25,
        }
    }
}

impl MpcParams {
    /// Check that the parameters describe a solvable problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_steps == 0 {
            return Err(ConfigError::ZeroHorizon);
        }

        check_positive("step_dt_s", self.step_dt_s)?;
        check_positive("wheelbase_m", self.wheelbase_m)?;
        check_positive("max_steer_rad", self.max_steer_rad)?;
        check_positive("solver.tolerance", self.solver.tolerance)?;
        check_positive("control_period_s", self.control_period_s)?;
        check_positive("solver.solve_timeout_s", self.solver.solve_timeout_s)?;

        if self.control_period_s > MAX_CONTROL_PERIOD_S {
            return Err(ConfigError::ControlPeriodTooLong(self.control_period_s));
        }

        if self.solver.solve_timeout_s > self.control_period_s {
            return Err(ConfigError::TimeoutExceedsPeriod(
                self.solver.solve_timeout_s,
                self.control_period_s,
            ));
        }

        if !self.latency_s.is_finite() || self.latency_s < 0.0 {
            return Err(ConfigError::InvalidLatency(self.latency_s));
        }

        if !self.ref_speed_ms.is_finite() {
            return Err(ConfigError::NotFinite("ref_speed_ms", self.ref_speed_ms));
        }

        // NaN bounds fail the range comparison as well
        if !(self.min_throttle >= -1.0
            && self.max_throttle <= 1.0
            && self.min_throttle < self.max_throttle)
        {
            return Err(ConfigError::InvalidThrottleBounds(
                self.min_throttle,
                self.max_throttle,
            ));
        }

        if self.fit_degree == 0 {
            return Err(ConfigError::ZeroFitDegree);
        }
        if self.min_waypoints < self.fit_degree + 1 {
            return Err(ConfigError::DegreeExceedsWaypoints {
                fit_degree: self.fit_degree,
                min_waypoints: self.min_waypoints,
            });
        }

        self.weights.validate()?;

        if self.solver.max_iters == 0 {
            return Err(ConfigError::ZeroSolverSetting("solver.max_iters"));
        }
        if self.solver.lbfgs_memory == 0 {
            return Err(ConfigError::ZeroSolverSetting("solver.lbfgs_memory"));
        }

        if self.display.ref_num_points > 0 {
            check_positive("display.ref_step_m", self.display.ref_step_m)?;
        }

        Ok(())
    }

    /// The number of waypoints a telemetry record must carry.
    pub fn required_waypoints(&self) -> usize {
        self.min_waypoints.max(self.fit_degree + 1)
    }

    /// The wall clock budget for a single solve.
    ///
    /// Only valid on validated parameters, which bound the timeout by the
    /// control period.
    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.solver.solve_timeout_s)
    }
}

impl CostWeights {
    fn validate(&self) -> Result<(), ConfigError> {
        let weights = [
            ("weights.cte", self.cte),
            ("weights.epsi", self.epsi),
            ("weights.speed", self.speed),
            ("weights.steer", self.steer),
            ("weights.throttle", self.throttle),
            ("weights.steer_rate", self.steer_rate),
            ("weights.throttle_rate", self.throttle_rate),
        ];

        for (name, w) in weights.iter() {
            if !w.is_finite() || *w < 0.0 {
                return Err(ConfigError::InvalidWeight(*name, *w));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    }
    else {
        Err(ConfigError::NotPositive(name, value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let p = MpcParams::default();

        assert_eq!(p.validate(), Ok(()));
        assert_eq!(p.required_waypoints(), 4);
        assert_eq!(p.solve_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_params() {
        let p = MpcParams { horizon_steps: 0, ..Default::default() };
        assert_eq!(p.validate(), Err(ConfigError::ZeroHorizon));

        let p = MpcParams { step_dt_s: -0.1, ..Default::default() };
        assert_eq!(p.validate(), Err(ConfigError::NotPositive("step_dt_s", -0.1)));

        let p = MpcParams { latency_s: -1.0, ..Default::default() };
        assert_eq!(p.validate(), Err(ConfigError::InvalidLatency(-1.0)));

        let p = MpcParams { min_throttle: 0.5, max_throttle: 0.5, ..Default::default() };
        assert_eq!(p.validate(), Err(ConfigError::InvalidThrottleBounds(0.5, 0.5)));

        let p = MpcParams { max_throttle: 2.0, ..Default::default() };
        assert!(matches!(p.validate(), Err(ConfigError::InvalidThrottleBounds(..))));

        let p = MpcParams { fit_degree: 5, min_waypoints: 5, ..Default::default() };
        assert_eq!(
            p.validate(),
            Err(ConfigError::DegreeExceedsWaypoints { fit_degree: 5, min_waypoints: 5 })
        );

        let mut p = MpcParams::default();
        p.weights.steer_rate = -1.0;
        assert_eq!(p.validate(), Err(ConfigError::InvalidWeight("weights.steer_rate", -1.0)));

        let mut p = MpcParams::default();
        p.solver.solve_timeout_s = 1e20;
        assert_eq!(p.validate(), Err(ConfigError::TimeoutExceedsPeriod(1e20, 0.1)));

        let mut p = MpcParams::default();
        p.solver.solve_timeout_s = 0.2;
        assert_eq!(p.validate(), Err(ConfigError::TimeoutExceedsPeriod(0.2, 0.1)));

        let mut p = MpcParams::default();
        p.solver.solve_timeout_s = 0.2;
        p.control_period_s = 0.2;
        assert_eq!(p.validate(), Ok(()));

        let mut p = MpcParams::default();
        p.solver.solve_timeout_s = 1e20;
        p.control_period_s = 1e20;
        assert_eq!(p.validate(), Err(ConfigError::ControlPeriodTooLong(1e20)));

        let mut p = MpcParams::default();
        p.solver.max_iters = 0;
        assert_eq!(p.validate(), Err(ConfigError::ZeroSolverSetting("solver.max_iters")));
    }

    #[test]
    fn test_partial_param_file() {
        let p: MpcParams = util::params::from_str(
            "horizon_steps = 12\nlatency_s = 0.2\n\n[weights]\ncte = 3000.0\n"
        ).unwrap();

        assert_eq!(p.horizon_steps, 12);
        assert_eq!(p.latency_s, 0.2);
        assert_eq!(p.weights.cte, 3000.0);
        assert_eq!(p.weights.epsi, CostWeights::default().epsi);
        assert_eq!(p.solver, SolverParams::default());
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn test_shipped_param_file() {
        let p: MpcParams =
            util::params::from_str(include_str!("../../../params/mpc_ctrl.toml")).unwrap();
        let d = MpcParams::default();

        assert_eq!(p.validate(), Ok(()));
        assert!((p.max_steer_rad - d.max_steer_rad).abs() < 1e-12);
        assert_eq!(MpcParams { max_steer_rad: d.max_steer_rad, ..p }, d);
    }
}
