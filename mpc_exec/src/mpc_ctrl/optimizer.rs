//! # Trajectory optimiser
//!
//! Solves the finite horizon tracking problem once per cycle with PANOC, a
//! first order solver for box constrained nonlinear programs. The solver is
//! always started from the zero actuator sequence and keeps no state between
//! cycles.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use nalgebra::Point2;
use optimization_engine::{
    constraints::Rectangle,
    core::{
        panoc::{PANOCCache, PANOCOptimizer},
        ExitStatus, Optimizer, Problem,
    },
    SolverError,
};
use serde::Serialize;

// Internal
use super::{ConfigError, HorizonModel, MpcParams, PathPolynomial, VehicleState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Solves the horizon problem for the configured horizon and limits.
#[derive(Debug, Clone)]
pub struct TrajectoryOptimizer {
    params: MpcParams,

    /// Lower bounds on the decision vector.
    lower: Vec<f64>,

    /// Upper bounds on the decision vector.
    upper: Vec<f64>,
}

/// The solution of one horizon problem.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    /// First steering demand, model convention (positive anticlockwise).
    ///
    /// Units: radians
    pub steer_rad: f64,

    /// First throttle demand.
    pub throttle: f64,

    /// Predicted positions for steps `1..=N` in the vehicle frame.
    pub trajectory_m: Vec<Point2<f64>>,

    /// Number of solver iterations used.
    pub iterations: usize,

    /// Cost at the solution.
    pub cost: f64,

    /// Units: seconds
    pub solve_time_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OptimizationError {
    #[error("The solver did not converge within {0} iterations")]
    NotConverged(usize),

    #[error("The solver ran out of time after {0} iterations")]
    Timeout(usize),

    #[error("The solver produced a non-finite value")]
    NonFinite,

    #[error("The solver failed: {0}")]
    SolverFailure(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for TrajectoryOptimizer {
    fn default() -> Self {
        Self::build(&MpcParams::default())
    }
}

impl TrajectoryOptimizer {
    /// Create a new optimiser from validated parameters.
    pub fn new(params: &MpcParams) -> Result<Self, ConfigError> {
        params.validate()?;

        Ok(Self::build(params))
    }

    fn build(params: &MpcParams) -> Self {
        let n = params.horizon_steps;
        let mut lower = Vec::with_capacity(2 * n);
        let mut upper = Vec::with_capacity(2 * n);

        for _ in 0..n {
            lower.push(-params.max_steer_rad);
            lower.push(params.min_throttle);
            upper.push(params.max_steer_rad);
            upper.push(params.max_throttle);
        }

        Self {
            params: params.clone(),
            lower,
            upper,
        }
    }

    /// Find the actuator sequence minimising the horizon cost from the given
    /// initial state, tracking `path`.
    pub fn solve(
        &self,
        path: &PathPolynomial,
        initial: &VehicleState,
    ) -> Result<OptimizationResult, OptimizationError> {
        if !initial.is_finite() || path.coeffs().iter().any(|c| !c.is_finite()) {
            return Err(OptimizationError::NonFinite);
        }

        let model = HorizonModel::new(path, *initial, &self.params);
        let num_vars = model.num_vars();

        let cost = |u: &[f64], c: &mut f64| -> Result<(), SolverError> {
            *c = model.cost(u);
            if c.is_finite() {
                Ok(())
            }
            else {
                Err(SolverError::NotFiniteComputation)
            }
        };

        let grad = |u: &[f64], g: &mut [f64]| -> Result<(), SolverError> {
            model.gradient(u, g);
            if g.iter().all(|v| v.is_finite()) {
                Ok(())
            }
            else {
                Err(SolverError::NotFiniteComputation)
            }
        };

        let bounds = Rectangle::new(Some(self.lower.as_slice()), Some(self.upper.as_slice()));
        let problem = Problem::new(&bounds, grad, cost);
        let mut cache = PANOCCache::new(
            num_vars,
            self.params.solver.tolerance,
            self.params.solver.lbfgs_memory,
        );
        let mut panoc = PANOCOptimizer::new(problem, &mut cache)
            .with_max_iter(self.params.solver.max_iters)
            .with_max_duration(self.params.solve_timeout());

        let mut u = vec![0.0; num_vars];

        let status = match panoc.solve(&mut u) {
            Ok(s) => s,
            Err(SolverError::NotFiniteComputation) => return Err(OptimizationError::NonFinite),
            Err(e) => return Err(OptimizationError::SolverFailure(format!("{:?}", e))),
        };

        trace!(
            "PANOC exit: {:?} after {} iterations, fpr norm {:.3e}",
            status.exit_status(),
            status.iterations(),
            status.norm_fpr()
        );

        if !status.has_converged() {
            return match status.exit_status() {
                ExitStatus::NotConvergedOutOfTime => {
                    Err(OptimizationError::Timeout(status.iterations()))
                }
                _ => Err(OptimizationError::NotConverged(status.iterations())),
            };
        }

        let states = model.rollout(&u);
        if u.iter().any(|v| !v.is_finite()) || states.iter().any(|s| !s.is_finite()) {
            return Err(OptimizationError::NonFinite);
        }

        Ok(OptimizationResult {
            steer_rad: u[0],
            throttle: u[1],
            trajectory_m: states
                .iter()
                .skip(1)
                .map(|s| Point2::new(s.x_m, s.y_m))
                .collect(),
            iterations: status.iterations(),
            cost: status.cost_value(),
            solve_time_s: status.solve_time().as_secs_f64(),
        })
    }

    pub fn params(&self) -> &MpcParams {
        &self.params
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::test_params;

    #[test]
    fn test_straight_aligned_gives_zero() {
        let params = test_params();
        let opt = TrajectoryOptimizer::new(&params).unwrap();
        let path = PathPolynomial::from_coeffs(vec![0.0; 4]);

        // Already at the reference speed so no throttle is needed
        let initial = VehicleState {
            v_ms: params.ref_speed_ms,
            ..Default::default()
        };

        let res = opt.solve(&path, &initial).unwrap();

        assert!(res.steer_rad.abs() < 1e-9);
        assert!(res.throttle.abs() < 1e-9);
        assert_eq!(res.trajectory_m.len(), params.horizon_steps);
        for p in res.trajectory_m.iter() {
            assert!(p.y.abs() < 1e-9);
        }
    }

    #[test]
    fn test_bounds_respected() {
        let params = test_params();
        let opt = TrajectoryOptimizer::new(&params).unwrap();

        // Far off a steeply curving path and well below the reference speed
        let path = PathPolynomial::from_coeffs(vec![8.0, 0.6, 0.02, 0.0]);
        let initial = VehicleState {
            v_ms: 5.0,
            cte_m: 8.0,
            epsi_rad: -0.6f64.atan(),
            ..Default::default()
        };

        let res = opt.solve(&path, &initial).unwrap();

        assert!(res.steer_rad.abs() <= params.max_steer_rad + 1e-12);
        assert!(res.throttle >= params.min_throttle - 1e-12);
        assert!(res.throttle <= params.max_throttle + 1e-12);

        // The path is to the left
        assert!(res.steer_rad > 0.0);
    }

    #[test]
    fn test_iteration_cap() {
        let mut params = test_params();
        params.solver.max_iters = 1;
        params.solver.tolerance = 1e-12;
        let opt = TrajectoryOptimizer::new(&params).unwrap();

        let path = PathPolynomial::from_coeffs(vec![2.0, 0.1, 0.005, 0.0]);
        let initial = VehicleState {
            v_ms: 10.0,
            cte_m: 2.0,
            epsi_rad: -0.1f64.atan(),
            ..Default::default()
        };

        assert!(matches!(
            opt.solve(&path, &initial),
            Err(OptimizationError::NotConverged(_))
        ));
    }

    #[test]
    fn test_timeout() {
        let mut params = test_params();
        params.solver.solve_timeout_s = 1e-9;
        params.solver.tolerance = 1e-12;
        let opt = TrajectoryOptimizer::new(&params).unwrap();

        let path = PathPolynomial::from_coeffs(vec![2.0, 0.1, 0.005, 0.0]);
        let initial = VehicleState {
            v_ms: 10.0,
            cte_m: 2.0,
            epsi_rad: -0.1f64.atan(),
            ..Default::default()
        };

        assert!(matches!(
            opt.solve(&path, &initial),
            Err(OptimizationError::Timeout(_))
        ));
    }

    #[test]
    fn test_non_finite_state() {
        let opt = TrajectoryOptimizer::new(&test_params()).unwrap();
        let path = PathPolynomial::from_coeffs(vec![0.0; 4]);
        let initial = VehicleState {
            v_ms: std::f64::NAN,
            ..Default::default()
        };

        assert_eq!(opt.solve(&path, &initial).unwrap_err(), OptimizationError::NonFinite);
    }

    #[test]
    fn test_invalid_params() {
        let params = MpcParams {
            horizon_steps: 0,
            ..Default::default()
        };
        assert_eq!(TrajectoryOptimizer::new(&params).unwrap_err(), ConfigError::ZeroHorizon);
    }
}
