//! MPC control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use nalgebra::Point2;
use serde::Serialize;

// Internal
use super::*;
use comms_if::eqpt::vehicle::{SteerCmd, Telemetry};
use util::{module::State, params as param_file, session::Session};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The MPC controller for a single vehicle session.
///
/// Only the parameters and the last good command persist between cycles.
#[derive(Debug, Clone)]
pub struct MpcCtrl {
    params: MpcParams,

    optimizer: TrajectoryOptimizer,

    mapper: ActuatorMapper,

    /// The last command produced by a successful optimisation.
    last_good_cmd: Option<MappedCmd>,

    report: StatusReport,
}

/// The status report containing monitoring quantities for the last cycle.
#[derive(Debug, Default, Copy, Clone, Serialize)]
pub struct StatusReport {
    /// Errors measured at the time telemetry was received
    pub measured_errors: TrackingErrors,

    /// The state the horizon was solved from
    pub predicted_state: VehicleState,

    pub solver_iterations: usize,

    pub solver_cost: f64,

    pub solve_time_s: f64,

    /// If true the optimisation failed and the fallback command was sent
    pub fallback_used: bool,

    /// If true the steering demand exceeded the steering bound
    pub steer_limited: bool,

    /// If true the throttle demand exceeded the throttle bounds
    pub throttle_limited: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for MpcCtrl {
    fn default() -> Self {
        let params = MpcParams::default();

        Self {
            mapper: ActuatorMapper::new(
                params.max_steer_rad,
                params.min_throttle,
                params.max_throttle,
            ),
            optimizer: TrajectoryOptimizer::default(),
            params,
            last_good_cmd: None,
            report: StatusReport::default(),
        }
    }
}

impl State for MpcCtrl {
    type InitData = String;
    type InitError = MpcCtrlError;

    type InputData = Telemetry;
    type OutputData = SteerCmd;
    type StatusReport = StatusReport;
    type ProcError = MpcCtrlError;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the name of the parameter file.
    fn init(&mut self, params_path: String, session: &Session) -> Result<(), MpcCtrlError> {
        let params: MpcParams =
            param_file::load(&params_path).map_err(MpcCtrlError::ParamLoadError)?;

        *self = Self::new(params).map_err(MpcCtrlError::ConfigError)?;

        info!(
            "MpcCtrl initialised: N = {}, dt = {} s, latency = {} s",
            self.params.horizon_steps, self.params.step_dt_s, self.params.latency_s
        );

        session.save("mpc_ctrl/params.json", self.params.clone());

        Ok(())
    }

    /// Process one telemetry record.
    ///
    /// Telemetry which can't be used (malformed waypoints, a failed fit)
    /// returns an error and no command is produced. A failed optimisation is
    /// not an error, the fallback command is returned instead.
    fn proc(&mut self, telem: &Telemetry) -> Result<(SteerCmd, StatusReport), MpcCtrlError> {
        self.report = StatusReport::default();

        let (pose, waypoints_m_world) = self.check_telemetry(telem)?;

        // Fit the reference path in the vehicle frame
        let waypoints_m_veh = to_vehicle_frame(&pose, &waypoints_m_world)?;
        let path = PathPolynomial::fit_points(&waypoints_m_veh, self.params.fit_degree)?;

        // Errors at receipt, then forward by the latency
        let errors = TrackingErrors::estimate(&path);
        let measured = VehicleState::measured(telem.speed, errors);
        let applied = AppliedActuation {
            steer_rad: telem.steering_angle,
            throttle: telem.throttle,
        };
        let predicted = measured.predict(&applied, self.params.latency_s, self.params.wheelbase_m);

        self.report.measured_errors = errors;
        self.report.predicted_state = predicted;

        debug!(
            "cte = {:.3} m, epsi = {:.4} rad, predicted v = {:.2} m/s",
            errors.cte_m, errors.epsi_rad, predicted.v_ms
        );

        let (cmd, trajectory_m) = match self.optimizer.solve(&path, &predicted) {
            Ok(res) => {
                let cmd = self.mapper.map(res.steer_rad, res.throttle);

                self.report.solver_iterations = res.iterations;
                self.report.solver_cost = res.cost;
                self.report.solve_time_s = res.solve_time_s;
                self.last_good_cmd = Some(cmd);

                (cmd, res.trajectory_m)
            }
            Err(e) => {
                let cmd = self.fallback_cmd();
                warn!(
                    "Optimisation failed ({}), sending fallback command (steering {:.3}, \
                     throttle {:.3})",
                    e, cmd.steering, cmd.throttle
                );

                self.report.fallback_used = true;

                (cmd, Vec::new())
            }
        };

        self.report.steer_limited = cmd.steer_limited;
        self.report.throttle_limited = cmd.throttle_limited;

        let reference_m = path.resample(
            self.params.display.ref_step_m,
            self.params.display.ref_num_points,
        );

        let steer_cmd = SteerCmd {
            steering_angle: cmd.steering,
            throttle: cmd.throttle,
            mpc_x: trajectory_m.iter().map(|p| p.x).collect(),
            mpc_y: trajectory_m.iter().map(|p| p.y).collect(),
            next_x: reference_m.iter().map(|p| p.x).collect(),
            next_y: reference_m.iter().map(|p| p.y).collect(),
        };

        Ok((steer_cmd, self.report))
    }
}

impl MpcCtrl {
    /// Create a new controller from the given parameters.
    pub fn new(params: MpcParams) -> Result<Self, ConfigError> {
        let optimizer = TrajectoryOptimizer::new(&params)?;

        Ok(Self {
            mapper: ActuatorMapper::new(
                params.max_steer_rad,
                params.min_throttle,
                params.max_throttle,
            ),
            optimizer,
            params,
            last_good_cmd: None,
            report: StatusReport::default(),
        })
    }

    pub fn params(&self) -> &MpcParams {
        &self.params
    }

    /// The command from the last successful optimisation, if any.
    pub fn last_good_cmd(&self) -> Option<MappedCmd> {
        self.last_good_cmd
    }

    /// The command sent when the optimisation fails.
    pub fn fallback_cmd(&self) -> MappedCmd {
        self.last_good_cmd.unwrap_or_else(MappedCmd::neutral)
    }

    /// Validate the telemetry, returning the vehicle pose and the world frame
    /// waypoints.
    fn check_telemetry(
        &self,
        telem: &Telemetry,
    ) -> Result<(Pose, Vec<Point2<f64>>), InputError> {
        if telem.ptsx.len() != telem.ptsy.len() {
            return Err(InputError::MismatchedWaypoints {
                ptsx: telem.ptsx.len(),
                ptsy: telem.ptsy.len(),
            });
        }
        if telem.ptsx.is_empty() {
            return Err(InputError::NoWaypoints);
        }

        let required = self.params.required_waypoints();
        if telem.ptsx.len() < required {
            return Err(InputError::TooFewWaypoints {
                required,
                found: telem.ptsx.len(),
            });
        }

        let scalars = [
            ("x", telem.x),
            ("y", telem.y),
            ("psi", telem.psi),
            ("speed", telem.speed),
            ("steering_angle", telem.steering_angle),
            ("throttle", telem.throttle),
        ];
        for (name, value) in scalars.iter() {
            if !value.is_finite() {
                return Err(InputError::NonFinite(*name));
            }
        }
        if telem.ptsx.iter().any(|v| !v.is_finite()) {
            return Err(InputError::NonFinite("ptsx"));
        }
        if telem.ptsy.iter().any(|v| !v.is_finite()) {
            return Err(InputError::NonFinite("ptsy"));
        }

        let waypoints = telem
            .ptsx
            .iter()
            .zip(telem.ptsy.iter())
            .map(|(&x, &y)| Point2::new(x, y))
            .collect();

        Ok((Pose::new(telem.x, telem.y, telem.psi), waypoints))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::test_params;

    fn telem(ptsx: Vec<f64>, ptsy: Vec<f64>, speed: f64) -> Telemetry {
        Telemetry {
            ptsx,
            ptsy,
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            speed,
            steering_angle: 0.0,
            throttle: 0.0,
        }
    }

    fn xs() -> Vec<f64> {
        (0..6).map(|i| i as f64 * 10.0).collect()
    }

    #[test]
    fn test_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MpcCtrl>();
    }

    #[test]
    fn test_straight_from_rest() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let t = telem(xs(), vec![0.0; 6], 0.0);

        let (cmd, report) = ctrl.proc(&t).unwrap();

        assert!(cmd.steering_angle.abs() < 1e-3, "steering = {}", cmd.steering_angle);
        assert!(cmd.throttle > 0.0);
        assert!(!report.fallback_used);
        assert_eq!(cmd.mpc_x.len(), ctrl.params().horizon_steps);
        assert_eq!(cmd.mpc_y.len(), ctrl.params().horizon_steps);
        assert_eq!(cmd.next_x.len(), 25);
        assert_eq!(cmd.next_y.len(), 25);
        assert!(ctrl.last_good_cmd().is_some());
    }

    #[test]
    fn test_left_curve() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let ys = xs().iter().map(|x| 0.1 * x + 0.005 * x * x).collect();
        let t = telem(xs(), ys, 10.0);

        let (cmd, report) = ctrl.proc(&t).unwrap();

        assert!(report.measured_errors.epsi_rad < 0.0);
        assert!(report.measured_errors.cte_m.abs() < 1e-6);

        // Steering left is a negative command
        assert!(cmd.steering_angle < 0.0, "steering = {}", cmd.steering_angle);
        assert!(cmd.steering_angle >= -1.0);
        assert!(cmd.throttle.abs() <= 1.0);

        // The predicted trajectory bends towards the path
        assert!(cmd.mpc_y.last().map_or(false, |y| *y > 0.0));
    }

    #[test]
    fn test_left_curve_from_rest() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let ys = xs().iter().map(|x| 0.1 * x + 0.005 * x * x).collect();
        let t = telem(xs(), ys, 0.0);

        let (cmd, report) = ctrl.proc(&t).unwrap();

        assert!(!report.fallback_used);
        assert!(report.measured_errors.epsi_rad < 0.0);
        assert!(cmd.steering_angle < 0.0, "steering = {}", cmd.steering_angle);
        assert!(cmd.steering_angle >= -1.0);
        assert!(cmd.throttle > 0.0);
        assert!(cmd.throttle <= 1.0);
    }

    #[test]
    fn test_world_frame_pose() {
        // The same left curve seen from a rotated and translated pose gives
        // the same command
        let mut ctrl_a = MpcCtrl::new(test_params()).unwrap();
        let mut ctrl_b = MpcCtrl::new(test_params()).unwrap();

        let ys: Vec<f64> = xs().iter().map(|x| 0.1 * x + 0.005 * x * x).collect();
        let t_a = telem(xs(), ys.clone(), 10.0);

        let pose = Pose::new(-40.0, 110.0, 2.0);
        let world: Vec<Point2<f64>> = xs()
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| pose.vehicle_to_world(&Point2::new(x, y)))
            .collect();
        let t_b = Telemetry {
            ptsx: world.iter().map(|p| p.x).collect(),
            ptsy: world.iter().map(|p| p.y).collect(),
            x: -40.0,
            y: 110.0,
            psi: 2.0,
            ..t_a.clone()
        };

        let (cmd_a, _) = ctrl_a.proc(&t_a).unwrap();
        let (cmd_b, _) = ctrl_b.proc(&t_b).unwrap();

        assert!((cmd_a.steering_angle - cmd_b.steering_angle).abs() < 1e-2);
        assert!((cmd_a.throttle - cmd_b.throttle).abs() < 1e-2);
    }

    #[test]
    fn test_fallback_neutral() {
        let mut params = test_params();
        params.solver.max_iters = 1;
        params.solver.tolerance = 1e-12;
        let mut ctrl = MpcCtrl::new(params).unwrap();

        let ys = xs().iter().map(|x| 2.0 + 0.1 * x + 0.005 * x * x).collect();
        let (cmd, report) = ctrl.proc(&telem(xs(), ys, 10.0)).unwrap();

        assert!(report.fallback_used);
        assert_eq!(cmd.steering_angle, 0.0);
        assert_eq!(cmd.throttle, 0.0);
        assert!(cmd.mpc_x.is_empty());
        assert!(cmd.mpc_y.is_empty());
        assert_eq!(cmd.next_x.len(), 25);
        assert!(ctrl.last_good_cmd().is_none());
    }

    #[test]
    fn test_fallback_last_good() {
        let mut params = test_params();
        params.solver.max_iters = 1;
        params.solver.tolerance = 1e-12;
        let mut ctrl = MpcCtrl::new(params).unwrap();

        let good = MappedCmd {
            steering: -0.3,
            throttle: 0.2,
            ..Default::default()
        };
        ctrl.last_good_cmd = Some(good);

        let ys = xs().iter().map(|x| 2.0 + 0.1 * x + 0.005 * x * x).collect();
        let (cmd, report) = ctrl.proc(&telem(xs(), ys, 10.0)).unwrap();

        assert!(report.fallback_used);
        assert_eq!(cmd.steering_angle, -0.3);
        assert_eq!(cmd.throttle, 0.2);
        assert_eq!(ctrl.last_good_cmd(), Some(good));
    }

    #[test]
    fn test_timeout_fallback() {
        let mut params = test_params();
        params.solver.solve_timeout_s = 1e-9;
        params.solver.tolerance = 1e-12;
        let mut ctrl = MpcCtrl::new(params).unwrap();

        let good = MappedCmd {
            steering: 0.1,
            throttle: 0.4,
            ..Default::default()
        };
        ctrl.last_good_cmd = Some(good);

        let ys = xs().iter().map(|x| 2.0 + 0.1 * x + 0.005 * x * x).collect();
        let (cmd, report) = ctrl.proc(&telem(xs(), ys, 10.0)).unwrap();

        assert!(report.fallback_used);
        assert_eq!(cmd.steering_angle, ctrl.fallback_cmd().steering);
        assert_eq!(cmd.throttle, ctrl.fallback_cmd().throttle);
        assert_eq!(cmd.steering_angle, 0.1);
        assert_eq!(cmd.throttle, 0.4);
        assert!(cmd.mpc_x.is_empty());
    }

    #[test]
    fn test_bad_telemetry() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();

        let r = ctrl.proc(&telem(xs(), vec![0.0; 5], 0.0));
        assert!(matches!(
            r,
            Err(MpcCtrlError::InputError(InputError::MismatchedWaypoints { ptsx: 6, ptsy: 5 }))
        ));

        let r = ctrl.proc(&telem(vec![0.0, 1.0, 2.0], vec![0.0; 3], 0.0));
        assert!(matches!(
            r,
            Err(MpcCtrlError::InputError(InputError::TooFewWaypoints { required: 4, found: 3 }))
        ));

        let r = ctrl.proc(&telem(vec![], vec![], 0.0));
        assert!(matches!(r, Err(MpcCtrlError::InputError(InputError::NoWaypoints))));

        let r = ctrl.proc(&telem(xs(), vec![0.0; 6], std::f64::NAN));
        assert!(matches!(r, Err(MpcCtrlError::InputError(InputError::NonFinite("speed")))));

        // Coincident x values in the vehicle frame can't be fitted
        let r = ctrl.proc(&telem(vec![5.0; 4], vec![0.0, 1.0, 2.0, 3.0], 0.0));
        assert!(matches!(
            r,
            Err(MpcCtrlError::FittingError(FittingError::IllConditioned(3)))
        ));

        // A failed cycle doesn't affect the next one
        let (cmd, _) = ctrl.proc(&telem(xs(), vec![0.0; 6], 0.0)).unwrap();
        assert!(cmd.throttle > 0.0);
    }
}
