//! # Vehicle simulation
//!
//! A simple kinematic vehicle used to run the controller in closed loop
//! without the real vehicle. The simulation provides:
//!
//! - Ground truth telemetry built from the vehicle state and the waypoints of
//!   a reference track ahead of the vehicle.
//! - An actuation delay, emulated by holding commands in a queue for a whole
//!   number of cycles before they are applied.
//!
//! Time in the simulation is purely simulated, nothing here sleeps.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;

use comms_if::eqpt::vehicle::{SteerCmd, Telemetry};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::mpc_ctrl::Pose;
use util::maths::{deg_to_rad, wrap_pi};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the simulated vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleSimParams {
    /// Distance between the front axle and the centre of gravity.
    pub wheelbase_m: f64,

    /// Steering angle reached at a full scale command.
    pub max_steer_rad: f64,

    /// Time between a command being sent and it being applied.
    pub latency_s: f64,

    /// Simulated duration of one control cycle.
    pub period_s: f64,

    /// Number of waypoints sent in each telemetry record.
    pub num_waypoints: usize,
}

/// A simulated vehicle following a track.
#[derive(Debug, Clone)]
pub struct VehicleSim {
    params: VehicleSimParams,

    /// The full reference track in the world frame.
    track: Vec<Point2<f64>>,

    pose: Pose,
    speed_ms: f64,

    /// The command currently acting on the vehicle.
    applied: (f64, f64),

    /// Commands waiting for the actuation delay to expire.
    pending: VecDeque<(f64, f64)>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for VehicleSimParams {
    fn default() -> Self {
        Self {
            wheelbase_m: 2.67,
            max_steer_rad: deg_to_rad(25.0),
            latency_s: 0.1,
            period_s: 0.1,
            num_waypoints: 6,
        }
    }
}

impl VehicleSim {
    /// Create a new simulation with the vehicle at the given pose and speed.
    pub fn new(
        params: VehicleSimParams,
        track: Vec<Point2<f64>>,
        pose: Pose,
        speed_ms: f64,
    ) -> Self {
        let delay_cycles = (params.latency_s / params.period_s).round().max(0.0) as usize;

        Self {
            params,
            track,
            pose,
            speed_ms,
            applied: (0.0, 0.0),
            pending: std::iter::repeat((0.0, 0.0)).take(delay_cycles).collect(),
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn speed_ms(&self) -> f64 {
        self.speed_ms
    }

    /// Build the telemetry record for the current state.
    pub fn telemetry(&self) -> Telemetry {
        let waypoints = self.waypoints_ahead();

        Telemetry {
            ptsx: waypoints.iter().map(|p| p.x).collect(),
            ptsy: waypoints.iter().map(|p| p.y).collect(),
            x: self.pose.position_m.x,
            y: self.pose.position_m.y,
            psi: self.pose.heading_rad,
            speed: self.speed_ms,
            steering_angle: self.applied.0 * self.params.max_steer_rad,
            throttle: self.applied.1,
        }
    }

    /// Send a command to the vehicle. It takes effect once the actuation
    /// delay has passed.
    pub fn send(&mut self, cmd: &SteerCmd) {
        self.pending.push_back((cmd.steering_angle, cmd.throttle));

        if let Some(c) = self.pending.pop_front() {
            self.applied = c;
        }
    }

    /// Advance the simulation by one cycle.
    pub fn step(&mut self) {
        let dt = self.params.period_s;
        let v = self.speed_ms;
        let psi = self.pose.heading_rad;

        // Positive commands steer right, i.e. clockwise
        let steer_rad = -self.applied.0 * self.params.max_steer_rad;

        self.pose.position_m += Vector2::new(v * psi.cos() * dt, v * psi.sin() * dt);
        self.pose.heading_rad = wrap_pi(psi + v / self.params.wheelbase_m * steer_rad * dt);
        self.speed_ms = v + self.applied.1 * dt;
    }

    /// Distance from the vehicle to the nearest segment of the track.
    pub fn cross_track_distance(&self) -> f64 {
        let p = self.pose.position_m;

        self.track
            .windows(2)
            .map(|seg| point_segment_distance(&p, &seg[0], &seg[1]))
            .fold(std::f64::INFINITY, f64::min)
    }

    /// The next waypoints along the track, starting just behind the vehicle.
    fn waypoints_ahead(&self) -> Vec<Point2<f64>> {
        let p = self.pose.position_m;

        let nearest = self
            .track
            .iter()
            .enumerate()
            .map(|(i, w)| (i, nalgebra::distance_squared(&p, w)))
            .fold((0, std::f64::INFINITY), |best, cur| {
                if cur.1 < best.1 {
                    cur
                }
                else {
                    best
                }
            })
            .0;

        let n = self.params.num_waypoints;
        let start = nearest
            .saturating_sub(1)
            .min(self.track.len().saturating_sub(n));

        self.track.iter().skip(start).take(n).cloned().collect()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// A straight track along the world X axis.
pub fn straight_track(length_m: f64, spacing_m: f64) -> Vec<Point2<f64>> {
    let num = (length_m / spacing_m).ceil() as usize + 1;

    (0..num)
        .map(|i| Point2::new(i as f64 * spacing_m, 0.0))
        .collect()
}

/// A sinusoidal track along the world X axis.
pub fn sine_track(
    length_m: f64,
    spacing_m: f64,
    amplitude_m: f64,
    wavelength_m: f64,
) -> Vec<Point2<f64>> {
    straight_track(length_m, spacing_m)
        .into_iter()
        .map(|p| {
            Point2::new(
                p.x,
                amplitude_m * (std::f64::consts::TAU * p.x / wavelength_m).sin(),
            )
        })
        .collect()
}

fn point_segment_distance(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();

    if len_sq == 0.0 {
        return (p - a).norm();
    }

    let t = ((p - a).dot(&ab) / len_sq).max(0.0).min(1.0);

    (p - (a + ab * t)).norm()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mpc_ctrl::{test_params, MpcCtrl};
    use util::module::State;

    #[test]
    fn test_delay() {
        let track = straight_track(100.0, 5.0);
        let mut sim = VehicleSim::new(
            VehicleSimParams::default(),
            track,
            Pose::new(0.0, 0.0, 0.0),
            10.0,
        );

        let cmd = SteerCmd {
            steering_angle: 0.5,
            throttle: 0.3,
            ..Default::default()
        };

        // One cycle of delay, the first command is still the neutral one
        sim.send(&cmd);
        assert_eq!(sim.telemetry().steering_angle, 0.0);
        assert_eq!(sim.telemetry().throttle, 0.0);

        sim.send(&SteerCmd::default());
        assert!((sim.telemetry().steering_angle - 0.5 * sim.params.max_steer_rad).abs() < 1e-12);
        assert_eq!(sim.telemetry().throttle, 0.3);

        // Steering right turns clockwise
        sim.step();
        assert!(sim.pose().heading_rad < 0.0);
        assert!((sim.speed_ms() - 10.03).abs() < 1e-12);
    }

    #[test]
    fn test_telemetry_waypoints() {
        let track = straight_track(100.0, 5.0);
        let sim = VehicleSim::new(
            VehicleSimParams::default(),
            track,
            Pose::new(21.0, 1.0, 0.0),
            0.0,
        );

        let t = sim.telemetry();
        assert_eq!(t.ptsx, vec![15.0, 20.0, 25.0, 30.0, 35.0, 40.0]);
        assert_eq!(t.ptsy, vec![0.0; 6]);
        assert!((sim.cross_track_distance() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_closed_loop_converges() {
        let mut ctrl = MpcCtrl::new(test_params()).unwrap();
        let track = straight_track(300.0, 5.0);
        let mut sim = VehicleSim::new(
            VehicleSimParams::default(),
            track,
            Pose::new(0.0, 1.5, 0.0),
            10.0,
        );

        let initial_error = sim.cross_track_distance();
        let mut errors = Vec::new();

        for _ in 0..50 {
            let (cmd, _) = ctrl.proc(&sim.telemetry()).unwrap();

            assert!(cmd.steering_angle.abs() <= 1.0);
            assert!(cmd.throttle.abs() <= 1.0);

            sim.send(&cmd);
            sim.step();
            errors.push(sim.cross_track_distance());
        }

        let final_error = errors.iter().rev().take(10).sum::<f64>() / 10.0;
        assert!(
            final_error < 0.5 * initial_error,
            "initial error {} m, final error {} m",
            initial_error,
            final_error
        );
    }
}
