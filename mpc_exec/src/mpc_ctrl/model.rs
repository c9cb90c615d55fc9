//! # Horizon model
//!
//! The kinematic bicycle model rolled out over the prediction horizon, and the
//! cost of the resulting trajectory.
//!
//! The optimisation is posed in single shooting form: only the actuator
//! sequence is a decision variable, and the states are found by rolling the
//! model forward from the predicted initial state. This eliminates the model
//! equality constraints, leaving only box bounds on the actuators.
//!
//! The decision vector is laid out as `[delta_0, a_0, delta_1, a_1, ...]`
//! where `delta` is the steering angle (model convention, positive
//! anticlockwise) and `a` the acceleration.
//!
//! Gradients are exact, computed with forward mode automatic differentiation
//! by seeding one decision variable at a time.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use num_dual::{Dual64, DualNum};

// Internal
use super::{MpcParams, PathPolynomial, VehicleState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Model state carrying derivatives with respect to a single decision
/// variable.
#[derive(Debug, Copy, Clone)]
struct DualState {
    x: Dual64,
    y: Dual64,
    psi: Dual64,
    v: Dual64,
    cte: Dual64,
    epsi: Dual64,
}

/// The horizon optimisation problem for a single cycle.
pub struct HorizonModel<'a> {
    path: &'a PathPolynomial,
    initial: VehicleState,
    params: &'a MpcParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DualState {
    fn from_vehicle(s: &VehicleState) -> Self {
        Self {
            x: Dual64::from(s.x_m),
            y: Dual64::from(s.y_m),
            psi: Dual64::from(s.psi_rad),
            v: Dual64::from(s.v_ms),
            cte: Dual64::from(s.cte_m),
            epsi: Dual64::from(s.epsi_rad),
        }
    }

    fn to_vehicle(&self) -> VehicleState {
        VehicleState {
            x_m: self.x.re,
            y_m: self.y.re,
            psi_rad: self.psi.re,
            v_ms: self.v.re,
            cte_m: self.cte.re,
            epsi_rad: self.epsi.re,
        }
    }

    /// Advance the state by one step of length `dt`.
    ///
    /// The errors of the next state are measured against the path at this
    /// state's x position.
    fn step(
        &self,
        path: &PathPolynomial,
        delta: Dual64,
        accel: Dual64,
        dt: Dual64,
        lf: Dual64,
    ) -> Self {
        let f_x = path.eval_dual(self.x);
        let psi_des = path.slope_dual(self.x).atan();
        let yaw_step = self.v / lf * delta * dt;

        Self {
            x: self.x + self.v * self.psi.cos() * dt,
            y: self.y + self.v * self.psi.sin() * dt,
            psi: self.psi + yaw_step,
            v: self.v + accel * dt,
            cte: (f_x - self.y) + self.v * self.epsi.sin() * dt,
            epsi: (self.psi - psi_des) + yaw_step,
        }
    }
}

impl<'a> HorizonModel<'a> {
    pub fn new(path: &'a PathPolynomial, initial: VehicleState, params: &'a MpcParams) -> Self {
        Self {
            path,
            initial,
            params,
        }
    }

    /// Length of the decision vector.
    pub fn num_vars(&self) -> usize {
        2 * self.params.horizon_steps
    }

    /// Total cost of the actuator sequence `u`.
    pub fn cost(&self, u: &[f64]) -> f64 {
        let u_dual: Vec<Dual64> = u.iter().map(|&v| Dual64::from(v)).collect();
        self.cost_dual(&u_dual).re
    }

    /// Gradient of the cost with respect to `u`, written into `grad`.
    pub fn gradient(&self, u: &[f64], grad: &mut [f64]) {
        let mut u_dual: Vec<Dual64> = u.iter().map(|&v| Dual64::from(v)).collect();

        for i in 0..u.len() {
            u_dual[i].eps = 1.0;
            grad[i] = self.cost_dual(&u_dual).eps;
            u_dual[i].eps = 0.0;
        }
    }

    /// Roll the model forward under `u`, returning the `N + 1` states of the
    /// horizon starting with the initial state.
    pub fn rollout(&self, u: &[f64]) -> Vec<VehicleState> {
        let u_dual: Vec<Dual64> = u.iter().map(|&v| Dual64::from(v)).collect();

        self.rollout_dual(&u_dual)
            .iter()
            .map(|s| s.to_vehicle())
            .collect()
    }

    fn rollout_dual(&self, u: &[Dual64]) -> Vec<DualState> {
        let dt = Dual64::from(self.params.step_dt_s);
        let lf = Dual64::from(self.params.wheelbase_m);

        let mut states = Vec::with_capacity(self.params.horizon_steps + 1);
        let mut state = DualState::from_vehicle(&self.initial);
        states.push(state);

        for act in u.chunks_exact(2) {
            state = state.step(self.path, act[0], act[1], dt, lf);
            states.push(state);
        }

        states
    }

    fn cost_dual(&self, u: &[Dual64]) -> Dual64 {
        let w = &self.params.weights;
        let v_ref = Dual64::from(self.params.ref_speed_ms);
        let weight = |k: f64| Dual64::from(k);

        let mut cost = Dual64::from(0.0);

        // State terms, the initial state is fixed so doesn't contribute
        for s in self.rollout_dual(u).iter().skip(1) {
            let dv = s.v - v_ref;
            cost = cost
                + weight(w.cte) * s.cte * s.cte
                + weight(w.epsi) * s.epsi * s.epsi
                + weight(w.speed) * dv * dv;
        }

        // Actuation magnitude
        for act in u.chunks_exact(2) {
            cost = cost + weight(w.steer) * act[0] * act[0] + weight(w.throttle) * act[1] * act[1];
        }

        // Actuation rate
        for pair in u.windows(4).step_by(2) {
            let d_steer = pair[2] - pair[0];
            let d_throttle = pair[3] - pair[1];
            cost = cost
                + weight(w.steer_rate) * d_steer * d_steer
                + weight(w.throttle_rate) * d_throttle * d_throttle;
        }

        cost
    }
}
