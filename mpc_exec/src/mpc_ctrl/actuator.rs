//! # Actuator mapping
//!
//! Converts the optimiser's first step demands into the normalised command
//! units accepted by the vehicle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use util::maths::lin_map;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Maps model demands into actuator commands.
#[derive(Debug, Clone, Copy)]
pub struct ActuatorMapper {
    max_steer_rad: f64,
    min_throttle: f64,
    max_throttle: f64,
}

/// A normalised actuator command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MappedCmd {
    /// Normalised steering in [-1, 1], positive steers right.
    pub steering: f64,

    /// Throttle within the configured throttle bounds.
    pub throttle: f64,

    /// True if the steering demand was outside the steering bound.
    pub steer_limited: bool,

    /// True if the throttle demand was outside the throttle bounds.
    pub throttle_limited: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ActuatorMapper {
    pub fn new(max_steer_rad: f64, min_throttle: f64, max_throttle: f64) -> Self {
        Self {
            max_steer_rad,
            min_throttle,
            max_throttle,
        }
    }

    /// Map a steering demand in the model convention (positive anticlockwise,
    /// radians) and a throttle demand into a command.
    pub fn map(&self, steer_rad: f64, throttle: f64) -> MappedCmd {
        // The actuator steers right for positive values so the sign flips
        let steering_raw = lin_map(
            (-self.max_steer_rad, self.max_steer_rad),
            (1.0, -1.0),
            steer_rad,
        );
        let steering = steering_raw.max(-1.0).min(1.0);
        let throttle_out = throttle.max(self.min_throttle).min(self.max_throttle);

        MappedCmd {
            steering,
            throttle: throttle_out,
            steer_limited: steering != steering_raw,
            throttle_limited: throttle_out != throttle,
        }
    }
}

impl MappedCmd {
    /// The neutral command, no steering and no throttle.
    pub fn neutral() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_map_sign() {
        let m = ActuatorMapper::new(0.5, -1.0, 1.0);

        // Anticlockwise (left) demand is a negative command
        let c = m.map(0.25, 0.3);
        assert!((c.steering - (-0.5)).abs() < 1e-12);
        assert_eq!(c.throttle, 0.3);
        assert!(!c.steer_limited);
        assert!(!c.throttle_limited);

        let c = m.map(-0.5, 0.0);
        assert!((c.steering - 1.0).abs() < 1e-12);

        let c = m.map(0.0, 0.0);
        assert_eq!(c.steering, 0.0);
    }

    #[test]
    fn test_map_clamps() {
        let m = ActuatorMapper::new(0.5, -0.5, 0.8);

        let c = m.map(1.0, 2.0);
        assert_eq!(c.steering, -1.0);
        assert_eq!(c.throttle, 0.8);
        assert!(c.steer_limited);
        assert!(c.throttle_limited);

        let c = m.map(-1.0, -2.0);
        assert_eq!(c.steering, 1.0);
        assert_eq!(c.throttle, -0.5);
        assert!(c.steer_limited);
        assert!(c.throttle_limited);
    }

    #[test]
    fn test_neutral() {
        let c = MappedCmd::neutral();
        assert_eq!(c.steering, 0.0);
        assert_eq!(c.throttle, 0.0);
    }
}
