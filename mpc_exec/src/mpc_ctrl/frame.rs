//! # Reference frame transforms
//!
//! Waypoints arrive in the world frame. All path fitting and optimisation is
//! done in the vehicle frame, whose origin is the vehicle's position with the
//! X axis along the vehicle heading and Y to the left.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{Isometry2, Point2, Vector2};
use serde::{Deserialize, Serialize};

// Internal
use super::InputError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose (position and heading in the world frame) of the vehicle.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose {
    /// The position in the world frame
    pub position_m: Point2<f64>,

    /// Heading anticlockwise from the world X axis.
    ///
    /// Units: radians
    pub heading_rad: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Point2::new(x_m, y_m),
            heading_rad,
        }
    }

    /// Get the rigid transform which takes points from the vehicle frame into
    /// the world frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(
            Vector2::new(self.position_m.x, self.position_m.y),
            self.heading_rad,
        )
    }

    /// Express a world frame point in the vehicle frame.
    ///
    /// This translates by the negative vehicle position and then rotates by the
    /// negative heading.
    pub fn world_to_vehicle(&self, point_m_world: &Point2<f64>) -> Point2<f64> {
        self.isometry().inverse_transform_point(point_m_world)
    }

    /// Express a vehicle frame point in the world frame.
    pub fn vehicle_to_world(&self, point_m_veh: &Point2<f64>) -> Point2<f64> {
        self.isometry().transform_point(point_m_veh)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Transform a list of world frame waypoints into the vehicle frame.
///
/// Length and order are preserved. An empty list is an input error as the
/// rest of the pipeline cannot do anything with it.
pub fn to_vehicle_frame(
    pose: &Pose,
    waypoints_m_world: &[Point2<f64>],
) -> Result<Vec<Point2<f64>>, InputError> {
    if waypoints_m_world.is_empty() {
        return Err(InputError::NoWaypoints);
    }

    Ok(waypoints_m_world
        .iter()
        .map(|p| pose.world_to_vehicle(p))
        .collect())
}

/// Transform a list of vehicle frame points back into the world frame.
pub fn to_world_frame(pose: &Pose, points_m_veh: &[Point2<f64>]) -> Vec<Point2<f64>> {
    points_m_veh
        .iter()
        .map(|p| pose.vehicle_to_world(p))
        .collect()
}
