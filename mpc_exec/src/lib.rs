//! # MPC library.
//!
//! This library allows other crates in the workspace, and the executables in this crate, to access
//! the controller and the simulation used to test it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// MPC control - computes steering and throttle commands which track the reference path
pub mod mpc_ctrl;

/// Vehicle simulation - a kinematic vehicle with actuation delay for closed loop testing
pub mod sim;
