//! Service layer for throttling logic
//!
//! This module contains the service that coordinates attempt stores, the
//! clock and the lockout configuration.

pub mod attempt_tracker;

pub use attempt_tracker::{AttemptAcquisition, AttemptPermit, AttemptTracker};
