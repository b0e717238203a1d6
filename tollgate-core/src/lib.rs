//! Core functionality for tollgate
//!
//! This crate contains the building blocks for guarding a login flow:
//!
//! - [`validation`]: the password strength policy and identifier helpers
//! - [`AttemptStore`]: the persistence interface for per-identifier attempt records
//! - [`AttemptTracker`]: the service that decides whether an identifier may attempt a
//!   login and records the outcome
//!
//! Credential verification itself is out of scope; the tracker gates calls to an
//! external identity provider and records what it answered.
//!
//! Application code normally uses the `tollgate` crate, which wires these pieces
//! together.
pub mod clock;
pub mod error;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use repositories::{AttemptStore, InMemoryAttemptStore};
pub use services::{AttemptAcquisition, AttemptPermit, AttemptTracker};
pub use storage::{
    AttemptDecision, AttemptRecord, FailureMode, FailureUpdate, LockoutConfig, LockoutStatus,
};
pub use validation::{
    PasswordValidation, PolicyViolation, check_password, require_strong_password,
    validate_password,
};
