//! Storage abstractions used by the attempt tracker
//!
//! - [`AttemptStore`] is the persistence interface: get / put / remove records
//!   by key, plus an overridable atomic failure increment.
//! - [`InMemoryAttemptStore`] is a process-local implementation, suitable for
//!   a single server instance and for tests.
//!
//! Stores shared across processes live in their own crates
//! (e.g. `tollgate-storage-sqlite`).

pub mod attempt;
pub mod memory;

pub use attempt::AttemptStore;
pub use memory::InMemoryAttemptStore;
