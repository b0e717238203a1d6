//! Repository implementations for SQLite storage

pub mod attempt;

pub use attempt::SqliteAttemptStore;
