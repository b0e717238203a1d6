//! SQLite storage backend for tollgate.
//!
//! [`SqliteAttemptStore`] keeps attempt records in a single `login_attempts`
//! table and increments failure counters with one atomic upsert, so several
//! server processes can share a database file without losing failures.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tollgate_core::{AttemptStore, AttemptTracker, LockoutConfig};
//! use tollgate_storage_sqlite::SqliteAttemptStore;
//!
//! # async fn run() -> Result<(), tollgate_core::Error> {
//! let store = SqliteAttemptStore::connect("sqlite://attempts.db?mode=rwc").await?;
//! store.migrate().await?;
//!
//! let tracker = AttemptTracker::new(Arc::new(store), LockoutConfig::default());
//! let decision = tracker.can_attempt("user@example.com").await;
//! # let _ = decision;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

pub use migrations::{MigrationError, SqliteMigrationManager};
pub use repositories::SqliteAttemptStore;
