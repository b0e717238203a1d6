//! Store trait for per-identifier attempt records.
//!
//! This module defines the persistence interface the attempt tracker uses to
//! read, update and clear failure counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{AttemptRecord, FailureUpdate},
};

/// Key/value persistence for attempt records.
///
/// Keys are derived by the tracker (see [`crate::LockoutConfig::storage_key`]);
/// stores treat them as opaque strings.
///
/// # Failure Semantics
///
/// - Stored data that cannot be decoded must be reported as `Ok(None)` by
///   [`get`](Self::get), never as an error. Implementations should log it.
/// - Backend failures (I/O, connection, constraint) are returned as
///   [`crate::error::StorageError`].
///
/// # Security Considerations
///
/// The default [`record_failure`](Self::record_failure) is a plain
/// read-modify-write and can lose increments under concurrency. Stores that
/// are shared between processes or tasks must override it with an atomic
/// increment-and-check.
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Fetch the record stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, Error>;

    /// Insert or replace the record stored under `key`.
    async fn put(&self, key: &str, record: &AttemptRecord) -> Result<(), Error>;

    /// Delete the record stored under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), Error>;

    /// Apply one failed attempt to the record under `key` and return the result.
    ///
    /// A missing or malformed record is treated as zero prior failures.
    async fn record_failure(
        &self,
        key: &str,
        update: &FailureUpdate,
    ) -> Result<AttemptRecord, Error> {
        let existing = self.get(key).await?;
        let record = AttemptRecord::apply_failure(existing, update);
        self.put(key, &record).await?;
        Ok(record)
    }

    /// Delete records last updated before `before` that are not locked at `now`.
    ///
    /// Returns the number of records deleted. Stores without retention support
    /// keep everything.
    async fn purge_stale(
        &self,
        _before: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(0)
    }

    /// Prepare the backing storage (create tables, run migrations).
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }
}
