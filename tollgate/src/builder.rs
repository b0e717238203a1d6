//! Builder pattern for constructing Tollgate instances
//!
//! This module provides a type-safe builder for creating [`Tollgate`] instances
//! with compile-time validation that an attempt store was configured.
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::Duration;
//! use tollgate::TollgateBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // SQLite with auto-migration
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Process-local store with a stricter policy
//!     let tollgate = TollgateBuilder::new()
//!         .with_memory_store()
//!         .with_max_attempts(3)
//!         .with_lockout_duration(Duration::minutes(30))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use chrono::Duration;
use tollgate_core::{
    AttemptStore, AttemptTracker, Clock, FailureMode, InMemoryAttemptStore, LockoutConfig,
    SystemClock,
};

use crate::Tollgate;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Tollgate instance.
#[derive(Debug, thiserror::Error)]
pub enum TollgateBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no attempt store has been configured yet.
///
/// This is the initial state of [`TollgateBuilder`].
pub struct NoStorage;

/// Marker type indicating an attempt store has been configured.
pub struct WithStorage<S: AttemptStore> {
    store: Arc<S>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Tollgate`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, a store must be configured
/// - [`WithStorage<S>`]: Store configured, ready to build or adjust the policy
pub struct TollgateBuilder<Storage> {
    storage: Storage,
    config: LockoutConfig,
    clock: Arc<dyn Clock>,
    apply_migrations: bool,
}

impl Default for TollgateBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl TollgateBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Lockout: enabled, 5 attempts, 15 minute lockout, fail closed
    /// - Clock: system clock
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: LockoutConfig::default(),
            clock: Arc::new(SystemClock),
            apply_migrations: false,
        }
    }

    /// Use an existing attempt store.
    pub fn with_store<S: AttemptStore>(self, store: Arc<S>) -> TollgateBuilder<WithStorage<S>> {
        TollgateBuilder {
            storage: WithStorage { store },
            config: self.config,
            clock: self.clock,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Keep attempt records in process memory.
    ///
    /// Counters are lost on restart and not shared between processes.
    pub fn with_memory_store(self) -> TollgateBuilder<WithStorage<InMemoryAttemptStore>> {
        self.with_store(Arc::new(InMemoryAttemptStore::new()))
    }
}

#[cfg(feature = "sqlite")]
impl TollgateBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<TollgateBuilder<WithStorage<crate::SqliteAttemptStore>>, TollgateBuilderError> {
        let store = crate::SqliteAttemptStore::connect(url)
            .await
            .map_err(|e| TollgateBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }
}

// ============================================================================
// Configuration Methods (available in any state)
// ============================================================================

impl<Storage> TollgateBuilder<Storage> {
    /// Replace the whole lockout configuration.
    pub fn with_config(mut self, config: LockoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of consecutive failures that triggers a lockout.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.config.lockout_duration = duration;
        self
    }

    /// How to answer when the attempt store cannot be read.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.config.failure_mode = mode;
        self
    }

    /// Restart the failure count after a lock has expired instead of keeping it.
    pub fn reset_after_lock_expiry(mut self, reset: bool) -> Self {
        self.config.reset_after_lock_expiry = reset;
        self
    }

    /// Purge records idle for longer than `period` (see [`Tollgate::start_cleanup_task`]).
    pub fn with_retention_period(mut self, period: Duration) -> Self {
        self.config.retention_period = Some(period);
        self
    }

    /// Turn throttling off entirely; every attempt is allowed and nothing is recorded.
    pub fn disable_lockout(mut self) -> Self {
        self.config.enabled = false;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the store's migrations during [`build`](TollgateBuilder::build).
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

impl<S: AttemptStore> TollgateBuilder<WithStorage<S>> {
    /// Build the Tollgate instance.
    ///
    /// Validates the configuration and, if requested, runs migrations.
    pub async fn build(self) -> Result<Tollgate<S>, TollgateBuilderError> {
        let tracker = AttemptTracker::try_new(self.storage.store, self.config, self.clock)
            .map_err(|e| TollgateBuilderError::InvalidConfiguration(e.to_string()))?;

        if self.apply_migrations {
            tracker
                .store()
                .migrate()
                .await
                .map_err(|e| TollgateBuilderError::Migration(e.to_string()))?;
        }

        Ok(Tollgate::from_tracker(tracker))
    }
}
