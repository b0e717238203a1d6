//! # Tollgate
//!
//! Tollgate guards a login flow that is backed by an external identity
//! provider. It does two things:
//!
//! - Checks new passwords against a fixed strength policy
//!   ([`Tollgate::validate_password`])
//! - Throttles login attempts per identifier: after repeated failures the
//!   identifier is locked out for a while ([`Tollgate::authenticate`],
//!   [`Tollgate::can_attempt`], [`Tollgate::record_result`])
//!
//! Attempt records live in an [`AttemptStore`]. The in-memory store suits a
//! single process; the SQLite store (feature `sqlite`, on by default) keeps the
//! counters server-side and increments them atomically.
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tollgate::{CredentialVerifier, LoginOutcome, TollgateBuilder};
//!
//! struct Provider;
//!
//! #[async_trait]
//! impl CredentialVerifier for Provider {
//!     type Error = std::io::Error;
//!
//!     async fn verify(&self, _identifier: &str, _password: &str) -> Result<bool, Self::Error> {
//!         Ok(false)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tollgate = TollgateBuilder::new()
//!         .with_sqlite("sqlite://attempts.db?mode=rwc")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     match tollgate.authenticate("user@example.com", "hunter2", &Provider).await? {
//!         LoginOutcome::Authenticated => println!("welcome"),
//!         LoginOutcome::Rejected { remaining_attempts } => {
//!             println!("wrong password, {remaining_attempts:?} attempts left")
//!         }
//!         LoginOutcome::Locked { .. } => println!("too many attempts"),
//!     }
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use tollgate_core::validation::{normalize_identifier, validate_identifier};

mod builder;
mod verifier;

pub use builder::{NoStorage, TollgateBuilder, TollgateBuilderError, WithStorage};
pub use verifier::CredentialVerifier;

// Re-export core types
pub use tollgate_core::{
    AttemptAcquisition, AttemptDecision, AttemptPermit, AttemptRecord, AttemptStore,
    AttemptTracker, Clock, Error as CoreError, FailureMode, InMemoryAttemptStore, LockoutConfig,
    LockoutStatus, ManualClock, PasswordValidation, PolicyViolation, SystemClock, check_password,
    validate_password,
};

#[cfg(feature = "sqlite")]
pub use tollgate_storage_sqlite::SqliteAttemptStore;

/// Errors that can occur when using Tollgate.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    /// Error raised by the attempt store or by input validation
    #[error(transparent)]
    Core(#[from] tollgate_core::Error),

    /// The credential verifier could not answer; nothing was recorded
    #[error("Credential verifier error: {0}")]
    Verifier(Box<dyn std::error::Error + Send + Sync>),
}

/// Result of [`Tollgate::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The verifier accepted the credentials; the failure count was cleared.
    Authenticated,
    /// The verifier rejected the credentials.
    ///
    /// `remaining_attempts` is the number of further failures allowed before
    /// a lockout, or `None` when throttling is disabled.
    Rejected { remaining_attempts: Option<u32> },
    /// The identifier is locked out, either from earlier failures or by this
    /// one. The verifier was not called when the lock was already in force.
    Locked { retry_after_seconds: Option<u64> },
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Password policy and login throttling for one attempt store.
///
/// Identifiers passed to any method are normalized (trimmed,
/// ASCII-lowercased) before use, so `User@Example.com` and
/// `user@example.com` share one counter.
///
/// `Tollgate` is cheap to clone; clones share the tracker and its permits.
pub struct Tollgate<S: AttemptStore> {
    tracker: Arc<AttemptTracker<S>>,
}

impl<S: AttemptStore> Clone for Tollgate<S> {
    fn clone(&self) -> Self {
        Self {
            tracker: Arc::clone(&self.tracker),
        }
    }
}

impl<S: AttemptStore> Tollgate<S> {
    /// Create a Tollgate instance over `store` reading the system clock.
    ///
    /// Prefer [`TollgateBuilder`], which also validates the configuration.
    pub fn new(store: Arc<S>, config: LockoutConfig) -> Self {
        Self::from_tracker(AttemptTracker::new(store, config))
    }

    pub fn from_tracker(tracker: AttemptTracker<S>) -> Self {
        Self {
            tracker: Arc::new(tracker),
        }
    }

    pub fn tracker(&self) -> &AttemptTracker<S> {
        &self.tracker
    }

    pub fn config(&self) -> &LockoutConfig {
        self.tracker.config()
    }

    /// Run the store's migrations.
    pub async fn migrate(&self) -> Result<(), TollgateError> {
        self.tracker.store().migrate().await?;
        Ok(())
    }

    /// Check a new password against the strength policy.
    ///
    /// The rules are checked in order (length, digit, uppercase, special
    /// character) and only the first violation is reported.
    pub fn validate_password(&self, password: &str) -> PasswordValidation {
        validate_password(password)
    }

    /// Like [`validate_password`](Self::validate_password), but a weak
    /// password is an error carrying the violated rule.
    pub fn require_strong_password(&self, password: &str) -> Result<(), TollgateError> {
        tollgate_core::require_strong_password(password).map_err(tollgate_core::Error::from)?;
        Ok(())
    }

    /// Read-only check whether `identifier` may attempt a login now.
    pub async fn can_attempt(&self, identifier: &str) -> AttemptDecision {
        self.tracker
            .can_attempt(&normalize_identifier(identifier))
            .await
    }

    /// Report the outcome of a credential check made after [`can_attempt`](Self::can_attempt).
    pub async fn record_result(
        &self,
        identifier: &str,
        success: bool,
    ) -> Result<(), TollgateError> {
        self.tracker
            .record_result(&normalize_identifier(identifier), success)
            .await?;
        Ok(())
    }

    /// Reserve the attempt slot for `identifier`; see [`AttemptTracker::try_acquire_attempt`].
    pub async fn try_acquire_attempt(&self, identifier: &str) -> AttemptAcquisition<'_, S> {
        self.tracker
            .try_acquire_attempt(&normalize_identifier(identifier))
            .await
    }

    /// Check, verify and record one login attempt.
    ///
    /// The verifier is only called when the identifier is not locked out, and
    /// concurrent calls for the same identifier are serialized so that no more
    /// than `max_attempts` failures can be verified before the lock applies.
    ///
    /// # Errors
    ///
    /// - [`TollgateError::Verifier`] when the verifier fails; nothing is recorded.
    /// - [`TollgateError::Core`] for an empty identifier, or when a failed
    ///   attempt cannot be recorded. If a successful attempt cannot be
    ///   recorded, the error is returned under [`FailureMode::Closed`] and
    ///   logged under [`FailureMode::Open`].
    pub async fn authenticate<V: CredentialVerifier>(
        &self,
        identifier: &str,
        password: &str,
        verifier: &V,
    ) -> Result<LoginOutcome, TollgateError> {
        let identifier = validate_identifier(identifier).map_err(tollgate_core::Error::from)?;

        let permit = match self.tracker.try_acquire_attempt(&identifier).await {
            AttemptAcquisition::Granted(permit) => permit,
            AttemptAcquisition::Denied {
                retry_after_seconds,
            } => {
                tracing::debug!(identifier = %identifier, "Login attempt refused while locked");
                return Ok(LoginOutcome::Locked {
                    retry_after_seconds,
                });
            }
        };

        let verified = verifier
            .verify(&identifier, password)
            .await
            .map_err(|e| TollgateError::Verifier(Box::new(e)))?;

        if verified {
            return match permit.complete(true).await {
                Ok(_) => Ok(LoginOutcome::Authenticated),
                Err(e) => match self.tracker.config().failure_mode {
                    FailureMode::Closed => Err(e.into()),
                    FailureMode::Open => {
                        tracing::warn!(
                            identifier = %identifier,
                            error = %e,
                            "Failed to clear login attempts after successful login"
                        );
                        Ok(LoginOutcome::Authenticated)
                    }
                },
            };
        }

        let outcome = match permit.complete(false).await? {
            Some(record) if record.locked_until.is_some() => LoginOutcome::Locked {
                retry_after_seconds: record.retry_after_seconds(self.tracker.clock().now()),
            },
            Some(record) => LoginOutcome::Rejected {
                remaining_attempts: Some(
                    self.tracker
                        .config()
                        .max_attempts
                        .saturating_sub(record.failure_count),
                ),
            },
            None => LoginOutcome::Rejected {
                remaining_attempts: None,
            },
        };
        Ok(outcome)
    }

    /// Current lock state for `identifier`.
    pub async fn lockout_status(&self, identifier: &str) -> Result<LockoutStatus, TollgateError> {
        let status = self
            .tracker
            .lockout_status(&normalize_identifier(identifier))
            .await?;
        Ok(status)
    }

    /// Clear the attempt record for `identifier`. Returns `true` if it was locked.
    pub async fn unlock(&self, identifier: &str) -> Result<bool, TollgateError> {
        let was_locked = self
            .tracker
            .unlock(&normalize_identifier(identifier))
            .await?;
        Ok(was_locked)
    }

    /// Start purging stale attempt records in the background.
    ///
    /// Returns `None` unless a retention period is configured. The task stops
    /// when `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        self.tracker.start_cleanup_task(shutdown)
    }
}
