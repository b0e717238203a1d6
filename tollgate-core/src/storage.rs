//! Data model shared by attempt stores and the attempt tracker.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockoutError;

/// Default number of consecutive failures that triggers a lockout.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout length in minutes.
pub const DEFAULT_LOCKOUT_MINUTES: i64 = 15;

/// Default prefix prepended to an identifier to form its storage key.
pub const DEFAULT_KEY_PREFIX: &str = "login_attempts_";

/// Longest lockout [`LockoutConfig::validate`] accepts.
pub const MAX_LOCKOUT_DAYS: i64 = 365;

/// Longest retention period [`LockoutConfig::validate`] accepts.
pub const MAX_RETENTION_DAYS: i64 = 10 * 365;

/// Whole seconds (rounded up) from `now` until `until`, or `None` once it has passed.
fn seconds_until(until: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    let remaining_ms = until.signed_duration_since(now).num_milliseconds();
    u64::try_from(remaining_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(|ms| ms.div_ceil(1000))
}

// ============================================================================
// Attempt Records
// ============================================================================

/// Persisted failure counter and lock state for one identifier.
///
/// A record only exists once a failure has been recorded; a missing record
/// means zero failures and no lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub identifier: String,
    pub failure_count: u32,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Whether the lock is still in force at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Whether a lock was set and has since run out.
    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }

    /// Whole seconds (rounded up) until the lock lifts, or `None` if not locked.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        seconds_until(self.locked_until?, now)
    }

    /// Apply one failed attempt to an existing record (or to none).
    ///
    /// The count keeps growing across expired locks unless
    /// [`FailureUpdate::reset_after_lock_expiry`] is set. `locked_until` is
    /// recomputed from the new count on every call.
    pub fn apply_failure(existing: Option<AttemptRecord>, update: &FailureUpdate) -> AttemptRecord {
        let mut record = match existing {
            Some(record)
                if !(update.reset_after_lock_expiry && record.lock_expired_at(update.at)) =>
            {
                record
            }
            _ => AttemptRecord {
                identifier: update.identifier.clone(),
                failure_count: 0,
                last_attempt_at: update.at,
                locked_until: None,
            },
        };

        record.failure_count = record.failure_count.saturating_add(1);
        record.last_attempt_at = update.at;
        record.locked_until =
            (record.failure_count >= update.max_attempts).then(|| update.lock_expiry());
        record
    }
}

/// Everything a store needs to apply a failed attempt atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    pub identifier: String,
    pub at: DateTime<Utc>,
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub reset_after_lock_expiry: bool,
}

impl FailureUpdate {
    /// The lock expiry this update sets if it crosses the threshold.
    ///
    /// Saturates at the latest representable instant instead of overflowing.
    pub fn lock_expiry(&self) -> DateTime<Utc> {
        self.at
            .checked_add_signed(self.lockout_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ============================================================================
// Decisions and Status
// ============================================================================

/// Answer to "may this identifier attempt a login now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDecision {
    pub allowed: bool,
    /// Seconds until the lock lifts. `None` when allowed, or when the lock
    /// state could not be read and the tracker failed closed.
    pub retry_after_seconds: Option<u64>,
}

impl AttemptDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
        }
    }

    pub fn deny(retry_after_seconds: Option<u64>) -> Self {
        Self {
            allowed: false,
            retry_after_seconds,
        }
    }

    /// User-facing lockout message; `None` when the attempt is allowed.
    ///
    /// Waits of a minute or more are rounded up to whole minutes.
    pub fn message(&self) -> Option<String> {
        if self.allowed {
            return None;
        }

        let wait = match self.retry_after_seconds {
            Some(seconds) if seconds >= 60 => plural(seconds.div_ceil(60), "minute"),
            Some(seconds) => plural(seconds, "second"),
            None => {
                return Some(
                    "Too many failed login attempts. Please try again later.".to_string(),
                );
            }
        };

        Some(format!(
            "Too many failed login attempts. Please try again in {wait}."
        ))
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Snapshot of an identifier's throttling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutStatus {
    pub identifier: String,
    pub failure_count: u32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    pub fn unlocked(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            failure_count: 0,
            is_locked: false,
            locked_until: None,
        }
    }

    pub fn from_record(
        identifier: &str,
        record: Option<&AttemptRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        match record {
            None => Self::unlocked(identifier),
            Some(record) => {
                let is_locked = record.is_locked_at(now);
                Self {
                    identifier: identifier.to_string(),
                    failure_count: record.failure_count,
                    is_locked,
                    locked_until: if is_locked { record.locked_until } else { None },
                }
            }
        }
    }

    /// Seconds until the lock lifts, measured from `now`.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        seconds_until(self.locked_until?, now)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// What the tracker does when the attempt store cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Deny the attempt.
    #[default]
    Closed,
    /// Allow the attempt and log the failure.
    Open,
}

/// Lockout behaviour, injected into the tracker at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutConfig {
    /// When false, every attempt is allowed and nothing is recorded.
    pub enabled: bool,
    /// Consecutive failures that trigger a lock.
    pub max_attempts: u32,
    /// How long a lock lasts, measured from the failure that set it.
    pub lockout_duration: Duration,
    /// Prefix for storage keys.
    pub key_prefix: String,
    /// Restart the failure count on the first failure after a lock expires.
    pub reset_after_lock_expiry: bool,
    pub failure_mode: FailureMode,
    /// Records idle for longer than this (and not locked) may be purged by
    /// the cleanup task. `None` keeps records until a success.
    pub retention_period: Option<Duration>,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration: Duration::minutes(DEFAULT_LOCKOUT_MINUTES),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            reset_after_lock_expiry: false,
            failure_mode: FailureMode::Closed,
            retention_period: None,
        }
    }
}

impl LockoutConfig {
    /// A configuration with throttling turned off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The storage key for an identifier.
    pub fn storage_key(&self, identifier: &str) -> String {
        format!("{}{identifier}", self.key_prefix)
    }

    pub fn validate(&self) -> Result<(), LockoutError> {
        if self.max_attempts == 0 {
            return Err(LockoutError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.lockout_duration <= Duration::zero() {
            return Err(LockoutError::InvalidConfiguration(
                "lockout_duration must be positive".to_string(),
            ));
        }

        if self.lockout_duration > Duration::days(MAX_LOCKOUT_DAYS) {
            return Err(LockoutError::InvalidConfiguration(format!(
                "lockout_duration must not exceed {MAX_LOCKOUT_DAYS} days"
            )));
        }

        if let Some(retention) = self.retention_period {
            if retention <= Duration::zero() {
                return Err(LockoutError::InvalidConfiguration(
                    "retention_period must be positive".to_string(),
                ));
            }

            if retention > Duration::days(MAX_RETENTION_DAYS) {
                return Err(LockoutError::InvalidConfiguration(format!(
                    "retention_period must not exceed {MAX_RETENTION_DAYS} days"
                )));
            }
        }

        Ok(())
    }
}
