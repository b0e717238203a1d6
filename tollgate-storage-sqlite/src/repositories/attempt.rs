//! SQLite implementation of the attempt store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tollgate_core::{
    Error,
    error::StorageError,
    repositories::AttemptStore,
    storage::{AttemptRecord, FailureUpdate},
};

use crate::migrations::{self, SqliteMigrationManager};

/// Attempt store persisting records in a `login_attempts` table.
///
/// [`record_failure`](AttemptStore::record_failure) is a single upsert, so
/// concurrent failures for one key are never lost, even across processes
/// sharing the database file.
#[derive(Debug, Clone)]
pub struct SqliteAttemptStore {
    pool: SqlitePool,
}

impl SqliteAttemptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url` (e.g. `sqlite://attempts.db?mode=rwc`).
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            StorageError::Connection(format!("Failed to connect to {database_url}"))
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Row shape of `login_attempts`; timestamps are unix milliseconds.
#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptRecord {
    identifier: String,
    failure_count: i64,
    last_attempt_at: i64,
    locked_until: Option<i64>,
}

impl TryFrom<SqliteAttemptRecord> for AttemptRecord {
    type Error = String;

    fn try_from(row: SqliteAttemptRecord) -> Result<Self, Self::Error> {
        let failure_count = u32::try_from(row.failure_count)
            .map_err(|_| format!("failure_count out of range: {}", row.failure_count))?;
        let last_attempt_at = DateTime::from_timestamp_millis(row.last_attempt_at)
            .ok_or_else(|| format!("last_attempt_at out of range: {}", row.last_attempt_at))?;
        let locked_until = row
            .locked_until
            .map(|ms| {
                DateTime::from_timestamp_millis(ms)
                    .ok_or_else(|| format!("locked_until out of range: {ms}"))
            })
            .transpose()?;

        Ok(AttemptRecord {
            identifier: row.identifier,
            failure_count,
            last_attempt_at,
            locked_until,
        })
    }
}

// A row with a non-integer or negative count is malformed and counts as no prior
// failures; so does an expired lock when reset_after_lock_expiry (?6) is set.
const RECORD_FAILURE_SQL: &str = r#"
    INSERT INTO login_attempts
        (storage_key, identifier, failure_count, last_attempt_at, locked_until)
    VALUES (?1, ?2, 1, ?3, CASE WHEN 1 >= ?4 THEN ?5 ELSE NULL END)
    ON CONFLICT(storage_key) DO UPDATE SET
        identifier = excluded.identifier,
        failure_count = CASE
            WHEN typeof(failure_count) != 'integer'
                OR failure_count < 0
                OR (?6 AND typeof(locked_until) = 'integer' AND locked_until <= ?3)
            THEN 1
            ELSE failure_count + 1
        END,
        last_attempt_at = ?3,
        locked_until = CASE
            WHEN (CASE
                WHEN typeof(failure_count) != 'integer'
                    OR failure_count < 0
                    OR (?6 AND typeof(locked_until) = 'integer' AND locked_until <= ?3)
                THEN 1
                ELSE failure_count + 1
            END) >= ?4 THEN ?5
            ELSE NULL
        END
    RETURNING identifier, failure_count, last_attempt_at, locked_until
"#;

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptRecord>(
            r#"
            SELECT identifier, failure_count, last_attempt_at, locked_until
            FROM login_attempts
            WHERE storage_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(None) => Ok(None),
            Ok(Some(row)) => match AttemptRecord::try_from(row) {
                Ok(record) => Ok(Some(record)),
                Err(reason) => {
                    tracing::warn!(
                        key = key,
                        reason = %reason,
                        "Ignoring malformed attempt record"
                    );
                    Ok(None)
                }
            },
            Err(e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_))) => {
                tracing::warn!(key = key, error = %e, "Ignoring undecodable attempt record");
                Ok(None)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to get attempt record");
                Err(StorageError::Database("Failed to get attempt record".to_string()).into())
            }
        }
    }

    async fn put(&self, key: &str, record: &AttemptRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts
                (storage_key, identifier, failure_count, last_attempt_at, locked_until)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(storage_key) DO UPDATE SET
                identifier = excluded.identifier,
                failure_count = excluded.failure_count,
                last_attempt_at = excluded.last_attempt_at,
                locked_until = excluded.locked_until
            "#,
        )
        .bind(key)
        .bind(&record.identifier)
        .bind(i64::from(record.failure_count))
        .bind(record.last_attempt_at.timestamp_millis())
        .bind(record.locked_until.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to store attempt record");
            StorageError::Database("Failed to store attempt record".to_string())
        })?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM login_attempts WHERE storage_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to remove attempt record");
                StorageError::Database("Failed to remove attempt record".to_string())
            })?;

        Ok(())
    }

    async fn record_failure(
        &self,
        key: &str,
        update: &FailureUpdate,
    ) -> Result<AttemptRecord, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptRecord>(RECORD_FAILURE_SQL)
            .bind(key)
            .bind(&update.identifier)
            .bind(update.at.timestamp_millis())
            .bind(i64::from(update.max_attempts))
            .bind(update.lock_expiry().timestamp_millis())
            .bind(update.reset_after_lock_expiry)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to record failed attempt");
                StorageError::Database("Failed to record failed attempt".to_string())
            })?;

        AttemptRecord::try_from(row).map_err(|reason| {
            tracing::error!(reason = %reason, "Recorded attempt could not be read back");
            StorageError::Database("Recorded attempt could not be read back".to_string()).into()
        })
    }

    async fn purge_stale(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, Error> {
        // Locked rows are kept so a purge can never lift a lock early.
        let result = sqlx::query(
            r#"
            DELETE FROM login_attempts
            WHERE last_attempt_at < ?
            AND (locked_until IS NULL OR locked_until <= ?)
            "#,
        )
        .bind(before.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to purge stale attempt records");
            StorageError::Database("Failed to purge stale attempt records".to_string())
        })?;

        Ok(result.rows_affected())
    }

    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager
            .initialize()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        manager
            .up(&migrations::all())
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(())
    }
}
