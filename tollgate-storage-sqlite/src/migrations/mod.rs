//! Schema migrations for the SQLite attempt store.
//!
//! Applied versions are tracked in the `_tollgate_migrations` table; each
//! migration runs in its own transaction together with its bookkeeping row.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

const MIGRATIONS_TABLE: &str = "_tollgate_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A single, versioned schema change.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError>;

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError>;
}

/// Every migration the attempt store needs, in version order.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateLoginAttemptsTable),
        Box::new(IndexLoginAttemptsByLastAttempt),
    ]
}

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the bookkeeping table if it does not exist yet.
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )"#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply every migration that has not been applied yet.
    pub async fn up(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            let mut tx = self.pool.begin().await?;
            migration.up(&mut *tx).await?;
            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at) VALUES (?, ?, ?)"
            ))
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }

        Ok(())
    }

    /// Roll back applied migrations, newest first.
    pub async fn down(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            let mut tx = self.pool.begin().await?;
            migration.down(&mut *tx).await?;
            sqlx::query(&format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?"))
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }

    pub async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let applied: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {MIGRATIONS_TABLE} WHERE version = ?)"
        ))
        .bind(version)
        .fetch_one(&self.pool)
        .await?;

        Ok(applied)
    }

    pub async fn applied_versions(&self) -> Result<Vec<i64>, MigrationError> {
        let versions: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT version FROM {MIGRATIONS_TABLE} ORDER BY version"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(versions)
    }
}

pub struct CreateLoginAttemptsTable;

#[async_trait]
impl Migration for CreateLoginAttemptsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        // Timestamps are unix milliseconds.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                storage_key TEXT PRIMARY KEY,
                identifier TEXT NOT NULL,
                failure_count INTEGER NOT NULL,
                last_attempt_at INTEGER NOT NULL,
                locked_until INTEGER
            )"#,
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS login_attempts")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub struct IndexLoginAttemptsByLastAttempt;

#[async_trait]
impl Migration for IndexLoginAttemptsByLastAttempt {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "IndexLoginAttemptsByLastAttempt"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_last_attempt_at \
             ON login_attempts(last_attempt_at)",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP INDEX IF EXISTS idx_login_attempts_last_attempt_at")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
