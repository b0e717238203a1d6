use thiserror::Error;

use crate::validation::PolicyViolation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Lockout error: {0}")]
    Lockout(#[from] LockoutError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Weak password: {0}")]
    WeakPassword(#[from] PolicyViolation),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

#[derive(Debug, Error)]
pub enum LockoutError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_lockout_error(&self) -> bool {
        matches!(self, Error::Lockout(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
