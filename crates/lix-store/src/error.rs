//! Error types for the store module.

use lix_core::{CoreError, ValidationError};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A change failed validation (schema violation, identity conflict,
    /// id mismatch). Never retried.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Change serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blob backend failure (lock poisoning, task failure).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the failed operation may succeed if repeated.
    ///
    /// Store operations are idempotent, so transient failures are safe to
    /// retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_) | StoreError::Io(_) | StoreError::Backend(_)
        )
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Encoding(msg) | CoreError::Decoding(msg) => StoreError::Serialization(msg),
            other => StoreError::InvalidData(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
