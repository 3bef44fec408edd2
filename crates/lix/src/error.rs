//! Error types for the Lix facade.

use lix_core::{CoreError, FileId, ValidationError};
use lix_plugin::PluginError;
use lix_store::StoreError;
use lix_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Lix operations.
#[derive(Debug, Error)]
pub enum LixError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Detection failed.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// The file could not be rebuilt from its changes.
    #[error("materialization error: {0}")]
    Materialization(String),

    /// File not found.
    #[error("file not found: {0}")]
    FileNotFound(FileId),

    /// No registered plugin handles the path.
    #[error("no plugin handles {0}")]
    NoPlugin(String),

    /// Container encoding or identity error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl LixError {
    /// Route applier failures to `Materialization`, everything else to `Plugin`.
    pub(crate) fn from_apply(err: PluginError) -> Self {
        match err {
            PluginError::Materialization(message) => LixError::Materialization(message),
            other => LixError::Plugin(other),
        }
    }
}

/// Result type for Lix operations.
pub type Result<T> = std::result::Result<T, LixError>;
