//! Error types for plugins.

use lix_core::{CoreError, ValidationError};
use thiserror::Error;

/// Errors raised while detecting or applying changes.
#[derive(Debug, Error)]
pub enum PluginError {
    /// File content does not fit the declared shape (missing key column,
    /// duplicate identities, ragged rows).
    #[error("schema violation ({schema_key}): {reason}")]
    SchemaViolation { schema_key: String, reason: String },

    /// File bytes could not be parsed at all.
    #[error("parse error: {0}")]
    Parse(String),

    /// Changes could not be folded back into file content.
    #[error("materialization error: {0}")]
    Materialization(String),

    #[error("plugin {0:?} is already registered")]
    DuplicatePlugin(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl PluginError {
    pub(crate) fn violation(schema_key: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::SchemaViolation {
            schema_key: schema_key.into(),
            reason: reason.into(),
        }
    }
}

impl From<ValidationError> for PluginError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::SchemaViolation { schema_key, reason } => {
                PluginError::SchemaViolation { schema_key, reason }
            }
            other => PluginError::Materialization(other.to_string()),
        }
    }
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
