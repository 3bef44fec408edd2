//! Error types for the Lix Core.

use thiserror::Error;

use crate::types::{ChangeId, EntityId, FileId, SchemaKey};

/// Core errors that can occur while building or decoding records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed schema key: {0:?}")]
    InvalidSchemaKey(String),

    #[error("invalid hex identifier: {0}")]
    InvalidHex(String),

    #[error("schema {0} is already registered with a different definition")]
    DuplicateSchema(SchemaKey),

    #[error("unsupported container format: {0}")]
    UnsupportedFormat(u32),

    #[error("container is missing the {0:?} key")]
    MissingKey(&'static str),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),
}

/// Validation errors for change content and batches.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema violation ({schema_key}): {reason}")]
    SchemaViolation { schema_key: String, reason: String },

    #[error("identity conflict in file {file_id}: entity {entity_id} ({schema_key}) has two different snapshots in one batch")]
    IdentityConflict {
        file_id: FileId,
        entity_id: EntityId,
        schema_key: SchemaKey,
    },

    #[error("change id mismatch: declared {declared}, computed {computed}")]
    IdMismatch {
        declared: ChangeId,
        computed: ChangeId,
    },
}

impl ValidationError {
    /// Shorthand for a schema violation.
    pub fn violation(schema_key: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::SchemaViolation {
            schema_key: schema_key.into(),
            reason: reason.into(),
        }
    }
}
