//! The plugin contract: one implementation per file type.

use bytes::Bytes;
use lix_core::{Change, EntityId, File, FileMetadata, SchemaDefinition, SchemaKey};

use crate::error::Result;

/// The content of a file at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    pub data: Bytes,
    pub metadata: FileMetadata,
}

impl FileSnapshot {
    pub fn new(data: impl Into<Bytes>, metadata: FileMetadata) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }
}

impl From<&File> for FileSnapshot {
    fn from(file: &File) -> Self {
        Self {
            data: file.data.clone(),
            metadata: file.metadata.clone(),
        }
    }
}

/// One entity whose state differs between two snapshots.
///
/// Detectors only decide *what* changed. Ids, lineage and timestamps are
/// assigned by the caller when the change is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChange {
    pub entity_id: EntityId,
    pub schema_key: SchemaKey,
    /// `None` when the entity was removed.
    pub snapshot: Option<serde_json::Value>,
}

/// A file-type plugin.
///
/// Plugins are stateless and pure: detection and application read only their
/// arguments, so one instance may serve many files concurrently.
pub trait Plugin: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Unique plugin key, recorded on every change it detects.
    fn key(&self) -> &str;

    /// Glob selecting the files this plugin handles, e.g. `*.csv`.
    fn detect_changes_glob(&self) -> &str;

    /// Schemas of the snapshots this plugin emits.
    fn schemas(&self) -> Vec<SchemaDefinition>;

    // ─────────────────────────────────────────────────────────────────────────
    // Detection & Application
    // ─────────────────────────────────────────────────────────────────────────

    /// Compute the entity-level difference between two snapshots.
    ///
    /// `before` is `None` for a newly created file. Entities whose content is
    /// unchanged must not be reported.
    fn detect_changes(
        &self,
        before: Option<&FileSnapshot>,
        after: &FileSnapshot,
    ) -> Result<Vec<DetectedChange>>;

    /// Fold changes onto a base and serialize the result.
    ///
    /// `metadata` carries the target file's hints (ordering, key column).
    /// When several changes touch one entity, the last in canonical order
    /// wins. Output must be byte-identical for the same inputs.
    fn apply_changes(
        &self,
        base: Option<&FileSnapshot>,
        metadata: &FileMetadata,
        changes: &[Change],
    ) -> Result<Bytes>;
}
