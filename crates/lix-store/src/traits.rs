//! Store trait: the abstract interface for change persistence.
//!
//! This trait allows the engine to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (tests, server-side containers).

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use lix_core::{
    validate_change, Change, ChangeId, EntityId, File, FileId, SchemaCheck, SchemaRegistry,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// A position in a store's append log.
///
/// Every newly stored change receives the next position. A cursor names
/// "everything stored so far" and is the marker used by incremental pulls.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// The position before any change.
    pub const START: Cursor = Cursor(0);
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of appending a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Ids of changes that were new, in log order.
    pub inserted: Vec<ChangeId>,
    /// Changes that were already stored (idempotent, not an error).
    pub duplicates: usize,
    /// Log position after the batch.
    pub cursor: Cursor,
}

impl AppendReport {
    pub fn accepted(&self) -> usize {
        self.inserted.len()
    }
}

/// The ChangeStore trait: async interface for change persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Append-only**: stored changes are never updated or removed.
/// - **Idempotent appends**: a change whose id is already stored is counted as
///   a duplicate.
/// - **Atomic batches**: either every new change of a batch becomes visible or
///   none does.
/// - **Canonical order**: histories and pulls are ordered by `(created_at, id)`.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Change Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and append a batch of changes.
    ///
    /// Stored logs merge several producers, so two states of one entity at
    /// the same instant are accepted here and ordered by id.
    ///
    /// # Errors
    /// - `Validation(SchemaViolation)` if a snapshot does not match its schema
    /// - `Validation(IdMismatch)` if a change's id does not match its content
    async fn append(&self, changes: &[Change]) -> Result<AppendReport>;

    /// Get a change by id.
    async fn get_change(&self, id: &ChangeId) -> Result<Option<Change>>;

    /// Check if a change exists.
    async fn has_change(&self, id: &ChangeId) -> Result<bool>;

    /// Every change of one entity, oldest first.
    async fn history(&self, file_id: &FileId, entity_id: &EntityId) -> Result<Vec<Change>>;

    /// The most recent change per entity of a file, tombstones included.
    async fn heads(&self, file_id: &FileId) -> Result<BTreeMap<EntityId, Change>>;

    /// The most recent non-deleted change per entity of a file.
    async fn latest(&self, file_id: &FileId) -> Result<BTreeMap<EntityId, Change>> {
        let mut heads = self.heads(file_id).await?;
        heads.retain(|_, change| !change.is_tombstone());
        Ok(heads)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log Operations (for sync protocol)
    // ─────────────────────────────────────────────────────────────────────────

    /// Changes stored after `since`, in canonical order, plus the current
    /// log position.
    async fn changes_since(&self, since: Cursor) -> Result<(Vec<Change>, Cursor)>;

    /// Current log position.
    async fn cursor(&self) -> Result<Cursor>;

    /// Every change, in log order.
    async fn all_changes(&self) -> Result<Vec<Change>>;

    // ─────────────────────────────────────────────────────────────────────────
    // File Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace a file row.
    async fn upsert_file(&self, file: &File) -> Result<()>;

    /// Get a file by id.
    async fn get_file(&self, id: &FileId) -> Result<Option<File>>;

    /// List all files, ordered by path.
    async fn list_files(&self) -> Result<Vec<File>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Key/Value Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_key_value(&self, key: &str) -> Result<Option<String>>;

    async fn set_key_value(&self, key: &str, value: &str) -> Result<()>;

    async fn key_values(&self) -> Result<BTreeMap<String, String>>;
}

/// Validate a batch before any of it is written.
pub(crate) fn validate_batch(registry: &SchemaRegistry, changes: &[Change]) -> Result<()> {
    let mut opaque = 0usize;
    for change in changes {
        if validate_change(change, registry)? == SchemaCheck::Unknown {
            opaque += 1;
        }
    }
    if opaque > 0 {
        debug!(opaque, "batch carries changes with unregistered schemas");
    }
    Ok(())
}

/// Fold a change list into per-entity heads.
pub(crate) fn fold_heads<'a>(
    changes: impl IntoIterator<Item = &'a Change>,
) -> BTreeMap<EntityId, Change> {
    let mut heads: BTreeMap<EntityId, Change> = BTreeMap::new();
    for change in changes {
        let newer = heads
            .get(&change.entity_id)
            .map_or(true, |head| change.canonical_cmp(head).is_gt());
        if newer {
            heads.insert(change.entity_id.clone(), change.clone());
        }
    }
    heads
}
