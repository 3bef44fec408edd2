//! Change: the atomic unit of history.
//!
//! A change is an immutable record of one entity's new state. Once created, it
//! cannot be edited. Corrections are represented as new changes, and a change
//! without a snapshot is a tombstone.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::canonical::{canonical_change_bytes, ChangeContent, CHANGE_ID_DOMAIN};
use crate::hash::Blake3Hash;
use crate::types::{ChangeId, EntityId, FileId, SchemaKey};

/// A complete change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Content-derived identifier.
    pub id: ChangeId,

    /// Stable logical identity of the changed entity.
    pub entity_id: EntityId,

    /// Schema governing the shape of `snapshot`.
    pub schema_key: SchemaKey,

    /// Key of the plugin that detected the change.
    pub plugin_key: String,

    /// The file this change belongs to.
    pub file_id: FileId,

    /// The entity's value after the change; `None` marks a deletion.
    pub snapshot: Option<serde_json::Value>,

    /// The entity's previous head when this change was created.
    pub parent_id: Option<ChangeId>,

    /// Unix milliseconds. Not part of the id.
    pub created_at: i64,
}

impl Change {
    /// Recompute the id from the change's content.
    pub fn compute_id(&self) -> ChangeId {
        compute_id(&ChangeContent {
            file_id: &self.file_id,
            entity_id: &self.entity_id,
            schema_key: &self.schema_key,
            plugin_key: &self.plugin_key,
            snapshot: self.snapshot.as_ref(),
            parent_id: self.parent_id.as_ref(),
        })
    }

    /// Check if this change deletes its entity.
    pub fn is_tombstone(&self) -> bool {
        self.snapshot.is_none()
    }

    /// Check whether two changes describe the same entity.
    pub fn same_entity(&self, other: &Change) -> bool {
        self.file_id == other.file_id
            && self.entity_id == other.entity_id
            && self.schema_key == other.schema_key
    }

    /// Check content equivalence: same entity, identical snapshot.
    pub fn is_equivalent(&self, other: &Change) -> bool {
        self.same_entity(other) && self.snapshot == other.snapshot
    }

    /// Canonical history order: `(created_at, id)`.
    pub fn canonical_cmp(&self, other: &Change) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn compute_id(content: &ChangeContent<'_>) -> ChangeId {
    let bytes = canonical_change_bytes(content);
    ChangeId(Blake3Hash::hash_with_domain(CHANGE_ID_DOMAIN, &bytes).0)
}

/// Sort changes into canonical history order.
pub fn sort_canonical(changes: &mut [Change]) {
    changes.sort_by(Change::canonical_cmp);
}

/// Builder for creating changes.
pub struct ChangeBuilder {
    file_id: FileId,
    entity_id: EntityId,
    schema_key: SchemaKey,
    plugin_key: String,
    snapshot: Option<serde_json::Value>,
    parent_id: Option<ChangeId>,
    created_at: i64,
}

impl ChangeBuilder {
    /// Start building a change.
    pub fn new(file_id: FileId, entity_id: EntityId, schema_key: SchemaKey) -> Self {
        Self {
            file_id,
            entity_id,
            schema_key,
            plugin_key: String::new(),
            snapshot: None,
            parent_id: None,
            created_at: 0,
        }
    }

    /// Set the plugin key.
    pub fn plugin(mut self, key: impl Into<String>) -> Self {
        self.plugin_key = key.into();
        self
    }

    /// Set the new value of the entity.
    pub fn snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Set (or clear) the snapshot.
    pub fn maybe_snapshot(mut self, snapshot: Option<serde_json::Value>) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Set the parent change.
    pub fn parent(mut self, parent: Option<ChangeId>) -> Self {
        self.parent_id = parent;
        self
    }

    /// Set the creation timestamp.
    pub fn created_at(mut self, ts: i64) -> Self {
        self.created_at = ts;
        self
    }

    /// Build the change and compute its id.
    pub fn build(self) -> Change {
        let id = compute_id(&ChangeContent {
            file_id: &self.file_id,
            entity_id: &self.entity_id,
            schema_key: &self.schema_key,
            plugin_key: &self.plugin_key,
            snapshot: self.snapshot.as_ref(),
            parent_id: self.parent_id.as_ref(),
        });

        Change {
            id,
            entity_id: self.entity_id,
            schema_key: self.schema_key,
            plugin_key: self.plugin_key,
            file_id: self.file_id,
            snapshot: self.snapshot,
            parent_id: self.parent_id,
            created_at: self.created_at,
        }
    }
}
