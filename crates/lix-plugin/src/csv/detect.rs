//! CSV change detection.

use std::collections::BTreeMap;

use lix_core::EntityId;
use serde::Serialize;

use super::{schema_key, Entities, HEADER_ENTITY, HEADER_SCHEMA, ROW_SCHEMA};
use crate::error::{PluginError, Result};
use crate::plugin::{DetectedChange, FileSnapshot};

type EntityMap = BTreeMap<EntityId, (&'static str, serde_json::Value)>;

/// Join both snapshots on entity id and report what differs.
///
/// Output is ordered by entity id, so it does not depend on row order.
pub(crate) fn detect_changes(
    before: Option<&FileSnapshot>,
    after: &FileSnapshot,
) -> Result<Vec<DetectedChange>> {
    let old = match before {
        Some(snapshot) => entity_map(Entities::from_snapshot(
            &snapshot.data,
            &snapshot.metadata,
        )?)?,
        None => EntityMap::new(),
    };
    let new = entity_map(Entities::from_snapshot(&after.data, &after.metadata)?)?;

    let mut detected = Vec::new();

    // 1. Creations and updates
    for (entity_id, (schema, value)) in &new {
        let unchanged = old.get(entity_id).is_some_and(|(_, prev)| prev == value);
        if !unchanged {
            detected.push(DetectedChange {
                entity_id: entity_id.clone(),
                schema_key: schema_key(schema),
                snapshot: Some(value.clone()),
            });
        }
    }

    // 2. Deletions
    for (entity_id, (schema, _)) in &old {
        if !new.contains_key(entity_id) {
            detected.push(DetectedChange {
                entity_id: entity_id.clone(),
                schema_key: schema_key(schema),
                snapshot: None,
            });
        }
    }

    detected.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
    Ok(detected)
}

fn entity_map(entities: Entities) -> Result<EntityMap> {
    let mut map = EntityMap::new();
    if let Some(header) = entities.header {
        map.insert(
            EntityId::new(HEADER_ENTITY),
            (HEADER_SCHEMA, to_value(HEADER_SCHEMA, &header)?),
        );
    }
    for (entity_id, row) in entities.rows {
        map.insert(entity_id, (ROW_SCHEMA, to_value(ROW_SCHEMA, &row)?));
    }
    Ok(map)
}

fn to_value(schema: &str, snapshot: &impl Serialize) -> Result<serde_json::Value> {
    serde_json::to_value(snapshot).map_err(|e| PluginError::violation(schema, e.to_string()))
}
