//! Change validation: identity checks, schema checks and batch rules.

use std::collections::HashMap;

use crate::change::Change;
use crate::error::ValidationError;
use crate::schema::{SchemaCheck, SchemaRegistry};

/// Validate a change's structure without consulting any schema.
///
/// This performs:
/// - Schema key form check
/// - Id recomputation (the declared id must match the content)
pub fn validate_change_structure(change: &Change) -> Result<(), ValidationError> {
    // 1. Schema key must be well-formed
    if !change.schema_key.is_well_formed() {
        return Err(ValidationError::violation(
            change.schema_key.as_str(),
            "malformed schema key",
        ));
    }

    // 2. Content must hash to the declared id
    let computed = change.compute_id();
    if computed != change.id {
        return Err(ValidationError::IdMismatch {
            declared: change.id,
            computed,
        });
    }

    Ok(())
}

/// Validate a change fully: structure, then snapshot against the registry.
pub fn validate_change(
    change: &Change,
    registry: &SchemaRegistry,
) -> Result<SchemaCheck, ValidationError> {
    validate_change_structure(change)?;
    registry.validate(&change.schema_key, change.snapshot.as_ref())
}

/// Reject batches in which one entity claims two different states at the
/// same instant.
///
/// Applies to changes created by a single producer: one write, or the new
/// changes of one push. Merged histories may hold concurrent states of an
/// entity at the same instant; those are ordered by `(created_at, id)`.
/// Exact duplicates are allowed and deduplicated later.
pub fn check_batch_identity(changes: &[Change]) -> Result<(), ValidationError> {
    let mut seen: HashMap<(&str, &str, &str, i64), &Change> = HashMap::new();

    for change in changes {
        let key = (
            change.file_id.as_str(),
            change.entity_id.as_str(),
            change.schema_key.as_str(),
            change.created_at,
        );
        match seen.get(&key) {
            Some(existing) if existing.snapshot != change.snapshot => {
                return Err(ValidationError::IdentityConflict {
                    file_id: change.file_id.clone(),
                    entity_id: change.entity_id.clone(),
                    schema_key: change.schema_key.clone(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(key, change);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeBuilder;
    use crate::schema::{PropertyDef, PropertyKind, SchemaDefinition};
    use crate::types::{ChangeId, EntityId, FileId, SchemaKey};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_definitions([SchemaDefinition::new(
            SchemaKey::new("csv_row_v1").unwrap(),
            vec![PropertyDef::required("values", PropertyKind::StringMap)],
        )])
        .unwrap()
    }

    fn row(entity: &str, snapshot: serde_json::Value, ts: i64) -> Change {
        ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new(entity),
            SchemaKey::new("csv_row_v1").unwrap(),
        )
        .plugin("csv")
        .snapshot(snapshot)
        .created_at(ts)
        .build()
    }

    #[test]
    fn test_valid_change() {
        let change = row("k|1", json!({"values": {"k": "1"}}), 1);
        assert_eq!(
            validate_change(&change, &registry()).unwrap(),
            SchemaCheck::Valid
        );
    }

    #[test]
    fn test_tampered_id() {
        let mut change = row("k|1", json!({"values": {"k": "1"}}), 1);
        change.id = ChangeId::from_bytes([0; 32]);
        assert!(matches!(
            validate_change_structure(&change),
            Err(ValidationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_snapshot() {
        let mut change = row("k|1", json!({"values": {"k": "1"}}), 1);
        change.snapshot = Some(json!({"values": {"k": "2"}}));
        assert!(matches!(
            validate_change_structure(&change),
            Err(ValidationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_schema_violation() {
        let change = row("k|1", json!({"values": "nope"}), 1);
        assert!(matches!(
            validate_change(&change, &registry()),
            Err(ValidationError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_batch_conflict_carries_entity() {
        let a = row("k|1", json!({"values": {"k": "1", "v": "a"}}), 5);
        let b = row("k|1", json!({"values": {"k": "1", "v": "b"}}), 5);
        match check_batch_identity(&[a, b]) {
            Err(ValidationError::IdentityConflict { entity_id, .. }) => {
                assert_eq!(entity_id, EntityId::new("k|1"));
            }
            other => panic!("expected identity conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_allows_history_and_duplicates() {
        let a = row("k|1", json!({"values": {"v": "a"}}), 5);
        let b = row("k|1", json!({"values": {"v": "b"}}), 6);
        assert!(check_batch_identity(&[a.clone(), b, a]).is_ok());
    }
}
