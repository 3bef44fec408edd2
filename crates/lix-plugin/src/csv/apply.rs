//! CSV materialization: fold row and header changes back into a file.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bytes::Bytes;
use lix_core::{Change, EntityId, FileMetadata};
use serde::de::DeserializeOwned;

use super::{Entities, HeaderSnapshot, RowSnapshot, Table, HEADER_SCHEMA, ORDER_COLUMN, ROW_SCHEMA};
use crate::error::{PluginError, Result};
use crate::plugin::FileSnapshot;

pub(crate) fn apply_changes(
    base: Option<&FileSnapshot>,
    metadata: &FileMetadata,
    changes: &[Change],
) -> Result<Bytes> {
    // 1. Decompose the base
    let base_entities = match base {
        Some(snapshot) => Some(Entities::from_snapshot(&snapshot.data, &snapshot.metadata)?),
        None => None,
    };

    // 2. Fold changes, last one per entity wins
    let mut ordered: Vec<&Change> = changes.iter().collect();
    ordered.sort_by(|a, b| a.canonical_cmp(b));

    let mut header_update: Option<Option<HeaderSnapshot>> = None;
    let mut row_updates: BTreeMap<EntityId, Option<RowSnapshot>> = BTreeMap::new();
    for change in ordered {
        match change.schema_key.as_str() {
            HEADER_SCHEMA => header_update = Some(decode(change)?),
            ROW_SCHEMA => {
                row_updates.insert(change.entity_id.clone(), decode(change)?);
            }
            other => {
                return Err(PluginError::Materialization(format!(
                    "csv plugin cannot apply schema {}",
                    other
                )))
            }
        }
    }

    // 3. Resolve the header and row order
    let (base_header, rows) = match base_entities {
        Some(entities) => {
            let mut rows = Vec::with_capacity(entities.rows.len());
            for (entity_id, row) in entities.rows {
                match row_updates.remove(&entity_id) {
                    Some(Some(updated)) => rows.push(updated),
                    Some(None) => {}
                    None => rows.push(row),
                }
            }
            rows.extend(row_updates.into_values().flatten());
            (entities.header, rows)
        }
        None => {
            let mut rows: Vec<RowSnapshot> = row_updates.into_values().flatten().collect();
            if let Some(column) = metadata.get_str(ORDER_COLUMN) {
                rows.sort_by(|a, b| order_cmp(a.values.get(column), b.values.get(column)));
            }
            (None, rows)
        }
    };

    let header = match header_update {
        Some(update) => update,
        None => base_header,
    };

    let Some(header) = header else {
        if rows.is_empty() {
            return Ok(Bytes::new());
        }
        return Err(PluginError::Materialization(
            "rows present but no header".into(),
        ));
    };

    // 4. Serialize
    let mut records = Vec::with_capacity(rows.len() + 1);
    records.push(header.columns.clone());
    for row in rows {
        records.push(
            header
                .columns
                .iter()
                .map(|column| row.values.get(column).cloned().unwrap_or_default())
                .collect(),
        );
    }

    let table = Table {
        records,
        line_ending: header.line_ending,
        trailing_newline: header.trailing_newline,
    };
    Ok(Bytes::from(table.write()))
}

fn decode<T: DeserializeOwned>(change: &Change) -> Result<Option<T>> {
    match &change.snapshot {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            PluginError::Materialization(format!(
                "undecodable {} snapshot for {}: {}",
                change.schema_key, change.entity_id, e
            ))
        }),
    }
}

/// Numbers first (numerically), then text; missing values last.
fn order_cmp(a: Option<&String>, b: Option<&String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.total_cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::detect::detect_changes;
    use crate::csv::UNIQUE_COLUMN;
    use crate::plugin::DetectedChange;
    use lix_core::{ChangeBuilder, FileId, SchemaKey};
    use serde_json::json;

    fn meta() -> FileMetadata {
        FileMetadata::new().with(UNIQUE_COLUMN, "Stakeholder")
    }

    fn snap(data: &'static str) -> FileSnapshot {
        FileSnapshot::new(data.as_bytes(), meta())
    }

    fn stamp(detected: Vec<DetectedChange>, ts: i64) -> Vec<Change> {
        detected
            .into_iter()
            .map(|d| {
                ChangeBuilder::new(FileId::new("f"), d.entity_id, d.schema_key)
                    .plugin("csv")
                    .maybe_snapshot(d.snapshot)
                    .created_at(ts)
                    .build()
            })
            .collect()
    }

    fn apply(base: Option<&FileSnapshot>, metadata: &FileMetadata, changes: &[Change]) -> String {
        let bytes = apply_changes(base, metadata, changes).unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_materialize_from_scratch_in_entity_order() {
        let after = snap("Stakeholder,Role\nB,Dev\nA,PM\n");
        let changes = stamp(detect_changes(None, &after).unwrap(), 1);
        assert_eq!(
            apply(None, &meta(), &changes),
            "Stakeholder,Role\nA,PM\nB,Dev\n"
        );
    }

    #[test]
    fn test_apply_onto_base_keeps_row_order() {
        let before = snap("Stakeholder,Role\nC,QA\nA,PM\nB,Dev\n");
        let after = snap("Stakeholder,Role\nC,QA\nB,Design\nD,Ops\n");
        let changes = stamp(detect_changes(Some(&before), &after).unwrap(), 2);
        assert_eq!(
            apply(Some(&before), &meta(), &changes),
            "Stakeholder,Role\nC,QA\nB,Design\nD,Ops\n"
        );
    }

    #[test]
    fn test_last_change_wins() {
        let first = stamp(detect_changes(None, &snap("Stakeholder,Role\nA,PM\n")).unwrap(), 1);
        let second = stamp(
            detect_changes(
                Some(&snap("Stakeholder,Role\nA,PM\n")),
                &snap("Stakeholder,Role\nA,Lead\n"),
            )
            .unwrap(),
            2,
        );
        let mut all = second;
        all.extend(first);
        assert_eq!(apply(None, &meta(), &all), "Stakeholder,Role\nA,Lead\n");
    }

    #[test]
    fn test_order_column() {
        let metadata = meta().with(ORDER_COLUMN, "Pos");
        let after = FileSnapshot::new(
            &b"Stakeholder,Pos\nA,10\nB,9\nC,x\n"[..],
            metadata.clone(),
        );
        let changes = stamp(detect_changes(None, &after).unwrap(), 1);
        assert_eq!(
            apply(None, &metadata, &changes),
            "Stakeholder,Pos\nB,9\nA,10\nC,x\n"
        );
    }

    #[test]
    fn test_header_only_and_empty() {
        let changes = stamp(detect_changes(None, &snap("Stakeholder,Role")).unwrap(), 1);
        assert_eq!(apply(None, &meta(), &changes), "Stakeholder,Role");
        assert_eq!(apply(None, &meta(), &[]), "");
    }

    #[test]
    fn test_rows_without_header() {
        let row = ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new("Stakeholder|A"),
            SchemaKey::new(ROW_SCHEMA).unwrap(),
        )
        .snapshot(json!({"values": {"Stakeholder": "A"}}))
        .build();
        assert!(matches!(
            apply_changes(None, &meta(), &[row]),
            Err(PluginError::Materialization(_))
        ));
    }

    #[test]
    fn test_undecodable_snapshot() {
        let header = ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new("header"),
            SchemaKey::new(HEADER_SCHEMA).unwrap(),
        )
        .snapshot(json!({"columns": "oops"}))
        .build();
        assert!(matches!(
            apply_changes(None, &meta(), &[header]),
            Err(PluginError::Materialization(_))
        ));
    }

    #[test]
    fn test_foreign_schema_is_rejected() {
        let change = ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new("x"),
            SchemaKey::new("json_pointer_v1").unwrap(),
        )
        .snapshot(json!({}))
        .build();
        assert!(apply_changes(None, &meta(), &[change]).is_err());
    }
}
