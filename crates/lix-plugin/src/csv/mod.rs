//! The CSV plugin.
//!
//! A CSV file is tracked as one header entity plus one entity per row. Row
//! identity comes from the column named by the `unique_column` metadata
//! entry (`<column>|<value>`). Files without a declared key column fall back
//! to a content-derived identity, so any edit to such a row is recorded as a
//! removal plus an addition.

mod apply;
mod detect;
mod table;

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use lix_core::{
    canonical_json_bytes, Change, EntityId, FileMetadata, PropertyDef, PropertyKind,
    SchemaDefinition, SchemaKey,
};
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};
use crate::plugin::{DetectedChange, FileSnapshot, Plugin};

pub use table::{LineEnding, Table};

/// Plugin key recorded on CSV changes.
pub const CSV_PLUGIN_KEY: &str = "csv";

/// Schema of the header entity.
pub const HEADER_SCHEMA: &str = "csv_header_v1";

/// Schema of row entities.
pub const ROW_SCHEMA: &str = "csv_row_v1";

/// Entity id of the header.
pub const HEADER_ENTITY: &str = "header";

/// Metadata entry naming the key column.
pub const UNIQUE_COLUMN: &str = "unique_column";

/// Metadata entry naming a column that orders rows on materialization.
pub const ORDER_COLUMN: &str = "order_column";

/// Snapshot of the header entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSnapshot {
    pub columns: Vec<String>,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

/// Snapshot of a row entity: column name to cell text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSnapshot {
    pub values: BTreeMap<String, String>,
}

/// A file decomposed into entities, rows in file order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Entities {
    pub header: Option<HeaderSnapshot>,
    pub rows: Vec<(EntityId, RowSnapshot)>,
}

impl Entities {
    /// Parse a snapshot and assign every row its identity.
    pub fn from_snapshot(data: &[u8], metadata: &FileMetadata) -> Result<Self> {
        let table = Table::parse(data)?;
        let mut records = table.records.into_iter();

        let Some(columns) = records.next() else {
            return Ok(Entities::default());
        };

        let mut seen_columns = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen_columns.insert(c.as_str())) {
            return Err(PluginError::violation(
                HEADER_SCHEMA,
                format!("duplicate column {:?}", dup),
            ));
        }

        let key_index = match metadata.get_str(UNIQUE_COLUMN) {
            Some(name) => Some(columns.iter().position(|c| c == name).ok_or_else(|| {
                PluginError::violation(ROW_SCHEMA, format!("unique column {:?} not found", name))
            })?),
            None => None,
        };

        let mut rows = Vec::new();
        let mut ids = HashSet::new();
        for (index, record) in records.enumerate() {
            if record.len() != columns.len() {
                return Err(PluginError::violation(
                    ROW_SCHEMA,
                    format!(
                        "row {} has {} fields, header has {}",
                        index + 1,
                        record.len(),
                        columns.len()
                    ),
                ));
            }

            let entity_id = match key_index {
                Some(k) => EntityId::new(format!("{}|{}", columns[k], record[k])),
                None => content_entity_id(&columns, &record),
            };
            if !ids.insert(entity_id.clone()) {
                return Err(PluginError::violation(
                    ROW_SCHEMA,
                    format!("duplicate row identity {}", entity_id),
                ));
            }

            let values = columns.iter().cloned().zip(record).collect();
            rows.push((entity_id, RowSnapshot { values }));
        }

        Ok(Entities {
            header: Some(HeaderSnapshot {
                columns,
                line_ending: table.line_ending,
                trailing_newline: table.trailing_newline,
            }),
            rows,
        })
    }
}

/// Identity of a row in a file without a key column.
fn content_entity_id(columns: &[String], record: &[String]) -> EntityId {
    let values: serde_json::Map<String, serde_json::Value> = columns
        .iter()
        .cloned()
        .zip(record.iter().cloned().map(serde_json::Value::String))
        .collect();
    let bytes = canonical_json_bytes(&serde_json::Value::Object(values));
    EntityId::new(format!("row:{}", blake3::hash(&bytes).to_hex()))
}

/// The CSV plugin.
#[derive(Debug, Clone, Default)]
pub struct CsvPlugin;

impl CsvPlugin {
    pub fn new() -> Self {
        Self
    }

    pub fn header_schema() -> SchemaDefinition {
        SchemaDefinition::new(
            schema_key(HEADER_SCHEMA),
            vec![
                PropertyDef::required("columns", PropertyKind::StringArray),
                PropertyDef::required("line_ending", PropertyKind::String),
                PropertyDef::required("trailing_newline", PropertyKind::Boolean),
            ],
        )
    }

    pub fn row_schema() -> SchemaDefinition {
        SchemaDefinition::new(
            schema_key(ROW_SCHEMA),
            vec![PropertyDef::required("values", PropertyKind::StringMap)],
        )
    }
}

impl Plugin for CsvPlugin {
    fn key(&self) -> &str {
        CSV_PLUGIN_KEY
    }

    fn detect_changes_glob(&self) -> &str {
        "*.csv"
    }

    fn schemas(&self) -> Vec<SchemaDefinition> {
        vec![Self::header_schema(), Self::row_schema()]
    }

    fn detect_changes(
        &self,
        before: Option<&FileSnapshot>,
        after: &FileSnapshot,
    ) -> Result<Vec<DetectedChange>> {
        detect::detect_changes(before, after)
    }

    fn apply_changes(
        &self,
        base: Option<&FileSnapshot>,
        metadata: &FileMetadata,
        changes: &[Change],
    ) -> Result<Bytes> {
        apply::apply_changes(base, metadata, changes)
    }
}

fn schema_key(raw: &'static str) -> SchemaKey {
    SchemaKey::new(raw).expect("built-in schema key is well-formed")
}
