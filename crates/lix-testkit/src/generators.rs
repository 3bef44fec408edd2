//! Proptest generators for property-based testing.

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;
use serde_json::json;

use lix_core::{Change, ChangeBuilder, ChangeId, EntityId, FileId, SchemaKey};
use lix_plugin::csv::ROW_SCHEMA;

use crate::fixtures::csv_text;

/// Generate a random ChangeId.
pub fn change_id() -> impl Strategy<Value = ChangeId> {
    any::<[u8; 32]>().prop_map(ChangeId::from_bytes)
}

/// Generate an entity id from a small pool, so histories overlap.
pub fn entity_id() -> impl Strategy<Value = EntityId> {
    "[a-d]".prop_map(|k| EntityId::new(format!("id|{}", k)))
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_700_000_000_000i64
}

/// Generate a CSV cell, including characters that force quoting.
pub fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,8}",
        "[a-z]{1,4}(,|\"|\n)[a-z]{1,4}",
    ]
}

/// Parameters for generating a CSV row change.
#[derive(Debug, Clone)]
pub struct ChangeParams {
    pub file_id: FileId,
    pub entity_id: EntityId,
    /// Cell value of the `name` column; `None` makes a tombstone.
    pub name: Option<String>,
    pub created_at: i64,
    pub parent_id: Option<ChangeId>,
}

impl Arbitrary for ChangeParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            "[a-z]{1,3}",
            entity_id(),
            proptest::option::weighted(0.85, cell()),
            timestamp(),
            proptest::option::of(change_id()),
        )
            .prop_map(|(file, entity_id, name, created_at, parent_id)| ChangeParams {
                file_id: FileId::new(file),
                entity_id,
                name,
                created_at,
                parent_id,
            })
            .boxed()
    }
}

/// Generate a change from parameters.
pub fn change_from_params(params: &ChangeParams) -> Change {
    let key = params
        .entity_id
        .as_str()
        .split_once('|')
        .map_or(params.entity_id.as_str(), |(_, k)| k)
        .to_string();
    ChangeBuilder::new(
        params.file_id.clone(),
        params.entity_id.clone(),
        SchemaKey::new_unchecked(ROW_SCHEMA),
    )
    .plugin("csv")
    .maybe_snapshot(
        params
            .name
            .as_ref()
            .map(|name| json!({"values": {"id": key, "name": name}})),
    )
    .parent(params.parent_id)
    .created_at(params.created_at)
    .build()
}

/// A batch of distinct changes with distinct timestamps, so no two of them
/// claim the same entity state at the same instant.
pub fn change_batch(max_len: usize) -> impl Strategy<Value = Vec<Change>> {
    prop::collection::vec(any::<ChangeParams>(), 0..=max_len).prop_map(|params| {
        let mut seen = HashSet::new();
        params
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                p.created_at = p.created_at - p.created_at % 1000 + i as i64;
                change_from_params(&p)
            })
            .filter(|c| seen.insert(c.id))
            .collect()
    })
}

/// A CSV document keyed by its `id` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDocument {
    /// `id` to `(name, role)`, so keys are unique.
    pub rows: BTreeMap<String, (String, String)>,
}

impl CsvDocument {
    pub const COLUMNS: [&'static str; 3] = ["id", "name", "role"];

    /// Render with rows in key order.
    pub fn render(&self) -> String {
        let keys: Vec<&String> = self.rows.keys().collect();
        self.render_in(&keys)
    }

    /// Render with rows in the given key order.
    pub fn render_in(&self, keys: &[&String]) -> String {
        let records: Vec<[&str; 3]> = keys
            .iter()
            .filter_map(|k| {
                self.rows
                    .get(*k)
                    .map(|(name, role)| [k.as_str(), name.as_str(), role.as_str()])
            })
            .collect();
        let rows: Vec<&[&str]> = records.iter().map(|r| &r[..]).collect();
        csv_text(&Self::COLUMNS, &rows)
    }
}

/// Generate a CSV document with up to `max_rows` rows.
pub fn csv_document(max_rows: usize) -> impl Strategy<Value = CsvDocument> {
    prop::collection::btree_map("[a-z0-9]{1,6}", (cell(), cell()), 0..=max_rows)
        .prop_map(|rows| CsvDocument { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_plugin::{CsvPlugin, FileSnapshot, Plugin};
    use lix_store::{ChangeStore, MemoryStore};
    use lix_sync::state_hash;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #[test]
        fn test_change_id_deterministic(params: ChangeParams) {
            let c1 = change_from_params(&params);
            let c2 = change_from_params(&params);

            prop_assert_eq!(c1.id, c2.id);
            prop_assert_eq!(c1.compute_id(), c1.id);
        }

        #[test]
        fn test_change_id_ignores_timestamp(params: ChangeParams, other in timestamp()) {
            let c1 = change_from_params(&params);
            let c2 = change_from_params(&ChangeParams { created_at: other, ..params });

            prop_assert_eq!(c1.id, c2.id);
        }

        #[test]
        fn test_change_id_depends_on_snapshot(
            params: ChangeParams,
            n1 in cell(),
            n2 in cell(),
        ) {
            prop_assume!(n1 != n2);

            let c1 = change_from_params(&ChangeParams { name: Some(n1), ..params.clone() });
            let c2 = change_from_params(&ChangeParams { name: Some(n2), ..params });

            prop_assert_ne!(c1.id, c2.id);
        }

        #[test]
        fn test_arrival_order_does_not_change_state(batch in change_batch(24)) {
            let mut reversed = batch.clone();
            reversed.reverse();

            let (forward, backward) = block_on(async {
                let a = MemoryStore::new();
                let b = MemoryStore::new();
                a.append(&batch).await.unwrap();
                for change in &reversed {
                    b.append(std::slice::from_ref(change)).await.unwrap();
                }
                (a, b)
            });

            let files: std::collections::BTreeSet<FileId> =
                batch.iter().map(|c| c.file_id.clone()).collect();
            for file in &files {
                let (la, lb) = block_on(async {
                    (forward.latest(file).await.unwrap(), backward.latest(file).await.unwrap())
                });
                prop_assert_eq!(la, lb);
            }

            let (all_a, all_b) = block_on(async {
                (forward.all_changes().await.unwrap(), backward.all_changes().await.unwrap())
            });
            prop_assert_eq!(state_hash(&all_a), state_hash(&all_b));
            prop_assert_eq!(state_hash(&all_a), state_hash(&batch));
        }

        #[test]
        fn test_reordered_document_detects_nothing(doc in csv_document(8)) {
            let mut keys: Vec<&String> = doc.rows.keys().collect();
            keys.reverse();
            let meta = crate::fixtures::keyed_by("id");
            let before = FileSnapshot::new(doc.render(), meta.clone());
            let after = FileSnapshot::new(doc.render_in(&keys), meta);

            let detected = CsvPlugin::new().detect_changes(Some(&before), &after).unwrap();
            prop_assert!(detected.is_empty());
        }
    }
}
