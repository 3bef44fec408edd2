//! Property tests for the CSV detector and applier.

use std::collections::BTreeMap;

use lix_core::{Change, ChangeBuilder, FileId, FileMetadata};
use lix_plugin::csv::UNIQUE_COLUMN;
use lix_plugin::{CsvPlugin, DetectedChange, FileSnapshot, Plugin};
use proptest::prelude::*;

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,8}",
        "[a-z]{1,4}(,|\"|\n)[a-z]{1,4}",
    ]
}

/// Rows keyed by `id`, as a map so keys are unique.
fn table() -> impl Strategy<Value = BTreeMap<String, (String, String)>> {
    prop::collection::btree_map("[a-z0-9]{1,6}", (cell(), cell()), 0..12)
}

fn render(rows: &[(&String, &(String, String))]) -> Vec<u8> {
    let quote = |s: &str| {
        if s.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", s.replace('"', "\"\""))
        } else {
            s.to_string()
        }
    };
    let mut out = String::from("id,name,role\n");
    for (id, (name, role)) in rows {
        out.push_str(&format!("{},{},{}\n", id, quote(name), quote(role)));
    }
    out.into_bytes()
}

fn snapshot(data: Vec<u8>) -> FileSnapshot {
    FileSnapshot::new(data, FileMetadata::new().with(UNIQUE_COLUMN, "id"))
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

proptest! {
    #[test]
    fn prop_identical_snapshots_emit_nothing(rows in table()) {
        let plugin = CsvPlugin::new();
        let data = render(&rows.iter().collect::<Vec<_>>());
        let detected = plugin
            .detect_changes(Some(&snapshot(data.clone())), &snapshot(data))
            .unwrap();
        prop_assert!(detected.is_empty());
    }

    #[test]
    fn prop_reordering_rows_emits_nothing(rows in table()) {
        let plugin = CsvPlugin::new();
        let forward: Vec<_> = rows.iter().collect();
        let backward: Vec<_> = rows.iter().rev().collect();
        let detected = plugin
            .detect_changes(Some(&snapshot(render(&forward))), &snapshot(render(&backward)))
            .unwrap();
        prop_assert!(detected.is_empty());
    }

    #[test]
    fn prop_materialize_roundtrip(rows in table()) {
        let plugin = CsvPlugin::new();
        let after = snapshot(render(&rows.iter().collect::<Vec<_>>()));
        let changes = stamp(plugin.detect_changes(None, &after).unwrap(), 1);
        let bytes = plugin.apply_changes(None, &after.metadata, &changes).unwrap();
        prop_assert_eq!(bytes.as_ref(), after.data.as_ref());
    }

    #[test]
    fn prop_apply_onto_before_reproduces_after(before in table(), after in table()) {
        let plugin = CsvPlugin::new();

        // Surviving rows keep their relative order; new rows follow.
        let mut merged: Vec<(&String, &(String, String))> = before
            .keys()
            .filter_map(|k| after.get_key_value(k))
            .collect();
        merged.extend(after.iter().filter(|(k, _)| !before.contains_key(*k)));

        let before_snap = snapshot(render(&before.iter().collect::<Vec<_>>()));
        let after_snap = snapshot(render(&merged));

        let changes = stamp(plugin.detect_changes(Some(&before_snap), &after_snap).unwrap(), 2);
        let bytes = plugin
            .apply_changes(Some(&before_snap), &after_snap.metadata, &changes)
            .unwrap();
        prop_assert_eq!(bytes.as_ref(), after_snap.data.as_ref());
    }
}
