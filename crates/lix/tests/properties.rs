//! Property tests for writing and materializing through a Lix.

use std::collections::BTreeMap;

use lix::plugin::default_plugins;
use lix::store::MemoryStore;
use lix::{FileMetadata, Lix, LixConfig};
use proptest::prelude::*;

type Rows = BTreeMap<String, (String, String)>;

fn cell() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,8}",
        "[a-z]{1,4}(,|\"|\n)[a-z]{1,4}",
    ]
}

fn rows() -> impl Strategy<Value = Rows> {
    prop::collection::btree_map("[a-z0-9]{1,6}", (cell(), cell()), 0..10)
}

fn render<'a>(rows: impl IntoIterator<Item = (&'a String, &'a (String, String))>) -> String {
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
    out
}

fn meta() -> FileMetadata {
    FileMetadata::new().with("unique_column", "id")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_materialize_follows_last_write(versions in prop::collection::vec(rows(), 1..5)) {
        let (content, expected) = runtime().block_on(async {
            let lix = Lix::new(MemoryStore::new(), default_plugins(), LixConfig::default())
                .await
                .unwrap();
            let mut file_id = None;
            for version in &versions {
                let (id, _) = lix.write_file("/t.csv", render(version), meta()).await.unwrap();
                file_id = Some(id);
            }
            let materialized = lix.materialize(&file_id.unwrap()).await.unwrap();
            (materialized.content, render(versions.last().unwrap()))
        });
        prop_assert_eq!(content.as_ref(), expected.as_bytes());
    }

    #[test]
    fn prop_shuffled_rewrite_records_nothing(rows in rows()) {
        let changes = runtime().block_on(async {
            let lix = Lix::new(MemoryStore::new(), default_plugins(), LixConfig::default())
                .await
                .unwrap();
            lix.write_file("/t.csv", render(&rows), meta()).await.unwrap();
            let (_, changes) = lix
                .write_file("/t.csv", render(rows.iter().rev()), meta())
                .await
                .unwrap();
            changes
        });
        prop_assert!(changes.is_empty());
    }
}
