//! In-memory implementation of the ChangeStore trait.
//!
//! Same semantics as SQLite but keeps everything in memory with no
//! persistence. The sync handler uses it to manipulate a decoded container.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use lix_core::{sort_canonical, Change, ChangeId, EntityId, File, FileId, SchemaRegistry};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::traits::{fold_heads, validate_batch, AppendReport, ChangeStore, Cursor};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    schemas: SchemaRegistry,
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Append log; position `i` holds cursor `i + 1`.
    log: Vec<Change>,

    /// Id index into `log`.
    by_id: HashMap<ChangeId, usize>,

    files: BTreeMap<FileId, File>,

    key_value: BTreeMap<String, String>,
}

impl MemoryStore {
    /// Create a new empty in-memory store that accepts any well-formed schema.
    pub fn new() -> Self {
        Self::with_schemas(SchemaRegistry::new())
    }

    /// Create a store that validates snapshots against `schemas`.
    pub fn with_schemas(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Backend(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeStore for MemoryStore {
    async fn append(&self, changes: &[Change]) -> Result<AppendReport> {
        // Validation touches no shared state.
        validate_batch(&self.schemas, changes)?;

        let mut inner = self.write()?;
        let mut report = AppendReport::default();

        for change in changes {
            if inner.by_id.contains_key(&change.id) {
                report.duplicates += 1;
                continue;
            }
            let position = inner.log.len();
            inner.by_id.insert(change.id, position);
            inner.log.push(change.clone());
            report.inserted.push(change.id);
        }

        report.cursor = Cursor(inner.log.len() as u64);
        debug!(
            inserted = report.accepted(),
            duplicates = report.duplicates,
            cursor = report.cursor.0,
            "appended batch"
        );
        Ok(report)
    }

    async fn get_change(&self, id: &ChangeId) -> Result<Option<Change>> {
        let inner = self.read()?;
        Ok(inner.by_id.get(id).map(|&i| inner.log[i].clone()))
    }

    async fn has_change(&self, id: &ChangeId) -> Result<bool> {
        Ok(self.read()?.by_id.contains_key(id))
    }

    async fn history(&self, file_id: &FileId, entity_id: &EntityId) -> Result<Vec<Change>> {
        let inner = self.read()?;
        let mut history: Vec<Change> = inner
            .log
            .iter()
            .filter(|c| &c.file_id == file_id && &c.entity_id == entity_id)
            .cloned()
            .collect();
        sort_canonical(&mut history);
        Ok(history)
    }

    async fn heads(&self, file_id: &FileId) -> Result<BTreeMap<EntityId, Change>> {
        let inner = self.read()?;
        Ok(fold_heads(inner.log.iter().filter(|c| &c.file_id == file_id)))
    }

    async fn changes_since(&self, since: Cursor) -> Result<(Vec<Change>, Cursor)> {
        let inner = self.read()?;
        let start = (since.0 as usize).min(inner.log.len());
        let mut changes = inner.log[start..].to_vec();
        sort_canonical(&mut changes);
        Ok((changes, Cursor(inner.log.len() as u64)))
    }

    async fn cursor(&self) -> Result<Cursor> {
        Ok(Cursor(self.read()?.log.len() as u64))
    }

    async fn all_changes(&self) -> Result<Vec<Change>> {
        Ok(self.read()?.log.clone())
    }

    async fn upsert_file(&self, file: &File) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(other) = inner
            .files
            .values()
            .find(|f| f.path == file.path && f.id != file.id)
        {
            return Err(StoreError::InvalidData(format!(
                "path {} already belongs to file {}",
                file.path, other.id
            )));
        }
        inner.files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<File>> {
        Ok(self.read()?.files.get(id).cloned())
    }

    async fn list_files(&self) -> Result<Vec<File>> {
        let mut files: Vec<File> = self.read()?.files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_key_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.key_value.get(key).cloned())
    }

    async fn set_key_value(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .key_value
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn key_values(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.read()?.key_value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_core::{
        ChangeBuilder, PropertyDef, PropertyKind, SchemaDefinition, SchemaKey, ValidationError,
    };
    use serde_json::json;

    fn row(entity: &str, role: &str, ts: i64, parent: Option<ChangeId>) -> Change {
        ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new(entity),
            SchemaKey::new("csv_row_v1").unwrap(),
        )
        .plugin("csv")
        .snapshot(json!({"values": {"Role": role}}))
        .parent(parent)
        .created_at(ts)
        .build()
    }

    fn tombstone(entity: &str, ts: i64, parent: ChangeId) -> Change {
        ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new(entity),
            SchemaKey::new("csv_row_v1").unwrap(),
        )
        .plugin("csv")
        .parent(Some(parent))
        .created_at(ts)
        .build()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let change = row("k|a", "PM", 1, None);

        let report = store.append(&[change.clone()]).await.unwrap();
        assert_eq!(report.inserted, vec![change.id]);
        assert_eq!(report.cursor, Cursor(1));

        let fetched = store.get_change(&change.id).await.unwrap().unwrap();
        assert_eq!(fetched, change);
        assert!(store.has_change(&change.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();
        let batch = vec![row("k|a", "PM", 1, None), row("k|b", "Dev", 1, None)];

        store.append(&batch).await.unwrap();
        let history_once = store.history(&FileId::new("f"), &EntityId::new("k|a")).await.unwrap();

        let again = store.append(&batch).await.unwrap();
        assert_eq!(again.accepted(), 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(again.cursor, Cursor(2));

        let history_twice = store.history(&FileId::new("f"), &EntityId::new("k|a")).await.unwrap();
        assert_eq!(history_once, history_twice);
    }

    #[tokio::test]
    async fn test_history_is_canonical() {
        let store = MemoryStore::new();
        let first = row("k|a", "PM", 1, None);
        let second = row("k|a", "Lead", 2, Some(first.id));
        store.append(&[second.clone()]).await.unwrap();
        store.append(&[first.clone()]).await.unwrap();

        let history = store.history(&FileId::new("f"), &EntityId::new("k|a")).await.unwrap();
        assert_eq!(history, vec![first, second]);
    }

    #[tokio::test]
    async fn test_latest_skips_tombstones() {
        let store = MemoryStore::new();
        let a = row("k|a", "PM", 1, None);
        let b = row("k|b", "Dev", 1, None);
        let gone = tombstone("k|b", 2, b.id);
        store.append(&[a.clone(), b, gone.clone()]).await.unwrap();

        let file = FileId::new("f");
        let latest = store.latest(&file).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[&EntityId::new("k|a")], a);

        let heads = store.heads(&file).await.unwrap();
        assert_eq!(heads[&EntityId::new("k|b")], gone);
    }

    #[tokio::test]
    async fn test_revert_is_recorded() {
        let store = MemoryStore::new();
        let v1 = row("k|a", "PM", 1, None);
        let v2 = row("k|a", "Lead", 2, Some(v1.id));
        let back = row("k|a", "PM", 3, Some(v2.id));
        let report = store.append(&[v1, v2, back.clone()]).await.unwrap();
        assert_eq!(report.accepted(), 3);

        let latest = store.latest(&FileId::new("f")).await.unwrap();
        assert_eq!(latest[&EntityId::new("k|a")], back);
    }

    #[tokio::test]
    async fn test_changes_since() {
        let store = MemoryStore::new();
        store.append(&[row("k|a", "PM", 5, None)]).await.unwrap();
        let mark = store.cursor().await.unwrap();

        let late = row("k|b", "Dev", 9, None);
        let early = row("k|c", "QA", 3, None);
        store.append(&[late.clone(), early.clone()]).await.unwrap();

        let (changes, cursor) = store.changes_since(mark).await.unwrap();
        assert_eq!(changes, vec![early, late]);
        assert_eq!(cursor, Cursor(3));

        let (none, same) = store.changes_since(cursor).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(same, cursor);
    }

    #[tokio::test]
    async fn test_same_instant_states_settle_by_id() {
        let a = row("k|a", "PM", 1, None);
        let b = row("k|a", "Dev", 1, None);
        let winner = if a.id > b.id { a.clone() } else { b.clone() };

        let separate = MemoryStore::new();
        separate.append(&[a.clone()]).await.unwrap();
        separate.append(&[b.clone()]).await.unwrap();

        let together = MemoryStore::new();
        let report = together.append(&[b.clone(), a.clone()]).await.unwrap();
        assert_eq!(report.accepted(), 2);

        for store in [&separate, &together] {
            let heads = store.heads(&FileId::new("f")).await.unwrap();
            assert_eq!(heads[&EntityId::new("k|a")], winner);
        }
    }

    #[tokio::test]
    async fn test_schema_violation() {
        let schemas = SchemaRegistry::from_definitions([SchemaDefinition::new(
            SchemaKey::new("csv_row_v1").unwrap(),
            vec![PropertyDef::required("values", PropertyKind::StringMap)],
        )])
        .unwrap();
        let store = MemoryStore::with_schemas(schemas);

        let bad = ChangeBuilder::new(
            FileId::new("f"),
            EntityId::new("k|a"),
            SchemaKey::new("csv_row_v1").unwrap(),
        )
        .snapshot(json!({"values": [1, 2]}))
        .build();

        let err = store.append(&[bad]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::SchemaViolation { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_files_and_key_values() {
        let store = MemoryStore::new();
        let file = File {
            id: FileId::new("f"),
            path: "/a.csv".into(),
            data: bytes::Bytes::from_static(b"x\n"),
            metadata: Default::default(),
        };
        store.upsert_file(&file).await.unwrap();
        assert_eq!(store.get_file(&file.id).await.unwrap(), Some(file.clone()));

        let clash = File {
            id: FileId::new("g"),
            ..file.clone()
        };
        assert!(store.upsert_file(&clash).await.is_err());

        store.set_key_value("lix-id", "abc").await.unwrap();
        assert_eq!(
            store.get_key_value("lix-id").await.unwrap().as_deref(),
            Some("abc")
        );
        assert_eq!(store.key_values().await.unwrap().len(), 1);
    }
}
