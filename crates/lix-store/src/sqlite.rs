//! SQLite implementation of the ChangeStore trait.
//!
//! This is the persistent store for a local Lix. It uses rusqlite with
//! bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use lix_core::{
    sort_canonical, Change, ChangeId, EntityId, File, FileId, FileMetadata, SchemaKey,
    SchemaRegistry,
};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{fold_heads, validate_batch, AppendReport, ChangeStore, Cursor};

const CHANGE_COLUMNS: &str =
    "id, file_id, entity_id, schema_key, plugin_key, snapshot, parent_id, created_at";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    schemas: SchemaRegistry,
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            schemas: SchemaRegistry::new(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            schemas: SchemaRegistry::new(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Validate snapshots against `schemas` on append.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("spawn_blocking failed: {}", e)))?
    }
}

fn blob_column(index: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(index, name.into(), rusqlite::types::Type::Blob)
}

fn text_column(index: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(index, name.into(), rusqlite::types::Type::Text)
}

fn change_id(bytes: Vec<u8>, index: usize, name: &str) -> rusqlite::Result<ChangeId> {
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| blob_column(index, name))?;
    Ok(ChangeId::from_bytes(bytes))
}

// Helper to convert a row (selected with CHANGE_COLUMNS) to a Change
fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<Change> {
    let snapshot: Option<String> = row.get("snapshot")?;
    let parent: Option<Vec<u8>> = row.get("parent_id")?;
    let schema_key: String = row.get("schema_key")?;

    Ok(Change {
        id: change_id(row.get("id")?, 0, "id")?,
        file_id: FileId::new(row.get::<_, String>("file_id")?),
        entity_id: EntityId::new(row.get::<_, String>("entity_id")?),
        schema_key: SchemaKey::new_unchecked(schema_key),
        plugin_key: row.get("plugin_key")?,
        snapshot: snapshot
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|_| text_column(5, "snapshot"))?,
        parent_id: parent.map(|b| change_id(b, 6, "parent_id")).transpose()?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<File> {
    let data: Vec<u8> = row.get("data")?;
    let metadata: String = row.get("metadata")?;
    let metadata: FileMetadata =
        serde_json::from_str(&metadata).map_err(|_| text_column(3, "metadata"))?;
    Ok(File {
        id: FileId::new(row.get::<_, String>("id")?),
        path: row.get("path")?,
        data: Bytes::from(data),
        metadata,
    })
}

fn query_changes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Change>> {
    let mut stmt = conn.prepare(sql)?;
    let changes = stmt
        .query_map(params, row_to_change)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(changes)
}

fn current_cursor(conn: &Connection) -> Result<Cursor> {
    let seq: i64 = conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM changes", [], |row| {
        row.get(0)
    })?;
    Ok(Cursor(seq as u64))
}

#[async_trait]
impl ChangeStore for SqliteStore {
    async fn append(&self, changes: &[Change]) -> Result<AppendReport> {
        validate_batch(&self.schemas, changes)?;

        // Serialize outside the blocking task so encoding errors surface early.
        let rows = changes
            .iter()
            .map(|c| {
                let snapshot = c.snapshot.as_ref().map(serde_json::to_string).transpose()?;
                Ok((c.clone(), snapshot))
            })
            .collect::<Result<Vec<(Change, Option<String>)>>>()?;

        let report = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut report = AppendReport::default();
                {
                    // Duplicates are skipped before insert so seq stays dense
                    // and matches the log position of the change.
                    let mut exists = tx.prepare("SELECT 1 FROM changes WHERE id = ?1")?;
                    let mut insert = tx.prepare(&format!(
                        "INSERT INTO changes (seq, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        CHANGE_COLUMNS
                    ))?;
                    let mut seq = current_cursor(&tx)?.0 as i64;
                    for (change, snapshot) in &rows {
                        if exists.exists(params![change.id.0.as_slice()])? {
                            report.duplicates += 1;
                            continue;
                        }
                        seq += 1;
                        insert.execute(params![
                            seq,
                            change.id.0.as_slice(),
                            change.file_id.as_str(),
                            change.entity_id.as_str(),
                            change.schema_key.as_str(),
                            change.plugin_key,
                            snapshot,
                            change.parent_id.as_ref().map(|id| id.0.as_slice()),
                            change.created_at,
                        ])?;
                        report.inserted.push(change.id);
                    }
                }
                report.cursor = current_cursor(&tx)?;
                tx.commit()?;
                Ok(report)
            })
            .await?;

        debug!(
            inserted = report.accepted(),
            duplicates = report.duplicates,
            cursor = report.cursor.0,
            "appended batch"
        );
        Ok(report)
    }

    async fn get_change(&self, id: &ChangeId) -> Result<Option<Change>> {
        let id = *id;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM changes WHERE id = ?1", CHANGE_COLUMNS),
                params![id.0.as_slice()],
                row_to_change,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_change(&self, id: &ChangeId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM changes WHERE id = ?1",
                    params![id.0.as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn history(&self, file_id: &FileId, entity_id: &EntityId) -> Result<Vec<Change>> {
        let file_id = file_id.clone();
        let entity_id = entity_id.clone();
        let mut history = self
            .run(move |conn| {
                query_changes(
                    conn,
                    &format!(
                        "SELECT {} FROM changes WHERE file_id = ?1 AND entity_id = ?2",
                        CHANGE_COLUMNS
                    ),
                    params![file_id.as_str(), entity_id.as_str()],
                )
            })
            .await?;
        sort_canonical(&mut history);
        Ok(history)
    }

    async fn heads(&self, file_id: &FileId) -> Result<BTreeMap<EntityId, Change>> {
        let file_id = file_id.clone();
        let changes = self
            .run(move |conn| {
                query_changes(
                    conn,
                    &format!("SELECT {} FROM changes WHERE file_id = ?1", CHANGE_COLUMNS),
                    params![file_id.as_str()],
                )
            })
            .await?;
        Ok(fold_heads(&changes))
    }

    async fn changes_since(&self, since: Cursor) -> Result<(Vec<Change>, Cursor)> {
        let (mut changes, cursor) = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let changes = query_changes(
                    &tx,
                    &format!(
                        "SELECT {} FROM changes WHERE seq > ?1 ORDER BY seq",
                        CHANGE_COLUMNS
                    ),
                    params![since.0 as i64],
                )?;
                let cursor = current_cursor(&tx)?;
                tx.commit()?;
                Ok((changes, cursor))
            })
            .await?;
        sort_canonical(&mut changes);
        Ok((changes, cursor))
    }

    async fn cursor(&self) -> Result<Cursor> {
        self.run(|conn| current_cursor(conn)).await
    }

    async fn all_changes(&self) -> Result<Vec<Change>> {
        self.run(|conn| {
            query_changes(
                conn,
                &format!("SELECT {} FROM changes ORDER BY seq", CHANGE_COLUMNS),
                [],
            )
        })
        .await
    }

    async fn upsert_file(&self, file: &File) -> Result<()> {
        let metadata = serde_json::to_string(&file.metadata)?;
        let file = file.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO files (id, path, data, metadata) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    path = excluded.path,
                    data = excluded.data,
                    metadata = excluded.metadata",
                params![file.id.as_str(), file.path, file.data.as_ref(), metadata],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<File>> {
        let id = id.clone();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, path, data, metadata FROM files WHERE id = ?1",
                params![id.as_str()],
                row_to_file,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_files(&self) -> Result<Vec<File>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, path, data, metadata FROM files ORDER BY path")?;
            let files = stmt
                .query_map([], row_to_file)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(files)
        })
        .await
    }

    async fn get_key_value(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT value FROM key_value WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_key_value(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO key_value (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn key_values(&self) -> Result<BTreeMap<String, String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM key_value")?;
            let entries = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<BTreeMap<String, String>>>()?;
            Ok(entries)
        })
        .await
    }
}
