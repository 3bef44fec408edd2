//! The Lix: unified API for change control over structured files.
//!
//! A Lix brings together plugins (detect and apply), the change store, and
//! sync into one interface: write a file, get its changes; materialize a file
//! from its changes; push and pull changes against a server.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use lix_core::{
    check_batch_identity, sort_canonical, validate_change, Change, ChangeBuilder, CoreError,
    EntityId, File, FileId, FileMetadata, LixId, LixSnapshot, SchemaKey, SchemaRegistry,
    LIX_ID_KEY,
};
use lix_plugin::{FileSnapshot, Plugin, PluginRegistry};
use lix_store::{
    export_snapshot, import_snapshot, ChangeStore, Cursor, MemoryStore, StoreError,
};
use lix_sync::{
    verify_convergence, ConvergenceResult, StateHash, SyncClient, SyncConfig, Transport,
};

use crate::clock::Clock;
use crate::error::{LixError, Result};

/// Key/value entry holding the local log position last pushed.
pub const PUSHED_CURSOR_KEY: &str = "lix-sync-pushed";

/// Key/value entry holding the server cursor returned by the last pull.
pub const PULLED_CURSOR_KEY: &str = "lix-sync-pulled";

/// Configuration for a Lix.
#[derive(Debug, Clone)]
pub struct LixConfig {
    /// Whether to validate changes against plugin schemas before appending.
    pub validate_schemas: bool,
    /// Sync configuration.
    pub sync: SyncConfig,
}

impl Default for LixConfig {
    fn default() -> Self {
        Self {
            validate_schemas: true,
            sync: SyncConfig::default(),
        }
    }
}

/// A materialized file.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    /// File bytes rebuilt by the plugin.
    pub content: Bytes,
    /// Latest changes of schemas the plugin does not render, in canonical order.
    pub passthrough: Vec<Change>,
}

/// Result of a push, pull or sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Changes the server accepted.
    pub pushed: usize,
    /// Changes received that were new locally.
    pub pulled: usize,
    /// Changes skipped on either side because they were already present.
    pub duplicates: usize,
    /// Local files whose data was rebuilt from pulled changes.
    pub files_updated: Vec<FileId>,
    /// Outcome of the state hash comparison, when performed.
    pub convergence: Option<ConvergenceResult>,
}

impl SyncReport {
    pub fn is_converged(&self) -> bool {
        self.convergence
            .as_ref()
            .map_or(false, ConvergenceResult::is_converged)
    }
}

/// The main Lix struct.
///
/// Provides a unified API for:
/// - Writing files and recording their changes
/// - Materializing files from changes
/// - Querying history
/// - Syncing with a server
pub struct Lix<S: ChangeStore> {
    /// Identity of this Lix (the `lix-id` entry).
    lix_id: LixId,
    /// The storage backend.
    store: Arc<S>,
    /// Detectors and appliers.
    plugins: PluginRegistry,
    /// Union of plugin schemas.
    schemas: SchemaRegistry,
    /// Configuration.
    config: LixConfig,
    /// Timestamps for change batches.
    clock: Clock,
}

impl<S: ChangeStore> Lix<S> {
    /// Create a new Lix in an empty store, with a random id.
    ///
    /// # Errors
    /// - `InvalidOperation` if the store already holds a Lix
    pub async fn new(store: S, plugins: PluginRegistry, config: LixConfig) -> Result<Self> {
        if let Some(existing) = store.get_key_value(LIX_ID_KEY).await? {
            return Err(LixError::InvalidOperation(format!(
                "store already holds lix {}",
                existing
            )));
        }
        let lix_id = LixId::random();
        store.set_key_value(LIX_ID_KEY, lix_id.as_str()).await?;
        info!(lix_id = %lix_id, "created lix");
        Self::assemble(lix_id, store, plugins, config).await
    }

    /// Open the Lix held by a store.
    ///
    /// # Errors
    /// - `Core(MissingKey)` if the store has no `lix-id`
    pub async fn open(store: S, plugins: PluginRegistry, config: LixConfig) -> Result<Self> {
        let lix_id = store
            .get_key_value(LIX_ID_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(LixId::new)
            .ok_or(CoreError::MissingKey(LIX_ID_KEY))?;
        Self::assemble(lix_id, store, plugins, config).await
    }

    async fn assemble(
        lix_id: LixId,
        store: S,
        plugins: PluginRegistry,
        config: LixConfig,
    ) -> Result<Self> {
        let schemas = plugins.schema_registry()?;
        let clock = Clock::new();
        for change in store.all_changes().await? {
            clock.observe(change.created_at);
        }
        Ok(Self {
            lix_id,
            store: Arc::new(store),
            plugins,
            schemas,
            config,
            clock,
        })
    }

    pub fn lix_id(&self) -> &LixId {
        &self.lix_id
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Encode the whole Lix as a container blob.
    pub async fn to_blob(&self) -> Result<Bytes> {
        let snapshot = export_snapshot(&*self.store).await?;
        Ok(Bytes::from(snapshot.encode()?))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // File Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a file by path, creating it on first write.
    ///
    /// Returns the file id and the changes recorded for this write.
    pub async fn write_file(
        &self,
        path: &str,
        data: impl Into<Bytes>,
        metadata: FileMetadata,
    ) -> Result<(FileId, Vec<Change>)> {
        let existing = self
            .store
            .list_files()
            .await?
            .into_iter()
            .find(|f| f.path == path);
        let id = match existing {
            Some(file) => file.id,
            None => FileId::random(),
        };
        let changes = self.write_file_with_id(&id, path, data, metadata).await?;
        Ok((id, changes))
    }

    /// Write a file under a caller-assigned id.
    ///
    /// Runs the path's plugin against the previously stored data, drops
    /// detected changes that match the entity's current head, and appends the
    /// rest as one batch.
    ///
    /// # Errors
    /// - `NoPlugin` if no plugin matches `path`
    /// - `InvalidOperation` if another file already has `path`
    /// - `Plugin` if the data cannot be parsed or violates its schema
    pub async fn write_file_with_id(
        &self,
        id: &FileId,
        path: &str,
        data: impl Into<Bytes>,
        metadata: FileMetadata,
    ) -> Result<Vec<Change>> {
        let data = data.into();
        let plugin = self.plugin_for(path)?;

        let files = self.store.list_files().await?;
        if let Some(other) = files.iter().find(|f| f.path == path && &f.id != id) {
            return Err(LixError::InvalidOperation(format!(
                "path {} already belongs to file {}",
                path, other.id
            )));
        }
        let previous = files.into_iter().find(|f| &f.id == id);

        // 1. Detect
        let before = previous.as_ref().map(FileSnapshot::from);
        let after = FileSnapshot::new(data.clone(), metadata.clone());
        let detected = plugin.detect_changes(before.as_ref(), &after)?;

        // 2. Stamp, skipping no-ops against the current heads
        let heads = self.store.heads(id).await?;
        let created_at = self.clock.next();
        let changes: Vec<Change> = detected
            .into_iter()
            .filter_map(|d| {
                let head = heads.get(&d.entity_id);
                match head {
                    Some(h) if h.schema_key == d.schema_key && h.snapshot == d.snapshot => {
                        return None
                    }
                    None if d.snapshot.is_none() => return None,
                    _ => {}
                }
                Some(
                    ChangeBuilder::new(id.clone(), d.entity_id, d.schema_key)
                        .plugin(plugin.key())
                        .maybe_snapshot(d.snapshot)
                        .parent(head.map(|h| h.id))
                        .created_at(created_at)
                        .build(),
                )
            })
            .collect();

        // 3. Append, then record the new file state
        check_batch_identity(&changes)?;
        self.check_schemas(&changes)?;
        let report = self.store.append(&changes).await?;
        self.store
            .upsert_file(&File {
                id: id.clone(),
                path: path.to_string(),
                data,
                metadata,
            })
            .await?;

        debug!(
            file_id = %id,
            path,
            changes = changes.len(),
            accepted = report.accepted(),
            "wrote file"
        );
        Ok(changes)
    }

    /// Get a file.
    pub async fn file(&self, id: &FileId) -> Result<File> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| LixError::FileNotFound(id.clone()))
    }

    /// List all files, ordered by path.
    pub async fn files(&self) -> Result<Vec<File>> {
        Ok(self.store.list_files().await?)
    }

    /// Rebuild a file from its latest changes.
    ///
    /// The result depends only on the set of latest changes, not on the
    /// stored file data.
    pub async fn materialize(&self, id: &FileId) -> Result<Materialized> {
        let file = self.file(id).await?;
        let plugin = self
            .plugins
            .for_path(&file.path)
            .ok_or_else(|| LixError::Materialization(format!("no plugin handles {}", file.path)))?;
        let known = schema_keys(plugin.as_ref());

        let latest = self.store.latest(id).await?;
        let (render, mut passthrough): (Vec<Change>, Vec<Change>) = latest
            .into_values()
            .partition(|c| known.contains(&c.schema_key));
        sort_canonical(&mut passthrough);

        let content = plugin
            .apply_changes(None, &file.metadata, &render)
            .map_err(LixError::from_apply)?;
        Ok(Materialized {
            content,
            passthrough,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Query Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Every change of one entity, in canonical order.
    pub async fn history(&self, file_id: &FileId, entity_id: &EntityId) -> Result<Vec<Change>> {
        Ok(self.store.history(file_id, entity_id).await?)
    }

    /// Latest non-deleted change per entity of a file.
    pub async fn latest(&self, file_id: &FileId) -> Result<BTreeMap<EntityId, Change>> {
        Ok(self.store.latest(file_id).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// A sync client over `transport` using this Lix's sync configuration.
    pub fn client<T: Transport>(&self, transport: T) -> SyncClient<T> {
        SyncClient::new(transport, self.config.sync.clone())
    }

    /// Upload this Lix to the server as a new container.
    ///
    /// # Errors
    /// - `Sync(Conflict)` if the server already has this id
    pub async fn publish<T: Transport>(&self, client: &SyncClient<T>) -> Result<()> {
        let cursor = self.store.cursor().await?;
        let blob = self.to_blob().await?;
        client.create(blob).await?;
        self.set_cursor(PUSHED_CURSOR_KEY, cursor).await?;
        info!(lix_id = %self.lix_id, "published lix");
        Ok(())
    }

    /// Push changes recorded since the last push.
    pub async fn push<T: Transport>(&self, client: &SyncClient<T>) -> Result<SyncReport> {
        let since = self.get_cursor(PUSHED_CURSOR_KEY).await?.unwrap_or(Cursor::START);
        let (changes, cursor) = self.store.changes_since(since).await?;
        let result = client.push(&self.lix_id, &changes).await?;
        self.set_cursor(PUSHED_CURSOR_KEY, cursor).await?;

        Ok(SyncReport {
            pushed: result.accepted,
            duplicates: result.duplicates,
            ..SyncReport::default()
        })
    }

    /// Pull changes the server received since the last pull.
    ///
    /// Known files touched by new changes get their data rebuilt so later
    /// writes are diffed against the merged state.
    pub async fn pull<T: Transport>(&self, client: &SyncClient<T>) -> Result<SyncReport> {
        let (report, _) = self.pull_changes(client).await?;
        Ok(report)
    }

    /// Push, then pull, then compare state hashes with the server.
    pub async fn sync<T: Transport>(&self, client: &SyncClient<T>) -> Result<SyncReport> {
        let pushed = self.push(client).await?;
        let (pulled, remote) = self.pull_changes(client).await?;

        let convergence = if self.config.sync.verify_convergence {
            let result = verify_convergence(&*self.store, &remote).await?;
            if !result.is_converged() {
                warn!(lix_id = %self.lix_id, result = ?result, "lix did not converge");
            }
            Some(result)
        } else {
            None
        };

        let report = SyncReport {
            pushed: pushed.pushed,
            pulled: pulled.pulled,
            duplicates: pushed.duplicates + pulled.duplicates,
            files_updated: pulled.files_updated,
            convergence,
        };
        info!(
            lix_id = %self.lix_id,
            pushed = report.pushed,
            pulled = report.pulled,
            converged = report.is_converged(),
            "sync finished"
        );
        Ok(report)
    }

    async fn pull_changes<T: Transport>(
        &self,
        client: &SyncClient<T>,
    ) -> Result<(SyncReport, StateHash)> {
        let since = self.get_cursor(PULLED_CURSOR_KEY).await?;
        let result = client.pull(&self.lix_id, since).await?;

        for change in &result.changes {
            self.clock.observe(change.created_at);
        }
        self.check_schemas(&result.changes)?;

        let local_before = self.store.cursor().await?;
        let report = self.store.append(&result.changes).await?;
        self.set_cursor(PULLED_CURSOR_KEY, result.cursor).await?;

        // Nothing local was waiting to be pushed, so the pulled changes need
        // not be pushed back.
        if self.get_cursor(PUSHED_CURSOR_KEY).await? == Some(local_before) {
            self.set_cursor(PUSHED_CURSOR_KEY, report.cursor).await?;
        }

        let inserted: HashSet<_> = report.inserted.iter().collect();
        let new_changes: Vec<&Change> = result
            .changes
            .iter()
            .filter(|c| inserted.contains(&c.id))
            .collect();
        let files_updated = self.refresh_files(&new_changes).await?;

        let report = SyncReport {
            pulled: report.accepted(),
            duplicates: report.duplicates,
            files_updated,
            ..SyncReport::default()
        };
        Ok((report, result.state_hash))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn plugin_for(&self, path: &str) -> Result<Arc<dyn Plugin>> {
        self.plugins
            .for_path(path)
            .ok_or_else(|| LixError::NoPlugin(path.to_string()))
    }

    /// Validate a batch against plugin schemas, if configured.
    fn check_schemas(&self, changes: &[Change]) -> Result<()> {
        if !self.config.validate_schemas {
            return Ok(());
        }
        for change in changes {
            validate_change(change, &self.schemas)?;
        }
        Ok(())
    }

    async fn get_cursor(&self, key: &str) -> Result<Option<Cursor>> {
        match self.store.get_key_value(key).await? {
            None => Ok(None),
            Some(raw) => raw.parse().map(|n| Some(Cursor(n))).map_err(|_| {
                LixError::Store(StoreError::InvalidData(format!(
                    "{} holds a non-numeric cursor {:?}",
                    key, raw
                )))
            }),
        }
    }

    async fn set_cursor(&self, key: &str, cursor: Cursor) -> Result<()> {
        Ok(self.store.set_key_value(key, &cursor.to_string()).await?)
    }

    /// Rebuild the data of known files touched by `changes`.
    async fn refresh_files(&self, changes: &[&Change]) -> Result<Vec<FileId>> {
        let mut touched: BTreeMap<FileId, BTreeSet<EntityId>> = BTreeMap::new();
        for change in changes {
            touched
                .entry(change.file_id.clone())
                .or_default()
                .insert(change.entity_id.clone());
        }

        let mut updated = Vec::new();
        for (file_id, entities) in touched {
            let Some(file) = self.store.get_file(&file_id).await? else {
                debug!(file_id = %file_id, "pulled changes for a file not present locally");
                continue;
            };
            let Some(plugin) = self.plugins.for_path(&file.path) else {
                continue;
            };
            let known = schema_keys(plugin.as_ref());

            // Current heads of the touched entities, tombstones included.
            let heads: Vec<Change> = self
                .store
                .heads(&file_id)
                .await?
                .into_values()
                .filter(|c| entities.contains(&c.entity_id) && known.contains(&c.schema_key))
                .collect();

            let base = FileSnapshot::from(&file);
            let data = plugin
                .apply_changes(Some(&base), &file.metadata, &heads)
                .map_err(LixError::from_apply)?;
            if data != file.data {
                self.store.upsert_file(&File { data, ..file }).await?;
                updated.push(file_id);
            }
        }
        Ok(updated)
    }
}

impl Lix<MemoryStore> {
    /// Load a Lix from a container blob into memory.
    pub async fn from_blob(
        blob: &[u8],
        plugins: PluginRegistry,
        config: LixConfig,
    ) -> Result<Self> {
        let snapshot = LixSnapshot::decode(blob)?;
        let store = if config.validate_schemas {
            MemoryStore::with_schemas(plugins.schema_registry()?)
        } else {
            MemoryStore::new()
        };
        import_snapshot(&store, &snapshot).await?;
        Self::open(store, plugins, config).await
    }

    /// Download a Lix from the server into memory.
    pub async fn fetch<T: Transport>(
        client: &SyncClient<T>,
        lix_id: &LixId,
        plugins: PluginRegistry,
        config: LixConfig,
    ) -> Result<Self> {
        let blob = client.fetch(lix_id).await?;
        let lix = Self::from_blob(&blob, plugins, config).await?;
        let cursor = lix.store.cursor().await?;
        lix.set_cursor(PUSHED_CURSOR_KEY, cursor).await?;
        Ok(lix)
    }
}

fn schema_keys(plugin: &dyn Plugin) -> HashSet<SchemaKey> {
    plugin.schemas().into_iter().map(|s| s.key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lix_plugin::default_plugins;

    const CSV: &str = "Stakeholder,Role\nA,Owner\nB,Reviewer\n";

    fn meta() -> FileMetadata {
        FileMetadata::new().with("unique_column", "Stakeholder")
    }

    async fn lix() -> Lix<MemoryStore> {
        Lix::new(MemoryStore::new(), default_plugins(), LixConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_initialized_store() {
        let store = MemoryStore::new();
        store.set_key_value(LIX_ID_KEY, "existing").await.unwrap();
        assert!(matches!(
            Lix::new(store, default_plugins(), LixConfig::default()).await,
            Err(LixError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_open_reads_lix_id() {
        let store = MemoryStore::new();
        store.set_key_value(LIX_ID_KEY, "existing").await.unwrap();
        let lix = Lix::open(store, default_plugins(), LixConfig::default())
            .await
            .unwrap();
        assert_eq!(lix.lix_id(), &LixId::new("existing"));
    }

    #[tokio::test]
    async fn test_open_requires_lix_id() {
        let result = Lix::open(MemoryStore::new(), default_plugins(), LixConfig::default()).await;
        assert!(matches!(result, Err(LixError::Core(CoreError::MissingKey(_)))));
    }

    #[tokio::test]
    async fn test_write_same_content_twice_is_noop() {
        let lix = lix().await;
        let (id, first) = lix.write_file("/data.csv", CSV, meta()).await.unwrap();
        assert_eq!(first.len(), 3);

        let (same_id, second) = lix.write_file("/data.csv", CSV, meta()).await.unwrap();
        assert_eq!(same_id, id);
        assert!(second.is_empty());
        assert_eq!(lix.files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_links_parent() {
        let lix = lix().await;
        let (id, first) = lix.write_file("/data.csv", CSV, meta()).await.unwrap();
        let (_, second) = lix
            .write_file("/data.csv", "Stakeholder,Role\nA,Owner\nB,Approver\n", meta())
            .await
            .unwrap();

        assert_eq!(second.len(), 1);
        let entity = EntityId::new("Stakeholder|B");
        let original = first.iter().find(|c| c.entity_id == entity).unwrap();
        assert_eq!(second[0].parent_id, Some(original.id));
        assert!(second[0].created_at > original.created_at);

        let history = lix.history(&id, &entity).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_no_plugin_for_path() {
        let lix = lix().await;
        assert!(matches!(
            lix.write_file("/notes.txt", "hello", FileMetadata::new()).await,
            Err(LixError::NoPlugin(path)) if path == "/notes.txt"
        ));
    }

    #[tokio::test]
    async fn test_path_owned_by_other_file() {
        let lix = lix().await;
        lix.write_file("/data.csv", CSV, meta()).await.unwrap();
        let result = lix
            .write_file_with_id(&FileId::new("other"), "/data.csv", CSV, meta())
            .await;
        assert!(matches!(result, Err(LixError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_materialize_missing_file() {
        let lix = lix().await;
        assert!(matches!(
            lix.materialize(&FileId::new("nope")).await,
            Err(LixError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let lix = lix().await;
        let (id, _) = lix.write_file("/data.csv", CSV, meta()).await.unwrap();
        let blob = lix.to_blob().await.unwrap();

        let copy = Lix::from_blob(&blob, default_plugins(), LixConfig::default())
            .await
            .unwrap();
        assert_eq!(copy.lix_id(), lix.lix_id());
        assert_eq!(copy.file(&id).await.unwrap().data, Bytes::from(CSV));
        assert_eq!(
            copy.materialize(&id).await.unwrap(),
            lix.materialize(&id).await.unwrap()
        );
    }
}
