//! Server side of the sync protocol.
//!
//! Each Lix is stored as one container blob under `lix-file-{id}`. Push is a
//! read-modify-write of that blob, so pushes are serialized per handler.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use lix_core::{check_batch_identity, Change, ChangeId, LixId, LixSnapshot, SchemaRegistry};
use lix_store::{
    export_snapshot, import_snapshot, BlobBackend, ChangeStore, Cursor, MemoryStore, StoreError,
};

use crate::convergence::state_hash;
use crate::error::{Result, SyncError};
use crate::messages::{
    NewResult, Operation, PullResult, PushResult, Request, Response, StatusCode,
};

/// Configuration for the protocol handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Largest accepted request body (and uploaded container).
    pub max_upload_bytes: usize,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Backend key of a stored container.
pub fn blob_key(lix_id: &LixId) -> String {
    format!("lix-file-{}", lix_id)
}

/// Handles protocol requests against a blob backend.
///
/// The handler keeps no state of its own besides the push lock; everything
/// lives in the backend.
pub struct ProtocolHandler<B: BlobBackend> {
    backend: B,
    schemas: SchemaRegistry,
    config: HandlerConfig,
    push_lock: Mutex<()>,
}

impl<B: BlobBackend> ProtocolHandler<B> {
    /// Create a handler. Changes of unregistered schemas are stored opaquely.
    pub fn new(backend: B, config: HandlerConfig) -> Self {
        Self {
            backend,
            schemas: SchemaRegistry::new(),
            config,
            push_lock: Mutex::new(()),
        }
    }

    /// Validate uploaded changes against these schemas.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Handle a decoded request. Never fails; errors become error responses.
    pub async fn handle(&self, request: Request) -> Response {
        let operation = request.operation();
        let result = match request {
            Request::New { blob } => self
                .create(blob)
                .await
                .and_then(|r| Response::json(StatusCode::Created, &r)),
            Request::Get { lix_id } => self
                .fetch(&lix_id)
                .await
                .map(|blob| Response::bytes(StatusCode::Ok, blob)),
            Request::Push { lix_id, changes } => self
                .push(&lix_id, &changes)
                .await
                .and_then(|r| Response::json(StatusCode::Ok, &r)),
            Request::Pull { lix_id, since } => self
                .pull(&lix_id, since)
                .await
                .and_then(|r| Response::json(StatusCode::Ok, &r)),
        };
        result.unwrap_or_else(|e| error_response(operation, &e))
    }

    /// Handle a raw wire body.
    pub async fn handle_bytes(&self, operation: Operation, body: &[u8]) -> Response {
        if body.len() > self.config.max_upload_bytes {
            let err = SyncError::BadRequest(format!(
                "request body of {} bytes exceeds the limit of {} bytes",
                body.len(),
                self.config.max_upload_bytes
            ));
            return error_response(operation, &err);
        }
        match Request::decode(operation, body) {
            Ok(request) => self.handle(request).await,
            Err(e) => error_response(operation, &e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    async fn create(&self, blob: Bytes) -> Result<NewResult> {
        if blob.len() > self.config.max_upload_bytes {
            return Err(SyncError::BadRequest(format!(
                "container of {} bytes exceeds the limit of {} bytes",
                blob.len(),
                self.config.max_upload_bytes
            )));
        }
        let snapshot = LixSnapshot::decode(&blob)
            .map_err(|e| SyncError::BadRequest(format!("malformed container: {}", e)))?;
        let lix_id = snapshot
            .lix_id()
            .map_err(|e| SyncError::BadRequest(e.to_string()))?;

        // Reject containers whose change log would not be accepted by push.
        let store = MemoryStore::with_schemas(self.schemas.clone());
        import_snapshot(&store, &snapshot).await?;

        if !self.backend.put_if_absent(&blob_key(&lix_id), blob).await? {
            return Err(SyncError::Conflict(format!("lix {} already exists", lix_id)));
        }
        info!(lix_id = %lix_id, changes = snapshot.changes.len(), "stored new lix");
        Ok(NewResult { lix_id })
    }

    async fn fetch(&self, lix_id: &LixId) -> Result<Bytes> {
        self.backend
            .get(&blob_key(lix_id))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("lix {}", lix_id)))
    }

    async fn push(&self, lix_id: &LixId, changes: &[Change]) -> Result<PushResult> {
        let _guard = self.push_lock.lock().await;
        let store = self.load(lix_id).await?;

        let report = match store.append(changes).await {
            Ok(report) => report,
            Err(e) => {
                warn!(lix_id = %lix_id, changes = changes.len(), error = %e, "rejected push");
                return Err(e.into());
            }
        };

        // The scratch store is dropped on rejection, so nothing is persisted.
        let inserted: HashSet<&ChangeId> = report.inserted.iter().collect();
        let fresh: Vec<Change> = changes
            .iter()
            .filter(|c| inserted.contains(&c.id))
            .cloned()
            .collect();
        if let Err(e) = check_batch_identity(&fresh) {
            warn!(lix_id = %lix_id, error = %e, "rejected push");
            return Err(StoreError::from(e).into());
        }

        if report.accepted() > 0 {
            let snapshot = export_snapshot(&store).await?;
            let blob = snapshot
                .encode()
                .map_err(|e| SyncError::Internal(format!("encoding container: {}", e)))?;
            self.backend.set(&blob_key(lix_id), Bytes::from(blob)).await?;
        }
        debug!(
            lix_id = %lix_id,
            accepted = report.accepted(),
            duplicates = report.duplicates,
            cursor = %report.cursor,
            "push applied"
        );

        let all = store.all_changes().await?;
        Ok(PushResult {
            cursor: report.cursor,
            accepted: report.accepted(),
            duplicates: report.duplicates,
            state_hash: state_hash(&all),
        })
    }

    async fn pull(&self, lix_id: &LixId, since: Option<Cursor>) -> Result<PullResult> {
        let store = self.load(lix_id).await?;
        let (changes, cursor) = store.changes_since(since.unwrap_or(Cursor::START)).await?;
        let all = store.all_changes().await?;
        debug!(lix_id = %lix_id, changes = changes.len(), cursor = %cursor, "pull served");
        Ok(PullResult {
            changes,
            cursor,
            state_hash: state_hash(&all),
        })
    }

    /// Load a stored container into a scratch store.
    async fn load(&self, lix_id: &LixId) -> Result<MemoryStore> {
        let blob = self.fetch(lix_id).await?;
        let snapshot = LixSnapshot::decode(&blob).map_err(|e| {
            SyncError::Internal(format!("stored container {} is unreadable: {}", lix_id, e))
        })?;
        let store = MemoryStore::with_schemas(self.schemas.clone());
        import_snapshot(&store, &snapshot).await.map_err(|e| {
            SyncError::Internal(format!("stored container {} is invalid: {}", lix_id, e))
        })?;
        Ok(store)
    }
}

fn error_response(operation: Operation, err: &SyncError) -> Response {
    let response = Response::error(err);
    if response.status == StatusCode::InternalServerError {
        error!(operation = %operation, error = %err, "request failed");
    } else {
        debug!(operation = %operation, status = %response.status, error = %err, "request rejected");
    }
    response
}
