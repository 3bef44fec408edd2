//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use lix::{Lix, LixConfig};
use lix_core::{FileMetadata, LixId};
use lix_plugin::csv::UNIQUE_COLUMN;
use lix_plugin::default_plugins;
use lix_store::{MemoryBackend, MemoryStore};
use lix_sync::{HandlerConfig, LocalTransport, ProtocolHandler, SyncClient, SyncConfig};

/// Client type produced by [`TestServer`].
pub type TestClient = SyncClient<LocalTransport<MemoryBackend>>;

/// Render a CSV document with `\n` line endings and a trailing newline.
///
/// Fields containing a comma, quote or line break are quoted.
pub fn csv_text(columns: &[&str], rows: &[&[&str]]) -> String {
    let mut out = String::new();
    push_record(&mut out, columns);
    for row in rows {
        push_record(&mut out, row);
    }
    out
}

fn push_record(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Metadata declaring `column` as the CSV key column.
pub fn keyed_by(column: &str) -> FileMetadata {
    FileMetadata::new().with(UNIQUE_COLUMN, column)
}

/// A fresh in-memory Lix with the default plugins.
pub async fn memory_lix() -> Lix<MemoryStore> {
    Lix::new(MemoryStore::new(), default_plugins(), LixConfig::default())
        .await
        .expect("empty store accepts a new lix")
}

/// An in-process sync server backed by memory.
pub struct TestServer {
    handler: Arc<ProtocolHandler<MemoryBackend>>,
}

impl TestServer {
    /// A server that validates against the default plugins' schemas.
    pub fn new() -> Self {
        Self::with_config(HandlerConfig::default())
    }

    pub fn with_config(config: HandlerConfig) -> Self {
        let schemas = default_plugins()
            .schema_registry()
            .expect("default plugins have distinct schemas");
        Self {
            handler: Arc::new(ProtocolHandler::new(MemoryBackend::new(), config).with_schemas(schemas)),
        }
    }

    pub fn handler(&self) -> &Arc<ProtocolHandler<MemoryBackend>> {
        &self.handler
    }

    pub fn transport(&self) -> LocalTransport<MemoryBackend> {
        LocalTransport::new(self.handler.clone())
    }

    pub fn client(&self) -> TestClient {
        SyncClient::new(self.transport(), SyncConfig::default())
    }

    /// Create an empty Lix and publish it.
    pub async fn publish_new(&self) -> (Lix<MemoryStore>, TestClient) {
        let lix = memory_lix().await;
        let client = lix.client(self.transport());
        lix.publish(&client).await.expect("publish new lix");
        (lix, client)
    }

    /// Download a published Lix into a new in-memory instance.
    pub async fn clone_lix(&self, lix_id: &LixId) -> (Lix<MemoryStore>, TestClient) {
        let client = self.client();
        let lix = Lix::fetch(&client, lix_id, default_plugins(), LixConfig::default())
            .await
            .expect("fetch published lix");
        (lix, client)
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}
