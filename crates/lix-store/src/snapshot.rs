//! Conversion between a store and the portable container blob.

use lix_core::{LixSnapshot, CONTAINER_FORMAT};
use tracing::debug;

use crate::error::Result;
use crate::traits::{AppendReport, ChangeStore};

/// Export a store's contents as a container snapshot.
///
/// Changes are exported in log order so that importing them reproduces the
/// same cursors.
pub async fn export_snapshot<S: ChangeStore + ?Sized>(store: &S) -> Result<LixSnapshot> {
    Ok(LixSnapshot {
        format: CONTAINER_FORMAT,
        key_value: store.key_values().await?,
        files: store.list_files().await?,
        changes: store.all_changes().await?,
    })
}

/// Load a container snapshot into a store.
///
/// Changes are validated and appended as one batch; changes already present
/// are skipped.
pub async fn import_snapshot<S: ChangeStore + ?Sized>(
    store: &S,
    snapshot: &LixSnapshot,
) -> Result<AppendReport> {
    let report = store.append(&snapshot.changes).await?;
    for file in &snapshot.files {
        store.upsert_file(file).await?;
    }
    for (key, value) in &snapshot.key_value {
        store.set_key_value(key, value).await?;
    }
    debug!(
        files = snapshot.files.len(),
        changes = report.accepted(),
        "imported container"
    );
    Ok(report)
}
