//! Client side of the sync protocol.

use bytes::Bytes;
use tracing::debug;

use lix_core::{Change, LixId};
use lix_store::Cursor;

use crate::convergence::state_hash;
use crate::error::Result;
use crate::messages::{NewResult, PullResult, PushResult, Request};
use crate::transport::Transport;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum changes sent in one push request.
    pub max_changes_per_push: usize,
    /// Whether `sync` compares state hashes after pulling.
    pub verify_convergence: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_changes_per_push: 500,
            verify_convergence: true,
        }
    }
}

/// Typed client over a [`Transport`].
pub struct SyncClient<T: Transport> {
    transport: T,
    config: SyncConfig,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(transport: T, config: SyncConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Upload a new container. Fails with `Conflict` if its id is taken.
    pub async fn create(&self, blob: Bytes) -> Result<LixId> {
        let response = self.transport.call(Request::New { blob }).await?;
        let result: NewResult = response.into_result()?.decode_json()?;
        Ok(result.lix_id)
    }

    /// Download a stored container.
    pub async fn fetch(&self, lix_id: &LixId) -> Result<Bytes> {
        let response = self
            .transport
            .call(Request::Get {
                lix_id: lix_id.clone(),
            })
            .await?;
        Ok(response.into_result()?.body)
    }

    /// Push changes, split into batches of at most `max_changes_per_push`.
    ///
    /// Counts are summed over batches; cursor and state hash come from the
    /// last batch.
    pub async fn push(&self, lix_id: &LixId, changes: &[Change]) -> Result<PushResult> {
        let batch_size = self.config.max_changes_per_push.max(1);
        let mut batches: Vec<&[Change]> = changes.chunks(batch_size).collect();
        if batches.is_empty() {
            batches.push(&[]);
        }

        let mut total = PushResult {
            cursor: Cursor::START,
            accepted: 0,
            duplicates: 0,
            state_hash: state_hash(&[]),
        };
        for batch in batches {
            let response = self
                .transport
                .call(Request::Push {
                    lix_id: lix_id.clone(),
                    changes: batch.to_vec(),
                })
                .await?;
            let result: PushResult = response.into_result()?.decode_json()?;
            total = PushResult {
                accepted: total.accepted + result.accepted,
                duplicates: total.duplicates + result.duplicates,
                ..result
            };
        }

        debug!(
            lix_id = %lix_id,
            accepted = total.accepted,
            duplicates = total.duplicates,
            "pushed changes"
        );
        Ok(total)
    }

    /// Pull changes after `since` (all changes when `None`).
    pub async fn pull(&self, lix_id: &LixId, since: Option<Cursor>) -> Result<PullResult> {
        let response = self
            .transport
            .call(Request::Pull {
                lix_id: lix_id.clone(),
                since,
            })
            .await?;
        let result: PullResult = response.into_result()?.decode_json()?;
        debug!(lix_id = %lix_id, changes = result.changes.len(), cursor = %result.cursor, "pulled changes");
        Ok(result)
    }
}
