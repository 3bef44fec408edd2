//! Convergence verification for the sync protocol.
//!
//! After a push and pull, client and server should hold the same change set.
//! Both sides compute a state hash over their change ids and compare.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use lix_core::{Change, ChangeId};
use lix_store::ChangeStore;

use crate::error::Result;

/// Domain prefix for state hashes.
pub const STATE_HASH_DOMAIN: &[u8] = b"lix/state/v1:";

/// Blake3 digest of a change set. Serialized as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateHash(pub [u8; 32]);

impl StateHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for StateHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StateHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(Self(arr))
    }
}

/// Compute the state hash of a change set.
///
/// Algorithm:
/// 1. Collect the change ids and sort them (duplicates removed)
/// 2. Hash: H = Blake3(domain || id_1 || id_2 || ...)
///
/// The result depends only on which changes are present, not on the order
/// they arrived in.
pub fn state_hash(changes: &[Change]) -> StateHash {
    let mut ids: Vec<ChangeId> = changes.iter().map(|c| c.id).collect();
    ids.sort_unstable();
    ids.dedup();

    let mut hasher = blake3::Hasher::new();
    hasher.update(STATE_HASH_DOMAIN);
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    StateHash(*hasher.finalize().as_bytes())
}

/// Compute the state hash of everything in a store.
pub async fn compute_state_hash<S: ChangeStore + ?Sized>(store: &S) -> Result<StateHash> {
    let changes = store.all_changes().await?;
    Ok(state_hash(&changes))
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both sides hold the same change set.
    Converged,
    /// The change sets differ (another writer may have pushed in between).
    Diverged { local: StateHash, remote: StateHash },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare a local store against a remote state hash.
pub async fn verify_convergence<S: ChangeStore + ?Sized>(
    local: &S,
    remote: &StateHash,
) -> Result<ConvergenceResult> {
    let local = compute_state_hash(local).await?;
    if &local == remote {
        Ok(ConvergenceResult::Converged)
    } else {
        Ok(ConvergenceResult::Diverged {
            local,
            remote: *remote,
        })
    }
}
