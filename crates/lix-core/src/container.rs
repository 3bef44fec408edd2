//! The portable container blob ("Lix file").
//!
//! A Lix travels between client and server as a single CBOR document holding
//! its key/value entries, files and change log. The change log is kept in
//! arrival order so that a receiver can rebuild log positions (cursors).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::Change;
use crate::error::CoreError;
use crate::file::File;
use crate::types::LixId;

/// Current container format version.
pub const CONTAINER_FORMAT: u32 = 1;

/// Key/value entry addressing a Lix in the sync protocol.
pub const LIX_ID_KEY: &str = "lix-id";

/// Decoded container contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LixSnapshot {
    pub format: u32,
    pub key_value: BTreeMap<String, String>,
    pub files: Vec<File>,
    /// Change log in arrival order.
    pub changes: Vec<Change>,
}

impl LixSnapshot {
    /// An empty container with the given id.
    pub fn new(lix_id: &LixId) -> Self {
        let mut key_value = BTreeMap::new();
        key_value.insert(LIX_ID_KEY.to_string(), lix_id.to_string());
        Self {
            format: CONTAINER_FORMAT,
            key_value,
            files: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Read the `lix-id` entry.
    pub fn lix_id(&self) -> Result<LixId, CoreError> {
        self.key_value
            .get(LIX_ID_KEY)
            .filter(|id| !id.is_empty())
            .map(|id| LixId::new(id.as_str()))
            .ok_or(CoreError::MissingKey(LIX_ID_KEY))
    }

    /// Encode to CBOR bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes, rejecting unknown format versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let snapshot: LixSnapshot =
            ciborium::from_reader(bytes).map_err(|e| CoreError::Decoding(e.to_string()))?;
        if snapshot.format != CONTAINER_FORMAT {
            return Err(CoreError::UnsupportedFormat(snapshot.format));
        }
        Ok(snapshot)
    }
}
