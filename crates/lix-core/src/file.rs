//! Files tracked by a Lix.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::FileId;

/// Detector hints attached to a file, e.g. which CSV column is the unique key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMetadata(pub serde_json::Map<String, serde_json::Value>);

impl FileMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }

    /// Read a string entry.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

/// A tracked file: its current bytes plus detector hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub path: String,
    pub data: Bytes,
    #[serde(default)]
    pub metadata: FileMetadata,
}

impl File {
    /// The final path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}
