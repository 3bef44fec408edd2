//! Blob backends: the key/blob store behind the sync protocol handler.
//!
//! The handler only needs `has`, `get` and `set`, plus an atomic
//! `put_if_absent` so that two concurrent `new` requests for one id cannot
//! both succeed.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, StoreError};

/// A key/blob store.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Check whether a key is present.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Read a blob.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a blob, replacing any previous value.
    async fn set(&self, key: &str, blob: Bytes) -> Result<()>;

    /// Write a blob only if the key is absent.
    ///
    /// Returns `false` (and writes nothing) if the key already exists. Must
    /// be atomic with respect to concurrent callers.
    async fn put_if_absent(&self, key: &str, blob: Bytes) -> Result<bool>;
}

/// In-memory backend. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("lock poisoned: {}", e))
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().map_err(poisoned)?.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn set(&self, key: &str, blob: Bytes) -> Result<()> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), blob);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, blob: Bytes) -> Result<bool> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        if blobs.contains_key(key) {
            return Ok(false);
        }
        blobs.insert(key.to_string(), blob);
        Ok(true)
    }
}

/// Filesystem backend: one file per key inside a directory.
///
/// Writes go to a temporary file first. `set` renames it over the target;
/// `put_if_absent` hard-links it to the target, which fails atomically if
/// the target exists. Readers never observe a partially written blob.
pub struct FsBackend {
    root: PathBuf,
    counter: AtomicU64,
}

impl FsBackend {
    /// Open (and create if needed) a backend rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(StoreError::InvalidData(format!("invalid blob key {:?}", key)));
        }
        Ok(self.root.join(key))
    }

    async fn write_temp(&self, key: &str, blob: &[u8]) -> Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .root
            .join(format!(".{}.{}.{}.tmp", key, std::process::id(), n));
        tokio::fs::write(&temp, blob).await?;
        Ok(temp)
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn has(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, blob: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        let temp = self.write_temp(key, &blob).await?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, blob: Bytes) -> Result<bool> {
        let path = self.path_for(key)?;
        let temp = self.write_temp(key, &blob).await?;
        let linked = tokio::fs::hard_link(&temp, &path).await;
        tokio::fs::remove_file(&temp).await?;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(key, "blob already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn exercise(backend: &dyn BlobBackend) {
        assert!(!backend.has("lix-file-a").await.unwrap());
        assert_eq!(backend.get("lix-file-a").await.unwrap(), None);

        assert!(backend
            .put_if_absent("lix-file-a", Bytes::from_static(b"one"))
            .await
            .unwrap());
        assert!(!backend
            .put_if_absent("lix-file-a", Bytes::from_static(b"two"))
            .await
            .unwrap());
        assert_eq!(
            backend.get("lix-file-a").await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );

        backend
            .set("lix-file-a", Bytes::from_static(b"three"))
            .await
            .unwrap();
        assert!(backend.has("lix-file-a").await.unwrap());
        assert_eq!(
            backend.get("lix-file-a").await.unwrap(),
            Some(Bytes::from_static(b"three"))
        );
    }

    #[tokio::test]
    async fn test_memory_backend() {
        exercise(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn test_fs_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        exercise(&backend).await;

        // No temporary files are left behind.
        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.all(|e| !e.unwrap().file_name().to_string_lossy().starts_with('.')));
    }

    #[tokio::test]
    async fn test_fs_backend_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::open(dir.path()).await.unwrap();
        assert!(backend.get("../etc/passwd").await.is_err());
        assert!(backend.get("").await.is_err());
        assert!(backend.set(".hidden", Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_put_if_absent_race_has_one_winner() {
        let backend = Arc::new(MemoryBackend::new());
        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move {
                backend
                    .put_if_absent("lix-file-x", Bytes::from(vec![i]))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(backend.len(), 1);
    }
}
