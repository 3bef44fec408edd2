//! # Lix Store
//!
//! Storage for the Lix engine: the content-addressed, append-only change log,
//! tracked files, and the blob backends used by the sync server.
//!
//! ## Overview
//!
//! The change log is abstracted behind the [`ChangeStore`] trait so the engine
//! stays storage-agnostic. [`SqliteStore`] is the persistent implementation;
//! [`MemoryStore`] backs tests and ephemeral containers. The sync server keeps
//! whole containers in a [`BlobBackend`].
//!
//! ## Key Types
//!
//! - [`ChangeStore`] - The async trait for change, file and key/value storage
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//! - [`AppendReport`] - What an append inserted and skipped
//! - [`Cursor`] - Position in a store's append log
//! - [`BlobBackend`] - `has`/`get`/`set` over opaque blobs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lix_store::{ChangeStore, Cursor, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("lix.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     let (changes, cursor) = store.changes_since(Cursor::START).await.unwrap();
//!     assert!(changes.is_empty());
//!     assert_eq!(cursor, Cursor::START);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent appends**: A change whose id is already stored is skipped
//! - **Atomic batches**: A batch is validated in full before anything is written
//! - **Canonical reads**: History and sync reads come back in `(created_at, id)` order
//! - **Stable cursors**: The log keeps arrival order, so cursors survive export/import

pub mod backend;
pub mod error;
pub mod memory;
pub mod migration;
pub mod snapshot;
pub mod sqlite;
pub mod traits;

pub use backend::{BlobBackend, FsBackend, MemoryBackend};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use snapshot::{export_snapshot, import_snapshot};
pub use sqlite::SqliteStore;
pub use traits::{AppendReport, ChangeStore, Cursor};
