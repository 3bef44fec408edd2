//! # Lix
//!
//! The unified API for Lix: change control for structured files, at the
//! granularity of rows rather than lines.
//!
//! ## Overview
//!
//! A Lix tracks files and records every semantic edit to them as an
//! immutable, content-addressed change:
//!
//! - **Detection**: A plugin diffs the old and new file into entity changes
//! - **History**: Changes are appended to a store and never edited
//! - **Materialization**: The plugin folds the latest changes back into bytes
//! - **Sync**: Changes are pushed to and pulled from a server
//!
//! ## Key Concepts
//!
//! - **Change**: Immutable. Corrections are new changes.
//! - **Entity**: A row or header, identified by content, never by position.
//! - **Tombstone**: A change without a snapshot; the entity was deleted.
//! - **Container**: The whole Lix as one portable blob.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lix::{FileMetadata, Lix, LixConfig};
//! use lix::plugin::default_plugins;
//! use lix::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("lix.db").unwrap();
//!     let lix = Lix::new(store, default_plugins(), LixConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let metadata = FileMetadata::new().with("unique_column", "Stakeholder");
//!     let (file_id, changes) = lix
//!         .write_file("/stakeholders.csv", "Stakeholder,Role\nAnna,Owner\n", metadata)
//!         .await
//!         .unwrap();
//!     println!("{} changes", changes.len());
//!
//!     let materialized = lix.materialize(&file_id).await.unwrap();
//!     assert_eq!(&materialized.content[..], b"Stakeholder,Role\nAnna,Owner\n");
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `lix::core` - Core primitives (Change, ChangeId, schemas, container)
//! - `lix::plugin` - Plugin trait, registry and the CSV plugin
//! - `lix::store` - Change store, SQLite and blob backends
//! - `lix::sync` - Sync protocol handler and client

mod clock;
pub mod engine;
pub mod error;

// Re-export component crates
pub use lix_core as core;
pub use lix_plugin as plugin;
pub use lix_store as store;
pub use lix_sync as sync;

// Re-export main types for convenience
pub use engine::{
    Lix, LixConfig, Materialized, SyncReport, PULLED_CURSOR_KEY, PUSHED_CURSOR_KEY,
};
pub use error::{LixError, Result};

// Re-export commonly used core types
pub use lix_core::{Change, ChangeId, EntityId, File, FileId, FileMetadata, LixId, SchemaKey};
