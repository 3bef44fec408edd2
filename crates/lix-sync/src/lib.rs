//! # Lix Sync
//!
//! Sync protocol for exchanging changes between Lix clients through a server
//! that stores each Lix as a single container blob.
//!
//! ## Overview
//!
//! The server side is a [`ProtocolHandler`] over any [`BlobBackend`]; the
//! client side is a [`SyncClient`] over any [`Transport`]. Because changes are
//! content-addressed and appends are idempotent, clients converge by pushing
//! what they have and pulling what they lack.
//!
//! ## Key Properties
//!
//! - **Idempotent**: Re-pushing a change is counted as a duplicate
//! - **Order-independent**: Pull returns changes in canonical order
//! - **Resumable**: Pull takes the cursor returned by the previous pull
//! - **Verifiable**: Both sides compare a [`StateHash`] after syncing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lix_store::MemoryBackend;
//! use lix_sync::{HandlerConfig, LocalTransport, ProtocolHandler, SyncClient, SyncConfig};
//!
//! async fn example(blob: bytes::Bytes) {
//!     let handler = Arc::new(ProtocolHandler::new(MemoryBackend::new(), HandlerConfig::default()));
//!     let client = SyncClient::new(LocalTransport::new(handler), SyncConfig::default());
//!
//!     let lix_id = client.create(blob).await.unwrap();
//!     let pulled = client.pull(&lix_id, None).await.unwrap();
//!     println!("{} changes, cursor {}", pulled.changes.len(), pulled.cursor);
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Client                              Server
//!   |-------- new (container) -------->|  201 {lix_id} | 409
//!   |-------- push {changes} --------->|  200 {cursor, accepted, duplicates, state_hash}
//!   |-------- pull {since} ----------->|  200 {changes, cursor, state_hash}
//!   |-------- get (lix id) ----------->|  200 container | 404
//! ```

pub mod client;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use client::{SyncClient, SyncConfig};
pub use convergence::{
    compute_state_hash, state_hash, verify_convergence, ConvergenceResult, StateHash,
};
pub use error::{Result, SyncError};
pub use messages::{
    ErrorBody, ErrorCode, NewResult, Operation, PullResult, PushResult, Request, Response,
    StatusCode,
};
pub use protocol::{blob_key, HandlerConfig, ProtocolHandler};
pub use transport::{LocalTransport, Transport};
