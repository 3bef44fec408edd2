//! # Lix Core
//!
//! Pure primitives for the Lix engine: changes, schemas, canonicalization and
//! the portable container blob.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over change records.
//!
//! ## Key Types
//!
//! - [`Change`] - An immutable record of one entity's new (or deleted) state
//! - [`ChangeId`] - Content-addressed identifier (Blake3 hash)
//! - [`EntityId`] - Stable logical identity derived from file content
//! - [`SchemaRegistry`] - Versioned snapshot shapes, keyed by [`SchemaKey`]
//! - [`LixSnapshot`] - The portable container blob ("Lix file")
//!
//! ## Canonicalization
//!
//! Change identity is computed over deterministic CBOR. See [`canonical`] module.

pub mod canonical;
pub mod change;
pub mod container;
pub mod error;
pub mod file;
pub mod hash;
pub mod schema;
pub mod types;
pub mod validation;

pub use canonical::{canonical_change_bytes, canonical_json_bytes, CHANGE_ID_DOMAIN};
pub use change::{sort_canonical, Change, ChangeBuilder};
pub use container::{LixSnapshot, CONTAINER_FORMAT, LIX_ID_KEY};
pub use error::{CoreError, ValidationError};
pub use file::{File, FileMetadata};
pub use hash::Blake3Hash;
pub use schema::{PropertyDef, PropertyKind, SchemaCheck, SchemaDefinition, SchemaRegistry};
pub use types::{ChangeId, EntityId, FileId, LixId, SchemaKey};
pub use validation::{check_batch_identity, validate_change, validate_change_structure};
