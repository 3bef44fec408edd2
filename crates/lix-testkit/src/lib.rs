//! # Lix Testkit
//!
//! Testing utilities for Lix.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: CSV builders, in-memory Lix instances and an in-process
//!   sync server
//! - **Generators**: Proptest strategies for changes and CSV documents
//!
//! ## Test Fixtures
//!
//! Quickly set up a sync scenario:
//!
//! ```rust,no_run
//! use lix_testkit::fixtures::{csv_text, keyed_by, TestServer};
//!
//! # async fn example() {
//! let server = TestServer::new();
//! let (alice, alice_client) = server.publish_new().await;
//! let data = csv_text(&["Stakeholder", "Role"], &[&["A", "Owner"]]);
//! alice.write_file("/s.csv", data, keyed_by("Stakeholder")).await.unwrap();
//! alice.sync(&alice_client).await.unwrap();
//!
//! let (bob, _) = server.clone_lix(alice.lix_id()).await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lix_testkit::generators::{change_from_params, ChangeParams};
//!
//! proptest! {
//!     #[test]
//!     fn change_id_is_deterministic(params: ChangeParams) {
//!         let c1 = change_from_params(&params);
//!         let c2 = change_from_params(&params);
//!         prop_assert_eq!(c1.id, c2.id);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{csv_text, keyed_by, memory_lix, TestServer};
pub use generators::{change_from_params, csv_document, ChangeParams, CsvDocument};
