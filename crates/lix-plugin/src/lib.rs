//! # Lix Plugin
//!
//! Schema-aware change detection and materialization, one plugin per file
//! type.
//!
//! A plugin turns two versions of a file into the minimal set of entity
//! changes ([`Plugin::detect_changes`]) and folds changes back into file
//! bytes ([`Plugin::apply_changes`]). Plugins are selected by matching
//! their glob against the file path, see [`PluginRegistry::for_path`].
//!
//! The crate ships one plugin, [`CsvPlugin`], which tracks a header entity
//! and one entity per row.

pub mod csv;
pub mod error;
pub mod glob;
pub mod plugin;
pub mod registry;

pub use csv::CsvPlugin;
pub use error::{PluginError, Result};
pub use glob::glob_match;
pub use plugin::{DetectedChange, FileSnapshot, Plugin};
pub use registry::{default_plugins, PluginRegistry};
