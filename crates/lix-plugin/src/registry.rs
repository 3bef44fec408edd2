//! Plugin registry: dispatch by path glob.

use std::sync::Arc;

use lix_core::SchemaRegistry;
use tracing::debug;

use crate::csv::CsvPlugin;
use crate::error::{PluginError, Result};
use crate::glob::glob_match;
use crate::plugin::Plugin;

/// Registered plugins, consulted in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// # Errors
    /// - Returns `DuplicatePlugin` if the key is already registered
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.get(plugin.key()).is_some() {
            return Err(PluginError::DuplicatePlugin(plugin.key().to_string()));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Look up a plugin by key.
    pub fn get(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.key() == key).cloned()
    }

    /// The first plugin whose glob matches `path`.
    pub fn for_path(&self, path: &str) -> Option<Arc<dyn Plugin>> {
        let plugin = self
            .plugins
            .iter()
            .find(|p| glob_match(p.detect_changes_glob(), path))
            .cloned();
        debug!(
            path,
            plugin = plugin.as_ref().map(|p| p.key()),
            "plugin dispatch"
        );
        plugin
    }

    /// Keys of registered plugins, in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.key().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Union of every plugin's schemas, as a new registry.
    pub fn schema_registry(&self) -> Result<SchemaRegistry> {
        self.plugins.iter().try_fold(SchemaRegistry::new(), |acc, plugin| -> Result<SchemaRegistry> {
            let own = SchemaRegistry::from_definitions(plugin.schemas())?;
            Ok(acc.merged(&own)?)
        })
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.keys())
            .finish()
    }
}

/// Create a registry with the built-in plugins.
pub fn default_plugins() -> PluginRegistry {
    PluginRegistry {
        plugins: vec![Arc::new(CsvPlugin::new())],
    }
}
