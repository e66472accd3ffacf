//! Plugin registry holding loaded plugin instances and metadata.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

use crate::api::hooks::HookApi;
use crate::manifest::PluginManifest;
use crate::traits::Plugin;

/// A plugin whose `setup` succeeded.
pub struct LoadedPlugin {
    /// Manifest the plugin was loaded from.
    pub manifest: Arc<PluginManifest>,
    /// The plugin's code.
    pub plugin: Arc<dyn Plugin>,
    /// The hook API bound to this plugin, holding its registrations.
    pub hooks: HookApi,
    /// When setup completed.
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl LoadedPlugin {
    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Summary for diagnostics.
    pub async fn info(&self) -> PluginInfo {
        let registrations = self.hooks.registrations().await;
        PluginInfo {
            name: self.manifest.name.clone(),
            version: self.manifest.version.clone(),
            capabilities: self.manifest.capabilities.clone(),
            required_services: self.manifest.required_services.clone(),
            cron_tasks: registrations.cron_tasks,
            subscriptions: registrations.subscriptions.len(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Metadata about a loaded plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Declared capabilities.
    pub capabilities: Vec<String>,
    /// Services the plugin may pull.
    pub required_services: Vec<String>,
    /// Cron tasks the plugin registered.
    pub cron_tasks: Vec<String>,
    /// Number of live event subscriptions.
    pub subscriptions: usize,
    /// When setup completed.
    pub loaded_at: DateTime<Utc>,
}

/// Registry of all loaded plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Plugin name → loaded plugin.
    plugins: RwLock<HashMap<String, Arc<LoadedPlugin>>>,
}

impl PluginRegistry {
    /// Creates a new empty plugin registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loaded plugin.
    pub async fn register(&self, loaded: Arc<LoadedPlugin>) -> AppResult<()> {
        let mut plugins = self.plugins.write().await;
        let name = loaded.name().to_string();
        if plugins.contains_key(&name) {
            return Err(AppError::conflict(format!(
                "Plugin '{name}' is already loaded"
            )));
        }

        info!(
            plugin = %name,
            version = %loaded.manifest.version,
            "Registering plugin"
        );
        plugins.insert(name, loaded);
        Ok(())
    }

    /// Unregisters a plugin by name.
    pub async fn unregister(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.write().await.remove(name)
    }

    /// Removes and returns every plugin, sorted by name.
    pub async fn drain(&self) -> Vec<Arc<LoadedPlugin>> {
        let mut drained: Vec<Arc<LoadedPlugin>> =
            self.plugins.write().await.drain().map(|(_, p)| p).collect();
        drained.sort_by(|a, b| a.name().cmp(b.name()));
        drained
    }

    /// Gets a plugin by name.
    pub async fn get(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.plugins.read().await.get(name).cloned()
    }

    /// Checks whether a plugin is loaded.
    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    /// Lists every loaded plugin, sorted by name.
    pub async fn list(&self) -> Vec<PluginInfo> {
        let plugins: Vec<Arc<LoadedPlugin>> = self.plugins.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            infos.push(plugin.info().await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Returns plugin count.
    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }
}
