//! Runtime feature flags for plugins.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::info;

/// Per-plugin enablement overrides.
///
/// A flag beats the manifest's `enabled` field. Flags are only consulted
/// when a plugin is loaded; flipping one afterwards does not unload it.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    flags: DashMap<String, bool>,
}

impl FeatureFlags {
    /// Create an empty flag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed flags from configuration.
    pub fn from_config(initial: &HashMap<String, bool>) -> Self {
        let flags = DashMap::with_capacity(initial.len());
        for (name, enabled) in initial {
            flags.insert(name.clone(), *enabled);
        }
        Self { flags }
    }

    /// Set the override for a plugin.
    pub fn set(&self, plugin: &str, enabled: bool) {
        self.flags.insert(plugin.to_string(), enabled);
        info!(plugin, enabled, "Feature flag set");
    }

    /// Drop the override for a plugin, falling back to its manifest.
    pub fn clear(&self, plugin: &str) -> Option<bool> {
        self.flags.remove(plugin).map(|(_, enabled)| enabled)
    }

    /// The override for a plugin, if one is set.
    pub fn get(&self, plugin: &str) -> Option<bool> {
        self.flags.get(plugin).map(|v| *v)
    }

    /// Resolve enablement: flag override first, then the manifest default.
    pub fn resolve(&self, plugin: &str, manifest_enabled: bool) -> bool {
        self.get(plugin).unwrap_or(manifest_enabled)
    }
}
