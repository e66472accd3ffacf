//! Plugin system configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Root directory laid out as `<namespace>/<domain>/<feature>/manifest.json`.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Whether to discover and load plugins on startup.
    #[serde(default = "default_true")]
    pub auto_load: bool,
    /// Initial feature-flag overrides, keyed by plugin name.
    #[serde(default)]
    pub feature_flags: HashMap<String, bool>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            auto_load: true,
            feature_flags: HashMap::new(),
        }
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_true() -> bool {
    true
}
