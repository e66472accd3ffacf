//! Lifecycle events the runtime itself publishes.

use serde::{Deserialize, Serialize};

/// Runtime lifecycle events, published under `<root>.runtime.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A plugin's setup completed and it joined the loaded set.
    PluginLoaded {
        /// Plugin name.
        plugin: String,
        /// Plugin version.
        version: String,
    },
    /// A plugin failed to load.
    PluginLoadFailed {
        /// Plugin name.
        plugin: String,
        /// Why it failed.
        reason: String,
    },
    /// A plugin was torn down.
    PluginUnloaded {
        /// Plugin name.
        plugin: String,
    },
}

impl RuntimeEvent {
    /// The last topic segment for this event.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            Self::PluginLoaded { .. } => "plugin_loaded",
            Self::PluginLoadFailed { .. } => "plugin_load_failed",
            Self::PluginUnloaded { .. } => "plugin_unloaded",
        }
    }
}
