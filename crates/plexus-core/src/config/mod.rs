//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod event_bus;
pub mod logging;
pub mod plugin;
pub mod redis;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use self::event_bus::{EventBusBackend, EventBusConfig};
pub use self::logging::LoggingConfig;
pub use self::plugin::PluginConfig;
pub use self::redis::RedisConfig;
pub use self::worker::{TaskQueueBackend, WorkerConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Runtime-wide settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Plugin discovery and gating settings.
    #[serde(default)]
    pub plugins: PluginConfig,
    /// Event bus settings.
    #[serde(default)]
    pub event_bus: EventBusConfig,
    /// Task registry and worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime-wide settings shared by every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Reserved root namespace every plugin, topic and task name must live under.
    #[serde(default = "default_namespace_root")]
    pub namespace_root: String,
    /// Whether the host publishes plugin lifecycle events on the bus.
    #[serde(default = "default_true")]
    pub publish_lifecycle_events: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace_root: default_namespace_root(),
            publish_lifecycle_events: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `PLEXUS__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PLEXUS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no component could run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.runtime.namespace_root.is_empty() || self.runtime.namespace_root.contains('.') {
            return Err(AppError::configuration(format!(
                "runtime.namespace_root must be a single non-empty segment, got '{}'",
                self.runtime.namespace_root
            )));
        }
        if self.worker.concurrency == 0 {
            return Err(AppError::configuration("worker.concurrency must be at least 1"));
        }
        if !(1..=MAX_READ_BLOCK_MS).contains(&self.event_bus.read_block_ms) {
            // Redis treats `BLOCK 0` as "wait forever".
            return Err(AppError::configuration(format!(
                "event_bus.read_block_ms must be between 1 and {MAX_READ_BLOCK_MS}, got {}",
                self.event_bus.read_block_ms
            )));
        }
        if self.event_bus.fanout_concurrency == 0 {
            return Err(AppError::configuration(
                "event_bus.fanout_concurrency must be at least 1",
            ));
        }
        if !self.worker.queues.contains(&self.worker.default_queue) {
            return Err(AppError::configuration(format!(
                "worker.default_queue '{}' is not one of worker.queues {:?}",
                self.worker.default_queue, self.worker.queues
            )));
        }
        Ok(())
    }
}

/// Upper bound on one blocking log read, so stop signals stay prompt.
const MAX_READ_BLOCK_MS: u64 = 60_000;

fn default_namespace_root() -> String {
    "ns".to_string()
}

fn default_true() -> bool {
    true
}
