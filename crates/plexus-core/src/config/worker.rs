//! Task registry and worker pool configuration.

use serde::{Deserialize, Serialize};

use super::redis::RedisConfig;

/// Which distributed queue carries task runs to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskQueueBackend {
    /// In-process queues.
    Memory,
    /// Redis lists, shared by every worker process.
    Redis,
}

/// Background worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether this process runs a worker pool.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queue backend.
    #[serde(default = "default_backend")]
    pub backend: TaskQueueBackend,
    /// Redis settings, used when `backend = "redis"`.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Number of task runs executed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Delay in milliseconds between polls when every queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Queue classes this worker consumes, highest priority first.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    /// Queue for tasks whose name matches no routing rule.
    #[serde(default = "default_queue")]
    pub default_queue: String,
    /// Hard limit on a single run, in seconds.
    #[serde(default)]
    pub task_timeout_seconds: Option<u64>,
    /// How long shutdown waits for in-flight runs.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            redis: RedisConfig::default(),
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            queues: default_queues(),
            default_queue: default_queue(),
            task_timeout_seconds: None,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_backend() -> TaskQueueBackend {
    TaskQueueBackend::Memory
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    500
}

fn default_queues() -> Vec<String> {
    vec![
        "core".to_string(),
        "pull".to_string(),
        "push".to_string(),
        "default".to_string(),
    ]
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_shutdown_grace() -> u64 {
    30
}
