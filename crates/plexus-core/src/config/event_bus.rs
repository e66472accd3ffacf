//! Event bus configuration.

use serde::{Deserialize, Serialize};

use super::redis::RedisConfig;

/// Which durable log store backs the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventBusBackend {
    /// In-process log. Survives nothing; meant for tests and single-node dev.
    Memory,
    /// Redis Streams.
    Redis,
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Log store backend.
    #[serde(default = "default_backend")]
    pub backend: EventBusBackend,
    /// Redis settings, used when `backend = "redis"`.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Upper bound in milliseconds a consumption loop blocks on one read.
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
    /// Maximum messages returned by one group read.
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    /// Delay in seconds before a consumption loop retries a failed read.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_seconds: u64,
    /// Pending messages idle longer than this are reclaimed for redelivery.
    #[serde(default = "default_claim_idle")]
    pub claim_idle_seconds: u64,
    /// Maximum in-process handlers run concurrently for one publish.
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,
    /// Consumer group used when a caller does not name one.
    #[serde(default = "default_group")]
    pub default_group: String,
    /// How long an event handled on the fast path is remembered per subscription.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_seconds: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis: RedisConfig::default(),
            read_block_ms: default_read_block_ms(),
            read_count: default_read_count(),
            retry_backoff_seconds: default_retry_backoff(),
            claim_idle_seconds: default_claim_idle(),
            fanout_concurrency: default_fanout_concurrency(),
            default_group: default_group(),
            dedup_window_seconds: default_dedup_window(),
        }
    }
}

fn default_backend() -> EventBusBackend {
    EventBusBackend::Memory
}

fn default_read_block_ms() -> u64 {
    1000
}

fn default_read_count() -> usize {
    10
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_claim_idle() -> u64 {
    60
}

fn default_fanout_concurrency() -> usize {
    16
}

fn default_group() -> String {
    "default".to_string()
}

fn default_dedup_window() -> u64 {
    300
}
