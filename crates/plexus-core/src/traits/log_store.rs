//! Durable log store trait backing the event bus.
//!
//! The contract mirrors a Redis-Streams-like system: append-only per-topic
//! logs, consumer groups with a cursor and a pending-entries list, explicit
//! acknowledgement, and claim operations for redelivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// One entry read from a topic log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Store-assigned message id, monotonically increasing within a topic.
    pub id: String,
    /// The serialized event envelope.
    pub envelope: String,
}

/// An entry delivered to a consumer group but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    /// Store-assigned message id.
    pub message_id: String,
    /// Consumer that currently holds the message.
    pub consumer: String,
    /// Milliseconds since the message was last delivered.
    pub idle_ms: u64,
    /// How many times the message has been delivered.
    pub delivery_count: u64,
}

/// Trait for durable log backends (Redis Streams or in-memory).
///
/// Implementations must preserve append order within a topic; the event
/// bus builds its per-key ordering guarantee on top of that.
#[async_trait]
pub trait LogStore: Send + Sync + std::fmt::Debug + 'static {
    /// Append an envelope to the topic's log. Returns the message id.
    ///
    /// `key` is a partition hint; backends without partitions store it
    /// alongside the entry.
    async fn append(&self, topic: &str, key: Option<&str>, envelope: &str) -> AppResult<String>;

    /// Create a consumer group positioned at the start of the log.
    /// Creating an existing group is not an error.
    async fn create_group(&self, topic: &str, group: &str) -> AppResult<()>;

    /// Read up to `count` never-delivered entries for the group, blocking
    /// at most `block` when none are available.
    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> AppResult<Vec<LogMessage>>;

    /// Acknowledge an entry, removing it from the group's pending set.
    /// Returns `false` when it was not pending.
    async fn ack(&self, topic: &str, group: &str, message_id: &str) -> AppResult<bool>;

    /// List the group's pending entries.
    async fn pending(&self, topic: &str, group: &str) -> AppResult<Vec<PendingMessage>>;

    /// Transfer up to `count` pending entries idle for at least `min_idle`
    /// to `consumer`, returning them for redelivery.
    async fn auto_claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> AppResult<Vec<LogMessage>>;

    /// Make one pending entry eligible for the next `auto_claim` regardless
    /// of its idle time. Returns `false` when it is not pending.
    async fn force_redelivery(&self, topic: &str, group: &str, message_id: &str)
    -> AppResult<bool>;

    /// Check the backend is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
