//! Redis Streams implementation of [`LogStore`].
//!
//! Every topic maps to one stream. Consumer groups are created at `0` with
//! `MKSTREAM` so a group created after publication still sees earlier
//! entries. Redelivery relies on `XAUTOCLAIM`; `XCLAIM ... IDLE` is used to
//! push one entry past the claim threshold on demand.
//!
//! `XREADGROUP ... BLOCK` runs on a connection owned by its consumer, never
//! on the shared manager.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tracing::{debug, warn};

use plexus_core::error::{AppError, ErrorKind};
use plexus_core::result::AppResult;
use plexus_core::traits::log_store::{LogMessage, LogStore, PendingMessage};

use super::client::RedisClient;
use crate::keys;

/// Field holding the serialized envelope inside a stream entry.
const ENVELOPE_FIELD: &str = "envelope";
/// Field holding the partition key, when one was given.
const KEY_FIELD: &str = "key";
/// Idle time assigned by `force_redelivery`, far beyond any sane claim threshold.
const FORCED_IDLE_MS: u64 = 365 * 24 * 60 * 60 * 1000;
/// A consumer's blocking connection is closed after this long without reads.
const READER_IDLE: Duration = Duration::from_secs(600);

/// Redis-backed durable log.
#[derive(Clone)]
pub struct RedisStreamStore {
    client: RedisClient,
    /// Blocking-read connections, one per consumer name.
    readers: Cache<String, MultiplexedConnection>,
}

impl std::fmt::Debug for RedisStreamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamStore")
            .field("client", &self.client)
            .field("readers", &self.readers.entry_count())
            .finish()
    }
}

impl RedisStreamStore {
    /// Create a store on top of a connected client.
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            readers: Cache::builder().time_to_idle(READER_IDLE).build(),
        }
    }

    async fn reader(&self, consumer: &str, block: Duration) -> AppResult<MultiplexedConnection> {
        if let Some(conn) = self.readers.get(consumer).await {
            return Ok(conn);
        }
        let conn = self.client.blocking_connection(block).await?;
        self.readers.insert(consumer.to_string(), conn.clone()).await;
        Ok(conn)
    }

    fn key(&self, topic: &str) -> String {
        keys::stream(self.client.prefix(), topic)
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::LogStore, format!("Redis error: {e}"), e)
    }

    fn to_message(entry: &StreamId) -> Option<LogMessage> {
        match entry.get::<String>(ENVELOPE_FIELD) {
            Some(envelope) => Some(LogMessage {
                id: entry.id.clone(),
                envelope,
            }),
            None => {
                warn!(message_id = %entry.id, "Stream entry has no envelope field, skipping");
                None
            }
        }
    }
}

#[async_trait]
impl LogStore for RedisStreamStore {
    async fn append(&self, topic: &str, key: Option<&str>, envelope: &str) -> AppResult<String> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream).arg("*").arg(ENVELOPE_FIELD).arg(envelope);
        if let Some(key) = key {
            cmd.arg(KEY_FIELD).arg(key);
        }

        let id: String = cmd.query_async(&mut conn).await.map_err(Self::map_err)?;
        debug!(stream, message_id = %id, "Appended to stream");
        Ok(id)
    }

    async fn create_group(&self, topic: &str, group: &str) -> AppResult<()> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                debug!(stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> AppResult<Vec<LogMessage>> {
        let stream = self.key(topic);
        let mut conn = self.reader(consumer, block).await?;

        let result: redis::RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&stream)
            .arg(">")
            .query_async(&mut conn)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                // Reconnect on the next read.
                self.readers.invalidate(consumer).await;
                return Err(Self::map_err(e));
            }
        };

        Ok(reply
            .map(|r| {
                r.keys
                    .iter()
                    .flat_map(|k| k.ids.iter())
                    .filter_map(Self::to_message)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, topic: &str, group: &str, message_id: &str) -> AppResult<bool> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        let acked: u64 = redis::cmd("XACK")
            .arg(&stream)
            .arg(group)
            .arg(message_id)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(acked > 0)
    }

    async fn pending(&self, topic: &str, group: &str) -> AppResult<Vec<PendingMessage>> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(1000)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingMessage {
                message_id: p.id,
                consumer: p.consumer,
                idle_ms: p.last_delivered_ms as u64,
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn auto_claim(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> AppResult<Vec<LogMessage>> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        if !reply.deleted_ids.is_empty() {
            warn!(
                stream,
                group,
                deleted = reply.deleted_ids.len(),
                "Pending entries were trimmed from the stream before redelivery"
            );
        }

        Ok(reply.claimed.iter().filter_map(Self::to_message).collect())
    }

    async fn force_redelivery(
        &self,
        topic: &str,
        group: &str,
        message_id: &str,
    ) -> AppResult<bool> {
        let stream = self.key(topic);
        let mut conn = self.client.conn_mut();

        // Look up the current owner so the claim does not move the entry.
        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(group)
            .arg(message_id)
            .arg(message_id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        let Some(owner) = reply.ids.into_iter().next().map(|p| p.consumer) else {
            return Ok(false);
        };

        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(group)
            .arg(&owner)
            .arg(0)
            .arg(message_id)
            .arg("IDLE")
            .arg(FORCED_IDLE_MS)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(!claimed.is_empty())
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}
