//! In-process log store with consumer-group semantics.
//!
//! Behaves like a single Redis stream per topic: entries are appended in
//! order, each group keeps a cursor plus a pending-entries list, and
//! unacknowledged entries can be reclaimed once idle. Nothing survives the
//! process, so it stands in for the durable backend in tests and
//! single-node development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tracing::debug;

use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::traits::log_store::{LogMessage, LogStore, PendingMessage};

/// Stored log entry.
#[derive(Debug, Clone)]
struct Entry {
    id: String,
    #[allow(dead_code)]
    key: Option<String>,
    envelope: String,
}

/// Delivery bookkeeping for one pending entry.
#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    last_delivery: Instant,
    delivery_count: u64,
    force_redelivery: bool,
}

/// Cursor and pending set of one consumer group.
#[derive(Debug, Default)]
struct GroupState {
    /// Index of the first entry never delivered to this group.
    next_index: usize,
    /// Entry index → delivery state, ordered by log position.
    pending: BTreeMap<usize, PendingEntry>,
}

#[derive(Debug, Default)]
struct TopicLog {
    entries: Vec<Entry>,
    index_of: HashMap<String, usize>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
struct TopicSlot {
    log: Mutex<TopicLog>,
    /// Bumped on every append so blocked readers wake up.
    appended: watch::Sender<usize>,
}

impl TopicSlot {
    fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            log: Mutex::new(TopicLog::default()),
            appended,
        }
    }
}

/// In-memory [`LogStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    topics: Arc<DashMap<String, Arc<TopicSlot>>>,
}

impl MemoryLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, topic: &str) -> Arc<TopicSlot> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicSlot::new()))
            .clone()
    }

    fn no_group(topic: &str, group: &str) -> AppError {
        AppError::log_store(format!(
            "consumer group '{group}' does not exist on topic '{topic}'"
        ))
    }

    /// Number of entries ever appended to `topic`.
    pub async fn len(&self, topic: &str) -> usize {
        match self.topics.get(topic).map(|s| s.clone()) {
            Some(slot) => slot.log.lock().await.entries.len(),
            None => 0,
        }
    }

    /// Deliver never-delivered entries to `consumer`, moving them to pending.
    fn take_new(
        log: &mut TopicLog,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> AppResult<Vec<LogMessage>> {
        let TopicLog {
            entries, groups, ..
        } = log;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| Self::no_group(topic, group))?;

        let end = entries.len().min(state.next_index + count);
        let mut delivered = Vec::with_capacity(end - state.next_index);
        let now = Instant::now();

        for (index, entry) in entries.iter().enumerate().take(end).skip(state.next_index) {
            state.pending.insert(
                index,
                PendingEntry {
                    consumer: consumer.to_string(),
                    last_delivery: now,
                    delivery_count: 1,
                    force_redelivery: false,
                },
            );
            delivered.push(LogMessage {
                id: entry.id.clone(),
                envelope: entry.envelope.clone(),
            });
        }
        state.next_index = end;

        Ok(delivered)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, topic: &str, key: Option<&str>, envelope: &str) -> AppResult<String> {
        let slot = self.slot(topic);
        let mut log = slot.log.lock().await;

        let index = log.entries.len();
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!("{millis}-{index}");

        log.entries.push(Entry {
            id: id.clone(),
            key: key.map(str::to_string),
            envelope: envelope.to_string(),
        });
        log.index_of.insert(id.clone(), index);
        let len = log.entries.len();
        drop(log);

        slot.appended.send_replace(len);
        debug!(topic, message_id = %id, "Appended to in-memory log");
        Ok(id)
    }

    async fn create_group(&self, topic: &str, group: &str) -> AppResult<()> {
        let slot = self.slot(topic);
        let mut log = slot.log.lock().await;
        log.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> AppResult<Vec<LogMessage>> {
        let slot = self.slot(topic);
        let mut appended = slot.appended.subscribe();
        let deadline = tokio::time::Instant::now() + block;

        loop {
            appended.borrow_and_update();
            {
                let mut log = slot.log.lock().await;
                let delivered = Self::take_new(&mut log, topic, group, consumer, count)?;
                if !delivered.is_empty() {
                    return Ok(delivered);
                }
            }

            match tokio::time::timeout_at(deadline, appended.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(Vec::new()),
            }
        }
    }

    async fn ack(&self, topic: &str, group: &str, message_id: &str) -> AppResult<bool> {
        let slot = self.slot(topic);
        let mut log = slot.log.lock().await;
        let Some(index) = log.index_of.get(message_id).copied() else {
            return Ok(false);
        };
        let state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| Self::no_group(topic, group))?;
        Ok(state.pending.remove(&index).is_some())
    }

    async fn pending(&self, topic: &str, group: &str) -> AppResult<Vec<PendingMessage>> {
        let slot = self.slot(topic);
        let log = slot.log.lock().await;
        let state = log
            .groups
            .get(group)
            .ok_or_else(|| Self::no_group(topic, group))?;

        Ok(state
            .pending
            .iter()
            .map(|(index, entry)| PendingMessage {
                message_id: log.entries[*index].id.clone(),
                consumer: entry.consumer.clone(),
                idle_ms: entry.last_delivery.elapsed().as_millis() as u64,
                delivery_count: entry.delivery_count,
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
        let slot = self.slot(topic);
        let mut log = slot.log.lock().await;
        let TopicLog {
            entries, groups, ..
        } = &mut *log;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| Self::no_group(topic, group))?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (index, entry) in state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if entry.force_redelivery || entry.last_delivery.elapsed() >= min_idle {
                entry.consumer = consumer.to_string();
                entry.last_delivery = now;
                entry.delivery_count += 1;
                entry.force_redelivery = false;
                claimed.push(LogMessage {
                    id: entries[*index].id.clone(),
                    envelope: entries[*index].envelope.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn force_redelivery(
        &self,
        topic: &str,
        group: &str,
        message_id: &str,
    ) -> AppResult<bool> {
        let slot = self.slot(topic);
        let mut log = slot.log.lock().await;
        let Some(index) = log.index_of.get(message_id).copied() else {
            return Ok(false);
        };
        let state = log
            .groups
            .get_mut(group)
            .ok_or_else(|| Self::no_group(topic, group))?;

        match state.pending.get_mut(&index) {
            Some(entry) => {
                entry.force_redelivery = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
