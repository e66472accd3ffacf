//! In-process dispatch table: the low-latency path of the bus.
//!
//! Handlers registered for a topic are invoked directly on publish, with at
//! most `concurrency` handlers in flight for one event. Failures are logged
//! and contained; the durable log redelivers what the fast path missed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use moka::future::Cache;
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

use plexus_core::events::Event;
use plexus_core::types::id::{EventId, SubscriptionId};

use crate::handler::{EventHandler, invoke};

/// Fast-path state of one event for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPath {
    /// The in-process handler has not finished yet.
    InFlight,
    /// The in-process handler returned `Ok`.
    Handled,
    /// The in-process handler returned an error.
    Failed,
}

/// Events a subscription saw on the fast path, remembered for the dedup
/// window so the log path can acknowledge them without a second call.
pub type SeenEvents = Cache<EventId, watch::Receiver<FastPath>>;

/// A settled `Handled` marker.
pub fn handled() -> watch::Receiver<FastPath> {
    watch::channel(FastPath::Handled).1
}

/// Build an empty dedup cache with the given window.
pub fn seen_events(window: Duration) -> SeenEvents {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(window)
        .build()
}

/// One in-process subscriber.
#[derive(Clone)]
pub struct Subscriber {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Plugin (or component) that subscribed.
    pub owner: String,
    /// Consumer group of the durable path.
    pub group: String,
    /// The callback.
    pub handler: Arc<dyn EventHandler>,
    /// Fast-path dedup window shared with the consumption loop.
    pub seen: SeenEvents,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// A subscriber whose dedup cache already knows the event is in flight.
#[derive(Debug)]
pub struct Armed {
    subscriber: Subscriber,
    outcome: watch::Sender<FastPath>,
}

/// Outcome of fanning one event out in-process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned an error.
    pub failed: usize,
}

/// Topic → subscribers table.
#[derive(Debug)]
pub struct DispatchTable {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    concurrency: usize,
}

impl DispatchTable {
    /// Create an empty table. `concurrency` is clamped to at least one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            concurrency: concurrency.max(1),
        }
    }

    /// Register a subscriber for `topic`.
    pub async fn insert(&self, topic: &str, subscriber: Subscriber) {
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_default().push(subscriber);
    }

    /// Remove a subscriber, returning the topic it was registered on.
    pub async fn remove(&self, id: SubscriptionId) -> Option<String> {
        let mut topics = self.topics.write().await;
        let mut found = None;
        for (topic, subscribers) in topics.iter_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            if subscribers.len() != before {
                found = Some(topic.clone());
                break;
            }
        }
        if let Some(topic) = &found {
            if topics.get(topic).is_some_and(|s| s.is_empty()) {
                topics.remove(topic);
            }
        }
        found
    }

    /// Snapshot the subscribers of `topic`.
    pub async fn subscribers(&self, topic: &str) -> Vec<Subscriber> {
        let topics = self.topics.read().await;
        topics.get(topic).cloned().unwrap_or_default()
    }

    /// Topics with at least one subscriber.
    pub async fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().await;
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Total number of subscribers across all topics.
    pub async fn len(&self) -> usize {
        let topics = self.topics.read().await;
        topics.values().map(Vec::len).sum()
    }

    /// Mark `event_id` in flight for every subscriber of `topic`.
    ///
    /// Called before the event reaches the durable log so a consumption
    /// loop that reads it first waits for the fast path instead of racing it.
    pub async fn arm(&self, topic: &str, event_id: EventId) -> Vec<Armed> {
        let subscribers = self.subscribers(topic).await;
        let mut armed = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            let (outcome, marker) = watch::channel(FastPath::InFlight);
            subscriber.seen.insert(event_id, marker).await;
            armed.push(Armed {
                subscriber,
                outcome,
            });
        }
        armed
    }

    /// Invoke the armed subscribers, at most `concurrency` at a time.
    pub async fn fan_out(&self, event: &Event, armed: Vec<Armed>) -> FanOutReport {
        if armed.is_empty() {
            return FanOutReport::default();
        }

        debug!(
            topic = %event.topic,
            event_id = %event.event_id,
            subscribers = armed.len(),
            "Fanning out event in-process"
        );

        let outcomes: Vec<bool> = futures::stream::iter(armed)
            .map(|Armed { subscriber, outcome }| async move {
                match invoke(subscriber.handler.as_ref(), event).await {
                    Ok(()) => {
                        outcome.send_replace(FastPath::Handled);
                        true
                    }
                    Err(e) => {
                        outcome.send_replace(FastPath::Failed);
                        warn!(
                            topic = %event.topic,
                            event_id = %event.event_id,
                            plugin = %subscriber.owner,
                            group = %subscriber.group,
                            error = %e,
                            "In-process handler failed, leaving event to the durable path"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        FanOutReport {
            delivered,
            failed: outcomes.len() - delivered,
        }
    }
}
