//! The event bus facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use plexus_core::config::event_bus::EventBusConfig;
use plexus_core::error::AppError;
use plexus_core::events::Event;
use plexus_core::result::AppResult;
use plexus_core::traits::log_store::{LogStore, PendingMessage};
use plexus_core::types::id::{EventId, SubscriptionId};
use plexus_core::types::namespace::{IdentifierKind, NamespaceRoot};

use crate::consumer::{ConsumerLoop, ConsumerSettings};
use crate::dispatch::{DispatchTable, FanOutReport, Subscriber, seen_events};
use crate::handler::EventHandler;
use crate::keys;

/// A running consumption loop and the means to stop it.
#[derive(Debug)]
struct ActiveSubscription {
    topic: String,
    group: String,
    owner: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    /// Signal the loop, give it `grace` to exit, then abort it.
    async fn cancel(self, grace: Duration) {
        let _ = self.stop.send(true);
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(topic = %self.topic, error = %e, "Consumption loop panicked"),
            }
        }
    }
}

/// Describes one live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Topic subscribed to.
    pub topic: String,
    /// Consumer group.
    pub group: String,
    /// Subscriber.
    pub owner: String,
}

/// Durable publish/subscribe bus with an in-process fast path.
///
/// `publish` appends to the topic's log and then fans the event out to
/// in-process subscribers. Every `subscribe` also starts a consumption loop
/// on the log under a consumer group, so work survives restarts.
pub struct EventBus {
    store: Arc<dyn LogStore>,
    namespace: NamespaceRoot,
    config: EventBusConfig,
    dispatch: DispatchTable,
    subscriptions: DashMap<SubscriptionId, ActiveSubscription>,
    closed: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("namespace", &self.namespace)
            .field("subscriptions", &self.subscriptions.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a bus on top of a log store.
    pub fn new(store: Arc<dyn LogStore>, namespace: NamespaceRoot, config: EventBusConfig) -> Self {
        Self {
            dispatch: DispatchTable::new(config.fanout_concurrency),
            store,
            namespace,
            config,
            subscriptions: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The root namespace topics must live under.
    pub fn namespace(&self) -> &NamespaceRoot {
        &self.namespace
    }

    /// The underlying log store.
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::service_unavailable("event bus is shut down"));
        }
        Ok(())
    }

    fn group_or_default<'a>(&'a self, group: Option<&'a str>) -> &'a str {
        group.unwrap_or(&self.config.default_group)
    }

    /// Publish an event without a partition key.
    pub async fn publish(&self, topic: &str, payload: Value) -> AppResult<EventId> {
        self.publish_event(topic, payload, None).await
    }

    /// Publish an event with a partition key. Events sharing a key are
    /// delivered to each group in publish order.
    pub async fn publish_keyed(&self, topic: &str, key: &str, payload: Value) -> AppResult<EventId> {
        self.publish_event(topic, payload, Some(key.to_string())).await
    }

    async fn publish_event(
        &self,
        topic: &str,
        payload: Value,
        key: Option<String>,
    ) -> AppResult<EventId> {
        self.ensure_open()?;
        self.namespace.validate(IdentifierKind::Topic, topic)?;

        let event = Event::new(topic, payload, key);
        let envelope = event.to_envelope()?;

        let armed = self.dispatch.arm(topic, event.event_id).await;
        let appended = self
            .store
            .append(topic, event.key.as_deref(), &envelope)
            .await;

        let FanOutReport { delivered, failed } = self.dispatch.fan_out(&event, armed).await;

        match appended {
            Ok(message_id) => {
                debug!(
                    topic,
                    event_id = %event.event_id,
                    message_id = %message_id,
                    delivered,
                    failed,
                    "Published event"
                );
                Ok(event.event_id)
            }
            Err(e) => {
                error!(
                    topic,
                    event_id = %event.event_id,
                    delivered,
                    error = %e,
                    "Failed to append event to the durable log"
                );
                Err(e)
            }
        }
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// The handler joins the in-process dispatch table immediately and a
    /// consumption loop is started under `group` (the configured default
    /// group when `None`). The group is created at the start of the log, so
    /// events published before the first subscription are still delivered.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: Option<&str>,
        owner: &str,
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<SubscriptionId> {
        self.ensure_open()?;
        self.namespace.validate(IdentifierKind::Topic, topic)?;
        let group = self.group_or_default(group).to_string();

        let id = SubscriptionId::new();
        let seen = seen_events(Duration::from_secs(self.config.dedup_window_seconds));

        let group_ready = match self.store.create_group(topic, &group).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    topic,
                    group = %group,
                    error = %e,
                    "Could not create consumer group, the consumption loop will retry"
                );
                false
            }
        };

        self.dispatch
            .insert(
                topic,
                Subscriber {
                    id,
                    owner: owner.to_string(),
                    group: group.clone(),
                    handler: handler.clone(),
                    seen: seen.clone(),
                },
            )
            .await;

        let consumer = ConsumerLoop {
            store: self.store.clone(),
            topic: topic.to_string(),
            group: group.clone(),
            consumer: keys::consumer(&group, &id.to_string()),
            owner: owner.to_string(),
            handler,
            seen,
            settings: ConsumerSettings::from(&self.config),
            group_ready,
        };

        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(stop_rx));

        self.subscriptions.insert(
            id,
            ActiveSubscription {
                topic: topic.to_string(),
                group: group.clone(),
                owner: owner.to_string(),
                stop,
                task,
            },
        );

        info!(topic, group = %group, plugin = owner, subscription = %id, "Subscribed");
        Ok(id)
    }

    /// Remove a subscription and stop its consumption loop.
    ///
    /// Returns `false` when the subscription does not exist.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatch.remove(id).await;
        match self.subscriptions.remove(&id) {
            Some((_, active)) => {
                debug!(topic = %active.topic, subscription = %id, "Unsubscribing");
                active.cancel(self.cancel_grace()).await;
                true
            }
            None => false,
        }
    }

    /// Unacknowledged messages of a group, for diagnostics.
    pub async fn get_pending_messages(
        &self,
        topic: &str,
        group: Option<&str>,
    ) -> AppResult<Vec<PendingMessage>> {
        self.namespace.validate(IdentifierKind::Topic, topic)?;
        self.store
            .pending(topic, self.group_or_default(group))
            .await
    }

    /// Force a pending message to be redelivered on the group's next read,
    /// without waiting for the idle threshold.
    pub async fn retry_message(
        &self,
        topic: &str,
        message_id: &str,
        group: Option<&str>,
    ) -> AppResult<bool> {
        self.namespace.validate(IdentifierKind::Topic, topic)?;
        let group = self.group_or_default(group);
        let retried = self.store.force_redelivery(topic, group, message_id).await?;
        if retried {
            info!(topic, group, message_id, "Message scheduled for redelivery");
        } else {
            debug!(topic, group, message_id, "Message is not pending, nothing to retry");
        }
        Ok(retried)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Topics with at least one in-process subscriber.
    pub async fn topics(&self) -> Vec<String> {
        self.dispatch.topics().await
    }

    /// Describe every live subscription.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .iter()
            .map(|entry| SubscriptionInfo {
                id: *entry.key(),
                topic: entry.topic.clone(),
                group: entry.group.clone(),
                owner: entry.owner.clone(),
            })
            .collect()
    }

    fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.config.read_block_ms).max(Duration::from_millis(100))
    }

    /// Stop accepting work, then cancel and await every consumption loop.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let ids: Vec<SubscriptionId> = self.subscriptions.iter().map(|e| *e.key()).collect();
        info!(subscriptions = ids.len(), "Shutting down event bus");

        let mut cancelling = Vec::with_capacity(ids.len());
        for id in ids {
            self.dispatch.remove(id).await;
            if let Some((_, active)) = self.subscriptions.remove(&id) {
                cancelling.push(active.cancel(self.cancel_grace()));
            }
        }
        futures::future::join_all(cancelling).await;

        info!("Event bus shut down");
    }
}
