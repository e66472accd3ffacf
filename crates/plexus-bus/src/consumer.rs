//! Consumption loop: the durable path of one subscription.
//!
//! Each loop first reclaims pending entries that have been idle past the
//! claim threshold (redelivery of earlier failures, or of entries held by a
//! consumer that died), then blocks on new entries with a bounded timeout so
//! a stop signal is observed promptly. Successfully handled entries are
//! acknowledged; failed ones stay pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use plexus_core::config::event_bus::EventBusConfig;
use plexus_core::events::Event;
use plexus_core::result::AppResult;
use plexus_core::traits::log_store::{LogMessage, LogStore};

use crate::dispatch::{FastPath, SeenEvents, handled};
use crate::handler::{EventHandler, invoke};

/// Timing knobs of a consumption loop.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Upper bound on one blocking read.
    pub read_block: Duration,
    /// Batch size of one read.
    pub read_count: usize,
    /// Delay before retrying after a log store error.
    pub retry_backoff: Duration,
    /// Pending entries idle at least this long are reclaimed.
    pub claim_idle: Duration,
}

impl From<&EventBusConfig> for ConsumerSettings {
    fn from(config: &EventBusConfig) -> Self {
        Self {
            read_block: Duration::from_millis(config.read_block_ms),
            read_count: config.read_count.max(1),
            retry_backoff: Duration::from_secs(config.retry_backoff_seconds),
            claim_idle: Duration::from_secs(config.claim_idle_seconds),
        }
    }
}

/// One subscription's consumer on the durable log.
pub struct ConsumerLoop {
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) topic: String,
    pub(crate) group: String,
    pub(crate) consumer: String,
    pub(crate) owner: String,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) seen: SeenEvents,
    pub(crate) settings: ConsumerSettings,
    pub(crate) group_ready: bool,
}

impl ConsumerLoop {
    /// Run until `stop` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        info!(
            topic = %self.topic,
            group = %self.group,
            consumer = %self.consumer,
            plugin = %self.owner,
            "Consumption loop started"
        );

        while !*stop.borrow() {
            let outcome = tokio::select! {
                result = self.poll_once() => result,
                _ = stop.changed() => break,
            };

            if let Err(e) = outcome {
                warn!(
                    topic = %self.topic,
                    group = %self.group,
                    error = %e,
                    backoff_secs = self.settings.retry_backoff.as_secs(),
                    "Log store read failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    _ = stop.changed() => break,
                }
            }
        }

        info!(
            topic = %self.topic,
            group = %self.group,
            consumer = %self.consumer,
            "Consumption loop stopped"
        );
    }

    /// One iteration: ensure the group, redeliver stale entries, read new ones.
    pub async fn poll_once(&mut self) -> AppResult<()> {
        if !self.group_ready {
            self.store.create_group(&self.topic, &self.group).await?;
            self.group_ready = true;
        }

        let reclaimed = self
            .store
            .auto_claim(
                &self.topic,
                &self.group,
                &self.consumer,
                self.settings.claim_idle,
                self.settings.read_count,
            )
            .await?;
        if !reclaimed.is_empty() {
            debug!(
                topic = %self.topic,
                group = %self.group,
                count = reclaimed.len(),
                "Reclaimed pending messages for redelivery"
            );
        }
        self.process(reclaimed).await?;

        let fresh = self
            .store
            .read_group(
                &self.topic,
                &self.group,
                &self.consumer,
                self.settings.read_count,
                self.settings.read_block,
            )
            .await?;
        self.process(fresh).await
    }

    /// What the fast path did with this event, waiting for it to settle.
    ///
    /// `None` means the fast path never saw the event (or its publish was
    /// abandoned mid-flight). A handler still running after `claim_idle`
    /// is reported as `InFlight`.
    async fn fast_path(&self, event: &Event) -> Option<FastPath> {
        let mut marker = self.seen.get(&event.event_id).await?;
        let current = *marker.borrow_and_update();
        if current != FastPath::InFlight {
            return Some(current);
        }

        let settled = match tokio::time::timeout(
            self.settings.claim_idle,
            marker.wait_for(|state| *state != FastPath::InFlight),
        )
        .await
        {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) => None,
            Err(_) => return Some(FastPath::InFlight),
        };

        match settled.unwrap_or_else(|| *marker.borrow()) {
            FastPath::InFlight => None,
            state => Some(state),
        }
    }

    async fn process(&self, messages: Vec<LogMessage>) -> AppResult<()> {
        for message in messages {
            self.process_one(message).await?;
        }
        Ok(())
    }

    async fn process_one(&self, message: LogMessage) -> AppResult<()> {
        let event = match Event::from_envelope(&message.envelope) {
            Ok(event) => event,
            Err(e) => {
                // Nothing can ever handle it; redelivering would loop forever.
                error!(
                    topic = %self.topic,
                    group = %self.group,
                    message_id = %message.id,
                    error = %e,
                    "Discarding undecodable envelope"
                );
                self.store.ack(&self.topic, &self.group, &message.id).await?;
                return Ok(());
            }
        };

        match self.fast_path(&event).await {
            Some(FastPath::Handled) => {
                debug!(
                    topic = %self.topic,
                    event_id = %event.event_id,
                    "Event already handled in-process, acknowledging"
                );
                self.store.ack(&self.topic, &self.group, &message.id).await?;
                return Ok(());
            }
            Some(FastPath::InFlight) => {
                debug!(
                    topic = %self.topic,
                    event_id = %event.event_id,
                    "In-process handler still running, leaving message pending"
                );
                return Ok(());
            }
            Some(FastPath::Failed) | None => {}
        }

        match invoke(self.handler.as_ref(), &event).await {
            Ok(()) => {
                self.store.ack(&self.topic, &self.group, &message.id).await?;
                self.seen.insert(event.event_id, handled()).await;
            }
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    group = %self.group,
                    plugin = %self.owner,
                    message_id = %message.id,
                    event_id = %event.event_id,
                    error = %e,
                    "Event handler failed, message left pending"
                );
            }
        }
        Ok(())
    }
}
