//! Events carried by the event bus.
//!
//! An [`Event`] is immutable once published. It is serialized as a JSON
//! envelope into the durable log and handed by reference to in-process
//! subscribers.

pub mod system;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::types::id::EventId;

pub use system::RuntimeEvent;

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID, generated at publish time when absent.
    pub event_id: EventId,
    /// Namespaced topic, e.g. `ns.billing.invoice_paid`.
    pub topic: String,
    /// Partition key. Ordering is only guaranteed among events sharing it.
    #[serde(default, alias = "shop_id", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque structured payload.
    pub payload: Value,
    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with a fresh ID and the current time.
    pub fn new(topic: impl Into<String>, payload: Value, key: Option<String>) -> Self {
        Self {
            event_id: EventId::new(),
            topic: topic.into(),
            key,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Serialize the envelope written to the durable log.
    pub fn to_envelope(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope read back from the durable log.
    pub fn from_envelope(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }
}
