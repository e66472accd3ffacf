//! The ledger service this plugin reconciles against.
//!
//! The host registers a ledger under [`LEDGER_SERVICE`] as an
//! `Arc<dyn Ledger>`; the plugin pulls it through its hooks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing;

use plexus_plugin_sdk::prelude::ServiceInstance;

/// Service name the ledger is registered under.
pub const LEDGER_SERVICE: &str = "ledger";

/// One booked payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Invoice the payment settles.
    pub invoice_id: String,
    /// Shop the invoice belongs to.
    pub shop_id: String,
    /// Amount booked, in cents.
    pub amount_cents: i64,
    /// When the entry was booked.
    pub booked_at: DateTime<Utc>,
}

/// Read access to booked payments.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Entries booked at or after `since`.
    async fn entries_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<LedgerEntry>>;
}

/// Wrap a ledger for registration in the service registry.
pub fn ledger_service(ledger: Arc<dyn Ledger>) -> ServiceInstance {
    Arc::new(ledger)
}

/// In-memory ledger for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Book a payment now.
    pub fn book(&self, invoice_id: &str, shop_id: &str, amount_cents: i64) {
        self.book_at(invoice_id, shop_id, amount_cents, Utc::now());
    }

    /// Book a payment at a given time.
    pub fn book_at(&self, invoice_id: &str, shop_id: &str, amount_cents: i64, at: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(LedgerEntry {
            invoice_id: invoice_id.to_string(),
            shop_id: shop_id.to_string(),
            amount_cents,
            booked_at: at,
        });
        tracing::debug!(invoice = invoice_id, shop = shop_id, amount_cents, "[MemLedger] Booked");
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn entries_since(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<LedgerEntry>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|e| e.booked_at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_entries_since_filters_by_time() {
        let ledger = InMemoryLedger::new();
        let now = Utc::now();
        ledger.book_at("inv-1", "shop-1", 500, now - Duration::days(2));
        ledger.book_at("inv-2", "shop-1", 700, now);

        let recent = ledger.entries_since(now - Duration::hours(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].invoice_id, "inv-2");
    }

    #[test]
    fn test_service_downcasts_to_trait_object() {
        let service = ledger_service(Arc::new(InMemoryLedger::new()));
        assert!(service.downcast::<Arc<dyn Ledger>>().is_ok());
    }
}
