//! Matching paid invoices against ledger entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ledger::LedgerEntry;

/// Payload of `ns.billing.invoice_paid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePaid {
    /// Invoice identifier.
    pub invoice_id: String,
    /// Amount paid, in cents.
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
struct PaidInvoice {
    shop_id: Option<String>,
    amount_cents: i64,
    paid_at: DateTime<Utc>,
}

/// A paid invoice whose ledger entry disagrees on the amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountMismatch {
    /// Invoice identifier.
    pub invoice_id: String,
    /// Amount reported by the payment event.
    pub paid_cents: i64,
    /// Amount booked in the ledger.
    pub booked_cents: i64,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconReport {
    /// Invoices that match their ledger entry.
    pub matched: usize,
    /// Paid invoices with no ledger entry.
    pub missing_in_ledger: Vec<String>,
    /// Ledger entries with no paid invoice.
    pub unexpected_in_ledger: Vec<String>,
    /// Amount disagreements.
    pub mismatches: Vec<AmountMismatch>,
}

impl ReconReport {
    /// Whether every invoice reconciled.
    pub fn is_clean(&self) -> bool {
        self.missing_in_ledger.is_empty()
            && self.unexpected_in_ledger.is_empty()
            && self.mismatches.is_empty()
    }
}

/// Paid invoices seen on the bus, keyed by invoice id.
///
/// Recording is idempotent so redelivered events are harmless.
#[derive(Debug, Default)]
pub struct Reconciler {
    paid: Mutex<HashMap<String, PaidInvoice>>,
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a paid invoice. Returns `false` if it was already known.
    pub async fn record_paid(
        &self,
        paid: InvoicePaid,
        shop_id: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> bool {
        let mut invoices = self.paid.lock().await;
        if invoices.contains_key(&paid.invoice_id) {
            return false;
        }
        invoices.insert(
            paid.invoice_id,
            PaidInvoice {
                shop_id,
                amount_cents: paid.amount_cents,
                paid_at,
            },
        );
        true
    }

    /// Number of paid invoices recorded.
    pub async fn paid_count(&self) -> usize {
        self.paid.lock().await.len()
    }

    /// Compare invoices paid since `since` with the ledger entries.
    pub async fn reconcile(&self, since: DateTime<Utc>, entries: &[LedgerEntry]) -> ReconReport {
        let invoices = self.paid.lock().await;
        let booked: HashMap<&str, &LedgerEntry> = entries
            .iter()
            .map(|e| (e.invoice_id.as_str(), e))
            .collect();

        let mut report = ReconReport::default();
        for (invoice_id, paid) in invoices.iter().filter(|(_, p)| p.paid_at >= since) {
            match booked.get(invoice_id.as_str()) {
                None => report.missing_in_ledger.push(invoice_id.clone()),
                Some(entry) if entry.amount_cents != paid.amount_cents => {
                    report.mismatches.push(AmountMismatch {
                        invoice_id: invoice_id.clone(),
                        paid_cents: paid.amount_cents,
                        booked_cents: entry.amount_cents,
                    });
                }
                Some(entry) => {
                    if paid.shop_id.as_deref().is_some_and(|s| s != entry.shop_id) {
                        tracing::warn!(
                            invoice = %invoice_id,
                            paid_shop = ?paid.shop_id,
                            booked_shop = %entry.shop_id,
                            "Invoice booked under a different shop"
                        );
                    }
                    report.matched += 1;
                }
            }
        }

        for entry in entries {
            if !invoices.contains_key(&entry.invoice_id) {
                report.unexpected_in_ledger.push(entry.invoice_id.clone());
            }
        }

        report.missing_in_ledger.sort();
        report.unexpected_in_ledger.sort();
        report.mismatches.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(invoice: &str, amount: i64) -> LedgerEntry {
        LedgerEntry {
            invoice_id: invoice.to_string(),
            shop_id: "shop-1".to_string(),
            amount_cents: amount,
            booked_at: Utc::now(),
        }
    }

    fn paid(invoice: &str, amount: i64) -> InvoicePaid {
        InvoicePaid {
            invoice_id: invoice.to_string(),
            amount_cents: amount,
        }
    }

    #[tokio::test]
    async fn test_recording_is_idempotent() {
        let recon = Reconciler::new();
        assert!(recon.record_paid(paid("inv-1", 100), None, Utc::now()).await);
        assert!(!recon.record_paid(paid("inv-1", 100), None, Utc::now()).await);
        assert_eq!(recon.paid_count().await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_classifies_differences() {
        let recon = Reconciler::new();
        let now = Utc::now();
        recon.record_paid(paid("inv-ok", 100), Some("shop-1".into()), now).await;
        recon.record_paid(paid("inv-missing", 200), None, now).await;
        recon.record_paid(paid("inv-short", 300), None, now).await;
        recon
            .record_paid(paid("inv-old", 400), None, now - Duration::days(3))
            .await;

        let entries = vec![
            entry("inv-ok", 100),
            entry("inv-short", 250),
            entry("inv-stray", 50),
        ];
        let report = recon.reconcile(now - Duration::hours(24), &entries).await;

        assert_eq!(report.matched, 1);
        assert_eq!(report.missing_in_ledger, vec!["inv-missing"]);
        assert_eq!(report.unexpected_in_ledger, vec!["inv-stray"]);
        assert_eq!(
            report.mismatches,
            vec![AmountMismatch {
                invoice_id: "inv-short".into(),
                paid_cents: 300,
                booked_cents: 250,
            }]
        );
        assert!(!report.is_clean());
    }
}
