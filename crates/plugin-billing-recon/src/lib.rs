//! Billing reconciliation plugin for Plexus.
//!
//! Records every paid invoice published on `ns.billing.invoice_paid` and,
//! once a day, compares them with the ledger service, publishing the
//! report on `ns.billing.recon.completed`.

pub mod ledger;
pub mod plugin;
pub mod recon;

pub use ledger::{InMemoryLedger, LEDGER_SERVICE, Ledger, LedgerEntry, ledger_service};
pub use plugin::{PLUGIN_NAME, ReconPlugin};
pub use recon::{ReconReport, Reconciler};
