//! Billing reconciliation plugin, registered with the Plexus plugin host.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing;

use plexus_plugin_sdk::prelude::*;

use crate::ledger::{LEDGER_SERVICE, Ledger};
use crate::recon::{InvoicePaid, Reconciler};

/// Plugin name, matching its manifest directory.
pub const PLUGIN_NAME: &str = "ns.billing.recon";
/// Topic carrying paid invoices.
pub const INVOICE_PAID_TOPIC: &str = "ns.billing.invoice_paid";
/// Topic the reconciliation report is published on.
pub const REPORT_TOPIC: &str = "ns.billing.recon.completed";
/// Daily reconciliation task.
pub const DAILY_TASK: &str = "ns.billing.recon.daily";
/// Run at 02:00 every day.
pub const DAILY_SCHEDULE: &str = "0 2 * * *";

const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Reconciles paid invoices seen on the bus against the ledger.
#[derive(Debug, Default)]
pub struct ReconPlugin {
    reconciler: Arc<Reconciler>,
}

impl ReconPlugin {
    /// Create a new reconciliation plugin
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for the host's plugin catalog.
    pub fn factory() -> Arc<dyn Plugin> {
        Arc::new(Self::new())
    }

    /// The reconciler's state.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}

#[async_trait]
impl Plugin for ReconPlugin {
    async fn setup(&self, hooks: HookApi) -> anyhow::Result<()> {
        let ledger = hooks.get_service_as::<Arc<dyn Ledger>>(LEDGER_SERVICE)?;
        let ledger: Arc<dyn Ledger> = Arc::clone(ledger.as_ref());

        let lookback_hours = hooks
            .config()
            .and_then(|c| c.get("lookback_hours"))
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_LOOKBACK_HOURS);

        let reconciler = Arc::clone(&self.reconciler);
        hooks
            .subscribe(
                INVOICE_PAID_TOPIC,
                handler_fn(move |event: Event| {
                    let reconciler = Arc::clone(&reconciler);
                    async move {
                        let paid: InvoicePaid = serde_json::from_value(event.payload.clone())?;
                        let invoice_id = paid.invoice_id.clone();
                        if reconciler
                            .record_paid(paid, event.key.clone(), event.timestamp)
                            .await
                        {
                            tracing::debug!(invoice = %invoice_id, "Recorded paid invoice");
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        let reconciler = Arc::clone(&self.reconciler);
        let publisher = hooks.clone();
        hooks
            .register_cron(
                DAILY_TASK,
                DAILY_SCHEDULE,
                task_fn(move |ctx: TaskContext| {
                    let reconciler = Arc::clone(&reconciler);
                    let ledger = Arc::clone(&ledger);
                    let publisher = publisher.clone();
                    async move {
                        let since = ctx.started_at - Duration::hours(lookback_hours);
                        let entries = ledger.entries_since(since).await?;
                        let report = reconciler.reconcile(since, &entries).await;

                        if report.is_clean() {
                            tracing::info!(run_id = %ctx.run_id, matched = report.matched, "Reconciliation clean");
                        } else {
                            tracing::warn!(
                                run_id = %ctx.run_id,
                                matched = report.matched,
                                missing = report.missing_in_ledger.len(),
                                unexpected = report.unexpected_in_ledger.len(),
                                mismatches = report.mismatches.len(),
                                "Reconciliation found discrepancies"
                            );
                        }

                        publisher
                            .publish(
                                REPORT_TOPIC,
                                json!({
                                    "run_id": ctx.run_id,
                                    "since": since,
                                    "finished_at": Utc::now(),
                                    "report": report,
                                }),
                            )
                            .await?;
                        Ok(())
                    }
                }),
            )
            .await?;

        tracing::info!(
            plugin = PLUGIN_NAME,
            lookback_hours,
            "Billing reconciliation plugin set up"
        );
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        let paid_invoices = self.reconciler.paid_count().await;
        tracing::info!(
            plugin = PLUGIN_NAME,
            paid_invoices = paid_invoices,
            "Billing reconciliation plugin stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use plexus_core::config::AppConfig;
    use plexus_plugin::{PluginCatalog, PluginRuntime, ServiceRegistryBuilder};
    use tokio::sync::Mutex;

    use crate::ledger::{InMemoryLedger, ledger_service};

    fn write_manifest(root: &Path, required_services: &[&str]) {
        let dir = root.join("ns/billing/recon");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            json!({
                "name": PLUGIN_NAME,
                "version": "1.0.0",
                "required_services": required_services,
                "config_schema": {"lookback_hours": 48},
            })
            .to_string(),
        )
        .unwrap();
    }

    async fn runtime(root: &Path, ledger: Arc<InMemoryLedger>) -> PluginRuntime {
        let mut config = AppConfig::default();
        config.plugins.directory = root.to_string_lossy().into_owned();
        config.worker.poll_interval_ms = 20;
        config.worker.shutdown_grace_seconds = 1;

        let catalog = PluginCatalog::new();
        catalog.register_fn(PLUGIN_NAME, ReconPlugin::factory);

        let mut services = ServiceRegistryBuilder::new();
        services
            .register_instance(LEDGER_SERVICE, ledger_service(ledger))
            .unwrap();

        PluginRuntime::bootstrap(config, catalog, services).await.unwrap()
    }

    #[tokio::test]
    async fn test_daily_reconciliation_publishes_report() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[LEDGER_SERVICE]);
        let ledger = Arc::new(InMemoryLedger::new());
        let runtime = runtime(dir.path(), ledger.clone()).await;

        let report = runtime.start().await.unwrap();
        assert_eq!(report.loaded, vec![PLUGIN_NAME]);

        let task = runtime
            .tasks()
            .list_tasks()
            .await
            .into_iter()
            .find(|t| t.name == DAILY_TASK)
            .unwrap();
        assert_eq!(task.owner, PLUGIN_NAME);
        assert_eq!(task.queue, "default");

        let reports: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        runtime
            .bus()
            .subscribe(
                REPORT_TOPIC,
                Some("observer"),
                "test",
                handler_fn(move |event| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().await.push(event);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        runtime
            .bus()
            .publish_keyed(
                INVOICE_PAID_TOPIC,
                "shop-1",
                json!({"invoice_id": "inv-1", "amount_cents": 1200}),
            )
            .await
            .unwrap();
        ledger.book("inv-1", "shop-1", 1200);

        runtime
            .tasks()
            .trigger_now(DAILY_TASK, Value::Null)
            .await
            .unwrap();

        let mut published = None;
        for _ in 0..150 {
            if let Some(event) = reports.lock().await.first().cloned() {
                published = Some(event);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let published = published.expect("report should be published");
        assert_eq!(published.payload["report"]["matched"], 1);
        assert_eq!(
            published.payload["report"]["missing_in_ledger"],
            json!([])
        );

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_undeclared_ledger_keeps_plugin_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), &[]);
        let runtime = runtime(dir.path(), Arc::new(InMemoryLedger::new())).await;

        let report = runtime.start().await.unwrap();
        assert_eq!(report.failed, vec![PLUGIN_NAME]);
        assert!(!runtime.host().is_loaded(PLUGIN_NAME).await);
        assert!(runtime.tasks().list_tasks().await.is_empty());

        runtime.shutdown().await;
    }
}
