//! Integration tests for durable delivery through the event bus.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::json;

use plexus_bus::handler_fn;
use plexus_core::error::ErrorKind;
use plexus_plugin::{PluginCatalog, ServiceRegistryBuilder};

use helpers::{Recorder, ScriptedPlugin, TestRuntime, eventually, manifest, write_manifest};

#[tokio::test]
async fn test_keyed_events_reach_late_group_in_order() {
    let app = TestRuntime::new(PluginCatalog::new(), ServiceRegistryBuilder::new()).await;
    let bus = app.runtime.bus();

    bus.publish_keyed("ns.orders.created", "shop-7", json!({"seq": 1}))
        .await
        .unwrap();
    bus.publish_keyed("ns.orders.created", "shop-7", json!({"seq": 2}))
        .await
        .unwrap();

    let recorder = Recorder::default();
    bus.subscribe("ns.orders.created", Some("fulfilment"), "test", recorder.handler())
        .await
        .unwrap();

    let events = recorder.wait_for(2).await;
    let seqs: Vec<i64> = events
        .iter()
        .map(|e| e.payload["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2]);
    assert!(events.iter().all(|e| e.key.as_deref() == Some("shop-7")));

    app.shutdown().await;
}

#[tokio::test]
async fn test_failed_handler_leaves_message_pending_until_retried() {
    let app = TestRuntime::new(PluginCatalog::new(), ServiceRegistryBuilder::new()).await;
    let bus = app.runtime.bus();

    let healthy = Arc::new(AtomicBool::new(false));
    let handled = Arc::new(AtomicUsize::new(0));
    let (flag, count) = (healthy.clone(), handled.clone());
    bus.subscribe(
        "ns.billing.invoice_paid",
        Some("recon"),
        "test",
        handler_fn(move |_event| {
            let (flag, count) = (flag.clone(), count.clone());
            async move {
                if !flag.load(Ordering::SeqCst) {
                    anyhow::bail!("ledger offline");
                }
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    )
    .await
    .unwrap();

    bus.publish("ns.billing.invoice_paid", json!({"invoice_id": "inv-9"}))
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            bus.get_pending_messages("ns.billing.invoice_paid", Some("recon"))
                .await
                .map(|p| p.len() == 1)
                .unwrap_or(false)
        })
        .await
    );
    let pending = bus
        .get_pending_messages("ns.billing.invoice_paid", Some("recon"))
        .await
        .unwrap();
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    healthy.store(true, Ordering::SeqCst);
    assert!(
        bus.retry_message("ns.billing.invoice_paid", &pending[0].message_id, Some("recon"))
            .await
            .unwrap()
    );

    assert!(
        eventually(|| async {
            bus.get_pending_messages("ns.billing.invoice_paid", Some("recon"))
                .await
                .map(|p| p.is_empty())
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn test_in_process_subscriber_is_not_invoked_twice() {
    let app = TestRuntime::new(PluginCatalog::new(), ServiceRegistryBuilder::new()).await;
    let bus = app.runtime.bus();

    let recorder = Recorder::default();
    bus.subscribe("ns.orders.created", None, "test", recorder.handler())
        .await
        .unwrap();
    bus.publish("ns.orders.created", json!({"order": 1}))
        .await
        .unwrap();

    // The fast path delivers before publish returns.
    assert_eq!(recorder.events().await.len(), 1);

    assert!(
        eventually(|| async {
            bus.get_pending_messages("ns.orders.created", None)
                .await
                .map(|p| p.is_empty())
                .unwrap_or(false)
        })
        .await
    );
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(recorder.events().await.len(), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn test_plugin_subscriptions_are_removed_on_shutdown() {
    let recorder = Recorder::default();
    let handler = recorder.handler();

    let catalog = PluginCatalog::new();
    catalog.register_fn(
        "ns.orders.audit",
        ScriptedPlugin::factory(move |hooks| {
            let handler = handler.clone();
            async move {
                hooks.subscribe("ns.orders.created", handler).await?;
                Ok(())
            }
        }),
    );

    let app = TestRuntime::with_setup(catalog, ServiceRegistryBuilder::new(), |root, _| {
        write_manifest(root, manifest("ns.orders.audit"));
    })
    .await;
    app.runtime.start().await.unwrap();

    let subs = app.runtime.bus().subscriptions();
    let plugin_subs: Vec<_> = subs.iter().filter(|s| s.owner == "ns.orders.audit").collect();
    assert_eq!(plugin_subs.len(), 1);
    assert_eq!(plugin_subs[0].group, "ns.orders.audit");

    app.runtime.host().shutdown().await;
    assert!(
        app.runtime
            .bus()
            .subscriptions()
            .iter()
            .all(|s| s.owner != "ns.orders.audit")
    );

    app.shutdown().await;
}

#[tokio::test]
async fn test_topics_outside_namespace_are_rejected() {
    let app = TestRuntime::new(PluginCatalog::new(), ServiceRegistryBuilder::new()).await;
    let bus = app.runtime.bus();

    let err = bus.publish("orders.created", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = bus
        .subscribe("orders.created", None, "test", Recorder::default().handler())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(bus.subscription_count(), 0);

    app.shutdown().await;
}
