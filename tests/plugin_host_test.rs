//! Integration tests for plugin loading, gating and isolation.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;

use plexus_core::error::ErrorKind;
use plexus_plugin::{Plugin, PluginCatalog, ServiceRegistryBuilder};
use plexus_worker::task_fn;

use helpers::{ScriptedPlugin, TestRuntime, manifest, write_manifest};

fn counting_factory(
    calls: Arc<AtomicUsize>,
) -> impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static {
    let inner = ScriptedPlugin::factory(|_hooks| async { Ok(()) });
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        inner()
    }
}

#[tokio::test]
async fn test_disabled_plugin_code_is_never_resolved() {
    let calls = Arc::new(AtomicUsize::new(0));
    let catalog = PluginCatalog::new();
    catalog.register_fn("ns.billing.recon", counting_factory(calls.clone()));

    let app = TestRuntime::with_setup(catalog, ServiceRegistryBuilder::new(), |root, _| {
        write_manifest(
            root,
            json!({"name": "ns.billing.recon", "version": "1", "enabled": false}),
        );
    })
    .await;

    let report = app.runtime.start().await.unwrap();
    assert_eq!(report.skipped, vec!["ns.billing.recon"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!app.runtime.host().is_loaded("ns.billing.recon").await);

    app.shutdown().await;
}

#[tokio::test]
async fn test_feature_flags_override_manifest() {
    let calls = Arc::new(AtomicUsize::new(0));
    let catalog = PluginCatalog::new();
    catalog.register_fn("ns.billing.recon", counting_factory(calls.clone()));
    catalog.register_fn("ns.billing.audit", counting_factory(calls.clone()));

    let app = TestRuntime::with_setup(catalog, ServiceRegistryBuilder::new(), |root, config| {
        write_manifest(
            root,
            json!({"name": "ns.billing.recon", "version": "1", "enabled": false}),
        );
        write_manifest(root, manifest("ns.billing.audit"));
        config
            .plugins
            .feature_flags
            .insert("ns.billing.recon".to_string(), true);
    })
    .await;
    app.runtime
        .host()
        .set_feature_flag("ns.billing.audit", false);

    let report = app.runtime.start().await.unwrap();
    assert_eq!(report.loaded, vec!["ns.billing.recon"]);
    assert_eq!(report.skipped, vec!["ns.billing.audit"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn test_failing_setup_does_not_block_later_plugins() {
    let catalog = PluginCatalog::new();
    catalog.register_fn(
        "ns.a.broken",
        ScriptedPlugin::factory(|_hooks| async { anyhow::bail!("cannot reach ledger") }),
    );
    catalog.register_fn(
        "ns.b.healthy",
        ScriptedPlugin::factory(|hooks| async move {
            hooks
                .register_cron("ns.b.healthy.tick", "*/5 * * * *", task_fn(|_| async { Ok(()) }))
                .await?;
            Ok(())
        }),
    );

    let app = TestRuntime::with_setup(catalog, ServiceRegistryBuilder::new(), |root, _| {
        write_manifest(root, manifest("ns.a.broken"));
        write_manifest(root, manifest("ns.b.healthy"));
        write_manifest(root, manifest("ns.c.no_code"));
    })
    .await;

    let report = app.runtime.start().await.unwrap();
    assert_eq!(report.loaded, vec!["ns.b.healthy"]);
    assert_eq!(report.failed, vec!["ns.a.broken", "ns.c.no_code"]);

    let loaded: Vec<String> = app
        .runtime
        .host()
        .loaded_plugins()
        .await
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(loaded, vec!["ns.b.healthy"]);

    app.shutdown().await;
}

#[tokio::test]
async fn test_service_access_follows_required_services() {
    #[derive(Debug)]
    struct Ledger {
        id: u32,
    }

    let outcome = Arc::new(tokio::sync::Mutex::new(None));
    let seen = outcome.clone();

    let catalog = PluginCatalog::new();
    catalog.register_fn(
        "ns.billing.recon",
        ScriptedPlugin::factory(move |hooks| {
            let seen = seen.clone();
            async move {
                let ledger = hooks.get_service_as::<Ledger>("ledger")?;
                let denied = hooks.get_service("unrelated").unwrap_err();
                *seen.lock().await = Some((ledger.id, denied.kind));
                Ok(())
            }
        }),
    );

    let mut services = ServiceRegistryBuilder::new();
    services.register("ledger", Arc::new(Ledger { id: 42 })).unwrap();
    services.register("unrelated", Arc::new(Ledger { id: 0 })).unwrap();

    let app = TestRuntime::with_setup(catalog, services, |root, _| {
        write_manifest(
            root,
            json!({
                "name": "ns.billing.recon",
                "version": "1",
                "enabled": true,
                "required_services": ["ledger"],
            }),
        );
    })
    .await;

    app.runtime.start().await.unwrap();
    assert_eq!(*outcome.lock().await, Some((42, ErrorKind::AccessDenied)));

    app.shutdown().await;
}

#[tokio::test]
async fn test_missing_plugin_root_is_not_fatal() {
    let app = TestRuntime::with_setup(
        PluginCatalog::new(),
        ServiceRegistryBuilder::new(),
        |root, config| {
            config.plugins.directory = root.join("absent").to_string_lossy().into_owned();
        },
    )
    .await;

    let report = app.runtime.start().await.unwrap();
    assert!(report.loaded.is_empty());
    assert!(report.failed.is_empty());

    app.shutdown().await;
}
