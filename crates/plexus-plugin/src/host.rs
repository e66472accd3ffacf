//! Plugin host: discovery, loading and teardown of plugins.
//!
//! Every failure that originates in a plugin (a bad manifest, a missing
//! entry point, an error or panic in `setup` or `teardown`) is contained
//! here. It is logged with the plugin's name and reduces the set of loaded
//! plugins; it never aborts the host or the other plugins.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use plexus_bus::EventBus;
use plexus_core::config::plugin::PluginConfig;
use plexus_core::error::AppError;
use plexus_core::events::RuntimeEvent;
use plexus_core::result::AppResult;
use plexus_core::types::namespace::{IdentifierKind, NamespaceRoot};
use plexus_worker::TaskRegistry;

use crate::api::hooks::HookApi;
use crate::catalog::PluginCatalog;
use crate::discovery;
use crate::flags::FeatureFlags;
use crate::manifest::PluginManifest;
use crate::registry::{LoadedPlugin, PluginInfo, PluginRegistry};
use crate::services::{ServiceInstance, ServiceRegistry};

/// Outcome of [`PluginHost::initialize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitReport {
    /// Plugins whose setup succeeded.
    pub loaded: Vec<String>,
    /// Plugins disabled by manifest or feature flag.
    pub skipped: Vec<String>,
    /// Plugins that failed to load.
    pub failed: Vec<String>,
}

/// Discovers, loads and tears down plugins.
pub struct PluginHost {
    namespace: NamespaceRoot,
    root: PathBuf,
    catalog: Arc<PluginCatalog>,
    flags: FeatureFlags,
    services: Arc<ServiceRegistry>,
    registry: PluginRegistry,
    bus: Arc<EventBus>,
    tasks: Arc<TaskRegistry>,
    publish_lifecycle: bool,
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("namespace", &self.namespace)
            .field("root", &self.root)
            .field("catalog", &self.catalog)
            .field("services", &self.services)
            .finish()
    }
}

impl PluginHost {
    /// Create a host over an already constructed bus, task registry and
    /// service registry.
    pub fn new(
        namespace: NamespaceRoot,
        config: &PluginConfig,
        catalog: Arc<PluginCatalog>,
        services: Arc<ServiceRegistry>,
        bus: Arc<EventBus>,
        tasks: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            namespace,
            root: PathBuf::from(&config.directory),
            catalog,
            flags: FeatureFlags::from_config(&config.feature_flags),
            services,
            registry: PluginRegistry::new(),
            bus,
            tasks,
            publish_lifecycle: true,
        }
    }

    /// Turn lifecycle event publication on or off.
    pub fn with_lifecycle_events(mut self, enabled: bool) -> Self {
        self.publish_lifecycle = enabled;
        self
    }

    /// Directory plugins are discovered in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every plugin with a manifest under the plugin root.
    pub async fn discover(&self) -> Vec<String> {
        discovery::scan(&self.root).await
    }

    /// Load one plugin.
    ///
    /// Returns `Ok(None)` when the plugin is disabled; its code is then never
    /// resolved. Any error leaves the plugin out of the loaded set with none
    /// of its registrations in place.
    pub async fn load(&self, name: &str) -> AppResult<Option<Arc<LoadedPlugin>>> {
        match self.try_load(name).await {
            Ok(loaded) => Ok(loaded),
            Err(e) => {
                error!(plugin = name, error = %e, "Plugin failed to load");
                self.announce(RuntimeEvent::PluginLoadFailed {
                    plugin: name.to_string(),
                    reason: e.message.clone(),
                })
                .await;
                Err(e)
            }
        }
    }

    async fn try_load(&self, name: &str) -> AppResult<Option<Arc<LoadedPlugin>>> {
        // Services are fixed from the first load attempt onwards.
        self.services.seal();

        self.namespace.validate(IdentifierKind::Plugin, name)?;
        if self.registry.contains(name).await {
            return Err(AppError::conflict(format!("Plugin '{name}' is already loaded")));
        }

        let manifest =
            PluginManifest::read(&discovery::manifest_path(&self.root, name), name).await?;

        if !self.flags.resolve(name, manifest.enabled) {
            info!(
                plugin = name,
                manifest_enabled = manifest.enabled,
                flag = ?self.flags.get(name),
                "Plugin disabled, skipping"
            );
            return Ok(None);
        }

        let plugin = self.catalog.instantiate(name)?;
        let manifest = Arc::new(manifest);
        let hooks = HookApi::new(
            Arc::clone(&manifest),
            self.namespace.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.tasks),
            Arc::clone(&self.services),
        );

        let started = Instant::now();
        let failure = match AssertUnwindSafe(plugin.setup(hooks.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
        };

        if let Some(reason) = failure {
            self.release(&hooks).await;
            return Err(AppError::plugin(format!(
                "Plugin '{name}' setup failed: {reason}"
            )));
        }

        let loaded = Arc::new(LoadedPlugin {
            manifest: Arc::clone(&manifest),
            plugin,
            hooks: hooks.clone(),
            loaded_at: Utc::now(),
        });
        if let Err(e) = self.registry.register(Arc::clone(&loaded)).await {
            self.release(&hooks).await;
            return Err(e);
        }

        let registrations = hooks.registrations().await;
        info!(
            plugin = name,
            version = %manifest.version,
            cron_tasks = registrations.cron_tasks.len(),
            subscriptions = registrations.subscriptions.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Plugin loaded"
        );
        self.announce(RuntimeEvent::PluginLoaded {
            plugin: name.to_string(),
            version: manifest.version.clone(),
        })
        .await;

        Ok(Some(loaded))
    }

    /// Discover and load every plugin, one after another, in discovery order.
    pub async fn initialize(&self) -> InitReport {
        let names = self.discover().await;
        info!(
            root = %self.root.display(),
            discovered = names.len(),
            "Initializing plugins"
        );

        let mut report = InitReport::default();
        for name in names {
            match self.load(&name).await {
                Ok(Some(_)) => report.loaded.push(name),
                Ok(None) => report.skipped.push(name),
                Err(_) => report.failed.push(name),
            }
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Plugin initialization complete"
        );
        report
    }

    /// Tear down one loaded plugin.
    pub async fn unload(&self, name: &str) -> AppResult<()> {
        let loaded = self
            .registry
            .unregister(name)
            .await
            .ok_or_else(|| AppError::not_found(format!("Plugin '{name}' is not loaded")))?;
        self.teardown(&loaded).await;
        Ok(())
    }

    /// Tear down every loaded plugin. One failing teardown does not stop
    /// the rest.
    pub async fn shutdown(&self) {
        let plugins = self.registry.drain().await;
        info!(plugins = plugins.len(), "Shutting down plugins");
        for loaded in plugins {
            self.teardown(&loaded).await;
        }
        info!("All plugins unloaded");
    }

    async fn teardown(&self, loaded: &LoadedPlugin) {
        let name = loaded.name();
        match AssertUnwindSafe(loaded.plugin.teardown()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(plugin = name, error = %format!("{e:#}"), "Plugin teardown returned error");
            }
            Err(panic) => {
                error!(
                    plugin = name,
                    error = %panic_message(panic.as_ref()),
                    "Plugin teardown panicked"
                );
            }
        }

        self.release(&loaded.hooks).await;
        info!(plugin = name, "Plugin unloaded");
        self.announce(RuntimeEvent::PluginUnloaded {
            plugin: name.to_string(),
        })
        .await;
    }

    /// Undo everything a plugin registered through its hooks.
    async fn release(&self, hooks: &HookApi) {
        let registrations = hooks.take_registrations().await;
        for id in registrations.subscriptions {
            self.bus.unsubscribe(id).await;
        }
        for task in registrations.cron_tasks {
            self.tasks.deregister(&task).await;
        }
    }

    async fn announce(&self, event: RuntimeEvent) {
        if !self.publish_lifecycle {
            return;
        }
        let topic = self.namespace.join(&["runtime", event.topic_suffix()]);
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Could not encode lifecycle event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&topic, payload).await {
            warn!(topic = %topic, error = %e, "Could not publish lifecycle event");
        }
    }

    // -- Services ----------------------------------------------------------

    /// Register a shared service. Only allowed before plugin loading starts.
    pub fn register_service(&self, name: &str, instance: ServiceInstance) -> AppResult<()> {
        self.services.register(name, instance)
    }

    /// Look up a shared service without any capability filter.
    pub fn get_service(&self, name: &str) -> AppResult<ServiceInstance> {
        self.services
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("Service '{name}' is not registered")))
    }

    /// The service registry.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    // -- Flags -------------------------------------------------------------

    /// Override a plugin's enablement. Takes effect at its next load.
    pub fn set_feature_flag(&self, name: &str, enabled: bool) {
        self.flags.set(name, enabled);
    }

    /// Whether `name` would be loaded: its flag if set, else its manifest.
    pub async fn is_plugin_enabled(&self, name: &str) -> bool {
        if let Some(enabled) = self.flags.get(name) {
            return enabled;
        }
        match PluginManifest::read(&discovery::manifest_path(&self.root, name), name).await {
            Ok(manifest) => manifest.enabled,
            Err(_) => false,
        }
    }

    /// The feature flags.
    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    // -- Registry ----------------------------------------------------------

    /// Every loaded plugin, sorted by name.
    pub async fn loaded_plugins(&self) -> Vec<PluginInfo> {
        self.registry.list().await
    }

    /// Whether `name` is loaded.
    pub async fn is_loaded(&self, name: &str) -> bool {
        self.registry.contains(name).await
    }

    /// A loaded plugin by name.
    pub async fn get(&self, name: &str) -> Option<Arc<LoadedPlugin>> {
        self.registry.get(name).await
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use plexus_bus::{MemoryLogStore, handler_fn};
    use plexus_core::config::event_bus::EventBusConfig;
    use plexus_core::config::worker::WorkerConfig;
    use plexus_core::error::ErrorKind;
    use plexus_core::events::Event;
    use plexus_worker::{CronScheduler, MemoryTaskQueue, QueueRouter, task_fn};
    use tokio::sync::Mutex;

    use crate::services::ServiceRegistryBuilder;
    use crate::traits::Plugin;

    #[derive(Clone, Copy)]
    enum Setup {
        Ok,
        Fail,
        Panic,
        FailAfterRegistering,
    }

    struct TestPlugin {
        setup: Setup,
        teardown_fails: bool,
        torn_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        async fn setup(&self, hooks: HookApi) -> anyhow::Result<()> {
            match self.setup {
                Setup::Ok => {
                    let task = format!("{}.tick", hooks.plugin_name());
                    hooks
                        .register_cron(&task, "0 2 * * *", task_fn(|_| async { Ok(()) }))
                        .await?;
                    Ok(())
                }
                Setup::Fail => anyhow::bail!("ledger unreachable"),
                Setup::Panic => {
                    if true {
                        panic!("setup blew up");
                    }
                    Ok(())
                }
                Setup::FailAfterRegistering => {
                    hooks
                        .subscribe("ns.orders.created", handler_fn(|_| async { Ok(()) }))
                        .await?;
                    hooks
                        .register_cron(
                            "ns.orders.partial.tick",
                            "0 2 * * *",
                            task_fn(|_| async { Ok(()) }),
                        )
                        .await?;
                    anyhow::bail!("gave up halfway")
                }
            }
        }

        async fn teardown(&self) -> anyhow::Result<()> {
            self.torn_down.store(true, Ordering::SeqCst);
            if self.teardown_fails {
                anyhow::bail!("teardown failed");
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        host: PluginHost,
        bus: Arc<EventBus>,
        tasks: Arc<TaskRegistry>,
        catalog: Arc<PluginCatalog>,
        factory_calls: Arc<AtomicUsize>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = NamespaceRoot::new("ns").unwrap();
            let bus = Arc::new(EventBus::new(
                Arc::new(MemoryLogStore::new()),
                root.clone(),
                EventBusConfig::default(),
            ));
            let tasks = Arc::new(TaskRegistry::new(
                root.clone(),
                CronScheduler::new().await.unwrap(),
                Arc::new(MemoryTaskQueue::new()),
                QueueRouter::from_config(&WorkerConfig::default()),
            ));
            let mut services = ServiceRegistryBuilder::new();
            services.register("ledger", Arc::new(7u32)).unwrap();

            let config = PluginConfig {
                directory: dir.path().to_string_lossy().into_owned(),
                ..PluginConfig::default()
            };
            let catalog = Arc::new(PluginCatalog::new());
            let host = PluginHost::new(
                root,
                &config,
                catalog.clone(),
                Arc::new(services.build()),
                bus.clone(),
                tasks.clone(),
            );

            Self {
                _dir: dir,
                host,
                bus,
                tasks,
                catalog,
                factory_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn manifest(&self, name: &str, enabled: bool) {
            let path = discovery::manifest_path(self.host.root(), name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(
                &path,
                serde_json::json!({
                    "name": name,
                    "version": "1.0.0",
                    "enabled": enabled,
                    "required_services": ["ledger"],
                })
                .to_string(),
            )
            .unwrap();
        }

        fn plugin(&self, name: &str, setup: Setup, teardown_fails: bool) -> Arc<AtomicBool> {
            let torn_down = Arc::new(AtomicBool::new(false));
            let flag = torn_down.clone();
            let calls = self.factory_calls.clone();
            self.catalog.register_fn(name, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Arc::new(TestPlugin {
                    setup,
                    teardown_fails,
                    torn_down: flag.clone(),
                }) as Arc<dyn Plugin>
            });
            torn_down
        }
    }

    #[tokio::test]
    async fn test_disabled_manifest_never_resolves_code() {
        let fx = Fixture::new().await;
        fx.manifest("ns.billing.recon", false);
        fx.plugin("ns.billing.recon", Setup::Ok, false);

        assert!(fx.host.load("ns.billing.recon").await.unwrap().is_none());
        assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 0);
        assert!(!fx.host.is_loaded("ns.billing.recon").await);
    }

    #[tokio::test]
    async fn test_feature_flag_beats_manifest() {
        let fx = Fixture::new().await;
        fx.manifest("ns.billing.recon", false);
        fx.manifest("ns.billing.audit", true);
        fx.plugin("ns.billing.recon", Setup::Ok, false);
        fx.plugin("ns.billing.audit", Setup::Ok, false);

        fx.host.set_feature_flag("ns.billing.recon", true);
        fx.host.set_feature_flag("ns.billing.audit", false);
        assert!(fx.host.is_plugin_enabled("ns.billing.recon").await);
        assert!(!fx.host.is_plugin_enabled("ns.billing.audit").await);

        let report = fx.host.initialize().await;
        assert_eq!(report.loaded, vec!["ns.billing.recon"]);
        assert_eq!(report.skipped, vec!["ns.billing.audit"]);
        assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flag_flip_after_load_does_not_unload() {
        let fx = Fixture::new().await;
        fx.manifest("ns.billing.recon", true);
        fx.plugin("ns.billing.recon", Setup::Ok, false);

        fx.host.load("ns.billing.recon").await.unwrap();
        fx.host.set_feature_flag("ns.billing.recon", false);
        assert!(fx.host.is_loaded("ns.billing.recon").await);
    }

    #[tokio::test]
    async fn test_bad_plugins_do_not_stop_the_rest() {
        let fx = Fixture::new().await;
        for name in [
            "ns.a.failing",
            "ns.b.panicking",
            "ns.c.missing_code",
            "ns.d.healthy",
        ] {
            fx.manifest(name, true);
        }
        fx.plugin("ns.a.failing", Setup::Fail, false);
        fx.plugin("ns.b.panicking", Setup::Panic, false);
        fx.plugin("ns.d.healthy", Setup::Ok, false);

        let report = fx.host.initialize().await;
        assert_eq!(report.loaded, vec!["ns.d.healthy"]);
        assert_eq!(
            report.failed,
            vec!["ns.a.failing", "ns.b.panicking", "ns.c.missing_code"]
        );

        let loaded: Vec<String> = fx
            .host
            .loaded_plugins()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(loaded, vec!["ns.d.healthy"]);
    }

    #[tokio::test]
    async fn test_panicking_constructor_does_not_abort_initialize() {
        let fx = Fixture::new().await;
        fx.manifest("ns.a.bad_ctor", true);
        fx.manifest("ns.b.healthy", true);
        fx.catalog
            .register_fn("ns.a.bad_ctor", || -> Arc<dyn Plugin> { panic!("constructor blew up") });
        fx.plugin("ns.b.healthy", Setup::Ok, false);

        let report = fx.host.initialize().await;
        assert_eq!(report.loaded, vec!["ns.b.healthy"]);
        assert_eq!(report.failed, vec!["ns.a.bad_ctor"]);
        assert!(!fx.host.is_loaded("ns.a.bad_ctor").await);
        assert!(fx.host.is_loaded("ns.b.healthy").await);
    }

    #[tokio::test]
    async fn test_failed_setup_releases_partial_registrations() {
        let fx = Fixture::new().await;
        fx.manifest("ns.orders.partial", true);
        fx.plugin("ns.orders.partial", Setup::FailAfterRegistering, false);

        let err = fx.host.load("ns.orders.partial").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Plugin);
        assert!(err.message.contains("gave up halfway"));
        assert_eq!(fx.bus.subscription_count(), 0);
        assert!(fx.tasks.list_tasks().await.is_empty());
        fx.bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_rejected() {
        let fx = Fixture::new().await;
        let path = discovery::manifest_path(fx.host.root(), "ns.billing.recon");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"name": "ns.billing.recon"}"#).unwrap();
        fx.plugin("ns.billing.recon", Setup::Ok, false);

        let err = fx.host.load("ns.billing.recon").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plugin_outside_namespace_is_rejected() {
        let fx = Fixture::new().await;
        let err = fx.host.load("other.billing.recon").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_shutdown_isolates_teardown_failures() {
        let fx = Fixture::new().await;
        fx.manifest("ns.a.first", true);
        fx.manifest("ns.b.second", true);
        let first = fx.plugin("ns.a.first", Setup::Ok, true);
        let second = fx.plugin("ns.b.second", Setup::Ok, false);

        fx.host.initialize().await;
        assert_eq!(fx.tasks.list_tasks().await.len(), 2);

        fx.host.shutdown().await;
        assert!(first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
        assert!(fx.host.loaded_plugins().await.is_empty());
        assert!(fx.tasks.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_services_sealed_once_loading_starts() {
        let fx = Fixture::new().await;
        fx.host.register_service("clock", Arc::new(1u8)).unwrap();
        fx.host.load("ns.absent.plugin").await.unwrap_err();

        let err = fx.host.register_service("late", Arc::new(2u8)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(fx.host.get_service("clock").is_ok());
        assert_eq!(
            fx.host.get_service("late").unwrap_err().kind,
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_published() {
        let fx = Fixture::new().await;
        let seen: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        for topic in ["ns.runtime.plugin_loaded", "ns.runtime.plugin_load_failed"] {
            let sink = seen.clone();
            fx.bus
                .subscribe(
                    topic,
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
        }

        fx.manifest("ns.billing.recon", true);
        fx.plugin("ns.billing.recon", Setup::Ok, false);
        fx.host.load("ns.billing.recon").await.unwrap();
        fx.host.load("ns.billing.missing").await.unwrap_err();

        let seen = seen.lock().await;
        let topics: Vec<&str> = seen.iter().map(|e| e.topic.as_str()).collect();
        assert!(topics.contains(&"ns.runtime.plugin_loaded"));
        assert!(topics.contains(&"ns.runtime.plugin_load_failed"));
        let loaded = seen
            .iter()
            .find(|e| e.topic == "ns.runtime.plugin_loaded")
            .unwrap();
        assert_eq!(loaded.payload["plugin"], "ns.billing.recon");
        drop(seen);
        fx.bus.shutdown().await;
    }
}
