//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use plexus_bus::{EventHandler, handler_fn};
use plexus_core::config::AppConfig;
use plexus_core::events::Event;
use plexus_plugin::{HookApi, Plugin, PluginCatalog, PluginRuntime, ServiceRegistryBuilder};

/// Test runtime context
pub struct TestRuntime {
    /// Plugin root, removed on drop
    pub dir: tempfile::TempDir,
    /// The runtime under test
    pub runtime: PluginRuntime,
}

impl TestRuntime {
    /// Bootstrap a runtime over in-memory backends.
    pub async fn new(catalog: PluginCatalog, services: ServiceRegistryBuilder) -> Self {
        Self::with_setup(catalog, services, |_, _| {}).await
    }

    /// Bootstrap a runtime, letting the caller write manifests or tweak the
    /// configuration first.
    pub async fn with_setup(
        catalog: PluginCatalog,
        services: ServiceRegistryBuilder,
        setup: impl FnOnce(&Path, &mut AppConfig),
    ) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create plugin root");
        let mut config = test_config(dir.path());
        setup(dir.path(), &mut config);

        let runtime = PluginRuntime::bootstrap(config, catalog, services)
            .await
            .expect("Failed to bootstrap runtime");
        Self { dir, runtime }
    }

    /// Shut the runtime down.
    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
    }
}

/// Configuration tuned for fast tests.
pub fn test_config(plugin_root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.plugins.directory = plugin_root.to_string_lossy().into_owned();
    config.event_bus.read_block_ms = 50;
    config.event_bus.retry_backoff_seconds = 1;
    config.worker.poll_interval_ms = 20;
    config.worker.shutdown_grace_seconds = 1;
    config
}

/// Write `root/<ns>/<domain>/<feature>/manifest.json`.
pub fn write_manifest(root: &Path, manifest: Value) {
    let name = manifest["name"].as_str().expect("manifest needs a name");
    let mut dir = root.to_path_buf();
    for segment in name.split('.') {
        dir.push(segment);
    }
    std::fs::create_dir_all(&dir).expect("Failed to create plugin directory");
    std::fs::write(dir.join("manifest.json"), manifest.to_string())
        .expect("Failed to write manifest");
}

/// A minimal enabled manifest.
pub fn manifest(name: &str) -> Value {
    json!({"name": name, "version": "1.0.0"})
}

type SetupFn = Arc<
    dyn Fn(HookApi) -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// A plugin whose setup is a closure.
pub struct ScriptedPlugin {
    setup: SetupFn,
}

impl ScriptedPlugin {
    /// Build a catalog factory from a setup closure.
    pub fn factory<F, Fut>(setup: F) -> impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static
    where
        F: Fn(HookApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let setup: SetupFn = Arc::new(
            move |hooks| -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
                Box::pin(setup(hooks))
            },
        );
        move || {
            Arc::new(ScriptedPlugin {
                setup: setup.clone(),
            }) as Arc<dyn Plugin>
        }
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    async fn setup(&self, hooks: HookApi) -> anyhow::Result<()> {
        (self.setup)(hooks).await
    }
}

/// Collects every event a handler receives.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    /// A handler appending to this recorder.
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        let events = self.events.clone();
        handler_fn(move |event| {
            let events = events.clone();
            async move {
                events.lock().await.push(event);
                Ok(())
            }
        })
    }

    /// Everything recorded so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Wait until at least `count` events arrived, or give up after a while.
    pub async fn wait_for(&self, count: usize) -> Vec<Event> {
        eventually(|| async { self.events.lock().await.len() >= count }).await;
        self.events().await
    }
}

/// Poll `check` until it holds, for up to five seconds.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
