//! The runtime context.
//!
//! `PluginRuntime` owns every component (event bus, task registry, worker
//! runner, plugin host) and is handed around explicitly. Nothing lives in a
//! global. `bootstrap` constructs, `start` brings things up, `shutdown`
//! takes them down in reverse dependency order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use plexus_bus::{EventBus, build_log_store};
use plexus_core::config::AppConfig;
use plexus_core::result::AppResult;
use plexus_core::types::namespace::NamespaceRoot;
use plexus_worker::{
    CronScheduler, QueueRouter, TaskExecutor, TaskRegistry, WorkerRunner, build_task_queue,
};

use crate::catalog::PluginCatalog;
use crate::host::{InitReport, PluginHost};
use crate::services::ServiceRegistryBuilder;

/// Every runtime component, wired together.
pub struct PluginRuntime {
    config: AppConfig,
    bus: Arc<EventBus>,
    tasks: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor>,
    runner: Arc<WorkerRunner>,
    host: Arc<PluginHost>,
    worker_stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("namespace_root", &self.config.runtime.namespace_root)
            .field("host", &self.host)
            .finish()
    }
}

impl PluginRuntime {
    /// Construct every component. Nothing runs until [`start`](Self::start).
    ///
    /// Errors here are fatal: they mean core infrastructure (configuration,
    /// log store, task queue, scheduler, service registry) is unusable.
    pub async fn bootstrap(
        config: AppConfig,
        catalog: PluginCatalog,
        services: ServiceRegistryBuilder,
    ) -> AppResult<Self> {
        config.validate()?;
        let namespace = NamespaceRoot::new(config.runtime.namespace_root.clone())?;

        info!(
            namespace = %namespace,
            event_bus = ?config.event_bus.backend,
            task_queue = ?config.worker.backend,
            "Bootstrapping plugin runtime"
        );

        let store = build_log_store(&config.event_bus).await?;
        let bus = Arc::new(EventBus::new(
            store,
            namespace.clone(),
            config.event_bus.clone(),
        ));

        let queue = build_task_queue(&config.worker).await?;
        let scheduler = CronScheduler::new().await?;
        let tasks = Arc::new(TaskRegistry::new(
            namespace.clone(),
            scheduler,
            Arc::clone(&queue),
            QueueRouter::from_config(&config.worker),
        ));

        let executor = Arc::new(TaskExecutor::new(
            tasks.table(),
            config.worker.task_timeout_seconds.map(Duration::from_secs),
        ));
        let worker_id = format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let runner = Arc::new(WorkerRunner::new(
            queue,
            Arc::clone(&executor),
            config.worker.clone(),
            worker_id,
        ));

        let services = Arc::new(services.build());
        let host = Arc::new(
            PluginHost::new(
                namespace,
                &config.plugins,
                Arc::new(catalog),
                services,
                Arc::clone(&bus),
                Arc::clone(&tasks),
            )
            .with_lifecycle_events(config.runtime.publish_lifecycle_events),
        );

        let (worker_stop, _) = watch::channel(false);

        Ok(Self {
            config,
            bus,
            tasks,
            executor,
            runner,
            host,
            worker_stop,
            worker: Mutex::new(None),
        })
    }

    /// Start the scheduler and worker pool, then load plugins when
    /// `plugins.auto_load` is set.
    pub async fn start(&self) -> AppResult<InitReport> {
        self.tasks.start().await?;

        if self.config.worker.enabled {
            let mut worker = self.worker.lock().await;
            if worker.is_none() {
                let runner = Arc::clone(&self.runner);
                let cancel = self.worker_stop.subscribe();
                *worker = Some(tokio::spawn(async move {
                    runner.run(cancel).await;
                }));
                info!("Worker pool started");
            }
        } else {
            info!("Worker pool disabled");
        }

        if !self.config.plugins.auto_load {
            info!("Plugin auto-load disabled");
            return Ok(InitReport::default());
        }
        Ok(self.host.initialize().await)
    }

    /// Tear everything down: plugins, then the bus, then the scheduler,
    /// then the worker pool once in-flight runs drain.
    pub async fn shutdown(&self) {
        info!("Shutting down plugin runtime");

        self.host.shutdown().await;
        self.bus.shutdown().await;

        if let Err(e) = self.tasks.shutdown().await {
            warn!(error = %e, "Scheduler did not shut down cleanly");
        }

        let _ = self.worker_stop.send(true);
        if let Some(handle) = self.worker.lock().await.take() {
            // The runner bounds its own drain; the extra second covers its exit.
            let grace = Duration::from_secs(self.config.worker.shutdown_grace_seconds + 1);
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker task ended abnormally"),
                Err(_) => warn!("Worker did not stop within the shutdown grace period"),
            }
        }

        info!("Plugin runtime shut down");
    }

    /// The loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The task registry.
    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// The executor used by the worker pool.
    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// The plugin host.
    pub fn host(&self) -> &Arc<PluginHost> {
        &self.host
    }
}
