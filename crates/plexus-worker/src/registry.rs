//! Task registry: named cron jobs registered by plugins.
//!
//! Registration validates the name and the cron expression up front, rejects
//! duplicates, routes the task to a queue class, and adds a schedule whose
//! firing enqueues a run on the task queue. Task bodies only ever execute on
//! the worker pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::traits::task_queue::{RunTrigger, TaskQueue, TaskRun};
use plexus_core::types::id::RunId;
use plexus_core::types::namespace::{IdentifierKind, NamespaceRoot};

use crate::cron::CronExpression;
use crate::executor::TaskHandler;
use crate::routing::QueueRouter;
use crate::scheduler::{CronScheduler, FireFn};
use crate::stats::TaskStats;
use crate::task::{TaskEntry, TaskInfo, TaskTable};

/// Attempts made to enqueue a due run before the firing is given up.
const ENQUEUE_ATTEMPTS: u32 = 3;
/// Pause between enqueue attempts.
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(500);

/// Registry of cron tasks.
#[derive(Debug)]
pub struct TaskRegistry {
    namespace: NamespaceRoot,
    tasks: TaskTable,
    scheduler: CronScheduler,
    queue: Arc<dyn TaskQueue>,
    router: QueueRouter,
    /// Serialises registrations so the duplicate check and insert are atomic.
    registration: Mutex<()>,
}

impl TaskRegistry {
    /// Create a registry scheduling into `queue`.
    pub fn new(
        namespace: NamespaceRoot,
        scheduler: CronScheduler,
        queue: Arc<dyn TaskQueue>,
        router: QueueRouter,
    ) -> Self {
        Self {
            namespace,
            tasks: Arc::new(DashMap::new()),
            scheduler,
            queue,
            router,
            registration: Mutex::new(()),
        }
    }

    /// The task table, shared with the executor.
    pub fn table(&self) -> TaskTable {
        Arc::clone(&self.tasks)
    }

    /// The task queue runs are enqueued on.
    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Register a cron task, routing it by name.
    pub async fn register_cron(
        &self,
        name: &str,
        cron_expr: &str,
        handler: Arc<dyn TaskHandler>,
        owner: &str,
    ) -> AppResult<TaskInfo> {
        self.register_cron_with(name, cron_expr, handler, owner, None)
            .await
    }

    /// Register a cron task on an explicit queue class, or route it by name
    /// when `queue` is `None`.
    pub async fn register_cron_with(
        &self,
        name: &str,
        cron_expr: &str,
        handler: Arc<dyn TaskHandler>,
        owner: &str,
        queue: Option<&str>,
    ) -> AppResult<TaskInfo> {
        self.namespace.validate(IdentifierKind::Task, name)?;
        let cron = CronExpression::parse(cron_expr)?;
        let queue = self.router.route(name, queue)?;

        let _guard = self.registration.lock().await;
        if self.tasks.contains_key(name) {
            return Err(AppError::conflict(format!(
                "task '{name}' is already registered"
            )));
        }

        let job_id = self
            .scheduler
            .add(name, &cron, self.fire_fn(name))
            .await?;

        let entry = Arc::new(TaskEntry::new(
            name.to_string(),
            cron,
            queue,
            owner.to_string(),
            handler,
            job_id,
        ));
        self.tasks.insert(name.to_string(), Arc::clone(&entry));

        info!(
            task = name,
            cron = %entry.cron,
            queue = %entry.queue,
            plugin = owner,
            "Registered cron task"
        );
        Ok(self.describe(&entry).await)
    }

    /// Firing callback: skip when disabled, otherwise enqueue a run with a
    /// short fixed backoff on queue errors. Never fails the scheduler.
    fn fire_fn(&self, name: &str) -> FireFn {
        let tasks = Arc::clone(&self.tasks);
        let queue = Arc::clone(&self.queue);
        let name = name.to_string();

        Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            let tasks = Arc::clone(&tasks);
            let queue = Arc::clone(&queue);
            let name = name.clone();
            Box::pin(async move {
                let Some(entry) = tasks.get(&name).map(|e| Arc::clone(e.value())) else {
                    debug!(task = %name, "Schedule fired for a deregistered task");
                    return;
                };
                if !entry.is_enabled() {
                    debug!(task = %name, "Task disabled, skipping due run");
                    entry.update_stats(|s| s.record_skipped()).await;
                    return;
                }

                let run = TaskRun::new(&name, &entry.queue, Value::Null, RunTrigger::Scheduled);
                for attempt in 1..=ENQUEUE_ATTEMPTS {
                    match queue.enqueue(&run).await {
                        Ok(()) => {
                            debug!(task = %name, run_id = %run.run_id, queue = %run.queue, "Enqueued due run");
                            return;
                        }
                        Err(e) if attempt < ENQUEUE_ATTEMPTS && e.is_transient() => {
                            warn!(task = %name, attempt, error = %e, "Enqueue failed, retrying");
                            tokio::time::sleep(ENQUEUE_BACKOFF).await;
                        }
                        Err(e) => {
                            error!(task = %name, attempt, error = %e, "Failed to enqueue due run");
                            return;
                        }
                    }
                }
            })
        })
    }

    /// Remove a task and its schedule. Returns `false` when unknown.
    pub async fn deregister(&self, name: &str) -> bool {
        let _guard = self.registration.lock().await;
        match self.tasks.remove(name) {
            Some((_, entry)) => {
                self.scheduler.remove(name, entry.job_id).await;
                info!(task = name, plugin = %entry.owner, "Deregistered cron task");
                true
            }
            None => false,
        }
    }

    fn entry(&self, name: &str) -> AppResult<Arc<TaskEntry>> {
        self.tasks
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AppError::not_found(format!("task '{name}' is not registered")))
    }

    /// Let due runs of `name` execute again.
    pub fn enable_task(&self, name: &str) -> AppResult<()> {
        self.entry(name)?.set_enabled(true);
        info!(task = name, "Task enabled");
        Ok(())
    }

    /// Keep `name` registered but skip its due runs.
    pub fn disable_task(&self, name: &str) -> AppResult<()> {
        self.entry(name)?.set_enabled(false);
        info!(task = name, "Task disabled");
        Ok(())
    }

    /// Whether due runs of `name` execute.
    pub fn is_task_enabled(&self, name: &str) -> AppResult<bool> {
        Ok(self.entry(name)?.is_enabled())
    }

    /// Enqueue one immediate run of `name`, bypassing the schedule.
    pub async fn trigger_now(&self, name: &str, args: Value) -> AppResult<RunId> {
        let entry = self.entry(name)?;
        if !entry.is_enabled() {
            return Err(AppError::conflict(format!(
                "task '{name}' is disabled and cannot be triggered"
            )));
        }

        let run = TaskRun::new(name, &entry.queue, args, RunTrigger::Manual);
        self.queue.enqueue(&run).await?;
        info!(task = name, run_id = %run.run_id, queue = %run.queue, "Triggered task");
        Ok(run.run_id)
    }

    /// Execution counters and timing of `name`.
    pub async fn get_task_stats(&self, name: &str) -> AppResult<TaskStats> {
        Ok(self.entry(name)?.stats().await)
    }

    /// Every registered task, sorted by name.
    pub async fn list_tasks(&self) -> Vec<TaskInfo> {
        let entries: Vec<Arc<TaskEntry>> =
            self.tasks.iter().map(|e| Arc::clone(e.value())).collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(self.describe(&entry).await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Plugin that registered `name`.
    pub fn task_owner(&self, name: &str) -> AppResult<String> {
        Ok(self.entry(name)?.owner.clone())
    }

    /// Names of the tasks registered by `owner`.
    pub fn tasks_owned_by(&self, owner: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.key().clone())
            .collect()
    }

    async fn describe(&self, entry: &TaskEntry) -> TaskInfo {
        TaskInfo {
            name: entry.name.clone(),
            cron: entry.cron.as_str().to_string(),
            queue: entry.queue.clone(),
            owner: entry.owner.clone(),
            enabled: entry.is_enabled(),
            next_fire_at: self.scheduler.next_fire(entry.job_id).await,
        }
    }

    /// Start firing schedules.
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler.start().await
    }

    /// Stop firing schedules.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.scheduler.shutdown().await
    }
}
