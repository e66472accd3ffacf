//! Registered task records shared by the registry and the executor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cron::CronExpression;
use crate::executor::TaskHandler;
use crate::stats::TaskStats;

/// Name → registered task.
pub type TaskTable = Arc<DashMap<String, Arc<TaskEntry>>>;

/// One registered cron task.
pub struct TaskEntry {
    /// Unique namespaced task name.
    pub name: String,
    /// Schedule.
    pub cron: CronExpression,
    /// Queue class runs are routed to.
    pub queue: String,
    /// Plugin that registered the task.
    pub owner: String,
    /// The plugin's callable.
    pub handler: Arc<dyn TaskHandler>,
    /// Scheduler job backing the schedule.
    pub job_id: Uuid,
    enabled: AtomicBool,
    stats: Mutex<TaskStats>,
}

impl std::fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEntry")
            .field("name", &self.name)
            .field("cron", &self.cron)
            .field("queue", &self.queue)
            .field("owner", &self.owner)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl TaskEntry {
    /// Create an enabled task with empty stats.
    pub fn new(
        name: String,
        cron: CronExpression,
        queue: String,
        owner: String,
        handler: Arc<dyn TaskHandler>,
        job_id: Uuid,
    ) -> Self {
        Self {
            name,
            cron,
            queue,
            owner,
            handler,
            job_id,
            enabled: AtomicBool::new(true),
            stats: Mutex::new(TaskStats::default()),
        }
    }

    /// Whether due runs execute.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Toggle the task.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Mutate the stats under their lock.
    pub async fn update_stats(&self, f: impl FnOnce(&mut TaskStats)) {
        let mut stats = self.stats.lock().await;
        f(&mut stats);
    }

    /// Snapshot of the stats.
    pub async fn stats(&self) -> TaskStats {
        self.stats.lock().await.clone()
    }
}

/// Public description of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    /// Task name.
    pub name: String,
    /// Cron expression as registered.
    pub cron: String,
    /// Queue class.
    pub queue: String,
    /// Owning plugin.
    pub owner: String,
    /// Enabled flag.
    pub enabled: bool,
    /// Next time the schedule fires, when known.
    pub next_fire_at: Option<DateTime<Utc>>,
}
