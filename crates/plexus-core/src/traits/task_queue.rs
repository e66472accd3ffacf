//! Distributed task queue trait feeding the worker pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::AppResult;
use crate::types::id::RunId;

/// Why a run was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// The cron schedule fired.
    Scheduled,
    /// Someone called `trigger_now`.
    Manual,
}

/// One unit of work on a queue: execute task `task` once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Run identifier.
    pub run_id: RunId,
    /// Registered task name.
    pub task: String,
    /// Queue class the run was routed to.
    pub queue: String,
    /// Arguments handed to the handler.
    #[serde(default)]
    pub args: Value,
    /// What enqueued the run.
    pub trigger: RunTrigger,
    /// When the run was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl TaskRun {
    /// Create a run for `task` on `queue`.
    pub fn new(task: impl Into<String>, queue: impl Into<String>, args: Value, trigger: RunTrigger) -> Self {
        Self {
            run_id: RunId::new(),
            task: task.into(),
            queue: queue.into(),
            args,
            trigger,
            enqueued_at: Utc::now(),
        }
    }
}

/// Trait for the queue backend between the scheduler and the workers.
#[async_trait]
pub trait TaskQueue: Send + Sync + std::fmt::Debug + 'static {
    /// Push a run onto its queue.
    async fn enqueue(&self, run: &TaskRun) -> AppResult<()>;

    /// Pop the next run, trying `queues` in order. Never blocks.
    async fn dequeue(&self, queues: &[String]) -> AppResult<Option<TaskRun>>;

    /// Number of runs waiting on `queue`.
    async fn len(&self, queue: &str) -> AppResult<usize>;
}
