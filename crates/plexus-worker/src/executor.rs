//! Task executor: runs one dequeued run on an isolated execution context.
//!
//! Every run gets a dedicated blocking thread driving a fresh current-thread
//! Tokio runtime. Anything the handler spawns lives on that runtime, so
//! nothing leaks between unrelated runs, and shutting the runtime down when
//! the handler returns tears down whatever sub-tasks it left behind.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use plexus_core::traits::task_queue::{RunTrigger, TaskRun};
use plexus_core::types::id::RunId;

use crate::task::{TaskEntry, TaskTable};

/// How long a finished run's runtime may take to wind down residual tasks.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What a task handler receives for one run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Run identifier.
    pub run_id: RunId,
    /// Task name.
    pub task: String,
    /// Plugin that owns the task.
    pub owner: String,
    /// Arguments passed to `trigger_now`, `Null` for scheduled runs.
    pub args: Value,
    /// What caused the run.
    pub trigger: RunTrigger,
    /// When execution started.
    pub started_at: DateTime<Utc>,
}

/// A plugin's periodic job.
///
/// Retrying is the handler's own business: a failed run is recorded and
/// not attempted again until the next due time.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute one run.
    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()>;
}

type BoxedTaskFn =
    dyn Fn(TaskContext) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync;

/// A closure-based task handler.
pub struct ClosureTaskHandler {
    handler: Arc<BoxedTaskFn>,
}

impl std::fmt::Debug for ClosureTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureTaskHandler")
            .field("handler", &"<closure>")
            .finish()
    }
}

impl ClosureTaskHandler {
    /// Creates a new closure-based handler.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            handler: Arc::new(
                move |ctx| -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> {
                    Box::pin(handler(ctx))
                },
            ),
        }
    }
}

#[async_trait]
impl TaskHandler for ClosureTaskHandler {
    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()> {
        (self.handler)(ctx).await
    }
}

/// Wrap a closure as a shareable [`TaskHandler`].
pub fn task_fn<F, Fut>(handler: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(ClosureTaskHandler::new(handler))
}

/// Why a run did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum TaskExecutionError {
    /// The handler returned an error.
    #[error("task handler failed: {0}")]
    Failed(String),

    /// The handler exceeded the per-run timeout.
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),

    /// The handler panicked.
    #[error("task handler panicked: {0}")]
    Panicked(String),

    /// The isolated runtime could not be built.
    #[error("could not build isolated runtime: {0}")]
    Runtime(String),
}

/// Result of executing one dequeued run.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The handler returned `Ok`.
    Succeeded {
        /// Wall time in milliseconds.
        duration_ms: u64,
    },
    /// The handler failed, panicked or timed out.
    Failed {
        /// Wall time in milliseconds.
        duration_ms: u64,
        /// What went wrong.
        error: TaskExecutionError,
    },
    /// The task was disabled when the run came up.
    Skipped,
    /// No task with that name is registered anymore.
    UnknownTask,
}

/// Executes runs against the registered task table.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    tasks: TaskTable,
    timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Create an executor over the registry's task table.
    pub fn new(tasks: TaskTable, timeout: Option<Duration>) -> Self {
        Self { tasks, timeout }
    }

    /// Execute one run in isolation, record its stats, and report the
    /// outcome. Never propagates a handler failure.
    pub async fn execute(&self, run: TaskRun) -> TaskOutcome {
        let Some(entry) = self.tasks.get(&run.task).map(|e| Arc::clone(e.value())) else {
            warn!(task = %run.task, run_id = %run.run_id, "Dropping run of unknown task");
            return TaskOutcome::UnknownTask;
        };

        if !entry.is_enabled() {
            debug!(task = %run.task, run_id = %run.run_id, "Task disabled, skipping run");
            entry.update_stats(|s| s.record_skipped()).await;
            return TaskOutcome::Skipped;
        }

        let started_at = Utc::now();
        entry.update_stats(|s| s.record_start(started_at)).await;

        let ctx = TaskContext {
            run_id: run.run_id,
            task: run.task.clone(),
            owner: entry.owner.clone(),
            args: run.args,
            trigger: run.trigger,
            started_at,
        };

        info!(
            task = %entry.name,
            run_id = %ctx.run_id,
            queue = %run.queue,
            trigger = ?ctx.trigger,
            "Executing task"
        );

        let start = Instant::now();
        let result = self.run_isolated(&entry, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(task = %entry.name, run_id = %run.run_id, duration_ms, "Task succeeded");
                entry.update_stats(|s| s.record_success(duration_ms)).await;
                TaskOutcome::Succeeded { duration_ms }
            }
            Err(error) => {
                error!(
                    task = %entry.name,
                    plugin = %entry.owner,
                    run_id = %run.run_id,
                    duration_ms,
                    error = %error,
                    "Task failed"
                );
                let message = error.to_string();
                match &error {
                    TaskExecutionError::TimedOut(_) => {
                        entry
                            .update_stats(|s| s.record_timeout(duration_ms, message))
                            .await
                    }
                    _ => {
                        entry
                            .update_stats(|s| s.record_failure(duration_ms, message))
                            .await
                    }
                }
                TaskOutcome::Failed { duration_ms, error }
            }
        }
    }

    async fn run_isolated(
        &self,
        entry: &TaskEntry,
        ctx: TaskContext,
    ) -> Result<(), TaskExecutionError> {
        let handler = Arc::clone(&entry.handler);
        let timeout = self.timeout;

        let joined = tokio::task::spawn_blocking(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| TaskExecutionError::Runtime(e.to_string()))?;

            let outcome = runtime.block_on(async move {
                let run = handler.run(ctx);
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(result) => result.map_err(|e| TaskExecutionError::Failed(format!("{e:#}"))),
                        Err(_) => Err(TaskExecutionError::TimedOut(limit)),
                    },
                    None => run
                        .await
                        .map_err(|e| TaskExecutionError::Failed(format!("{e:#}"))),
                }
            });

            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
            outcome
        })
        .await;

        match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TaskExecutionError::Panicked(message))
            }
            Err(e) => Err(TaskExecutionError::Panicked(e.to_string())),
        }
    }
}
