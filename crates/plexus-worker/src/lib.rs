//! Task registry, cron scheduling and isolated task execution for Plexus.
//!
//! This crate provides:
//! - A task registry that validates and schedules plugin cron jobs
//! - A cron scheduler whose firings enqueue runs on a task queue
//! - Task queue backends (in-memory, Redis lists)
//! - A worker runner that polls queues and executes runs
//! - An executor that runs each run on its own isolated runtime

pub mod cron;
pub mod executor;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod task;

pub use cron::CronExpression;
pub use executor::{ClosureTaskHandler, TaskContext, TaskExecutor, TaskHandler, TaskOutcome, task_fn};
pub use queue::{MemoryTaskQueue, build_task_queue};
pub use registry::TaskRegistry;
pub use routing::QueueRouter;
pub use runner::WorkerRunner;
pub use scheduler::CronScheduler;
pub use stats::TaskStats;
pub use task::TaskInfo;
