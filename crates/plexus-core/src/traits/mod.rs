//! Traits for the infrastructure the runtime is built on.

pub mod log_store;
pub mod task_queue;

pub use log_store::{LogMessage, LogStore, PendingMessage};
pub use task_queue::{RunTrigger, TaskQueue, TaskRun};
