//! Key builders for everything the runtime stores in Redis.
//!
//! Centralising key construction keeps the bus and the task queue from
//! drifting apart on naming.

/// Stream key holding the log of one topic.
pub fn stream(prefix: &str, topic: &str) -> String {
    format!("{prefix}stream:{topic}")
}

/// List key holding the runs waiting on one queue class.
pub fn task_queue(prefix: &str, queue: &str) -> String {
    format!("{prefix}queue:{queue}")
}

/// Consumer name for one subscription within its group.
///
/// Every subscription reads under its own consumer so pending entries can
/// be attributed to the loop that received them.
pub fn consumer(group: &str, subscription: &str) -> String {
    format!("{group}:{subscription}")
}
