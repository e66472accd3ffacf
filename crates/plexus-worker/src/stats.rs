//! Per-task execution counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution counters and timing of one task. For dashboards, not control flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Runs that started executing.
    pub attempted: u64,
    /// Runs whose handler returned `Ok`.
    pub succeeded: u64,
    /// Runs whose handler failed, panicked or timed out.
    pub failed: u64,
    /// Runs skipped because the task was disabled when due.
    pub skipped: u64,
    /// Runs cancelled by the per-run timeout. Also counted in `failed`.
    pub timed_out: u64,
    /// When the last run started.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Duration of the last run.
    pub last_duration_ms: Option<u64>,
    /// Sum of all run durations.
    pub total_duration_ms: u64,
    /// Error of the last failed run.
    pub last_error: Option<String>,
}

impl TaskStats {
    /// A run started.
    pub fn record_start(&mut self, at: DateTime<Utc>) {
        self.attempted += 1;
        self.last_run_at = Some(at);
    }

    /// A run finished successfully.
    pub fn record_success(&mut self, duration_ms: u64) {
        self.succeeded += 1;
        self.record_duration(duration_ms);
    }

    /// A run failed.
    pub fn record_failure(&mut self, duration_ms: u64, error: impl Into<String>) {
        self.failed += 1;
        self.last_error = Some(error.into());
        self.record_duration(duration_ms);
    }

    /// A run hit its timeout.
    pub fn record_timeout(&mut self, duration_ms: u64, error: impl Into<String>) {
        self.timed_out += 1;
        self.record_failure(duration_ms, error);
    }

    /// A due run was skipped.
    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    fn record_duration(&mut self, duration_ms: u64) {
        self.last_duration_ms = Some(duration_ms);
        self.total_duration_ms += duration_ms;
    }

    /// Mean duration over finished runs.
    pub fn average_duration_ms(&self) -> Option<u64> {
        let finished = self.succeeded + self.failed;
        (finished > 0).then(|| self.total_duration_ms / finished)
    }
}
