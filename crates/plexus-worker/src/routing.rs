//! Queue-class routing by naming convention.
//!
//! Operators scale worker pools per queue class without per-task config:
//! a task whose name contains `pull` lands on the `pull` queue, `push` on
//! `push`, `core` on `core`, and everything else on the default queue.

use plexus_core::config::worker::WorkerConfig;
use plexus_core::error::AppError;
use plexus_core::result::AppResult;

/// Queue classes recognised in task names, checked in this order.
const NAMED_CLASSES: [&str; 3] = ["pull", "push", "core"];

/// Picks the queue a task's runs are enqueued on.
#[derive(Debug, Clone)]
pub struct QueueRouter {
    queues: Vec<String>,
    default_queue: String,
}

impl QueueRouter {
    /// Build a router over the configured queue classes.
    pub fn new(queues: Vec<String>, default_queue: impl Into<String>) -> Self {
        Self {
            queues,
            default_queue: default_queue.into(),
        }
    }

    /// Build a router from worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.queues.clone(), config.default_queue.clone())
    }

    /// Queue for `task`. An explicit override wins but must name a
    /// configured queue; a derived class nobody polls falls back to the
    /// default.
    pub fn route(&self, task: &str, explicit: Option<&str>) -> AppResult<String> {
        if let Some(queue) = explicit {
            if !self.is_known(queue) {
                return Err(AppError::validation(format!(
                    "queue '{queue}' for task '{task}' is not one of the configured queues {:?}",
                    self.queues
                )));
            }
            return Ok(queue.to_string());
        }

        let derived = NAMED_CLASSES
            .iter()
            .find(|class| task.contains(*class) && self.is_known(class));

        Ok(derived
            .map(|class| class.to_string())
            .unwrap_or_else(|| self.default_queue.clone()))
    }

    fn is_known(&self, queue: &str) -> bool {
        self.queues.iter().any(|q| q == queue)
    }

    /// Queues in polling priority order.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> QueueRouter {
        QueueRouter::from_config(&WorkerConfig::default())
    }

    #[test]
    fn test_routes_by_name() {
        let router = router();
        assert_eq!(router.route("ns.shop.pull_orders", None).unwrap(), "pull");
        assert_eq!(router.route("ns.shop.push.stock", None).unwrap(), "push");
        assert_eq!(router.route("ns.core.cleanup", None).unwrap(), "core");
        assert_eq!(router.route("ns.billing.recon.daily", None).unwrap(), "default");
    }

    #[test]
    fn test_explicit_queue_wins() {
        let router = router();
        assert_eq!(
            router.route("ns.shop.pull_orders", Some("core")).unwrap(),
            "core"
        );
        assert!(router.route("ns.shop.pull_orders", Some("gpu")).is_err());
    }

    #[test]
    fn test_unpolled_class_falls_back() {
        let router = QueueRouter::new(vec!["default".to_string()], "default");
        assert_eq!(router.route("ns.shop.pull_orders", None).unwrap(), "default");
    }
}
