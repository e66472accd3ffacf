//! Periodic schedule table backed by tokio-cron-scheduler.
//!
//! The scheduler never runs task bodies. A firing only calls the `fire`
//! callback the registry supplies, which enqueues a run for the workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use plexus_core::error::AppError;
use plexus_core::result::AppResult;

use crate::cron::CronExpression;

/// Callback invoked every time a schedule fires.
pub type FireFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Cron-based schedule table
#[derive(Clone)]
pub struct CronScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish()
    }
}

impl CronScheduler {
    /// Create a new cron scheduler
    pub async fn new() -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to create scheduler: {e}")))?;

        Ok(Self { scheduler })
    }

    /// Add a schedule. Returns the job id used to remove it later.
    pub async fn add(&self, name: &str, cron: &CronExpression, fire: FireFn) -> AppResult<Uuid> {
        let job = CronJob::new_async(cron.normalized(), move |_uuid, _lock| {
            let fire = Arc::clone(&fire);
            Box::pin(async move { fire().await })
        })
        .map_err(|e| AppError::validation(format!("Failed to create schedule for '{name}': {e}")))?;

        let id = self
            .scheduler
            .add(job)
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to add schedule for '{name}': {e}")))?;

        info!(task = name, cron = %cron, job_id = %id, "Schedule added");
        Ok(id)
    }

    /// Remove a schedule. A removal failure leaves a stale job that fires
    /// into a task the registry no longer knows, which the executor drops.
    pub async fn remove(&self, name: &str, id: Uuid) {
        if let Err(e) = self.scheduler.remove(&id).await {
            warn!(task = name, job_id = %id, error = %e, "Failed to remove schedule");
        }
    }

    /// Next time the schedule fires, if the scheduler knows it.
    pub async fn next_fire(&self, id: Uuid) -> Option<DateTime<Utc>> {
        let mut scheduler = self.scheduler.clone();
        scheduler.next_tick_for_job(id).await.ok().flatten()
    }

    /// Start the scheduler
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to start scheduler: {e}")))?;

        info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::scheduler(format!("Failed to shutdown scheduler: {e}")))?;

        info!("Cron scheduler shut down");
        Ok(())
    }
}
