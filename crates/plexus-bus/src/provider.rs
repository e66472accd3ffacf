//! Log store selection from configuration.

use std::sync::Arc;

use tracing::info;

use plexus_core::config::event_bus::{EventBusBackend, EventBusConfig};
#[cfg(not(feature = "redis-backend"))]
use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::traits::log_store::LogStore;

/// Build the log store the configuration asks for.
pub async fn build_log_store(config: &EventBusConfig) -> AppResult<Arc<dyn LogStore>> {
    let store: Arc<dyn LogStore> = match config.backend {
        EventBusBackend::Memory => {
            info!("Initializing in-memory log store");
            Arc::new(crate::memory::MemoryLogStore::new())
        }
        #[cfg(feature = "redis-backend")]
        EventBusBackend::Redis => {
            info!("Initializing Redis Streams log store");
            let client = crate::redis::RedisClient::connect(
                &config.redis,
                plexus_core::error::ErrorKind::LogStore,
            )
            .await?;
            Arc::new(crate::redis::RedisStreamStore::new(client))
        }
        #[cfg(not(feature = "redis-backend"))]
        EventBusBackend::Redis => {
            return Err(AppError::configuration(
                "Event bus backend 'redis' requires the redis-backend feature",
            ));
        }
    };

    Ok(store)
}
