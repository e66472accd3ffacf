//! Redis connection management.

use std::time::Duration;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncConnectionConfig, Client};
use tracing::{debug, info};

use plexus_core::config::redis::RedisConfig;
use plexus_core::error::{AppError, ErrorKind};
use plexus_core::result::AppResult;

/// Slack a blocking connection allows beyond the server-side block time.
const BLOCKING_READ_MARGIN: Duration = Duration::from_secs(5);

/// Response timeout for a connection that issues blocking reads of `block`.
pub fn blocking_response_timeout(block: Duration) -> Duration {
    block + BLOCKING_READ_MARGIN
}

/// Redis client wrapper with connection management.
#[derive(Clone)]
pub struct RedisClient {
    /// Client used to open dedicated connections.
    client: Client,
    /// Redis connection manager (pooled, reconnecting).
    conn: ConnectionManager,
    /// Key prefix for all keys.
    key_prefix: String,
    /// Category of connection errors.
    kind: ErrorKind,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    /// Connect using the given configuration.
    ///
    /// `kind` decides how connection failures are categorised, so the bus
    /// reports log-store errors and the worker reports task-queue errors.
    pub async fn connect(config: &RedisConfig, kind: ErrorKind) -> AppResult<Self> {
        info!(url = %mask_redis_url(&config.url), "Connecting to Redis");

        let client = Client::open(config.url.as_str())
            .map_err(|e| AppError::with_source(kind, "Failed to create Redis client", e))?;

        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| AppError::with_source(kind, "Failed to connect to Redis", e))?;

        info!("Successfully connected to Redis");
        Ok(Self {
            client,
            conn,
            key_prefix: config.key_prefix.clone(),
            kind,
        })
    }

    /// Get a mutable clone of the connection manager.
    ///
    /// Only for commands that answer promptly. A blocking command on the
    /// shared manager outlives its response timeout and stalls every other
    /// caller multiplexed on it; use [`RedisClient::blocking_connection`].
    pub fn conn_mut(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Open a dedicated connection for blocking reads of up to `block`.
    pub async fn blocking_connection(&self, block: Duration) -> AppResult<MultiplexedConnection> {
        let config = AsyncConnectionConfig::new()
            .set_response_timeout(Some(blocking_response_timeout(block)));
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| {
                AppError::with_source(self.kind, "Failed to open a blocking Redis connection", e)
            })?;
        debug!(block_ms = block.as_millis() as u64, "Opened blocking Redis connection");
        Ok(conn)
    }

    /// Return the key prefix.
    pub fn prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Mask password in Redis URL for safe logging.
fn mask_redis_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****@{}", &url[..colon_pos], &url[at_pos + 1..]);
            }
        }
    }
    url.to_string()
}
