//! Redis-backed key-value store.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::cache::KeyValueStore;
use crate::error::{InfraError, InfraResult};

const BACKEND: &str = "cache";

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// [`KeyValueStore`] over a multiplexed, auto-reconnecting Redis connection.
pub struct RedisStore {
    url: String,
    connection: RwLock<Option<ConnectionManager>>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The url may carry a password.
        f.debug_struct("RedisStore")
            .field("url", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Creates an unconnected store. Call [`KeyValueStore::configure`] first.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: RwLock::new(None),
        }
    }

    async fn connection(&self) -> InfraResult<ConnectionManager> {
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| InfraError::not_ready(BACKEND))
    }
}

async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> InfraResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(InfraError::from),
        Err(_) => Err(InfraError::Cache {
            message: format!("{operation} timed out after {}ms", limit.as_millis()),
        }),
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn vendor(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    async fn configure(&self) -> InfraResult<()> {
        let mut slot = self.connection.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let connection_error = |e: InfraError| InfraError::Connection {
            backend: BACKEND.to_string(),
            message: e.to_string(),
        };

        let client = redis::Client::open(self.url.as_str()).map_err(|e| {
            InfraError::Configuration {
                backend: BACKEND.to_string(),
                message: format!("invalid redis url: {e}"),
            }
        })?;
        let mut manager = with_timeout(CONNECT_TIMEOUT, "connect", ConnectionManager::new(client))
            .await
            .map_err(connection_error)?;

        let pong: String = with_timeout(
            COMMAND_TIMEOUT,
            "PING",
            redis::cmd("PING").query_async(&mut manager),
        )
        .await
        .map_err(connection_error)?;
        debug!(reply = %pong, "Cache probe succeeded");

        *slot = Some(manager);
        info!("Redis connection established");
        Ok(())
    }

    async fn get(&self, key: &str) -> InfraResult<Option<String>> {
        let mut conn = self.connection().await?;
        with_timeout(COMMAND_TIMEOUT, "GET", conn.get::<_, Option<String>>(key)).await
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> InfraResult<()> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        with_timeout(
            COMMAND_TIMEOUT,
            "SET",
            conn.set_ex::<_, _, ()>(key, value, seconds),
        )
        .await
    }

    async fn delete(&self, keys: &[String]) -> InfraResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        with_timeout(COMMAND_TIMEOUT, "DEL", conn.del::<_, u64>(keys)).await
    }

    async fn destroy(&self) {
        if self.connection.write().await.take().is_some() {
            info!(backend = BACKEND, "Redis connection closed");
        }
    }
}
