//! Pooled Redis connections for request/response commands.
//!
//! Bus publishes and presence ledger writes borrow from here. Pub/sub needs a
//! connection in subscriber mode, so the bus listener dials [`RedisPool::url`]
//! itself instead of holding a pooled connection forever.

use std::time::Duration;

use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};

/// Pool sizing and timeouts
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub url: String,
    pub max_connections: usize,
    /// How long a caller waits for a free connection before giving up
    pub acquire_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

impl From<&chat_common::RedisConfig> for RedisPoolConfig {
    fn from(config: &chat_common::RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections as usize,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("Invalid Redis pool configuration: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("No Redis connection available: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type RedisResult<T> = Result<T, RedisPoolError>;

/// Drop the `user:password@` part so URLs can be logged
pub(crate) fn redact_url(url: &str) -> &str {
    match url.rsplit_once('@') {
        Some((_, host)) => host,
        None => url,
    }
}

#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
    url: String,
}

impl RedisPool {
    pub fn new(config: RedisPoolConfig) -> RedisResult<Self> {
        let mut pool_config = PoolConfig::new(config.max_connections.max(1));
        pool_config.timeouts = Timeouts {
            wait: Some(config.acquire_timeout),
            create: Some(config.acquire_timeout),
            recycle: Some(config.acquire_timeout),
        };

        let mut cfg = Config::from_url(config.url.as_str());
        cfg.pool = Some(pool_config);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

        tracing::info!(
            url = %redact_url(&config.url),
            max_connections = config.max_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Redis pool created"
        );

        Ok(Self {
            pool,
            url: config.url,
        })
    }

    pub fn from_config(config: &chat_common::RedisConfig) -> RedisResult<Self> {
        Self::new(config.into())
    }

    /// Address for connections that must live outside the pool
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get(&self) -> RedisResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    pub async fn health_check(&self) -> RedisResult<()> {
        let mut conn = self.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisPool")
            .field("url", &redact_url(&self.url))
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}
