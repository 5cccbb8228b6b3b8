//! Shared Redis handle used by the job store.
//!
//! A [`RedisService`] owns a bb8 pool of multiplexed connections. Opening
//! one validates the configuration and pings the server once, so a bad URL
//! or unreachable server surfaces at startup instead of on the first job.

use std::sync::Arc;

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// Connection pool used by the service.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A connection checked out of the pool; returned to it on drop.
pub type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

/// Redis service providing the connection pool and script execution.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct RedisService {
    config: Arc<RedisConfig>,
    pool: RedisPool,
}

impl RedisService {
    /// Open a pool for `config` and check that the server answers.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let manager = RedisConnectionManager::new(config.connection_url()?)
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        debug!(url = %config.redacted_url(), pool_size = config.pool_size, "Opening Redis pool");
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Pool(e.to_string()))?;

        let service = Self {
            config: Arc::new(config),
            pool,
        };
        service.health_check().await?;

        info!(url = %service.config.redacted_url(), "Connected to Redis");
        Ok(service)
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Check a connection out of the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        Ok(self.pool.get().await?)
    }

    /// Ping the server over a pooled connection.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    /// Run a prepared script invocation on a pooled connection.
    ///
    /// Scripts are sent with `EVALSHA` and transparently re-loaded on
    /// `NOSCRIPT`.
    pub async fn invoke<T: redis::FromRedisValue>(
        &self,
        invocation: &redis::ScriptInvocation<'_>,
    ) -> Result<T> {
        let mut conn = self.get().await?;
        let reply: T = invocation.invoke_async(&mut *conn).await?;
        Ok(reply)
    }

    /// Run a single command on a pooled connection.
    pub async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.get().await?;
        let reply: T = cmd.query_async(&mut *conn).await?;
        Ok(reply)
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}
