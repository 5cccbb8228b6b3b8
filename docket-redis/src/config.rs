//! Redis configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::{RedisError, Result};

/// Schemes accepted by the underlying client.
const SUPPORTED_SCHEMES: &[&str] = &["redis", "rediss", "redis+unix", "unix"];

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Minimum idle connections.
    pub min_idle: Option<u32>,
    /// Timeout when checking a connection out of the pool.
    #[serde(with = "duration_secs", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    /// Database number; the server's `databases` setting bounds it.
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            min_idle: Some(1),
            connection_timeout: default_connection_timeout(),
            database: None,
            username: None,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Create a new configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// `REDIS_URL` takes precedence over `REDIS_ADDR` (a bare `host:port`).
    pub fn from_env() -> RedisConfigBuilder {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> RedisConfigBuilder
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = RedisConfigBuilder::new();

        if let Some(url) = lookup("REDIS_URL") {
            builder = builder.url(url);
        } else if let Some(addr) = lookup("REDIS_ADDR") {
            builder = builder.url(format!("redis://{}", addr));
        }

        if let Some(size) = lookup("REDIS_POOL_SIZE").and_then(|v| v.parse().ok()) {
            builder = builder.pool_size(size);
        }

        if let Some(db) = lookup("REDIS_DATABASE").and_then(|v| v.parse().ok()) {
            builder = builder.database(db);
        }

        if let Some(username) = lookup("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Some(password) = lookup("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        builder
    }

    /// Check that the configuration can be used to open a pool.
    pub fn validate(&self) -> Result<()> {
        let url = self.parsed_url()?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(RedisError::Config(format!(
                "unsupported scheme '{}' in Redis URL",
                url.scheme()
            )));
        }

        if self.pool_size == 0 {
            return Err(RedisError::Config("pool_size must be at least 1".into()));
        }

        if let Some(min_idle) = self.min_idle
            && min_idle > self.pool_size
        {
            return Err(RedisError::Config(format!(
                "min_idle ({}) exceeds pool_size ({})",
                min_idle, self.pool_size
            )));
        }

        Ok(())
    }

    /// Get the full Redis URL with auth and database applied.
    pub fn connection_url(&self) -> Result<String> {
        let mut url = self.parsed_url()?;

        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                url.set_username(username)
                    .map_err(|()| RedisError::Config("URL cannot carry a username".into()))?;
            }
            url.set_password(Some(password))
                .map_err(|()| RedisError::Config("URL cannot carry a password".into()))?;
        }

        if let Some(db) = self.database {
            url.set_path(&format!("/{}", db));
        }

        Ok(url.into())
    }

    /// The configured URL with any credentials masked, for logging.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.into()
            }
            Err(_) => "<invalid url>".to_string(),
        }
    }

    fn parsed_url(&self) -> Result<Url> {
        Url::parse(&self.url)
            .map_err(|e| RedisError::Config(format!("invalid Redis URL '{}': {}", self.url, e)))
    }
}

/// Builder for Redis configuration.
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the minimum idle connections.
    pub fn min_idle(mut self, min_idle: u32) -> Self {
        self.config.min_idle = Some(min_idle);
        self
    }

    /// Set the connection checkout timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
