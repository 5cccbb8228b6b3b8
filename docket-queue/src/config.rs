//! Queue configuration.

use crate::error::{QueueError, QueueResult};
use std::time::Duration;

/// Default prefix for every key the queue writes.
pub const DEFAULT_KEY_PREFIX: &str = "docket";

/// Default time a finished job stays readable before it expires.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Default lease granted to a worker when it claims a job.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Key prefix for store keys
    pub key_prefix: String,

    /// Retention window for completed and failed jobs
    pub retention: Duration,

    /// How long a claim protects a running job from being claimed again
    pub lease_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retention: DEFAULT_RETENTION,
            lease_duration: DEFAULT_LEASE,
        }
    }
}

impl QueueConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `DOCKET_KEY_PREFIX`, `DOCKET_RETENTION_SECS`
    /// and `DOCKET_LEASE_SECS`.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup("DOCKET_KEY_PREFIX") {
            config = config.with_key_prefix(prefix);
        }

        if let Some(secs) = lookup("DOCKET_RETENTION_SECS") {
            config.retention = parse_secs("DOCKET_RETENTION_SECS", &secs)?;
        }

        if let Some(secs) = lookup("DOCKET_LEASE_SECS") {
            config.lease_duration = parse_secs("DOCKET_LEASE_SECS", &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the retention time for finished jobs.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the claim lease duration.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Reject settings the store cannot honour.
    pub fn validate(&self) -> QueueResult<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(QueueError::Config("key prefix must not be empty".into()));
        }
        // PEXPIRE with 0 deletes the key outright.
        if self.retention.is_zero() {
            return Err(QueueError::Config("retention must be positive".into()));
        }
        if self.lease_duration.is_zero() {
            return Err(QueueError::Config("lease duration must be positive".into()));
        }
        Ok(())
    }

    /// Build a store key.
    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

fn parse_secs(name: &str, value: &str) -> QueueResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| QueueError::Config(format!("{} must be a whole number of seconds", name)))
}
