//! # docket-redis
//!
//! Redis connectivity for the docket job queue.
//!
//! ## Features
//!
//! - **Connection Pooling**: bb8 pool of multiplexed connections
//! - **Environment Configuration**: `REDIS_URL` / `REDIS_ADDR` and friends
//! - **Script Execution**: `EVALSHA` with automatic `SCRIPT LOAD` fallback
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docket_redis::{RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docket_redis::RedisError> {
//!     let config = RedisConfig::from_env().pool_size(4).build();
//!     let redis = RedisService::new(config).await?;
//!
//!     redis.health_check().await?;
//!     let len: u64 = redis.query(redis::cmd("ZCARD").arg("docket:queue:email")).await?;
//!     println!("{} email jobs indexed", len);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```
//! use docket_redis::RedisConfig;
//!
//! let config = RedisConfig::builder()
//!     .url("redis://localhost:6379")
//!     .database(1)
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.connection_url().unwrap(), "redis://localhost:6379/1");
//! ```

mod config;
mod error;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use service::{PoolStats, RedisConnection, RedisPool, RedisService};

// Re-export redis crate for convenience
pub use redis;
