//! Time-ordered job queue engine.
//!
//! Producers submit jobs that become runnable at an execution time; one
//! worker loop per job type claims due jobs in execution-time order, runs a
//! handler and records the outcome.
//!
//! - Job records and per-type dispatch indexes in a [`JobStore`]
//! - Redis backend with atomic Lua batches, or an in-memory backend
//! - Atomic claims with leases, so crashed workers do not strand jobs
//! - Finished jobs retained for a configurable window, then expired
//!
//! ## Quick Start - Job Creation
//!
//! ```
//! use docket_queue::{EnqueueJobRequest, Job, JobStatus};
//!
//! let job = Job::new("print", b"hello".to_vec());
//! assert_eq!(job.status, JobStatus::Pending);
//! assert!(job.is_ready());
//!
//! let later = EnqueueJobRequest::new("print", b"later".to_vec())
//!     .after(chrono::Duration::minutes(10));
//! assert!(later.execution_time.is_some());
//! ```
//!
//! ## Queue Configuration
//!
//! ```
//! use docket_queue::QueueConfig;
//! use std::time::Duration;
//!
//! let config = QueueConfig::new()
//!     .with_key_prefix("myapp")
//!     .with_retention(Duration::from_secs(3600));
//!
//! assert_eq!(config.key_prefix, "myapp");
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use docket_queue::*;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueueError> {
//!     let service = JobService::connect(
//!         docket_redis::RedisConfig::from_env().build(),
//!         QueueConfig::from_env()?,
//!     )
//!     .await?;
//!
//!     service
//!         .enqueue_job(EnqueueJobRequest::new("print", b"hello".to_vec()))
//!         .await?;
//!
//!     let worker = Worker::new("print", service.clone(), |_ctx, job| async move {
//!         println!("{}", job.payload_lossy());
//!         Ok(())
//!     });
//!
//!     let (shutdown, rx) = watch::channel(false);
//!     let handle = worker.spawn(rx);
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown.send(true).ok();
//!     if let Ok(result) = handle.await {
//!         result?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult, StoreError, StoreResult};
pub use job::{EnqueueJobRequest, Job, JobId, JobStatus, Payload, now_millis};
pub use service::JobService;
pub use storage::JobStorage;
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{JobStore, MemoryStore};
pub use worker::{JobContext, JobHandler, PollOutcome, Worker, WorkerConfig, WorkerState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::QueueConfig;
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{EnqueueJobRequest, Job, JobId, JobStatus};
    pub use crate::service::JobService;
    pub use crate::store::{JobStore, MemoryStore};
    pub use crate::worker::{JobContext, PollOutcome, Worker, WorkerConfig, WorkerState};
}
