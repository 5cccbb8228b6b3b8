// docket - a time-ordered job queue engine for Rust
//
// Producers submit jobs that become runnable at an execution time; one worker
// loop per job type claims due jobs and records their outcome.

// Re-export the queue engine
pub use docket_queue::*;

// Re-export Redis connectivity
#[cfg(feature = "redis")]
pub use docket_redis;

#[cfg(feature = "redis")]
pub use docket_redis::{RedisConfig, RedisService};

/// Prelude for common imports.
///
/// ```
/// use docket::prelude::*;
///
/// let job = Job::new("print", b"hello".to_vec());
/// assert_eq!(job.status, JobStatus::Pending);
/// ```
pub mod prelude {
    pub use docket_queue::prelude::*;

    #[cfg(feature = "redis")]
    pub use docket_redis::RedisConfig;
}
