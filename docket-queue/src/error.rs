//! Error types for queue operations.

use crate::job::JobStatus;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Result type for raw store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Request rejected before anything was written
    #[error("Validation error: {0}")]
    Validation(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job is already in a state that does not allow the change
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A write to the job store failed
    #[error("Store write failed in {op}: {source}")]
    StoreWrite {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A read from the job store failed
    #[error("Store read failed in {op}: {source}")]
    StoreRead {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// Job execution failed
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Handler exceeded its time budget
    #[error("Operation timeout")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Wrap a store failure raised while writing.
    pub(crate) fn write(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::StoreWrite { op, source }
    }

    /// Wrap a store failure raised while reading.
    pub(crate) fn read(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::StoreRead { op, source }
    }

    /// Whether the error came from the backing store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::StoreWrite { .. } | Self::StoreRead { .. })
    }
}

/// Errors raised by a [`JobStore`](crate::store::JobStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis backend error
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] docket_redis::RedisError),

    /// Generic backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Stored data could not be decoded
    #[error("Malformed data: {0}")]
    Malformed(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(docket_redis::RedisError::Redis(err))
    }
}
