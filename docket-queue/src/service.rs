//! Job orchestration service.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{EnqueueJobRequest, Job, JobId, JobStatus, now_millis};
use crate::storage::JobStorage;
use crate::store::{JobStore, MemoryStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entry point for producers and workers.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct JobService {
    storage: JobStorage,
}

impl JobService {
    /// Create a service over a store backend.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self::from_storage(JobStorage::new(store, config))
    }

    /// Create a service backed by a fresh [`MemoryStore`].
    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Connect to Redis and create a service on top of it.
    #[cfg(feature = "redis")]
    pub async fn connect(
        redis: docket_redis::RedisConfig,
        config: QueueConfig,
    ) -> QueueResult<Self> {
        config.validate()?;
        let store = crate::store::RedisStore::connect(redis)
            .await
            .map_err(QueueError::read("connect"))?;
        Ok(Self::new(Arc::new(store), config))
    }

    /// Wrap existing storage.
    pub fn from_storage(storage: JobStorage) -> Self {
        Self { storage }
    }

    /// The storage layer.
    pub fn storage(&self) -> &JobStorage {
        &self.storage
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        self.storage.config()
    }

    /// Submit a job.
    ///
    /// The job is `pending` and becomes executable at its execution time,
    /// which defaults to now.
    pub async fn enqueue_job(&self, request: EnqueueJobRequest) -> QueueResult<Job> {
        if request.job_type.trim().is_empty() {
            return Err(QueueError::Validation("job type must not be empty".into()));
        }

        let now = now_millis();
        let job = Job {
            id: request.id.unwrap_or_else(Uuid::new_v4),
            job_type: request.job_type,
            payload: request.payload,
            execution_time: request.execution_time.unwrap_or(now),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            lease_expires_at: None,
        };

        let stored = self.storage.put_job(&job).await?;
        info!(
            job_id = %stored.id,
            job_type = %stored.job_type,
            execution_time = stored.execution_time,
            "Job enqueued"
        );
        Ok(stored)
    }

    /// Look up a job.
    pub async fn get_job(&self, id: &JobId) -> QueueResult<Job> {
        self.storage.get_job(id).await
    }

    /// Cancel a job, removing it entirely.
    pub async fn delete_job(&self, id: &JobId) -> QueueResult<()> {
        if !self.storage.delete_job(id).await? {
            return Err(QueueError::JobNotFound(id.to_string()));
        }
        info!(job_id = %id, "Job cancelled");
        Ok(())
    }

    /// Peek at the next due job of a type without claiming it.
    pub async fn get_executable_job(&self, job_type: &str) -> QueueResult<Option<Job>> {
        self.storage.get_executable_job(job_type).await
    }

    /// Claim the next due job of a type.
    ///
    /// Concurrent callers never receive the same job while its lease holds.
    pub async fn claim_next_job(&self, job_type: &str) -> QueueResult<Option<Job>> {
        self.storage
            .claim_executable_job(job_type, self.config().lease_duration)
            .await
    }

    /// Mark a job as running under a fresh lease.
    pub async fn mark_job_as_running(&self, id: &JobId) -> QueueResult<()> {
        self.storage
            .mark_running(id, self.config().lease_duration)
            .await?;
        debug!(job_id = %id, "Job running");
        Ok(())
    }

    /// Mark a job as failed. Failed jobs are not retried.
    pub async fn mark_job_as_failed(&self, id: &JobId) -> QueueResult<()> {
        self.storage
            .finalize_job(id, JobStatus::Failed, self.config().retention)
            .await?;
        warn!(job_id = %id, "Job failed");
        Ok(())
    }

    /// Mark a job as completed.
    pub async fn mark_job_complete(&self, id: &JobId) -> QueueResult<()> {
        self.storage
            .finalize_job(id, JobStatus::Completed, self.config().retention)
            .await?;
        info!(job_id = %id, "Job completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn service() -> JobService {
        JobService::in_memory(QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_job() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", b"hello".to_vec()))
            .await
            .unwrap();

        assert!(!job.id.is_nil());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.created_at <= job.updated_at);
        assert!(job.execution_time <= now_millis());
        assert_eq!(service.get_job(&job.id).await.unwrap(), job);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_blank_type() {
        let store = Arc::new(MemoryStore::new());
        let service = JobService::new(store.clone(), QueueConfig::default());

        for job_type in ["", "   "] {
            let result = service
                .enqueue_job(EnqueueJobRequest::new(job_type, Vec::new()))
                .await;
            assert!(matches!(result, Err(QueueError::Validation(_))));
        }
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_resubmit_pending_job() {
        let service = service();
        let first = service
            .enqueue_job(EnqueueJobRequest::new("print", b"v1".to_vec()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = service
            .enqueue_job(EnqueueJobRequest::new("print", b"v2".to_vec()).with_id(first.id))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.status, JobStatus::Pending);
        assert_eq!(service.get_job(&first.id).await.unwrap().payload, b"v2");
    }

    #[tokio::test]
    async fn test_resubmit_finished_job_is_rejected() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
            .await
            .unwrap();
        service.claim_next_job("print").await.unwrap().unwrap();
        service.mark_job_as_failed(&job.id).await.unwrap();

        let result = service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()).with_id(job.id))
            .await;
        assert!(matches!(
            result,
            Err(QueueError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Pending,
                ..
            })
        ));
        assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Failed);
        assert!(service.get_executable_job("print").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resubmit_while_running_keeps_claim() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", b"v1".to_vec()))
            .await
            .unwrap();
        let claimed = service.claim_next_job("print").await.unwrap().unwrap();

        let result = service
            .enqueue_job(EnqueueJobRequest::new("print", b"v2".to_vec()).with_id(job.id))
            .await;
        assert!(matches!(
            result,
            Err(QueueError::InvalidTransition {
                from: JobStatus::Running,
                ..
            })
        ));

        service.mark_job_complete(&claimed.id).await.unwrap();
        let done = service.get_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.payload, b"v1");
        assert_eq!(done.attempts, 1);
    }

    #[tokio::test]
    async fn test_complete_requires_claim() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
            .await
            .unwrap();

        assert!(matches!(
            service.mark_job_complete(&job.id).await,
            Err(QueueError::InvalidTransition {
                from: JobStatus::Pending,
                ..
            })
        ));
        assert!(service.get_executable_job("print").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_job_is_cancel() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
            .await
            .unwrap();

        service.delete_job(&job.id).await.unwrap();
        assert!(matches!(
            service.get_job(&job.id).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(matches!(
            service.delete_job(&job.id).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(service.get_executable_job("print").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_running_then_complete() {
        let service = service();
        let job = service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
            .await
            .unwrap();

        service.mark_job_as_running(&job.id).await.unwrap();
        assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Running);

        service.mark_job_complete(&job.id).await.unwrap();
        let done = service.get_job(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(service.get_executable_job("print").await.unwrap().is_none());

        assert!(matches!(
            service.mark_job_as_running(&job.id).await,
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.mark_job_as_failed(&job.id).await,
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_mark_unknown_job() {
        let service = service();
        let id = Uuid::new_v4();
        assert!(matches!(
            service.mark_job_as_running(&id).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(matches!(
            service.mark_job_complete(&id).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_order_follows_execution_time() {
        let service = service();
        let now = now_millis();
        for offset in [3_000, 1_000, 2_000] {
            service
                .enqueue_job(EnqueueJobRequest::new("print", Vec::new()).at(now - offset))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(job) = service.claim_next_job("print").await.unwrap() {
            seen.push(job.execution_time);
            service.mark_job_complete(&job.id).await.unwrap();
        }

        assert_eq!(seen, vec![now - 3_000, now - 2_000, now - 1_000]);
    }

    #[tokio::test]
    async fn test_claim_uses_configured_lease() {
        let service =
            JobService::in_memory(QueueConfig::new().with_lease_duration(Duration::from_secs(90)));
        service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
            .await
            .unwrap();

        let before = now_millis();
        let job = service.claim_next_job("print").await.unwrap().unwrap();
        let lease = job.lease_expires_at.unwrap();
        assert!(lease >= before + 90_000);
        assert!(lease <= now_millis() + 90_000);
    }
}
