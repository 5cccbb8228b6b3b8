//! Integration tests for docket-queue

use docket_queue::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};

fn service() -> JobService {
    JobService::in_memory(QueueConfig::default())
}

fn print_worker(service: &JobService) -> Worker {
    Worker::new("print", service.clone(), |_ctx, job| async move {
        if job.payload == b"fail" {
            return Err(QueueError::ExecutionFailed("asked to fail".into()));
        }
        Ok(())
    })
}

#[tokio::test]
async fn test_due_job_runs_to_completion() {
    let service = service();
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", b"hello".to_vec()))
        .await
        .unwrap();

    let worker = print_worker(&service);
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed(job.id));

    let done = service.get_job(&job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.created_at, job.created_at);
    assert!(done.updated_at >= job.updated_at);
    assert!(service.get_executable_job("print").await.unwrap().is_none());
}

#[tokio::test]
async fn test_future_job_is_not_run() {
    let service = service();
    let job = service
        .enqueue_job(
            EnqueueJobRequest::new("print", b"later".to_vec()).after(chrono::Duration::hours(1)),
        )
        .await
        .unwrap();

    let worker = print_worker(&service);
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Idle);
    assert!(service.get_executable_job("print").await.unwrap().is_none());
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_failed_job_is_not_retried() {
    let service = service();
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", b"fail".to_vec()))
        .await
        .unwrap();

    let worker = print_worker(&service);
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Failed(job.id));
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Idle);
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_job_types_are_isolated() {
    let service = service();
    let a = service
        .enqueue_job(EnqueueJobRequest::new("a", Vec::new()))
        .await
        .unwrap();
    let b = service
        .enqueue_job(EnqueueJobRequest::new("b", Vec::new()))
        .await
        .unwrap();

    assert_eq!(service.get_executable_job("a").await.unwrap().unwrap().id, a.id);
    assert_eq!(service.get_executable_job("b").await.unwrap().unwrap().id, b.id);

    let claimed = service.claim_next_job("a").await.unwrap().unwrap();
    assert_eq!(claimed.id, a.id);
    assert!(service.claim_next_job("a").await.unwrap().is_none());
    assert_eq!(service.claim_next_job("b").await.unwrap().unwrap().id, b.id);
}

#[tokio::test]
async fn test_dispatch_order_is_non_decreasing() {
    let service = service();
    let now = now_millis();
    for offset in [500, 100, 900, 300, 700] {
        service
            .enqueue_job(EnqueueJobRequest::new("print", Vec::new()).at(now - offset))
            .await
            .unwrap();
    }

    let mut previous = i64::MIN;
    let mut count = 0;
    while let Some(job) = service.get_executable_job("print").await.unwrap() {
        assert!(job.execution_time >= previous);
        previous = job.execution_time;
        service.mark_job_as_running(&job.id).await.unwrap();
        service.mark_job_complete(&job.id).await.unwrap();
        count += 1;
    }
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_finalized_jobs_never_reappear() {
    let service = service();
    let done = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();
    let failed = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();

    service.mark_job_as_running(&done.id).await.unwrap();
    service.mark_job_as_running(&failed.id).await.unwrap();
    service.mark_job_complete(&done.id).await.unwrap();
    service.mark_job_as_failed(&failed.id).await.unwrap();

    assert!(service.get_executable_job("print").await.unwrap().is_none());
    assert!(service.claim_next_job("print").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_job_is_gone() {
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
    assert_eq!(print_worker(&service).poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_finished_jobs_expire_after_retention() {
    let service = JobService::in_memory(QueueConfig::new().with_retention(Duration::from_secs(2)));
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();
    service.mark_job_as_running(&job.id).await.unwrap();
    service.mark_job_complete(&job.id).await.unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Completed);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(matches!(
        service.get_job(&job.id).await,
        Err(QueueError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_resubmit_clears_expiry() {
    let service = service();
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();
    service
        .storage()
        .set_expiry(&job.id, Duration::from_millis(50))
        .await
        .unwrap();

    service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()).with_id(job.id))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_resubmitted_id_does_not_disturb_running_job() {
    let service = service();
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", b"first".to_vec()))
        .await
        .unwrap();

    let producer = service.clone();
    let worker = Worker::new("print", service.clone(), move |_ctx, job| {
        let producer = producer.clone();
        async move {
            let resubmit = producer
                .enqueue_job(EnqueueJobRequest::new("print", b"second".to_vec()).with_id(job.id))
                .await;
            assert!(matches!(resubmit, Err(QueueError::InvalidTransition { .. })));
            assert_eq!(job.payload, b"first");
            Ok(())
        }
    });

    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed(job.id));
    let done = service.get_job(&job.id).await.unwrap();
    assert_eq!(done.payload, b"first");
    assert_eq!(done.attempts, 1);
    assert!(service.get_executable_job("print").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_lease_allows_reclaim() {
    let service =
        JobService::in_memory(QueueConfig::new().with_lease_duration(Duration::from_millis(50)));
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();

    let first = service.claim_next_job("print").await.unwrap().unwrap();
    assert_eq!(first.attempts, 1);
    assert!(service.claim_next_job("print").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = service.claim_next_job("print").await.unwrap().unwrap();
    assert_eq!(second.id, job.id);
    assert_eq!(second.attempts, 2);
    assert!(second.lease_expires_at > first.lease_expires_at);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let service = service();
    service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();

    let claims = (0..8).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.claim_next_job("print").await.unwrap() })
    });
    let results = futures::future::join_all(claims).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(Option::is_some)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_shutdown_finishes_in_flight_job() {
    let service = service();
    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()))
        .await
        .unwrap();

    let release = Arc::new(Notify::new());
    let gate = release.clone();
    let worker = Worker::with_config(
        "print",
        service.clone(),
        move |_ctx, _job| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
        },
        WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
    );
    let mut state = worker.subscribe_state();

    let (shutdown, rx) = watch::channel(false);
    let handle = worker.spawn(rx);

    state.wait_for(|s| *s == WorkerState::Executing).await.unwrap();
    shutdown.send(true).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Running);

    release.notify_one();
    handle.await.unwrap().unwrap();

    assert_eq!(*state.borrow(), WorkerState::Stopped);
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Completed);
}

#[test]
fn test_job_serializes_to_json() {
    let job = Job::new("print", b"hi".to_vec()).with_execution_time(42);
    let json = serde_json::to_value(&job).unwrap();

    assert_eq!(json["job_type"], "print");
    assert_eq!(json["status"], "pending");
    assert_eq!(json["execution_time"], 42);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_end_to_end() {
    let config = QueueConfig::new().with_key_prefix(format!("docket-test-{}", uuid::Uuid::new_v4()));
    let service = JobService::connect(docket_redis::RedisConfig::from_env().build(), config)
        .await
        .unwrap();

    let job = service
        .enqueue_job(EnqueueJobRequest::new("print", b"hello".to_vec()))
        .await
        .unwrap();
    let stored = service.get_job(&job.id).await.unwrap();
    assert_eq!(stored.payload, b"hello");
    assert_eq!(stored.execution_time, job.execution_time);

    let worker = print_worker(&service);
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Completed(job.id));
    assert_eq!(service.get_job(&job.id).await.unwrap().status, JobStatus::Completed);

    let failed = service
        .enqueue_job(EnqueueJobRequest::new("print", b"fail".to_vec()))
        .await
        .unwrap();
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Failed(failed.id));

    let cancelled = service
        .enqueue_job(EnqueueJobRequest::new("print", Vec::new()).after(chrono::Duration::hours(1)))
        .await
        .unwrap();
    service.delete_job(&cancelled.id).await.unwrap();
    assert!(matches!(
        service.get_job(&cancelled.id).await,
        Err(QueueError::JobNotFound(_))
    ));
}
