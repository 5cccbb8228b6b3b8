//! Worker loop for processing jobs of one type.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId};
use crate::service::JobService;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Job handler function type.
pub type JobHandler =
    Arc<dyn Fn(JobContext, Job) -> BoxFuture<'static, QueueResult<()>> + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between poll cycles
    pub poll_interval: Duration,

    /// Upper bound on a single handler run; `None` waits indefinitely
    pub job_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_timeout: None,
        }
    }
}

impl WorkerConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fail handlers that run longer than `timeout`.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> QueueResult<()> {
        if self.poll_interval.is_zero() {
            return Err(QueueError::Config("poll interval must be positive".into()));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::Config("job timeout must be positive".into()));
        }
        Ok(())
    }
}

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next tick
    Idle,
    /// Asking the store for a due job
    Polling,
    /// Running the handler
    Executing,
    /// Recording the handler's result
    Finalizing,
    /// The run loop has exited
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Polling => "polling",
            WorkerState::Executing => "executing",
            WorkerState::Finalizing => "finalizing",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was due
    Idle,
    /// A job ran and was marked completed
    Completed(JobId),
    /// A job ran and was marked failed
    Failed(JobId),
}

/// Handed to the handler together with the job.
///
/// Cancellation is advisory: the worker never aborts a running handler, it
/// only tells it that shutdown was requested.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    attempt: u32,
    cancel: watch::Receiver<bool>,
}

impl JobContext {
    /// Identifier of the job being handled.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// How many times the job has been claimed, including this run.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.cancel.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        // A closed channel means the worker is gone.
        let _ = cancel.wait_for(|cancelled| *cancelled).await;
    }
}

/// Polls one job type and runs its handler.
pub struct Worker {
    job_type: String,
    service: JobService,
    handler: JobHandler,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
    cancel: watch::Sender<bool>,
}

impl Worker {
    /// Create a worker with the default configuration.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use docket_queue::*;
    ///
    /// let service = JobService::in_memory(QueueConfig::default());
    /// let worker = Worker::new("print", service, |_ctx, job| async move {
    ///     println!("{}", job.payload_lossy());
    ///     Ok(())
    /// });
    /// ```
    pub fn new<F, Fut>(job_type: impl Into<String>, service: JobService, handler: F) -> Self
    where
        F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        Self::with_config(job_type, service, handler, WorkerConfig::default())
    }

    /// Create a worker with custom configuration.
    pub fn with_config<F, Fut>(
        job_type: impl Into<String>,
        service: JobService,
        handler: F,
        config: WorkerConfig,
    ) -> Self
    where
        F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueueResult<()>> + Send + 'static,
    {
        let handler: JobHandler = Arc::new(move |ctx: JobContext, job: Job| {
            handler(ctx, job).boxed()
        });

        let (state, _) = watch::channel(WorkerState::Idle);
        let (cancel, _) = watch::channel(false);

        Self {
            job_type: job_type.into(),
            service,
            handler,
            config,
            state,
            cancel,
        }
    }

    /// The job type this worker handles.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// The worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Run poll cycles until `shutdown` turns true or its sender is dropped.
    ///
    /// Shutdown is checked between cycles. A handler that is running when
    /// shutdown arrives sees its context cancelled, runs to completion and is
    /// finalized before this returns.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Config` without polling if the worker
    /// configuration is invalid.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        if let Err(e) = self.config.validate() {
            error!(job_type = %self.job_type, error = %e, "Invalid worker configuration");
            self.set_state(WorkerState::Stopped);
            return Err(e);
        }

        info!(
            job_type = %self.job_type,
            poll_interval = ?self.config.poll_interval,
            "Worker starting"
        );
        self.cancel.send_replace(false);
        self.set_state(WorkerState::Idle);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if self.run_cycle(&mut shutdown).await {
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        info!(job_type = %self.job_type, "Worker stopped");
        Ok(())
    }

    /// Move the worker onto its own task.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<QueueResult<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// One cycle under `run`. Returns whether shutdown arrived meanwhile.
    async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let cycle = self.poll_once();
        tokio::pin!(cycle);

        let mut stop = false;
        let outcome = loop {
            tokio::select! {
                biased;
                outcome = &mut cycle => break outcome,
                changed = shutdown.changed(), if !stop => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(job_type = %self.job_type, "Shutdown requested during cycle");
                        stop = true;
                        self.cancel.send_replace(true);
                    }
                }
            }
        };

        match outcome {
            Ok(PollOutcome::Idle) => trace!(job_type = %self.job_type, "No job due"),
            Ok(outcome) => trace!(job_type = %self.job_type, ?outcome, "Cycle finished"),
            Err(e) => error!(job_type = %self.job_type, error = %e, "Poll cycle failed"),
        }

        stop
    }

    /// Claim and process at most one job.
    ///
    /// Store errors are returned; the handler's own failure is not an error
    /// here, it is recorded as [`PollOutcome::Failed`].
    pub async fn poll_once(&self) -> QueueResult<PollOutcome> {
        self.set_state(WorkerState::Polling);

        let job = match self.service.claim_next_job(&self.job_type).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.set_state(WorkerState::Idle);
                return Ok(PollOutcome::Idle);
            }
            Err(e) => {
                self.set_state(WorkerState::Idle);
                return Err(e);
            }
        };

        let id = job.id;
        debug!(job_id = %id, job_type = %self.job_type, attempt = job.attempts, "Executing job");

        self.set_state(WorkerState::Executing);
        let ctx = JobContext {
            job_id: id,
            attempt: job.attempts,
            cancel: self.cancel.subscribe(),
        };
        let result = self.execute(ctx, job).await;

        self.set_state(WorkerState::Finalizing);
        let finalized = match result {
            Ok(()) => self
                .service
                .mark_job_complete(&id)
                .await
                .map(|()| PollOutcome::Completed(id)),
            Err(e) => {
                warn!(job_id = %id, job_type = %self.job_type, error = %e, "Job handler failed");
                self.service
                    .mark_job_as_failed(&id)
                    .await
                    .map(|()| PollOutcome::Failed(id))
            }
        };

        self.set_state(WorkerState::Idle);
        finalized
    }

    async fn execute(&self, ctx: JobContext, job: Job) -> QueueResult<()> {
        let run = (self.handler)(ctx, job);
        match self.config.job_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| QueueError::Timeout)?,
            None => run.await,
        }
    }
}
