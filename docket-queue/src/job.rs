//! Job definition and state management.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Opaque job payload, handed to the handler verbatim.
pub type Payload = Vec<u8>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the dispatch index for its execution time
    Pending,
    /// Claimed by a worker
    Running,
    /// Handler succeeded
    Completed,
    /// Handler failed; not retried
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in this status may be moved to `next`.
    ///
    /// Jobs finish only from `running`. A `running` job may be marked
    /// `running` again so that an abandoned claim can be taken over once its
    /// lease lapses. Nothing moves back to `pending`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, next) => next != JobStatus::Pending,
            _ => false,
        }
    }

    /// Statuses from which a transition to `next` is allowed.
    pub fn sources_for(next: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A unit of deferred work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Selects which worker handles the job
    pub job_type: String,

    /// Opaque payload
    pub payload: Payload,

    /// Earliest dispatch time (ms since epoch)
    pub execution_time: i64,

    /// Lifecycle state
    pub status: JobStatus,

    /// First successful write (ms since epoch)
    pub created_at: i64,

    /// Most recent write (ms since epoch)
    pub updated_at: i64,

    /// Number of times a worker has claimed the job
    pub attempts: u32,

    /// While running: when the current claim is considered abandoned
    pub lease_expires_at: Option<i64>,
}

impl Job {
    /// Create a new pending job that is due immediately.
    pub fn new(job_type: impl Into<String>, payload: impl Into<Payload>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload: payload.into(),
            execution_time: now,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            attempts: 0,
            lease_expires_at: None,
        }
    }

    /// Use a caller-chosen identifier.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Set the execution time in milliseconds since the epoch.
    pub fn with_execution_time(mut self, execution_time: i64) -> Self {
        self.execution_time = execution_time;
        self
    }

    /// Schedule the job for a specific instant.
    pub fn schedule_at(self, time: DateTime<Utc>) -> Self {
        self.with_execution_time(time.timestamp_millis())
    }

    /// Schedule the job after a delay from now, saturating at the
    /// representable range.
    pub fn schedule_after(self, delay: chrono::Duration) -> Self {
        self.with_execution_time(millis_after_now(delay))
    }

    /// Whether the job is eligible for dispatch at `now` (ms).
    pub fn is_due_at(&self, now: i64) -> bool {
        self.execution_time <= now
    }

    /// Whether the job is eligible for dispatch right now.
    pub fn is_ready(&self) -> bool {
        self.is_due_at(now_millis())
    }

    /// Whether the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a running job's claim has lapsed at `now` (ms).
    pub fn lease_expired_at(&self, now: i64) -> bool {
        self.status == JobStatus::Running && self.lease_expires_at.is_some_and(|at| at <= now)
    }

    /// Execution time as a UTC timestamp.
    pub fn execution_at(&self) -> DateTime<Utc> {
        millis_to_utc(self.execution_time)
    }

    /// Creation time as a UTC timestamp.
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        millis_to_utc(self.created_at)
    }

    /// Last update time as a UTC timestamp.
    pub fn updated_at_utc(&self) -> DateTime<Utc> {
        millis_to_utc(self.updated_at)
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

fn millis_after_now(delay: chrono::Duration) -> i64 {
    now_millis().saturating_add(delay.num_milliseconds())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Request to enqueue a job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueJobRequest {
    /// Job type; must not be blank
    pub job_type: String,

    /// Opaque payload
    pub payload: Payload,

    /// Earliest execution time (ms since epoch); defaults to now
    pub execution_time: Option<i64>,

    /// Reuse an existing identifier to resubmit idempotently
    pub id: Option<JobId>,
}

impl EnqueueJobRequest {
    /// Create a request for a job that is due immediately.
    pub fn new(job_type: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            job_type: job_type.into(),
            payload: payload.into(),
            execution_time: None,
            id: None,
        }
    }

    /// Set the execution time in milliseconds since the epoch.
    pub fn at(mut self, execution_time: i64) -> Self {
        self.execution_time = Some(execution_time);
        self
    }

    /// Delay execution relative to now, saturating at the representable
    /// range.
    pub fn after(self, delay: chrono::Duration) -> Self {
        self.at(millis_after_now(delay))
    }

    /// Resubmit under an existing identifier.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }
}
