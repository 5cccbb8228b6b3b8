//! CLI command implementations.

pub mod cancel;
pub mod get;
pub mod submit;
pub mod work;

use colored::Colorize;
use docket_queue::{Job, JobId, JobService, JobStatus, QueueConfig};
use docket_redis::RedisConfig;
use serde::Serialize;
use tracing::debug;

use crate::error::{CliError, CliResult};

/// Open a job service against Redis.
///
/// `redis_url` overrides `REDIS_URL` / `REDIS_ADDR`.
pub async fn connect(redis_url: Option<&str>) -> CliResult<JobService> {
    let mut builder = RedisConfig::from_env();
    if let Some(url) = redis_url {
        builder = builder.url(url);
    }
    let redis = builder.build();
    redis.validate()?;

    let queue = QueueConfig::from_env()?;
    debug!(url = %redis.redacted_url(), prefix = %queue.key_prefix, "Connecting");

    Ok(JobService::connect(redis, queue).await?)
}

/// Parse a job id argument.
pub fn parse_id(raw: &str) -> CliResult<JobId> {
    JobId::parse_str(raw.trim())
        .map_err(|e| CliError::InvalidArgument(format!("'{}' is not a job id: {}", raw, e)))
}

/// Machine readable view of a job.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub payload: String,
    pub execution_time: String,
    pub created_at: String,
    pub updated_at: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<i64>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type.clone(),
            status: job.status,
            payload: job.payload_lossy().into_owned(),
            execution_time: job.execution_at().to_rfc3339(),
            created_at: job.created_at_utc().to_rfc3339(),
            updated_at: job.updated_at_utc().to_rfc3339(),
            attempts: job.attempts,
            lease_expires_at: job.lease_expires_at,
        }
    }
}

/// Print a job either as JSON or as a short human readable block.
pub fn print_job(job: &Job, json: bool) -> CliResult<()> {
    let view = JobView::from(job);
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let status = match job.status {
        JobStatus::Pending => view.status.to_string().yellow(),
        JobStatus::Running => view.status.to_string().cyan(),
        JobStatus::Completed => view.status.to_string().green(),
        JobStatus::Failed => view.status.to_string().red(),
    };

    println!();
    println!("  {} {}", "Job:".bright_white().bold(), view.id.cyan());
    println!("  {} {}", "Type:".bright_white().bold(), view.job_type);
    println!("  {} {}", "Status:".bright_white().bold(), status);
    println!("  {} {}", "Runs at:".bright_white().bold(), view.execution_time);
    println!("  {} {}", "Created:".bright_white().bold(), view.created_at);
    println!("  {} {}", "Updated:".bright_white().bold(), view.updated_at);
    println!("  {} {}", "Attempts:".bright_white().bold(), view.attempts);
    println!("  {} {}", "Payload:".bright_white().bold(), view.payload.dimmed());
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = JobId::new_v4();
        assert_eq!(parse_id(&format!(" {} ", id)).unwrap(), id);
        assert!(matches!(parse_id("nope"), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_job_view_json() {
        let job = Job::new("print", b"hello".to_vec()).with_execution_time(0);
        let json = serde_json::to_value(JobView::from(&job)).unwrap();

        assert_eq!(json["type"], "print");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["payload"], "hello");
        assert_eq!(json["execution_time"], "1970-01-01T00:00:00+00:00");
        assert!(json.get("lease_expires_at").is_none());
    }
}
