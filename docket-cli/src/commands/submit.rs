//! Submit command - enqueue a job.

use chrono::{DateTime, TimeDelta, Utc};
use colored::Colorize;
use docket_queue::EnqueueJobRequest;

use super::{connect, parse_id, print_job};
use crate::error::{CliError, CliResult};

/// Options for `docket submit`.
#[derive(Debug, Default)]
pub struct SubmitOptions {
    pub job_type: String,
    pub payload: String,
    pub delay_secs: Option<u64>,
    pub at: Option<String>,
    pub id: Option<String>,
    pub json: bool,
}

/// Turn command line options into an enqueue request.
pub fn build_request(options: &SubmitOptions) -> CliResult<EnqueueJobRequest> {
    if options.job_type.trim().is_empty() {
        return Err(CliError::InvalidArgument("job type must not be empty".into()));
    }

    let mut request =
        EnqueueJobRequest::new(options.job_type.clone(), options.payload.as_bytes().to_vec());

    match (&options.at, options.delay_secs) {
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--at and --delay cannot be combined".into(),
            ));
        }
        (Some(at), None) => {
            let at = DateTime::parse_from_rfc3339(at).map_err(|e| {
                CliError::InvalidArgument(format!("'{}' is not an RFC 3339 time: {}", at, e))
            })?;
            request = request.at(at.with_timezone(&Utc).timestamp_millis());
        }
        (None, Some(secs)) => {
            let at = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .and_then(|delay| Utc::now().checked_add_signed(delay))
                .ok_or_else(|| {
                    CliError::InvalidArgument(format!("delay of {} seconds is too large", secs))
                })?;
            request = request.at(at.timestamp_millis());
        }
        (None, None) => {}
    }

    if let Some(id) = &options.id {
        request = request.with_id(parse_id(id)?);
    }

    Ok(request)
}

/// Enqueue a job and print it.
pub async fn run(redis_url: Option<&str>, options: SubmitOptions) -> CliResult<()> {
    let request = build_request(&options)?;
    let service = connect(redis_url).await?;
    let job = service.enqueue_job(request).await?;

    if !options.json {
        println!("\n  {} Job submitted", "✓".green().bold());
    }
    print_job(&job, options.json)
}
