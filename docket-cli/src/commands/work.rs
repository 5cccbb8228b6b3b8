//! Work command - run a worker until interrupted.

use colored::Colorize;
use docket_queue::{Job, JobContext, QueueResult, Worker, WorkerConfig};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::connect;
use crate::error::{CliError, CliResult};

/// Options for `docket work`.
#[derive(Debug)]
pub struct WorkOptions {
    pub job_type: String,
    pub poll_interval: Duration,
    pub job_timeout: Option<Duration>,
}

/// Built-in handler: print the payload.
async fn print_payload(ctx: JobContext, job: Job) -> QueueResult<()> {
    info!(job_id = %job.id, attempt = ctx.attempt(), "Printing job payload");
    println!(
        "  {} {} {}",
        "▶".bright_cyan(),
        job.id.to_string().dimmed(),
        job.payload_lossy()
    );
    Ok(())
}

/// Process jobs of one type until Ctrl-C.
pub async fn run(redis_url: Option<&str>, options: WorkOptions) -> CliResult<()> {
    if options.job_type.trim().is_empty() {
        return Err(CliError::InvalidArgument("job type must not be empty".into()));
    }

    let mut config = WorkerConfig::default().with_poll_interval(options.poll_interval);
    if let Some(timeout) = options.job_timeout {
        config = config.with_job_timeout(timeout);
    }
    config.validate()?;

    let service = connect(redis_url).await?;

    let worker = Worker::with_config(options.job_type.clone(), service, print_payload, config);
    let (shutdown, rx) = watch::channel(false);
    let mut handle = worker.spawn(rx);

    println!(
        "\n  {} Working on '{}' (Ctrl-C to stop)\n",
        "●".green(),
        options.job_type.bright_white().bold()
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("\n  {} Finishing current job...", "■".yellow());
            shutdown.send_replace(true);
            (&mut handle)
                .await
                .map_err(|e| CliError::Command(format!("worker task failed: {}", e)))??;
        }
        joined = &mut handle => {
            joined.map_err(|e| CliError::Command(format!("worker task failed: {}", e)))??;
        }
    }

    println!("  {} Worker stopped\n", "✓".green().bold());
    Ok(())
}
