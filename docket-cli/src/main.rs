//! docket CLI - submit, inspect, cancel and process queued jobs.
//!
//! # Commands
//!
//! - `docket submit <type> [payload]` - Enqueue a job
//! - `docket get <id>` - Show a job
//! - `docket cancel <id>` - Remove a job before it runs
//! - `docket work <type>` - Run a worker that prints job payloads
//!
//! Redis is located through `--redis-url`, `REDIS_URL` or `REDIS_ADDR`. A
//! `.env` file in the working directory is loaded first.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::time::Duration;

mod commands;
mod error;
mod logging;

use commands::{cancel, get, submit, work};
use error::CliResult;

/// docket - time-ordered job queue
#[derive(Parser)]
#[command(name = "docket")]
#[command(version)]
#[command(about = "Submit, inspect and process scheduled jobs")]
#[command(long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = format!(
    "{}\n  {} docket submit print 'hello'\n  {} docket submit print 'later' --delay 60\n  {} docket work print",
    "Examples:".bright_cyan().bold(),
    "$".dimmed(),
    "$".dimmed(),
    "$".dimmed(),
))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job
    #[command(alias = "s")]
    Submit(SubmitArgs),

    /// Show a job
    #[command(alias = "g")]
    Get(GetArgs),

    /// Remove a job before it runs
    #[command(visible_alias = "delete")]
    Cancel(CancelArgs),

    /// Process jobs of one type, printing their payloads
    #[command(alias = "w")]
    Work(WorkArgs),
}

#[derive(Args)]
struct SubmitArgs {
    /// Job type
    job_type: String,

    /// Job payload
    #[arg(default_value = "")]
    payload: String,

    /// Run after this many seconds
    #[arg(short, long)]
    delay: Option<u64>,

    /// Run at this RFC 3339 time
    #[arg(long)]
    at: Option<String>,

    /// Reuse an existing job id
    #[arg(long)]
    id: Option<String>,

    /// Print the job as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GetArgs {
    /// Job id
    id: String,

    /// Print the job as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CancelArgs {
    /// Job id
    id: String,
}

#[derive(Args)]
struct WorkArgs {
    /// Job type to process
    job_type: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Fail jobs whose handler runs longer than this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

async fn dispatch(cli: Cli) -> CliResult<()> {
    let redis_url = cli.redis_url.as_deref();

    match cli.command {
        Commands::Submit(args) => {
            submit::run(
                redis_url,
                submit::SubmitOptions {
                    job_type: args.job_type,
                    payload: args.payload,
                    delay_secs: args.delay,
                    at: args.at,
                    id: args.id,
                    json: args.json,
                },
            )
            .await
        }

        Commands::Get(args) => get::run(redis_url, &args.id, args.json).await,

        Commands::Cancel(args) => cancel::run(redis_url, &args.id).await,

        Commands::Work(args) => {
            work::run(
                redis_url,
                work::WorkOptions {
                    job_type: args.job_type,
                    poll_interval: Duration::from_millis(args.poll_interval_ms),
                    job_timeout: args.timeout.map(Duration::from_secs),
                },
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() {
    // Missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let settings = logging::LogSettings::from_env(cli.verbose);
    if let Err(e) = logging::init(&settings) {
        eprintln!("  {} {}", "Warning:".yellow().bold(), e);
    }

    if let Err(e) = dispatch(cli).await {
        eprintln!("\n  {} {}\n", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
