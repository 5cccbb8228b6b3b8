//! Cancel command - remove a job.

use colored::Colorize;

use super::{connect, parse_id};
use crate::error::CliResult;

/// Delete a job so it never runs.
pub async fn run(redis_url: Option<&str>, id: &str) -> CliResult<()> {
    let id = parse_id(id)?;
    let service = connect(redis_url).await?;
    service.delete_job(&id).await?;
    println!("\n  {} Job {} cancelled\n", "✓".green().bold(), id.to_string().cyan());
    Ok(())
}
