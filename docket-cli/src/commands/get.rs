//! Get command - show a job.

use super::{connect, parse_id, print_job};
use crate::error::CliResult;

/// Look up a job and print it.
pub async fn run(redis_url: Option<&str>, id: &str, json: bool) -> CliResult<()> {
    let id = parse_id(id)?;
    let service = connect(redis_url).await?;
    let job = service.get_job(&id).await?;
    print_job(&job, json)
}
