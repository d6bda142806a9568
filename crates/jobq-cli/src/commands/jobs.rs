//! Job submission and inspection commands.

use anyhow::{Context as _, Result, bail};
use jobq_core::{JobState, NewJob};
use std::path::PathBuf;

use super::print_json;
use crate::context::Context;

/// Parse an enqueue payload. A `--priority` flag wins over the payload's own.
pub fn parse_new_job(payload: &str, priority: Option<i64>) -> Result<NewJob> {
    let mut job: NewJob = serde_json::from_str(payload).context("invalid job JSON")?;
    if priority.is_some() {
        job.priority = priority;
    }
    Ok(job)
}

pub async fn enqueue(
    ctx: &Context,
    json: Option<String>,
    file: Option<PathBuf>,
    priority: Option<i64>,
) -> Result<()> {
    let payload = match (json, file) {
        (Some(json), _) => json,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("provide job JSON or --file"),
    };

    let job = ctx.queue().submit(parse_new_job(&payload, priority)?).await?;
    eprintln!("Enqueued job {}", job.id);
    print_json(&job)
}

pub async fn list(ctx: &Context, state: Option<JobState>, limit: u32) -> Result<()> {
    let jobs = ctx.queue().list(state, limit).await?;
    print_json(&jobs)
}

pub async fn status(ctx: &Context) -> Result<()> {
    let report = ctx.control().status().await?;
    print_json(&report)
}
