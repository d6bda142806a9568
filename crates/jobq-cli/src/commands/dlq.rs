//! Dead-letter queue commands.

use anyhow::Result;
use jobq_core::JobId;

use super::print_json;
use crate::context::Context;

pub async fn list(ctx: &Context, limit: u32) -> Result<()> {
    let jobs = ctx.queue().dlq_list(limit).await?;
    print_json(&jobs)
}

pub async fn retry(ctx: &Context, job_id: &str) -> Result<()> {
    let id = JobId::parse(job_id)?;
    let job = ctx.queue().requeue(&id).await?;
    eprintln!("Requeued job {}", job.id);
    print_json(&job)
}
