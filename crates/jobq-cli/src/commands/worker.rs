//! Worker commands.

use anyhow::{Context as _, Result, bail};
use jobq_core::WorkerId;
use jobq_executor::ShellExecutor;
use jobq_scheduler::{Worker, WorkerSettings, watch_stop_signals};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tracing::info;

use super::print_json;
use crate::context::Context;

#[derive(Debug, Serialize)]
struct StartedWorker {
    worker_id: WorkerId,
    pid: u32,
}

/// Clear the shutdown flag and launch `count` detached `jobq worker run` processes.
pub async fn start(ctx: &Context, count: usize, config_path: Option<&Path>) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    ctx.control().clear_shutdown().await?;

    let exe = std::env::current_exe().context("cannot locate the jobq binary")?;
    let launcher = std::process::id();
    let mut started = Vec::with_capacity(count);

    for index in 0..count {
        let worker_id = WorkerId::for_launch(launcher, index);

        let mut command = std::process::Command::new(&exe);
        command.arg("--db").arg(&ctx.database_url);
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("--log-format")
            .arg(ctx.settings.log_format.as_str())
            .args(["worker", "run", "--id", worker_id.as_str()])
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("failed to start worker {}", worker_id))?;
        info!(worker_id = %worker_id, pid = child.id(), "Started worker");
        started.push(StartedWorker {
            worker_id,
            pid: child.id(),
        });
    }

    print_json(&started)
}

pub async fn stop(ctx: &Context) -> Result<()> {
    let report = ctx.control().request_shutdown().await?;
    eprintln!("Signalled workers to stop. They will finish current jobs then exit.");
    print_json(&report)
}

/// Run one worker in this process until it drains.
///
/// SIGTERM and Ctrl-C are only watched once the worker is registered.
pub async fn run(ctx: &Context, id: Option<String>) -> Result<()> {
    let pid = std::process::id();
    let worker_id = match id {
        Some(raw) => raw.parse::<WorkerId>()?,
        None => WorkerId::for_launch(pid, 0),
    };

    let worker = Worker::new(
        worker_id.clone(),
        Arc::new(ctx.queue()),
        Arc::new(ShellExecutor::new()),
    )
    .with_settings(WorkerSettings::from(&ctx.settings))
    .with_pid(pid);

    worker
        .register()
        .await
        .with_context(|| format!("failed to register worker {}", worker_id))?;
    let signals = tokio::spawn(watch_stop_signals(ctx.store.workers.clone(), worker_id));
    let result = worker.run_registered().await;
    signals.abort();

    result.with_context(|| format!("worker {} exited with an error", worker.id()))
}
