//! Control plane: queue-wide shutdown and status.

use jobq_core::{JobCounts, WorkerId, WorkerRecord, WorkerStatus};
use jobq_db::Store;
use serde::Serialize;
use tracing::{debug, info};

use crate::QueueResult;

/// Snapshot of the queue for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub counts: JobCounts,
    pub workers: Vec<WorkerRecord>,
    pub shutdown_requested: bool,
}

/// What a shutdown request did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Workers whose process accepted a termination signal.
    pub signalled: Vec<WorkerId>,
}

pub struct ControlPlane {
    store: Store,
}

impl ControlPlane {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Ask every worker to drain and exit.
    ///
    /// The stored flag is what workers obey. Signalling recorded worker
    /// processes only wakes them sooner and may fail or reach a stale pid.
    #[tracing::instrument(skip(self))]
    pub async fn request_shutdown(&self) -> QueueResult<ShutdownReport> {
        self.store.control.set_shutdown(true).await?;
        info!("Shutdown requested");

        let own_pid = std::process::id();
        let mut report = ShutdownReport::default();
        for worker in self.store.workers.list().await? {
            if worker.status == WorkerStatus::Stopped {
                continue;
            }
            let Some(pid) = worker.pid.filter(|pid| *pid != own_pid) else {
                continue;
            };
            if notify_process(pid) {
                debug!(worker_id = %worker.worker_id, pid, "Sent SIGTERM");
                report.signalled.push(worker.worker_id);
            }
        }
        Ok(report)
    }

    /// Clear the shutdown flag so new workers keep running.
    pub async fn clear_shutdown(&self) -> QueueResult<()> {
        self.store.control.set_shutdown(false).await?;
        Ok(())
    }

    pub async fn status(&self) -> QueueResult<StatusReport> {
        Ok(StatusReport {
            counts: self.store.jobs.counts().await?,
            workers: self.store.workers.list().await?,
            shutdown_requested: self.store.control.shutdown_requested().await?,
        })
    }
}

#[cfg(unix)]
fn notify_process(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, error = %e, "Could not signal worker process");
            false
        }
    }
}

#[cfg(not(unix))]
fn notify_process(_pid: u32) -> bool {
    false
}
