//! Worker records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, JobId, Result, WorkerId};

/// Status of a worker as recorded in the store.
///
/// `starting -> idle <-> busy -> stopping -> stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
        }
    }

    /// The worker has been asked to exit or already has.
    pub fn is_winding_down(&self) -> bool {
        matches!(self, WorkerStatus::Stopping | WorkerStatus::Stopped)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "starting" => Ok(WorkerStatus::Starting),
            "idle" => Ok(WorkerStatus::Idle),
            "busy" => Ok(WorkerStatus::Busy),
            "stopping" => Ok(WorkerStatus::Stopping),
            "stopped" => Ok(WorkerStatus::Stopped),
            _ => Err(Error::InvalidInput(format!("unknown worker status: {s}"))),
        }
    }
}

/// A worker record. Kept after the worker exits for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub current_job_id: Option<JobId>,
    /// OS process id, used for best-effort stop notification.
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
