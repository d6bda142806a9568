//! Job data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, JobId, Result, WorkerId};

/// Lifecycle state of a job.
///
/// `pending -> processing -> {completed | failed | dead}`, `failed -> processing`
/// once the backoff delay has elapsed, and `dead -> pending` only through a
/// manual requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Whether a job in this state may be picked up by a claim.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed)
    }

    /// Whether no worker will ever touch the job again without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(Error::InvalidInput(format!("unknown job state: {s}"))),
        }
    }
}

/// A job as stored in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque command handed to the executor.
    pub command: String,
    pub state: JobState,
    /// Number of failed attempts so far. Successful attempts are not counted.
    pub attempts: u32,
    pub max_retries: u32,
    pub priority: i64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub return_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submission request for a new job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Resolve the job id, generating one when the caller did not supply it.
    pub fn resolve_id(&self) -> Result<JobId> {
        match &self.id {
            Some(raw) => JobId::parse(raw.clone()),
            None => Ok(JobId::generate()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::InvalidInput("job command must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Number of jobs in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl JobCounts {
    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending = count,
            JobState::Processing => self.processing = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Dead => self.dead = count,
        }
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    pub fn total(&self) -> u64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}
