//! Executor trait and execution types.
//!
//! Executors run a job's opaque command and report how it went. They never
//! fail: anything that goes wrong while running the command is reported as a
//! failed [`ExecutionResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Job, JobId};

/// Return code of a successful attempt.
pub const SUCCESS_CODE: i32 = 0;

/// Return code recorded when the command timed out or could not be run.
pub const FAILURE_SENTINEL_CODE: i32 = -1;

/// What to run for a single attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSpec {
    pub job_id: JobId,
    /// Command passed verbatim to the shell.
    pub command: String,
    /// Maximum execution time. `None` means no limit.
    pub timeout: Option<Duration>,
}

impl ExecutionSpec {
    pub fn for_job(job: &Job, timeout: Option<Duration>) -> Self {
        Self {
            job_id: job.id.clone(),
            command: job.command.clone(),
            timeout,
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.return_code == SUCCESS_CODE
    }

    /// Result for an attempt whose command could not even be started.
    pub fn launch_failure(message: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            return_code: FAILURE_SENTINEL_CODE,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms,
            timed_out: false,
        }
    }
}

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run the command to completion (or until its timeout) and report the result.
    async fn execute(&self, spec: &ExecutionSpec) -> ExecutionResult;
}
