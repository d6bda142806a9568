//! Job and worker identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Identifier of a job.
///
/// Callers may supply their own id on submit; otherwise a UUIDv7 is generated
/// so that generated ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new time-ordered job id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap a caller-supplied id, rejecting blank values.
    pub fn parse(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::InvalidInput("job id must not be empty".to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifier of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Build the id for the `index`-th worker launched by the process `launcher_pid`.
    ///
    /// Format is `<pid>-<index>-<8 hex chars>`; the random suffix keeps ids unique
    /// across launches that reuse a pid.
    pub fn for_launch(launcher_pid: u32, index: usize) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", launcher_pid, index, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for WorkerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(Error::InvalidInput("worker id must not be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}
