//! Completion state machine.
//!
//! Decides what happens to a job once an attempt has finished. The decision is
//! pure; the store applies it in a single atomic update together with clearing
//! the lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobState;
use crate::backoff::retry_delay;
use crate::executor::SUCCESS_CODE;

/// The transition to apply to a `processing` job after an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    /// The attempt succeeded. `attempts` is left unchanged.
    Completed { attempts: u32 },
    /// The attempt failed and the job will be retried after `next_run_at`.
    Retry {
        attempts: u32,
        next_run_at: DateTime<Utc>,
        last_error: String,
    },
    /// The attempt failed and retries are exhausted.
    Dead { attempts: u32, last_error: String },
}

impl Transition {
    pub fn state(&self) -> JobState {
        match self {
            Transition::Completed { .. } => JobState::Completed,
            Transition::Retry { .. } => JobState::Failed,
            Transition::Dead { .. } => JobState::Dead,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Transition::Completed { attempts }
            | Transition::Retry { attempts, .. }
            | Transition::Dead { attempts, .. } => *attempts,
        }
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Transition::Retry { next_run_at, .. } => Some(*next_run_at),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            Transition::Completed { .. } => None,
            Transition::Retry { last_error, .. } | Transition::Dead { last_error, .. } => {
                Some(last_error)
            }
        }
    }
}

/// Latest time a retry is ever scheduled for: 9999-12-31T23:59:59Z.
///
/// Timestamps are compared as fixed-width text in the store, which only holds
/// for four-digit years.
pub fn latest_schedulable() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Resolve the transition for an attempt that ended with `return_code`.
///
/// `attempts` is the failure count recorded before this attempt. Only failures
/// increment it, so a job with `max_retries = r` dies on its `r + 1`-th failure.
pub fn resolve(
    attempts: u32,
    max_retries: u32,
    return_code: i32,
    backoff_base: u64,
    now: DateTime<Utc>,
) -> Transition {
    if return_code == SUCCESS_CODE {
        return Transition::Completed { attempts };
    }

    let attempts = attempts.saturating_add(1);
    let last_error = format!("exit code {return_code}");

    if attempts > max_retries {
        Transition::Dead {
            attempts,
            last_error,
        }
    } else {
        let next_run_at = now
            .checked_add_signed(retry_delay(backoff_base, i64::from(attempts)))
            .map_or(latest_schedulable(), |at| at.min(latest_schedulable()));
        Transition::Retry {
            attempts,
            next_run_at,
            last_error,
        }
    }
}
