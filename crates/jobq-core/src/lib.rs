//! Core domain types and traits for the jobq job queue.
//!
//! This crate contains:
//! - Job and worker identifiers
//! - The job and worker data model
//! - The retry backoff policy
//! - The completion state machine (retry / dead-letter decisions)
//! - The executor trait used to run job commands

pub mod backoff;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod lifecycle;
pub mod worker;

pub use error::{Error, Result};
pub use id::{JobId, WorkerId};
pub use job::{Job, JobCounts, JobState, NewJob};
pub use worker::{WorkerRecord, WorkerStatus};
