//! Command execution backends for jobq.
//!
//! Provides executor implementations for running job commands:
//! - Local shell (`sh -c`)

pub mod shell;

pub use jobq_core::executor::{ExecutionResult, ExecutionSpec, Executor};
pub use shell::ShellExecutor;
