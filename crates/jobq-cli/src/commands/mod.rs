//! CLI command implementations.

pub mod config;
pub mod dlq;
pub mod jobs;
pub mod worker;

use anyhow::Result;
use serde::Serialize;

/// Print a result as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
