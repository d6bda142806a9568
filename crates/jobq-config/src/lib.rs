//! Configuration for jobq.
//!
//! This crate handles:
//! - Runtime tunables stored in the queue (backoff base, default retries, job timeout)
//! - Process settings loaded from a KDL file

pub mod error;
pub mod system;
pub mod tunables;

pub use error::{ConfigError, ConfigResult};
pub use system::{LogFormat, SystemConfig, load_system_config, parse_system_config};
pub use tunables::{ConfigKey, RuntimeConfig};
