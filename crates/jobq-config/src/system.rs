//! Process settings parsing.
//!
//! Settings that apply to a whole `jobq` process (as opposed to the runtime
//! tunables stored in the queue) come from an optional KDL file:
//!
//! ```kdl
//! database "sqlite://queue.db"
//! poll-interval-ms 1000
//! heartbeat-interval-ms 5000
//! busy-timeout-ms 30000
//! store-retry-budget 5
//! log-format "json"
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Output format for process logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "log-format".to_string(),
                message: format!("expected \"pretty\" or \"json\", got {:?}", other),
            }),
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Store location. `None` leaves the choice to the caller.
    pub database_url: Option<String>,
    /// Sleep between polls when no job is claimable.
    pub poll_interval: Duration,
    /// How often a busy worker refreshes its liveness timestamp.
    pub heartbeat_interval: Duration,
    /// How long to wait for the store's write lock before giving up.
    pub busy_timeout: Duration,
    /// Consecutive store-unavailable ticks a worker tolerates before exiting.
    pub store_retry_budget: u32,
    pub log_format: LogFormat,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            poll_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_millis(5000),
            busy_timeout: Duration::from_millis(30_000),
            store_retry_budget: 5,
            log_format: LogFormat::Pretty,
        }
    }
}

/// Parse process settings from KDL text. Unset fields keep their defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => {
                config.database_url = Some(require_string(node, "database")?);
            }
            "poll-interval-ms" => {
                config.poll_interval = Duration::from_millis(require_u64(node, "poll-interval-ms")?);
            }
            "heartbeat-interval-ms" => {
                config.heartbeat_interval =
                    Duration::from_millis(require_u64(node, "heartbeat-interval-ms")?);
            }
            "busy-timeout-ms" => {
                config.busy_timeout = Duration::from_millis(require_u64(node, "busy-timeout-ms")?);
            }
            "store-retry-budget" => {
                let budget = require_u64(node, "store-retry-budget")?;
                config.store_retry_budget =
                    u32::try_from(budget).map_err(|_| ConfigError::InvalidValue {
                        field: "store-retry-budget".to_string(),
                        message: format!("{} is too large", budget),
                    })?;
            }
            "log-format" => {
                config.log_format = require_string(node, "log-format")?.parse()?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if config.poll_interval.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: "poll-interval-ms".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(config)
}

/// Read and parse a settings file.
pub fn load_system_config(path: &Path) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn require_string(node: &KdlNode, field: &str) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_string(),
        message: "expected a string argument".to_string(),
    })
}

fn require_u64(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = get_first_integer_arg(node).ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_string(),
        message: "expected an integer argument".to_string(),
    })?;
    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is out of range", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            database "sqlite:///var/lib/jobq/queue.db"
            poll-interval-ms 250
            heartbeat-interval-ms 2000
            busy-timeout-ms 10000
            store-retry-budget 3
            log-format "json"
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("sqlite:///var/lib/jobq/queue.db")
        );
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.busy_timeout, Duration::from_secs(10));
        assert_eq!(config.store_retry_budget, 3);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.busy_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_nodes_ignored() {
        let config = parse_system_config("colour \"blue\"\npoll-interval-ms 500").unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_negative_interval_rejected() {
        let result = parse_system_config("poll-interval-ms -5");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(parse_system_config("poll-interval-ms 0").is_err());
    }

    #[test]
    fn test_log_format_names() {
        for format in [LogFormat::Pretty, LogFormat::Json] {
            assert_eq!(format.as_str().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_bad_log_format() {
        let result = parse_system_config("log-format \"xml\"");
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobq.kdl");
        std::fs::write(&path, "store-retry-budget 9\n").unwrap();

        let config = load_system_config(&path).unwrap();
        assert_eq!(config.store_retry_budget, 9);
    }
}
