//! Runtime tunables.
//!
//! Tunables live in the queue's config mapping as strings so operators can
//! change them while workers run. They are re-read at the start of every
//! operation; a missing or unparsable value falls back to its documented
//! default instead of failing the job.

use std::collections::BTreeMap;
use std::time::Duration;

use jobq_core::backoff::DEFAULT_BASE;
use tracing::warn;

/// Known tunable keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Base of the exponential retry delay, in seconds.
    BackoffBase,
    /// Retries allowed for jobs submitted without `max_retries`.
    MaxRetriesDefault,
    /// Per-attempt timeout in seconds. `0` disables the timeout.
    JobTimeout,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::BackoffBase,
        ConfigKey::MaxRetriesDefault,
        ConfigKey::JobTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::MaxRetriesDefault => "max_retries_default",
            ConfigKey::JobTimeout => "job_timeout",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            ConfigKey::BackoffBase => "2",
            ConfigKey::MaxRetriesDefault => "3",
            ConfigKey::JobTimeout => "0",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Typed view over the config mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub backoff_base: u64,
    pub max_retries_default: u32,
    pub job_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BASE,
            max_retries_default: DEFAULT_MAX_RETRIES,
            job_timeout: None,
        }
    }
}

impl RuntimeConfig {
    /// Build from raw key/value pairs, applying defaults for anything missing
    /// or malformed. Unknown keys are ignored.
    pub fn from_entries(entries: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();

        let backoff_base = parse_or(entries, ConfigKey::BackoffBase, defaults.backoff_base);
        let max_retries_default =
            parse_or(entries, ConfigKey::MaxRetriesDefault, defaults.max_retries_default);
        let timeout_secs: u64 = parse_or(entries, ConfigKey::JobTimeout, 0);

        Self {
            backoff_base,
            max_retries_default,
            job_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }
}

fn parse_or<T>(entries: &BTreeMap<String, String>, key: ConfigKey, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match entries.get(key.as_str()) {
        None => {
            warn!(key = key.as_str(), default = %default, "config key missing, using default");
            default
        }
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key = key.as_str(), value = %raw, default = %default, "invalid config value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = RuntimeConfig::from_entries(&BTreeMap::new());
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.backoff_base, 2);
        assert_eq!(config.max_retries_default, 3);
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn test_parses_values() {
        let config = RuntimeConfig::from_entries(&entries(&[
            ("backoff_base", "3"),
            ("max_retries_default", "5"),
            ("job_timeout", "30"),
        ]));
        assert_eq!(config.backoff_base, 3);
        assert_eq!(config.max_retries_default, 5);
        assert_eq!(config.job_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_non_numeric_backoff_falls_back_to_two() {
        let config = RuntimeConfig::from_entries(&entries(&[("backoff_base", "fast")]));
        assert_eq!(config.backoff_base, 2);

        let config = RuntimeConfig::from_entries(&entries(&[("backoff_base", "-3")]));
        assert_eq!(config.backoff_base, 2);
    }

    #[test]
    fn test_zero_timeout_disables_timeout() {
        let config = RuntimeConfig::from_entries(&entries(&[("job_timeout", "0")]));
        assert!(config.job_timeout.is_none());
    }

    #[test]
    fn test_key_names() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::from_name(key.as_str()), Some(key));
        }
        assert_eq!(ConfigKey::from_name("nope"), None);
        assert_eq!(ConfigKey::BackoffBase.default_value(), "2");
    }
}
