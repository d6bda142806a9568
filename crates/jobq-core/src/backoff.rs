//! Retry backoff policy.

use chrono::TimeDelta;

/// Base used when the configured value is missing or not a number.
pub const DEFAULT_BASE: u64 = 2;

/// Delay in whole seconds before a failed job may be claimed again.
///
/// `attempts` is the failure count including the attempt that just failed, so
/// the first retry of a job waits `base` seconds. Negative counts are treated
/// as zero and the result saturates at `u64::MAX`.
pub fn backoff_secs(base: u64, attempts: i64) -> u64 {
    let exponent = u32::try_from(attempts.max(0)).unwrap_or(u32::MAX);
    base.saturating_pow(exponent)
}

/// [`backoff_secs`] as a duration, saturating at the largest representable delta.
pub fn retry_delay(base: u64, attempts: i64) -> TimeDelta {
    let secs = i64::try_from(backoff_secs(base, attempts)).unwrap_or(i64::MAX);
    TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
}
