//! Timestamp encoding.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text with microsecond
//! precision, so comparing the text in SQL compares the instants.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{DbError, DbResult};

pub(crate) fn encode(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn decode_opt(raw: Option<&str>) -> DbResult<Option<DateTime<Utc>>> {
    raw.map(decode).transpose()
}
