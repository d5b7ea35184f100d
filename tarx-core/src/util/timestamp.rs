use std::fs::Metadata;

use filetime::FileTime;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Result, TarxError};

/// Whole-second UTC timestamp, the form mtimes are stored in.
pub fn format_seconds(t: OffsetDateTime) -> Result<String> {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    t.format(fmt)
        .map_err(|e| TarxError::Format(format!("timestamp: {e}")))
}

/// Microsecond UTC timestamp, used for checkpoint ordering.
pub fn format_micros(t: OffsetDateTime) -> Result<String> {
    let fmt = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
    );
    t.format(fmt)
        .map_err(|e| TarxError::Format(format!("timestamp: {e}")))
}

/// Parse either stored form. The value is taken as UTC.
pub fn parse(s: &str) -> Result<OffsetDateTime> {
    let s = s.trim();
    let whole = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let fractional =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
    let parsed = if s.contains('.') {
        PrimitiveDateTime::parse(s, fractional)
    } else {
        PrimitiveDateTime::parse(s, whole)
    };
    parsed
        .map(|p| p.assume_utc())
        .map_err(|e| TarxError::Format(format!("invalid timestamp {s:?}: {e}")))
}

pub fn from_unix(secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| TarxError::Format(format!("timestamp {secs} out of range: {e}")))
}

/// Modification time of `md`, truncated to whole seconds.
pub fn mtime_of(md: &Metadata) -> OffsetDateTime {
    let secs = FileTime::from_last_modification_time(md).unix_seconds();
    from_unix(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
