use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Render a `hive_protocol` status/mode enum to its wire string (the same
/// snake_case/lowercase string `serde` already uses for JSON), for storage
/// in a plain `TEXT` column — mirrors `kild_protocol::ErrorCode::from_code`'s
/// round-trip-through-`serde_json::Value::String` trick rather than adding
/// a bespoke `FromStr`/`Display` pair per enum.
pub fn enum_to_column<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        other => panic!("enum_to_column: expected a string-serializing enum, got {other:?}"),
    }
}

pub fn column_to_enum<T: DeserializeOwned>(column: &str) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(column.to_string()))
}

/// Parse an RFC3339 timestamp, falling back to SQLite's bare
/// `YYYY-MM-DD HH:MM:SS` format for rows written outside this crate (e.g.
/// hand-authored fixtures). Every row this crate writes uses `to_rfc3339()`.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

pub fn bool_to_i64(b: bool) -> i64 {
    if b { 1 } else { 0 }
}

pub fn i64_to_bool(v: i64) -> bool {
    v != 0
}
