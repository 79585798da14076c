//! Column conversions shared by the SQLite repositories.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC
//! (`2026-03-01T10:00:00.000000Z`) so that SQL string comparison orders them
//! chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use opsflow_types::error::RepositoryError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

pub(crate) fn from_json<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

/// Parse a serde unit-variant enum from its stored string form.
pub(crate) fn from_str_enum<T: DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid {what}: {s}")))
}

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_types::execution::RunStatus;

    #[test]
    fn timestamps_sort_as_strings() {
        let a: DateTime<Utc> = "2026-03-01T09:59:59.5Z".parse().unwrap();
        let b: DateTime<Utc> = "2026-03-01T10:00:00Z".parse().unwrap();
        assert!(format_datetime(&a) < format_datetime(&b));
        assert_eq!(format_datetime(&b), "2026-03-01T10:00:00.000000Z");
        assert_eq!(parse_datetime(&format_datetime(&a)).unwrap(), a);
    }

    #[test]
    fn enums_parse_from_stored_strings() {
        let status: RunStatus = from_str_enum("suspended", "run status").unwrap();
        assert_eq!(status, RunStatus::Suspended);
        assert!(from_str_enum::<RunStatus>("crashed", "run status").is_err());
    }
}
