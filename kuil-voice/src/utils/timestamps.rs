//! Timestamp and identifier encoding for SQLite TEXT columns
//!
//! All timestamps are stored as RFC 3339 UTC with microsecond precision so that
//! lexicographic order matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use kuil_common::{Error, Result};
use uuid::Uuid;

pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn from_db(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub fn opt_from_db(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| from_db(column, &v)).transpose()
}

pub fn uuid_from_db(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(to_db(&earlier) < to_db(&later));
        assert_eq!(from_db("ts", &to_db(&later)).unwrap(), later);
    }

    #[test]
    fn test_bad_values_are_internal_errors() {
        assert!(matches!(from_db("ts", "yesterday"), Err(Error::Internal(_))));
        assert!(matches!(uuid_from_db("id", "not-a-uuid"), Err(Error::Internal(_))));
        assert_eq!(opt_from_db("ts", None).unwrap(), None);
    }
}
