use crate::error::ParseError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse an RFC 3339 timestamp that carries an explicit offset.
///
/// Naive timestamps are rejected rather than silently assumed to be UTC.
pub fn parse_aware_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    // "2024-01-01T00:00Z" is common in hand-written config.
    if let Some(stripped) = raw.strip_suffix('Z') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M") {
            return Ok(naive.and_utc());
        }
    }
    if NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
    {
        return Err(ParseError::NaiveTimestamp(raw.to_string()));
    }
    Err(ParseError::invalid(
        "timestamp",
        raw,
        "Expected RFC 3339, e.g. 2024-01-01T00:00:00Z",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_offsets_and_normalizes_to_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_aware_timestamp("2024-01-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_aware_timestamp("2024-01-01T00:00Z").unwrap(), expected);
        assert_eq!(parse_aware_timestamp("2024-01-01T02:00:00+02:00").unwrap(), expected);
    }

    #[test]
    fn rejects_naive_timestamps() {
        assert!(matches!(
            parse_aware_timestamp("2024-01-01T00:00:00"),
            Err(ParseError::NaiveTimestamp(_))
        ));
        assert!(matches!(
            parse_aware_timestamp("2024-01-01"),
            Err(ParseError::NaiveTimestamp(_))
        ));
        assert!(parse_aware_timestamp("yesterday").is_err());
    }
}
