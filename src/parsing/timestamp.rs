//! Timestamp normalization for extracted fields

use chrono::{DateTime, NaiveDateTime, Utc};

/// Field names that may carry the record timestamp, in lookup order
const TIMESTAMP_KEYS: [&str; 6] = ["timestamp", "@timestamp", "time", "ts", "datetime", "date"];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Apache/common log format, e.g. `10/Oct/2000:13:55:36 -0700`
const APACHE_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Normalize the first parseable timestamp field to UTC
pub fn normalize(fields: &[(String, String)]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .filter(|(key, _)| TIMESTAMP_KEYS.contains(&key.to_ascii_lowercase().as_str()))
        .find_map(|(_, value)| parse_timestamp(value))
}

/// Parse one timestamp value in any of the supported formats
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_matches(|c| c == '[' || c == ']');
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(dt) = DateTime::parse_from_str(value, APACHE_FORMAT) {
        return Some(dt.with_timezone(&Utc));
    }

    parse_epoch(value)
}

fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: i64 = value.parse().ok()?;
    match value.len() {
        9 | 10 => DateTime::from_timestamp(number, 0),
        13 => DateTime::from_timestamp_millis(number),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-03-01T12:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_naive_is_utc() {
        let ts = parse_timestamp("2024-03-01 12:00:00.250").unwrap();
        assert_eq!(ts.timestamp_millis() % 1000, 250);
    }

    #[test]
    fn test_apache_format() {
        let ts = parse_timestamp("[10/Oct/2000:13:55:36 -0700]").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2000, 10, 10, 20, 55, 36).unwrap());
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        assert_eq!(parse_timestamp("1700000000").unwrap().timestamp(), 1_700_000_000);
        assert_eq!(
            parse_timestamp("1700000000123").unwrap().timestamp_millis(),
            1_700_000_000_123
        );
        assert!(parse_timestamp("42").is_none());
    }

    #[test]
    fn test_normalize_picks_first_parseable_key() {
        let f = fields(&[
            ("host", "web-1"),
            ("time", "not a time"),
            ("@timestamp", "2024-01-02T03:04:05Z"),
        ]);
        assert_eq!(
            normalize(&f).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
        assert!(normalize(&fields(&[("message", "2024-01-02T03:04:05Z")])).is_none());
    }
}
