// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsers for individual feed field encodings.

use chrono::{DateTime, Utc};

/// The RFC-822 style layout used by `<pubDate>`
const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Parse an `itunes:duration` value into seconds.
///
/// Accepts plain seconds, `MM:SS` and `HH:MM:SS`. Anything else yields 0.
pub fn parse_duration(raw: &str) -> f64 {
    let raw = raw.trim();

    if !raw.contains(':') {
        return raw
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .unwrap_or(0.0);
    }

    let component = |s: &str| s.trim().parse::<f64>().unwrap_or(0.0);
    let parts: Vec<&str> = raw.split(':').collect();

    match parts.as_slice() {
        [minutes, seconds] => component(minutes) * 60.0 + component(seconds),
        [hours, minutes, seconds] => {
            component(hours) * 3600.0 + component(minutes) * 60.0 + component(seconds)
        }
        _ => 0.0,
    }
}

/// Parse a `<pubDate>` value in the fixed `EEE, dd MMM yyyy HH:mm:ss Z` layout
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw.trim(), PUB_DATE_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a `<pubDate>`, substituting the current time when it is unreadable
pub fn pub_date_or_now(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(parse_pub_date).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn duration_hours_minutes_seconds() {
        assert_eq!(parse_duration("1:30:00"), 5400.0);
    }

    #[test]
    fn duration_minutes_seconds() {
        assert_eq!(parse_duration("45:00"), 2700.0);
    }

    #[test]
    fn duration_plain_seconds() {
        assert_eq!(parse_duration("120"), 120.0);
        assert_eq!(parse_duration("  90 "), 90.0);
    }

    #[test]
    fn duration_garbage_is_zero() {
        assert_eq!(parse_duration("garbage"), 0.0);
        assert_eq!(parse_duration(""), 0.0);
        assert_eq!(parse_duration("1:2:3:4"), 0.0);
        assert_eq!(parse_duration("-5"), 0.0);
    }

    #[test]
    fn duration_bad_component_counts_as_zero() {
        assert_eq!(parse_duration("x:30"), 30.0);
        assert_eq!(parse_duration("1:xx:10"), 3610.0);
    }

    #[test]
    fn pub_date_parses_fixed_format() {
        let dt = parse_pub_date("Mon, 01 Jan 2024 12:30:00 +0100").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.hour(), 11);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn pub_date_rejects_other_formats() {
        assert!(parse_pub_date("2024-01-01T12:00:00Z").is_none());
        assert!(parse_pub_date("yesterday").is_none());
    }

    #[test]
    fn unreadable_pub_date_falls_back_to_now() {
        let before = Utc::now();
        let dt = pub_date_or_now(Some("not a date"));
        let after = Utc::now();
        assert!(dt >= before && dt <= after);

        let missing = pub_date_or_now(None);
        assert!(missing >= before);
    }
}
