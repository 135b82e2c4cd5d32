//! Timestamp and duration parsing, formatting, and component access.

use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::EvalError;
use crate::value::{Duration, Timestamp};

/// Parse an RFC 3339 timestamp string such as `2009-02-13T23:31:30Z` or
/// `2009-02-13T23:31:30.123456789+01:00`.
pub fn parse_timestamp(s: &str) -> Result<Timestamp, EvalError> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| EvalError::invalid_argument(format!("invalid timestamp: {}", e)))?;

    let ts = Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    };

    if !ts.is_valid() {
        return Err(EvalError::range(
            "timestamp out of range: must be between year 0001 and 9999",
        ));
    }

    Ok(ts)
}

/// Format a timestamp as RFC 3339 in UTC with `Z`, trimming the fractional
/// part to 3, 6, or 9 digits. Round-trips with [`parse_timestamp`].
/// Timestamps outside the representable range fall back to a seconds form
/// rather than panicking.
pub fn format_timestamp(ts: &Timestamp) -> String {
    let dt = match Utc.timestamp_opt(ts.seconds, ts.nanos.clamp(0, 999_999_999) as u32).single() {
        Some(dt) => dt,
        None => return format!("{}s", ts.seconds),
    };

    let base = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = ts.nanos.clamp(0, 999_999_999) as u32;
    if nanos == 0 {
        format!("{}Z", base)
    } else if nanos % 1_000_000 == 0 {
        format!("{}.{:03}Z", base, nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}.{:06}Z", base, nanos / 1_000)
    } else {
        format!("{}.{:09}Z", base, nanos)
    }
}

/// Parse a CEL duration string: decimal components with `h`, `m`, `s`,
/// `ms`, `us`, `ns` units, e.g. `"1h30m"`, `"-3.5s"`, `"100ms"`.
pub fn parse_duration(s: &str) -> Result<Duration, EvalError> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    if body.is_empty() {
        return Err(EvalError::invalid_argument("invalid duration: empty"));
    }

    let mut total_nanos: i128 = 0;
    let mut remaining = body;

    while !remaining.is_empty() {
        let num_end = remaining
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(remaining.len());
        if num_end == 0 {
            return Err(EvalError::invalid_argument(format!(
                "invalid duration: expected number at '{}'",
                remaining
            )));
        }
        let num_str = &remaining[..num_end];
        remaining = &remaining[num_end..];

        let unit_end = remaining
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(remaining.len());
        if unit_end == 0 {
            return Err(EvalError::invalid_argument(format!(
                "invalid duration: missing unit after '{}'",
                num_str
            )));
        }
        let unit = &remaining[..unit_end];
        remaining = &remaining[unit_end..];

        let multiplier: i128 = match unit {
            "h" => 3_600_000_000_000,
            "m" => 60_000_000_000,
            "s" => 1_000_000_000,
            "ms" => 1_000_000,
            "us" | "\u{00b5}s" => 1_000,
            "ns" => 1,
            _ => {
                return Err(EvalError::invalid_argument(format!(
                    "invalid duration unit: '{}'",
                    unit
                )))
            }
        };

        if num_str.contains('.') {
            let num: f64 = num_str.parse().map_err(|_| {
                EvalError::invalid_argument(format!("invalid duration number: '{}'", num_str))
            })?;
            total_nanos += (num * multiplier as f64) as i128;
        } else {
            let num: i128 = num_str.parse().map_err(|_| {
                EvalError::invalid_argument(format!("invalid duration number: '{}'", num_str))
            })?;
            total_nanos += num * multiplier;
        }
    }

    if negative {
        total_nanos = -total_nanos;
    }

    Duration::from_nanos(total_nanos)
        .ok_or_else(|| EvalError::range("duration out of range: must be within 10000 years"))
}

/// Format a duration as seconds with trimmed fractional digits and an `s`
/// suffix: `3600s`, `1.5s`, `-0.000000001s`.
pub fn format_duration(d: &Duration) -> String {
    let total = d.to_nanos();
    let sign = if total < 0 { "-" } else { "" };
    let abs = total.unsigned_abs();
    let seconds = abs / 1_000_000_000;
    let nanos = (abs % 1_000_000_000) as u32;

    if nanos == 0 {
        format!("{}{}s", sign, seconds)
    } else if nanos % 1_000_000 == 0 {
        format!("{}{}.{:03}s", sign, seconds, nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}{}.{:06}s", sign, seconds, nanos / 1_000)
    } else {
        format!("{}{}.{:09}s", sign, seconds, nanos)
    }
}

/// Date/time components addressable from CEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeComponent {
    /// Year, e.g. 2009.
    FullYear,
    /// Zero-based month, 0..=11.
    Month,
    /// One-based day of month.
    Date,
    /// Zero-based day of month.
    DayOfMonth,
    /// Day of week, 0 = Sunday.
    DayOfWeek,
    /// Zero-based day of year.
    DayOfYear,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
}

impl TimeComponent {
    fn extract<T: Datelike + Timelike>(&self, dt: &T) -> i64 {
        match self {
            TimeComponent::FullYear => dt.year() as i64,
            TimeComponent::Month => dt.month0() as i64,
            TimeComponent::Date => dt.day() as i64,
            TimeComponent::DayOfMonth => dt.day0() as i64,
            TimeComponent::DayOfWeek => dt.weekday().num_days_from_sunday() as i64,
            TimeComponent::DayOfYear => dt.ordinal0() as i64,
            TimeComponent::Hours => dt.hour() as i64,
            TimeComponent::Minutes => dt.minute() as i64,
            TimeComponent::Seconds => dt.second() as i64,
            TimeComponent::Milliseconds => (dt.nanosecond() / 1_000_000) as i64,
        }
    }
}

/// Extract a component from a timestamp, in UTC or in the given time zone
/// (fixed offset `[+-]HH:MM` or an IANA name like `America/New_York`).
pub fn timestamp_component(
    ts: &Timestamp,
    tz: Option<&str>,
    component: TimeComponent,
) -> Result<i64, EvalError> {
    let utc = Utc
        .timestamp_opt(ts.seconds, ts.nanos as u32)
        .single()
        .ok_or_else(|| EvalError::range("timestamp out of range"))?;

    match tz {
        None => Ok(component.extract(&utc)),
        Some(tz_str) => {
            if let Ok(offset) = parse_fixed_offset(tz_str) {
                Ok(component.extract(&utc.with_timezone(&offset)))
            } else {
                let tz = Tz::from_str(tz_str).map_err(|_| {
                    EvalError::invalid_argument(format!("invalid time zone: '{}'", tz_str))
                })?;
                Ok(component.extract(&utc.with_timezone(&tz)))
            }
        }
    }
}

fn parse_fixed_offset(s: &str) -> Result<FixedOffset, ()> {
    let bytes = s.as_bytes();
    if bytes.len() != 6 || (bytes[0] != b'+' && bytes[0] != b'-') || bytes[3] != b':' {
        return Err(());
    }
    let hours: i32 = s[1..3].parse().map_err(|_| ())?;
    let minutes: i32 = s[4..6].parse().map_err(|_| ())?;
    let total = hours * 3600 + minutes * 60;
    let total = if bytes[0] == b'-' { -total } else { total };
    FixedOffset::east_opt(total).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip() {
        let ts = parse_timestamp("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(ts.seconds, 1234567890);
        assert_eq!(format_timestamp(&ts), "2009-02-13T23:31:30Z");
    }

    #[test]
    fn timestamp_with_fraction() {
        let ts = parse_timestamp("2009-02-13T23:31:30.123Z").unwrap();
        assert_eq!(ts.nanos, 123_000_000);
        assert_eq!(format_timestamp(&ts), "2009-02-13T23:31:30.123Z");
    }

    #[test]
    fn timestamp_with_offset_normalizes_to_utc() {
        let ts = parse_timestamp("2009-02-14T00:31:30+01:00").unwrap();
        assert_eq!(ts.seconds, 1234567890);
    }

    #[test]
    fn timestamp_out_of_range() {
        assert!(parse_timestamp("10000-01-01T00:00:00Z").is_err());
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("100s").unwrap(), Duration::new(100, 0));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::new(5400, 0));
        assert_eq!(
            parse_duration("1.5s").unwrap(),
            Duration::new(1, 500_000_000)
        );
        assert_eq!(
            parse_duration("-30s").unwrap(),
            Duration::new(-30, 0)
        );
        assert_eq!(
            parse_duration("100ms").unwrap(),
            Duration::new(0, 100_000_000)
        );
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(&Duration::new(3600, 0)), "3600s");
        assert_eq!(format_duration(&Duration::new(1, 500_000_000)), "1.5s");
        assert_eq!(format_duration(&Duration::new(-1, -500_000_000)), "-1.5s");
        assert_eq!(format_duration(&Duration::new(0, 1)), "0.000000001s");
    }

    #[test]
    fn components_utc() {
        let ts = parse_timestamp("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::FullYear).unwrap(),
            2009
        );
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::Month).unwrap(),
            1
        );
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::Date).unwrap(),
            13
        );
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::DayOfMonth).unwrap(),
            12
        );
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::DayOfWeek).unwrap(),
            5
        );
        assert_eq!(
            timestamp_component(&ts, None, TimeComponent::Hours).unwrap(),
            23
        );
    }

    #[test]
    fn components_with_fixed_offset() {
        let ts = parse_timestamp("2009-02-13T23:31:30Z").unwrap();
        assert_eq!(
            timestamp_component(&ts, Some("+01:00"), TimeComponent::Hours).unwrap(),
            0
        );
        assert_eq!(
            timestamp_component(&ts, Some("+01:00"), TimeComponent::Date).unwrap(),
            14
        );
    }

    #[test]
    fn components_with_iana_zone() {
        let ts = parse_timestamp("2009-02-13T23:31:30Z").unwrap();
        // America/St_Johns is UTC-03:30 (no DST in February).
        assert_eq!(
            timestamp_component(&ts, Some("America/St_Johns"), TimeComponent::Hours).unwrap(),
            20
        );
        assert!(timestamp_component(&ts, Some("Nowhere/Invalid"), TimeComponent::Hours).is_err());
    }
}
