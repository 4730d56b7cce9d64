// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Date, time and duration helpers: ISO 8601 / RFC 3339 parsing and
//! formatting, UNIX timestamps, and human-friendly relative times.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// The UNIX epoch, in UTC.
pub const EPOCH: DateTime<Utc> = DateTime::UNIX_EPOCH;

static TIMEZONE_OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]\d{2}:?\d{2}$").expect("valid offset regex"));

// Rust regex has no lookahead, so "P" alone and a bare "T" are rejected
// after matching.
static ISO8601_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ *P(\d+Y)?(\d+M)?(\d+W)?(\d+D)?(T(\d+H)?(\d+M)?(\d+S)?)? *$")
        .expect("valid duration regex")
});

/// Current time in UTC.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A parsed ISO 8601 date/time, with an offset only if the input had one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoDateTime {
    pub naive: NaiveDateTime,
    pub offset: Option<FixedOffset>,
}

impl IsoDateTime {
    /// Formats as `YYYY-MM-DDTHH:MM:SS[.ffffff][+HH:MM]`.
    pub fn isoformat(&self) -> String {
        let mut out = self.naive.format("%Y-%m-%dT%H:%M:%S").to_string();
        let micros = self.naive.nanosecond() / 1000;
        if micros != 0 {
            out.push_str(&format!(".{micros:06}"));
        }
        if let Some(offset) = self.offset {
            let secs = offset.local_minus_utc();
            let sign = if secs < 0 { '-' } else { '+' };
            let secs = secs.abs();
            out.push_str(&format!("{sign}{:02}:{:02}", secs / 3600, secs / 60 % 60));
        }
        out
    }

    /// As a timezone-aware datetime, if there was an offset.
    pub fn to_datetime(&self) -> Option<DateTime<FixedOffset>> {
        self.offset
            .and_then(|offset| offset.from_local_datetime(&self.naive).single())
    }
}

/// Parses an ISO 8601 or RFC 3339 date/time, e.g. `2012-07-23T05:54:49+00:00`.
///
/// The `T` separator, fractional seconds and time zone are all optional.
pub fn parse_iso8601(val: &str) -> Result<IsoDateTime> {
    if val.is_empty() {
        return Err(Error::InvalidValue("empty date/time".to_string()));
    }

    let mut val = val.replace('T', " ");
    let mut offset = None;

    if let Some(zone) = TIMEZONE_OFFSET_RE.find(&val) {
        let zone_str = zone.as_str().replace(':', "");
        let hours: i32 = zone_str[1..3].parse().unwrap_or_default();
        let minutes: i32 = zone_str[3..5].parse().unwrap_or_default();
        let mut secs = hours * 3600 + minutes * 60;
        if zone_str.starts_with('-') {
            secs = -secs;
        }
        offset = Some(
            FixedOffset::east_opt(secs)
                .ok_or_else(|| Error::InvalidValue(format!("bad offset {}", zone.as_str())))?,
        );
        val.truncate(zone.start());
    } else if val.ends_with('Z') {
        val.pop();
        offset = FixedOffset::east_opt(0);
    }

    if !val.contains('.') {
        val.push_str(".0");
    }

    let naive = NaiveDateTime::parse_from_str(&val, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| Error::InvalidValue(format!("{val}: {e}")))?;
    Ok(IsoDateTime { naive, offset })
}

/// Parses an ISO 8601 duration like `P3Y6M4DT12H30M5S`.
///
/// Months count as 30 days and years as 365. Returns `None` if the input
/// isn't a duration.
pub fn parse_iso8601_duration(input: &str) -> Option<Duration> {
    if input.is_empty() {
        return None;
    }
    let caps = ISO8601_DURATION_RE.captures(input)?;
    if input.trim() == "P" {
        return None;
    }
    if caps.get(5).is_some_and(|t| t.as_str() == "T") {
        return None;
    }

    // absent components are 0, unparseable (too long) ones reject the input
    let g = |i: usize| -> Option<i64> {
        caps.get(i)
            .map_or(Some(0), |m| m.as_str()[..m.len() - 1].parse().ok())
    };

    let days = g(1)?
        .checked_mul(365)?
        .checked_add(g(2)?.checked_mul(30)?)?
        .checked_add(g(4)?)?;
    Duration::try_weeks(g(3)?)?
        .checked_add(&Duration::try_days(days)?)?
        .checked_add(&Duration::try_hours(g(6)?)?)?
        .checked_add(&Duration::try_minutes(g(7)?)?)?
        .checked_add(&Duration::try_seconds(g(8)?)?)
}

/// Formats a duration as `PnDTnS`. Fractional seconds are dropped.
pub fn to_iso8601_duration(input: Duration) -> String {
    let total = input.num_seconds();
    format!("P{}DT{}S", total.div_euclid(86400), total.rem_euclid(86400))
}

/// Converts ISO 8601 to RFC 3339, or returns the input unchanged if it
/// can't be parsed.
pub fn maybe_iso8601_to_rfc3339(input: &str) -> String {
    parse_iso8601(input)
        .map(|dt| dt.isoformat())
        .unwrap_or_else(|_| input.to_string())
}

fn timestamp_to_utc(input: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = input.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000.0).round() as u32 * 1000;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Converts a UNIX timestamp string to RFC 3339 in UTC, or returns the
/// input unchanged if it isn't a number.
pub fn maybe_timestamp_to_rfc3339(input: &str) -> String {
    match timestamp_to_utc(input) {
        Some(dt) if dt.nanosecond() != 0 => dt.format("%Y-%m-%dT%H:%M:%S%.3f+00:00").to_string(),
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S+00:00").to_string(),
        None => input.to_string(),
    }
}

/// Like [`maybe_timestamp_to_rfc3339`], with `Z` in place of `+00:00`.
pub fn maybe_timestamp_to_iso8601(input: &str) -> String {
    let ret = maybe_timestamp_to_rfc3339(input);
    if ret == input {
        ret
    } else {
        ret.replace("+00:00", "Z")
    }
}

/// Seconds since the epoch, with fractional microseconds.
pub fn to_utc_timestamp<Tz: TimeZone>(input: &DateTime<Tz>) -> f64 {
    input.timestamp() as f64 + f64::from(input.timestamp_subsec_micros()) / 1_000_000.0
}

/// Converts a timezone-aware datetime to naive UTC.
pub fn as_utc<Tz: TimeZone>(input: &DateTime<Tz>) -> NaiveDateTime {
    input.naive_utc()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        let article = if unit == "hour" { "an" } else { "a" };
        format!("{article} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Describes `when` relative to `now`, e.g. `3 minutes ago` or `a day from now`.
pub fn naturaltime<Tz: TimeZone>(when: &DateTime<Tz>, now: &DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(when.with_timezone(&Utc));
    let future = delta < Duration::zero();
    let delta = delta.abs();

    let secs = delta.num_seconds();
    let days = delta.num_days();
    let years = days / 365;
    let days_in_year = days % 365;
    let months = (days_in_year as f64 / 30.5) as i64;

    let text = if years == 0 && days == 0 {
        match secs {
            0 => return "now".to_string(),
            1..=59 => plural(secs, "second"),
            60..=3599 => plural(secs / 60, "minute"),
            _ => plural(secs / 3600, "hour"),
        }
    } else if years == 0 {
        if days < 30 {
            plural(days, "day")
        } else {
            plural(months.max(1), "month")
        }
    } else if years == 1 {
        match months {
            0 => "a year".to_string(),
            1 => "1 year, 1 month".to_string(),
            m => format!("1 year, {m} months"),
        }
    } else {
        plural(years, "year")
    };

    if future {
        format!("{text} from now")
    } else {
        format!("{text} ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_parse_iso8601() {
        for (input, offset_minutes) in [
            ("2012-07-23T05:54:49", None),
            ("2012-07-23 05:54:49", None),
            ("2012-07-23T05:54:49Z", Some(0)),
            ("2012-07-23T05:54:49+0000", Some(0)),
            ("2012-07-23T05:54:49-0000", Some(0)),
            ("2012-07-23T05:54:49+0130", Some(90)),
            ("2012-07-23T05:54:49-1300", Some(-780)),
            ("2012-07-23T05:54:49-13:00", Some(-780)),
        ] {
            let dt = parse_iso8601(input).unwrap();
            assert_eq!(dt.naive, naive(2012, 7, 23, 5, 54, 49), "{input}");
            assert_eq!(
                dt.offset.map(|o| o.local_minus_utc() / 60),
                offset_minutes,
                "{input}"
            );
        }

        let dt = parse_iso8601("2012-07-23T05:54:49.123").unwrap();
        assert_eq!(dt.naive.nanosecond(), 123_000_000);
        assert!(parse_iso8601("").is_err());
        assert!(parse_iso8601("not iso8601!").is_err());
    }

    #[test]
    fn test_maybe_iso8601_to_rfc3339() {
        assert_eq!(maybe_iso8601_to_rfc3339(""), "");
        assert_eq!(maybe_iso8601_to_rfc3339("not iso8601!"), "not iso8601!");
        assert_eq!(
            maybe_iso8601_to_rfc3339("2012-07-23T05:54:49+0000"),
            "2012-07-23T05:54:49+00:00"
        );
        assert_eq!(
            maybe_iso8601_to_rfc3339("2012-07-23T05:54:49.5-0130"),
            "2012-07-23T05:54:49.500000-01:30"
        );
        assert_eq!(maybe_iso8601_to_rfc3339("2012-07-23 05:54:49"), "2012-07-23T05:54:49");
    }

    #[test]
    fn test_maybe_timestamp_to_rfc3339() {
        assert_eq!(maybe_timestamp_to_rfc3339(""), "");
        assert_eq!(maybe_timestamp_to_rfc3339("not a timestamp!"), "not a timestamp!");
        assert_eq!(maybe_timestamp_to_rfc3339("1349588757"), "2012-10-07T05:45:57+00:00");
        assert_eq!(
            maybe_timestamp_to_rfc3339("1349588757.123"),
            "2012-10-07T05:45:57.123+00:00"
        );
        assert_eq!(maybe_timestamp_to_iso8601("1349588757"), "2012-10-07T05:45:57Z");
        assert_eq!(maybe_timestamp_to_iso8601("nope"), "nope");
    }

    #[test]
    fn test_iso8601_durations() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("bad"), None);
        assert_eq!(parse_iso8601_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(
            parse_iso8601_duration("P1Y2M3W4DT5H6M7S"),
            Some(
                Duration::days(365 + 60 + 21 + 4)
                    + Duration::hours(5)
                    + Duration::minutes(6)
                    + Duration::seconds(7)
            )
        );
        assert_eq!(parse_iso8601_duration("PT30S"), Some(Duration::seconds(30)));

        // too big for a Duration
        assert_eq!(parse_iso8601_duration("P9999999999999Y"), None);
        assert_eq!(parse_iso8601_duration("P99999999999999W"), None);
        assert_eq!(parse_iso8601_duration("PT99999999999999999999S"), None);

        assert_eq!(to_iso8601_duration(Duration::zero()), "P0DT0S");
        assert_eq!(to_iso8601_duration(Duration::days(3) + Duration::seconds(4)), "P3DT4S");
        assert_eq!(to_iso8601_duration(Duration::seconds(-1)), "P-1DT86399S");
    }

    #[test]
    fn test_timestamps() {
        let dt = Utc.with_ymd_and_hms(1970, 1, 3, 0, 0, 0).unwrap();
        assert_eq!(to_utc_timestamp(&dt), 172800.0);
        assert_eq!(to_utc_timestamp(&EPOCH), 0.0);

        let offset = FixedOffset::east_opt(3600).unwrap();
        let dt = offset.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(as_utc(&dt), naive(2020, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_naturaltime() {
        let now = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();
        let ago = |d: Duration| naturaltime(&(now - d), &now);

        assert_eq!(ago(Duration::zero()), "now");
        assert_eq!(ago(Duration::seconds(1)), "a second ago");
        assert_eq!(ago(Duration::seconds(30)), "30 seconds ago");
        assert_eq!(ago(Duration::seconds(90)), "a minute ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(61)), "an hour ago");
        assert_eq!(ago(Duration::hours(3)), "3 hours ago");
        assert_eq!(ago(Duration::days(1)), "a day ago");
        assert_eq!(ago(Duration::days(2)), "2 days ago");
        assert_eq!(ago(Duration::days(45)), "a month ago");
        assert_eq!(ago(Duration::days(365)), "a year ago");
        assert_eq!(ago(Duration::days(365 * 3)), "3 years ago");
        assert_eq!(naturaltime(&(now + Duration::days(2)), &now), "2 days from now");
    }
}
