use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Timestamp layouts recognised in device logs, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// `2024-03-01 14:20:00`
    IsoDateTime,
    /// `date=1709302800000` (epoch milliseconds)
    EpochMillis,
    /// `03-01 14:20:00` as printed by logcat, without a year
    MonthDay,
}

/// Evaluation order. The first format that yields a valid instant wins.
pub const FORMAT_ORDER: [TimestampFormat; 3] = [
    TimestampFormat::IsoDateTime,
    TimestampFormat::EpochMillis,
    TimestampFormat::MonthDay,
];

static RE_ISO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").unwrap()
});

static RE_EPOCH_MS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"date=(\d+)").unwrap()
});

static RE_MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2})-(\d{2}) (\d{2}:\d{2}:\d{2})").unwrap()
});

impl TimestampFormat {
    /// Try this single format against `line`. Malformed values return `None`
    /// so that the caller can fall through to the next format.
    pub fn try_extract(self, line: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimestampFormat::IsoDateTime => {
                let m = RE_ISO.find(line)?;
                let ndt = NaiveDateTime::parse_from_str(m.as_str(), "%Y-%m-%d %H:%M:%S").ok()?;
                Some(Utc.from_utc_datetime(&ndt))
            }
            TimestampFormat::EpochMillis => {
                let caps = RE_EPOCH_MS.captures(line)?;
                let ms = caps[1].parse::<i64>().ok()?;
                epoch_millis_to_dt(ms)
            }
            TimestampFormat::MonthDay => {
                let caps = RE_MONTH_DAY.captures(line)?;
                let month: u32 = caps[1].parse().ok()?;
                let day: u32 = caps[2].parse().ok()?;
                let time = &caps[3];
                let ts = month_day_in_year(now.year(), month, day, time)?;
                if ts > now {
                    // Captured early in the year, stamped late in the previous one.
                    month_day_in_year(now.year() - 1, month, day, time)
                } else {
                    Some(ts)
                }
            }
        }
    }
}

fn month_day_in_year(year: i32, month: u32, day: u32, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = chrono::NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn epoch_millis_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nsub = (ms.rem_euclid(1000) as u32) * 1_000_000;
    DateTime::<Utc>::from_timestamp(secs, nsub)
}

/// Extract a timestamp using the wall clock as the year-rollover reference.
pub fn extract(line: &str) -> Option<DateTime<Utc>> {
    extract_at(line, Utc::now())
}

/// Extract a timestamp relative to `now`. Only the first successful format is
/// used; a line is never re-tested once a format succeeds.
pub fn extract_at(line: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    detect_format(line, now).map(|(_, ts)| ts)
}

/// Like [`extract_at`] but also reports which format produced the value.
pub fn detect_format(line: &str, now: DateTime<Utc>) -> Option<(TimestampFormat, DateTime<Utc>)> {
    FORMAT_ORDER
        .iter()
        .find_map(|f| f.try_extract(line, now).map(|ts| (*f, ts)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_conversion_keeps_millis() {
        let dt = epoch_millis_to_dt(1_700_000_000_123).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn out_of_range_epoch_is_rejected() {
        assert!(epoch_millis_to_dt(i64::MAX).is_none());
    }

    #[test]
    fn leap_day_in_common_year_is_none() {
        assert!(month_day_in_year(2023, 2, 29, "10:00:00").is_none());
        assert!(month_day_in_year(2024, 2, 29, "10:00:00").is_some());
    }
}
