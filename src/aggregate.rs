//! Derived views over a filtered, timestamped set of lines: hourly activity,
//! ranked identifier frequencies and thresholded distributions.
//!
//! Every view returns an [`Aggregate`], so "nothing to show" is distinct from
//! a populated result that happens to contain zeros.

use ahash::AHashMap;
use chrono::{DateTime, Duration, TimeZone, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classifier::{Classifier, LogLine};
use crate::filter::Severity;
use crate::taxonomy::{CategoryKind, CATCH_ALL_SUBTYPE};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_THRESHOLD_PCT: f64 = 5.0;
pub const OTHER_BUCKET: &str = "Other";
/// Widest first-to-last span, in hours, that zero-fill will materialise.
pub const MAX_ZERO_FILL_HOURS: i64 = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Aggregate<T> {
    NoData,
    Data(T),
}

impl<T> Aggregate<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Aggregate::NoData)
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Aggregate::Data(t) => Some(t),
            Aggregate::NoData => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Aggregate::Data(t) => Some(t),
            Aggregate::NoData => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinMode {
    /// Only hours with at least one event.
    #[default]
    Sparse,
    /// Every hour between the first and last observed hour, inclusive. Spans
    /// wider than [`MAX_ZERO_FILL_HOURS`] yield `NoData`.
    ZeroFill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourBucket {
    pub hour: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeries {
    pub points: Vec<HourBucket>,
}

impl TimeSeries {
    pub fn counts(&self) -> Vec<usize> {
        self.points.iter().map(|p| p.count).collect()
    }

    pub fn total(&self) -> usize {
        self.points.iter().map(|p| p.count).sum()
    }
}

pub fn floor_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let ts = t.timestamp();
    let floored = ts - ts.rem_euclid(3600);
    Utc.timestamp_opt(floored, 0).single().unwrap_or(t)
}

pub fn hourly_series(times: &[DateTime<Utc>], mode: BinMode) -> Aggregate<TimeSeries> {
    if times.is_empty() {
        return Aggregate::NoData;
    }
    let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for t in times {
        *counts.entry(floor_to_hour(*t)).or_insert(0) += 1;
    }
    let points = match mode {
        BinMode::Sparse => counts
            .into_iter()
            .map(|(hour, count)| HourBucket { hour, count })
            .collect(),
        BinMode::ZeroFill => {
            let (Some(first), Some(last)) =
                (counts.keys().next().copied(), counts.keys().next_back().copied())
            else {
                return Aggregate::NoData;
            };
            let span = (last - first).num_hours();
            if span > MAX_ZERO_FILL_HOURS {
                tracing::warn!(span_hours = span, limit = MAX_ZERO_FILL_HOURS, "zero-fill span too large");
                return Aggregate::NoData;
            }
            let mut points = Vec::with_capacity(span as usize + 1);
            let mut next = Some(first);
            // stops at the last hour chrono can represent
            while let Some(hour) = next.filter(|h| *h <= last) {
                points.push(HourBucket { hour, count: counts.get(&hour).copied().unwrap_or(0) });
                next = hour.checked_add_signed(Duration::hours(1));
            }
            points
        }
    };
    Aggregate::Data(TimeSeries { points })
}

/// Hourly series over the timestamped subset of `lines`.
pub fn hourly_activity<'a, I>(lines: I, mode: BinMode) -> Aggregate<TimeSeries>
where
    I: IntoIterator<Item = &'a LogLine>,
{
    let times: Vec<DateTime<Utc>> = lines.into_iter().filter_map(|l| l.timestamp).collect();
    hourly_series(&times, mode)
}

/// Occurrence counts that remember first-seen order for tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    index: AHashMap<String, usize>,
    entries: Vec<(String, usize)>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str) {
        match self.index.get(id) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(id.to_string(), self.entries.len());
                self.entries.push((id.to_string(), 1));
            }
        }
    }

    pub fn extend<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.record(id.as_ref());
        }
    }

    pub fn count(&self, id: &str) -> usize {
        self.index.get(id).map(|&i| self.entries[i].1).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, c)| *c).sum()
    }

    /// The `n` highest counts, descending; equal counts keep first-seen order.
    pub fn top(&self, n: usize) -> Vec<(String, usize)> {
        let mut ranked = self.entries.clone();
        // stable sort preserves first-seen order among ties
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

static RE_LABELLED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:number:|to:|from:)\s*(\+?\d{7,15})").unwrap()
});
static RE_BARE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+?\d{7,15})").unwrap()
});
static RE_SMS_SENDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"from: (\+?\d+)").unwrap()
});

/// Identifier extraction tiers. The first tier that finds anything in a line
/// supplies that line's identifiers; later tiers are skipped for that line.
#[derive(Debug, Clone)]
pub struct IdentifierExtractor {
    tiers: Vec<Regex>,
    all_per_line: bool,
}

impl IdentifierExtractor {
    pub fn new(tiers: Vec<Regex>, all_per_line: bool) -> Self {
        Self { tiers, all_per_line }
    }

    /// Call-log numbers: labelled `number:`/`to:`/`from:` matches first, then
    /// any 7–15 digit run.
    pub fn phone_numbers() -> Self {
        Self::new(vec![(*RE_LABELLED_NUMBER).clone(), (*RE_BARE_NUMBER).clone()], true)
    }

    /// Message senders: one `from: <number>` per line.
    pub fn sms_senders() -> Self {
        Self::new(vec![(*RE_SMS_SENDER).clone()], false)
    }

    pub fn extract(&self, line: &str) -> Vec<String> {
        for re in &self.tiers {
            let found: Vec<String> = if self.all_per_line {
                re.captures_iter(line)
                    .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                    .collect()
            } else {
                re.captures(line)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
                    .into_iter()
                    .collect()
            };
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

pub fn frequency_table<I, S>(lines: I, extractor: &IdentifierExtractor) -> FrequencyTable
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut table = FrequencyTable::new();
    for line in lines {
        table.extend(extractor.extract(line.as_ref()));
    }
    table
}

pub fn top_identifiers<I, S>(
    lines: I,
    extractor: &IdentifierExtractor,
    n: usize,
) -> Aggregate<Vec<(String, usize)>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let table = frequency_table(lines, extractor);
    if table.is_empty() {
        Aggregate::NoData
    } else {
        Aggregate::Data(table.top(n))
    }
}

/// Merge buckets whose share of the total is below `threshold_pct` percent
/// into [`OTHER_BUCKET`], then sort descending. Ties keep input order.
pub fn group_distribution(
    table: &[(String, usize)],
    threshold_pct: f64,
) -> Aggregate<Vec<(String, usize)>> {
    let total: usize = table.iter().map(|(_, c)| *c).sum();
    if total == 0 {
        return Aggregate::NoData;
    }
    let mut kept: Vec<(String, usize)> = Vec::new();
    let mut other = 0usize;
    for (name, count) in table {
        let share = *count as f64 / total as f64 * 100.0;
        if share >= threshold_pct && name != OTHER_BUCKET {
            kept.push((name.clone(), *count));
        } else {
            other += count;
        }
    }
    if other > 0 {
        kept.push((OTHER_BUCKET.to_string(), other));
    }
    Aggregate::Data(kept.into_iter().sorted_by(|a, b| b.1.cmp(&a.1)).collect())
}

/// Per-sub-type counts for the lines of one category, declared order with
/// the catch-all last. Each line counts toward exactly one sub-type.
pub fn subtype_distribution<'a, I>(
    classifier: &Classifier,
    kind: CategoryKind,
    lines: I,
) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut table: Vec<(String, usize)> = classifier
        .taxonomy()
        .subtypes(kind)
        .names()
        .map(|n| (n.to_string(), 0))
        .collect();
    table.push((CATCH_ALL_SUBTYPE.to_string(), 0));
    for line in lines {
        let sub = classifier.subtype(kind, line);
        if let Some(slot) = table.iter_mut().find(|(n, _)| n == sub) {
            slot.1 += 1;
        }
    }
    table
}

/// Severity counts using first-match resolution; empty buckets are dropped.
pub fn severity_distribution<'a, I>(
    classifier: &Classifier,
    lines: I,
) -> Aggregate<Vec<(Severity, usize)>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(Severity, usize)> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for line in lines {
        let sev = classifier.severity(line);
        if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == sev) {
            slot.1 += 1;
        }
    }
    counts.retain(|(_, c)| *c > 0);
    if counts.is_empty() {
        Aggregate::NoData
    } else {
        Aggregate::Data(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_drops_minutes_and_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 8, 59, 59).unwrap();
        assert_eq!(floor_to_hour(t), Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn catch_all_absorbs_small_slices() {
        let table = vec![
            ("Activity".to_string(), 90),
            ("View".to_string(), 1),
            ("Other".to_string(), 9),
        ];
        let grouped = group_distribution(&table, 5.0).into_data().unwrap();
        assert_eq!(grouped, vec![("Activity".to_string(), 90), ("Other".to_string(), 10)]);
    }
}
