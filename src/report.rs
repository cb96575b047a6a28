//! Summary data for forensic exports.
//!
//! Rendering (PDF, CSV, ...) is left to the caller; everything here is plain
//! serializable data.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::aggregate::{frequency_table, IdentifierExtractor};
use crate::pipeline::SourceLines;
use crate::store::CategoryStore;
use crate::taxonomy::CategoryKind;

pub const UNKNOWN: &str = "Unknown";
pub const REPORT_TOP_N: usize = 5;
pub const EXAMPLES_PER_CATEGORY: usize = 3;
const EXAMPLE_MAX_CHARS: usize = 100;

static RE_MODEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"model=([^,\s]+)").unwrap());
static RE_ANDROID: Lazy<Regex> = Lazy::new(|| Regex::new(r"Android\s+(\d+(\.\d+)*)").unwrap());
static RE_KERNEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Linux\s+version\s+([^\s]+)").unwrap());

static RE_CALL_IN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)type:\s*1|INCOMING").unwrap());
static RE_CALL_OUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)type:\s*2|OUTGOING").unwrap());
static RE_CALL_MISSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)type:\s*3|MISSED").unwrap());
static RE_SMS_IN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)type:\s*1|INCOMING|from:").unwrap());
static RE_SMS_OUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)type:\s*2|OUTGOING|to:").unwrap());

/// Presence of one input section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Section<T> {
    NotFound,
    Empty,
    Present(T),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model: String,
    pub android_version: String,
    pub kernel_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            model: UNKNOWN.to_string(),
            android_version: UNKNOWN.to_string(),
            kernel_version: UNKNOWN.to_string(),
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Scan the whole logcat text; the first occurrence of each marker wins.
pub fn device_info(text: &str) -> DeviceInfo {
    let mut info = DeviceInfo::default();
    if let Some(m) = first_capture(&RE_MODEL, text) {
        info.model = m;
    }
    if let Some(v) = first_capture(&RE_ANDROID, text) {
        info.android_version = v;
    }
    if let Some(k) = first_capture(&RE_KERNEL, text) {
        info.kernel_version = k;
    }
    info
}

fn count_matches<S: AsRef<str>>(lines: &[S], re: &Regex) -> usize {
    lines.iter().filter(|l| re.is_match(l.as_ref())).count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub total: usize,
    pub incoming: usize,
    pub outgoing: usize,
    pub missed: usize,
    pub top_numbers: Vec<(String, usize)>,
}

pub fn call_stats<S: AsRef<str>>(lines: &[S], top_n: usize) -> CallStats {
    let table = frequency_table(lines, &IdentifierExtractor::phone_numbers());
    CallStats {
        total: lines.len(),
        incoming: count_matches(lines, &RE_CALL_IN),
        outgoing: count_matches(lines, &RE_CALL_OUT),
        missed: count_matches(lines, &RE_CALL_MISSED),
        top_numbers: table.top(top_n),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsStats {
    pub total: usize,
    pub incoming: usize,
    pub outgoing: usize,
    pub top_senders: Vec<(String, usize)>,
}

pub fn sms_stats<S: AsRef<str>>(lines: &[S], top_n: usize) -> SmsStats {
    let table = frequency_table(lines, &IdentifierExtractor::sms_senders());
    SmsStats {
        total: lines.len(),
        incoming: count_matches(lines, &RE_SMS_IN),
        outgoing: count_matches(lines, &RE_SMS_OUT),
        top_senders: table.top(top_n),
    }
}

/// Shorten `line` to at most 100 characters, marking the cut with `...`.
pub fn truncate_example(line: &str) -> String {
    let line = line.trim();
    if line.chars().count() <= EXAMPLE_MAX_CHARS {
        return line.to_string();
    }
    let mut out: String = line.chars().take(EXAMPLE_MAX_CHARS - 3).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: CategoryKind,
    pub entries: usize,
    pub examples: Vec<String>,
}

pub fn category_summaries(store: &CategoryStore) -> Vec<CategorySummary> {
    store
        .snapshot()
        .into_iter()
        .map(|(category, lines)| CategorySummary {
            category,
            entries: lines.len(),
            examples: lines
                .iter()
                .take(EXAMPLES_PER_CATEGORY)
                .map(|l| truncate_example(l))
                .collect(),
        })
        .collect()
}

fn section<T>(source: &SourceLines, build: impl FnOnce(&[String]) -> T) -> Section<T> {
    match source {
        SourceLines::NotFound => Section::NotFound,
        SourceLines::Lines(l) if l.is_empty() => Section::Empty,
        SourceLines::Lines(l) => Section::Present(build(l)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForensicReport {
    pub generated_at: DateTime<Utc>,
    pub device: DeviceInfo,
    pub calls: Section<CallStats>,
    pub sms: Section<SmsStats>,
    pub categories: Vec<CategorySummary>,
}

impl ForensicReport {
    /// Assemble a report from the three raw sources and the category store
    /// populated from the logcat source.
    pub fn build(
        logcat: &SourceLines,
        calls: &SourceLines,
        sms: &SourceLines,
        store: &CategoryStore,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generated_at,
            device: device_info(&logcat.lines().join("\n")),
            calls: section(calls, |l| call_stats(l, REPORT_TOP_N)),
            sms: section(sms, |l| sms_stats(l, REPORT_TOP_N)),
            categories: category_summaries(store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_short_lines() {
        assert_eq!(truncate_example("  short  "), "short");
        let long = "x".repeat(150);
        let cut = truncate_example(&long);
        assert_eq!(cut.chars().count(), 100);
        assert!(cut.ends_with("..."));
    }
}
