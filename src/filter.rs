use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::classifier::LogLine;
use crate::taxonomy::{CategoryKind, Taxonomy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown time range: {0}")]
    UnknownTimeRange(String),
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),
    #[error("category {category} has no sub-type named {name}")]
    UnknownSubtype { category: CategoryKind, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    LastHour,
    #[default]
    LastDay,
    LastWeek,
    AllTime,
}

impl TimeRange {
    /// Maximum age of a line, or `None` for AllTime.
    pub fn duration(self) -> Option<Duration> {
        match self {
            TimeRange::LastHour => Some(Duration::hours(1)),
            TimeRange::LastDay => Some(Duration::hours(24)),
            TimeRange::LastWeek => Some(Duration::days(7)),
            TimeRange::AllTime => None,
        }
    }
}

impl FromStr for TimeRange {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" | "hour" | "last-hour" | "past 1 hour" => Ok(TimeRange::LastHour),
            "24h" | "1d" | "day" | "last-day" | "past 24 hours" => Ok(TimeRange::LastDay),
            "7d" | "week" | "last-week" | "past 7 days" => Ok(TimeRange::LastWeek),
            "all" | "all-time" | "all time" => Ok(TimeRange::AllTime),
            _ => Err(FilterError::UnknownTimeRange(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Error,
        Severity::Warning,
        Severity::Info,
        Severity::Debug,
        Severity::Verbose,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Debug => "Debug",
            Severity::Verbose => "Verbose",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Severity {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "e" => Ok(Severity::Error),
            "warning" | "warn" | "w" => Ok(Severity::Warning),
            "info" | "i" => Ok(Severity::Info),
            "debug" | "d" => Ok(Severity::Debug),
            "verbose" | "v" => Ok(Severity::Verbose),
            _ => Err(FilterError::UnknownSeverity(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtypeRef {
    pub category: CategoryKind,
    pub name: String,
}

/// Complete description of one filter request. `now` anchors the time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub time_range: TimeRange,
    pub keyword: Option<String>,
    pub severity: Option<Severity>,
    pub subtype: Option<SubtypeRef>,
    pub now: DateTime<Utc>,
}

impl FilterSpec {
    /// A spec that passes every line.
    pub fn all(now: DateTime<Utc>) -> Self {
        Self { time_range: TimeRange::AllTime, keyword: None, severity: None, subtype: None, now }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_subtype(mut self, category: CategoryKind, name: impl Into<String>) -> Self {
        self.subtype = Some(SubtypeRef { category, name: name.into() });
        self
    }
}

/// A [`FilterSpec`] resolved against a taxonomy.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    max_age: Option<Duration>,
    now: DateTime<Utc>,
    keyword: Option<String>,
    severity: Option<Regex>,
    subtype: Option<Regex>,
}

impl FilterEngine {
    pub fn new(spec: &FilterSpec, taxonomy: &Taxonomy) -> Result<Self, FilterError> {
        let keyword = spec
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        let severity = spec
            .severity
            .and_then(|s| taxonomy.severity_pattern(s).cloned());
        let subtype = match &spec.subtype {
            Some(r) => Some(
                taxonomy
                    .subtype_pattern(r.category, &r.name)
                    .cloned()
                    .ok_or_else(|| FilterError::UnknownSubtype {
                        category: r.category,
                        name: r.name.clone(),
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            max_age: spec.time_range.duration(),
            now: spec.now,
            keyword,
            severity,
            subtype,
        })
    }

    pub fn matches(&self, line: &LogLine) -> bool {
        if let Some(max_age) = self.max_age {
            // untimestamped lines never satisfy a bounded range
            match line.timestamp {
                Some(ts) if self.now - ts <= max_age => {}
                _ => return false,
            }
        }
        if let Some(k) = &self.keyword {
            if !line.raw.to_lowercase().contains(k.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.severity {
            if !re.is_match(&line.raw) {
                return false;
            }
        }
        if let Some(re) = &self.subtype {
            if !re.is_match(&line.raw) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, lines: &'a [LogLine]) -> Vec<&'a LogLine> {
        lines.iter().filter(|l| self.matches(l)).collect()
    }

    pub fn apply_owned(&self, lines: &[LogLine]) -> Vec<LogLine> {
        lines.iter().filter(|l| self.matches(l)).cloned().collect()
    }
}

/// One-shot convenience: resolve `spec` and apply it.
pub fn apply<'a>(
    lines: &'a [LogLine],
    spec: &FilterSpec,
    taxonomy: &Taxonomy,
) -> Result<Vec<&'a LogLine>, FilterError> {
    Ok(FilterEngine::new(spec, taxonomy)?.apply(lines))
}
