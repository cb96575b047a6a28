use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

use crate::filter::Severity;
use crate::taxonomy::{CategoryKind, Taxonomy, CATCH_ALL_SUBTYPE};
use crate::timestamp;

/// One classified input line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub raw: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Matching categories in declared order; empty when uncategorized.
    pub categories: Vec<CategoryKind>,
}

impl LogLine {
    pub fn in_category(&self, kind: CategoryKind) -> bool {
        self.categories.contains(&kind)
    }

    pub fn is_categorized(&self) -> bool {
        !self.categories.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    taxonomy: Arc<Taxonomy>,
}

impl Classifier {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Every category whose pattern occurs in `raw`. Categories are not
    /// mutually exclusive.
    pub fn categorize(&self, raw: &str) -> Vec<CategoryKind> {
        self.taxonomy
            .categories()
            .iter()
            .filter(|c| c.pattern.is_match(raw))
            .map(|c| c.kind)
            .collect()
    }

    pub fn classify_at(&self, raw: &str, now: DateTime<Utc>) -> LogLine {
        LogLine {
            raw: raw.to_string(),
            timestamp: timestamp::extract_at(raw, now),
            categories: self.categorize(raw),
        }
    }

    /// Classify a batch in parallel; output order equals input order.
    pub fn classify_all<S>(&self, lines: &[S], now: DateTime<Utc>) -> Vec<LogLine>
    where
        S: AsRef<str> + Sync,
    {
        lines
            .par_iter()
            .map(|l| self.classify_at(l.as_ref(), now))
            .collect()
    }

    /// First matching sub-type of `kind`, or the catch-all.
    pub fn subtype<'a>(&'a self, kind: CategoryKind, raw: &str) -> &'a str {
        self.taxonomy
            .subtypes(kind)
            .first_match(raw)
            .map(String::as_str)
            .unwrap_or(CATCH_ALL_SUBTYPE)
    }

    /// First matching severity in Error, Warning, Info, Debug, Verbose order;
    /// Info when no marker is present.
    pub fn severity(&self, raw: &str) -> Severity {
        self.taxonomy
            .severities()
            .first_match(raw)
            .copied()
            .unwrap_or(Severity::Info)
    }
}
