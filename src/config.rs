//! Ingestion settings.
//!
//! [`IngestConfig`] carries the queue sizes, display history bounds and
//! aggregation defaults shared by the library and the CLI. Every field has a
//! default, so a JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregate::{DEFAULT_THRESHOLD_PCT, DEFAULT_TOP_N};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config field {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.to_owned(), reason: reason.into() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Bounded capacity of the live line queue.
    pub channel_capacity: usize,
    /// Capacity of the event channel handed to the CLI sink.
    pub event_capacity: usize,
    /// Lines processed per consumer wake-up before yielding.
    pub drain_batch: usize,
    pub recent_capacity: usize,
    pub recent_trim: usize,
    pub top_n: usize,
    pub distribution_threshold_pct: f64,
    /// Directory for `<category>_logs.txt` files; in-memory only when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            event_capacity: 1024,
            drain_batch: 64,
            recent_capacity: 1000,
            recent_trim: 100,
            top_n: DEFAULT_TOP_N,
            distribution_threshold_pct: DEFAULT_THRESHOLD_PCT,
            output_dir: None,
        }
    }
}

impl IngestConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be greater than 0"));
        }
        if self.drain_batch == 0 {
            return Err(invalid("drain_batch", "must be greater than 0"));
        }
        if self.recent_capacity == 0 {
            return Err(invalid("recent_capacity", "must be greater than 0"));
        }
        if self.recent_trim == 0 || self.recent_trim > self.recent_capacity {
            return Err(invalid(
                "recent_trim",
                format!("must be between 1 and recent_capacity ({})", self.recent_capacity),
            ));
        }
        if self.top_n == 0 {
            return Err(invalid("top_n", "must be greater than 0"));
        }
        let pct = self.distribution_threshold_pct;
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(invalid("distribution_threshold_pct", format!("{pct} is not within 0..=100")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(IngestConfig::default().validate().is_ok());
    }

    #[test]
    fn trim_larger_than_capacity_is_rejected() {
        let cfg = IngestConfig { recent_capacity: 10, recent_trim: 11, ..Default::default() };
        match cfg.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "recent_trim"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
