use logcatscope::config::{ConfigError, IngestConfig};
use std::io::Write;

#[test]
fn partial_file_keeps_defaults() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    write!(f, r#"{{"drain_batch": 16, "output_dir": "logs/logcat_types"}}"#).unwrap();
    let cfg = IngestConfig::from_json_file(f.path()).unwrap();
    assert_eq!(cfg.drain_batch, 16);
    assert_eq!(cfg.output_dir.as_deref(), Some(std::path::Path::new("logs/logcat_types")));
    assert_eq!(cfg.channel_capacity, IngestConfig::default().channel_capacity);
    assert_eq!(cfg.top_n, 10);
}

#[test]
fn invalid_values_are_rejected_on_load() {
    match IngestConfig::from_json_str(r#"{"channel_capacity": 0}"#) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "channel_capacity"),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(matches!(
        IngestConfig::from_json_str(r#"{"distribution_threshold_pct": 150.0}"#),
        Err(ConfigError::Invalid { .. })
    ));
    assert!(matches!(IngestConfig::from_json_str(r#"{"bogus": 1}"#), Err(ConfigError::Json(_))));
}

#[test]
fn missing_file_reports_path() {
    let err = IngestConfig::from_json_file(std::path::Path::new("/nonexistent/logcatscope.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/logcatscope.json"));
}
