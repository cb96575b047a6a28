use chrono::{Duration, TimeZone, Utc};
use logcatscope::classifier::{Classifier, LogLine};
use logcatscope::filter::{self, FilterEngine, FilterError, FilterSpec, Severity, TimeRange};
use logcatscope::taxonomy::{CategoryKind, Taxonomy};
use std::sync::Arc;

fn line(raw: &str, ts: Option<chrono::DateTime<Utc>>) -> LogLine {
    LogLine { raw: raw.to_string(), timestamp: ts, categories: Vec::new() }
}

#[test]
fn bounded_range_rejects_untimestamped_lines() {
    let tax = Taxonomy::builtin().unwrap();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let lines = vec![
        line("recent", Some(now - Duration::minutes(30))),
        line("old", Some(now - Duration::hours(2))),
        line("no stamp", None),
    ];
    let hour = FilterSpec::all(now).with_range(TimeRange::LastHour);
    let kept: Vec<&str> = filter::apply(&lines, &hour, &tax).unwrap().iter().map(|l| l.raw.as_str()).collect();
    assert_eq!(kept, vec!["recent"]);

    let all = FilterSpec::all(now);
    assert_eq!(filter::apply(&lines, &all, &tax).unwrap().len(), 3);
}

#[test]
fn untimestamped_input_passes_only_all_time() {
    let tax = Taxonomy::builtin().unwrap();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let lines = vec![
        line("--------- beginning of main", None),
        line("I/ActivityManager: Displayed com.app/.Main", None),
        line("FATAL EXCEPTION: main", None),
    ];
    for range in [TimeRange::LastHour, TimeRange::LastDay, TimeRange::LastWeek] {
        let spec = FilterSpec::all(now).with_range(range);
        assert!(filter::apply(&lines, &spec, &tax).unwrap().is_empty(), "{range:?}");
    }
    let all = filter::apply(&lines, &FilterSpec::all(now), &tax).unwrap();
    assert_eq!(all.len(), lines.len());
}

#[test]
fn range_boundaries_are_inclusive() {
    let tax = Taxonomy::builtin().unwrap();
    let now = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
    let lines = vec![
        line("edge of day", Some(now - Duration::hours(24))),
        line("edge of week", Some(now - Duration::days(7))),
        line("past week", Some(now - Duration::days(7) - Duration::seconds(1))),
    ];
    let day = FilterSpec::all(now).with_range(TimeRange::LastDay);
    assert_eq!(filter::apply(&lines, &day, &tax).unwrap().len(), 1);
    let week = FilterSpec::all(now).with_range(TimeRange::LastWeek);
    assert_eq!(filter::apply(&lines, &week, &tax).unwrap().len(), 2);
}

#[test]
fn keyword_is_case_insensitive_substring() {
    let tax = Taxonomy::builtin().unwrap();
    let now = Utc::now();
    let lines = vec![line("Bluetooth adapter ON", None), line("wifi on", None)];
    let spec = FilterSpec::all(now).with_keyword("BLUETOOTH");
    let kept = filter::apply(&lines, &spec, &tax).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].raw, "Bluetooth adapter ON");

    // blank keyword is no constraint
    let spec = FilterSpec::all(now).with_keyword("   ");
    assert_eq!(filter::apply(&lines, &spec, &tax).unwrap().len(), 2);
}

#[test]
fn criteria_are_conjunctive() {
    let tax = Arc::new(Taxonomy::builtin().unwrap());
    let classifier = Classifier::new(Arc::clone(&tax));
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let raw = [
        "03-01 11:30:00 E/AndroidRuntime: FATAL NullPointerException in com.app",
        "03-01 11:40:00 W/AndroidRuntime: NullPointerException swallowed",
        "03-01 08:00:00 E/AndroidRuntime: FATAL NullPointerException in com.app",
        "03-01 11:50:00 E/AndroidRuntime: FATAL OutOfMemoryError in com.app",
    ];
    let lines = classifier.classify_all(&raw, now);
    let spec = FilterSpec::all(now)
        .with_range(TimeRange::LastHour)
        .with_keyword("com.app")
        .with_severity(Severity::Error)
        .with_subtype(CategoryKind::Crash, "NullPointer");
    let engine = FilterEngine::new(&spec, &tax).unwrap();
    let kept = engine.apply(&lines);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].raw, raw[0]);
}

#[test]
fn severity_filter_tests_its_own_pattern() {
    let tax = Taxonomy::builtin().unwrap();
    let lines = vec![line("W/Foo: WARN then ERROR", None), line("I/Foo: fine", None)];
    // first-match resolution would call the first line Error; the filter still
    // accepts it for Warning because its Warning marker is present
    let spec = FilterSpec::all(Utc::now()).with_severity(Severity::Warning);
    let kept = filter::apply(&lines, &spec, &tax).unwrap();
    assert_eq!(kept.len(), 1);
}

#[test]
fn unknown_subtype_is_an_error() {
    let tax = Taxonomy::builtin().unwrap();
    let spec = FilterSpec::all(Utc::now()).with_subtype(CategoryKind::Crash, "Segfault");
    match FilterEngine::new(&spec, &tax) {
        Err(FilterError::UnknownSubtype { category, name }) => {
            assert_eq!(category, CategoryKind::Crash);
            assert_eq!(name, "Segfault");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn time_range_and_severity_parse_from_cli_labels() {
    assert_eq!("1h".parse::<TimeRange>().unwrap(), TimeRange::LastHour);
    assert_eq!("Past 24 hours".parse::<TimeRange>().unwrap(), TimeRange::LastDay);
    assert_eq!("7d".parse::<TimeRange>().unwrap(), TimeRange::LastWeek);
    assert_eq!("All".parse::<TimeRange>().unwrap(), TimeRange::AllTime);
    assert!("2w".parse::<TimeRange>().is_err());
    assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
    assert!("fatal".parse::<Severity>().is_err());
}
