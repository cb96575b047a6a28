use chrono::{TimeZone, Utc};
use logcatscope::classifier::Classifier;
use logcatscope::config::IngestConfig;
use logcatscope::filter::{FilterSpec, TimeRange};
use logcatscope::pipeline::{self, FnSink, IngestionPipeline, LiveEvent, PipelineError, SourceLines};
use logcatscope::store::{CategoryStore, StoreError};
use logcatscope::taxonomy::{CategoryKind, Taxonomy};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

fn pipeline_with(store: Arc<CategoryStore>, config: IngestConfig) -> IngestionPipeline {
    let classifier = Arc::new(Classifier::new(Arc::new(Taxonomy::builtin().unwrap())));
    IngestionPipeline::new(classifier, store, config)
}

fn pipeline() -> IngestionPipeline {
    pipeline_with(Arc::new(CategoryStore::in_memory()), IngestConfig::default())
}

#[test]
fn missing_source_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let got = pipeline::read_source(&dir.path().join("call_logs.txt")).unwrap();
    assert_eq!(got, SourceLines::NotFound);
    assert!(got.lines().is_empty());
}

#[test]
fn source_is_decoded_lossily() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("android_logcat.txt");
    std::fs::write(&path, b"I/ActivityManager: ok\nE/Foo: bad \xfe\xff\n").unwrap();
    let got = pipeline::read_source(&path).unwrap();
    assert!(got.is_found());
    assert_eq!(got.lines().len(), 2);
    assert!(got.lines()[1].starts_with("E/Foo: bad "));
}

#[test]
fn batch_rebuilds_category_buffers() {
    let p = pipeline();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    p.run_batch(&["FATAL old crash"], now).unwrap();

    let lines = [
        "03-01 11:30:00 I/ActivityManager: Start service com.app/.Sync",
        "03-01 11:31:00 D/WifiManager: wifi connected",
        "nothing to see",
    ];
    let batch = p.run_batch(&lines, now).unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(p.store().len(CategoryKind::Crash), 0);
    assert_eq!(p.store().lines(CategoryKind::Application), vec![lines[0]]);
    assert_eq!(p.store().lines(CategoryKind::Service), vec![lines[0]]);
    assert_eq!(p.store().lines(CategoryKind::Network), vec![lines[1]]);
    assert_eq!(batch.in_category(CategoryKind::Network).count(), 1);
    assert_eq!(batch.timestamps().len(), 2);
    assert_eq!(batch.category_counts()[&CategoryKind::Application], 1);
    assert!(!p.store().is_writer_active());

    let recent = batch.filter(&FilterSpec::all(now).with_range(TimeRange::LastHour)).unwrap();
    assert_eq!(recent.len(), 2);
}

#[test]
fn batch_refused_while_live_writer_holds_lease() {
    let p = pipeline();
    let _lease = p.store().acquire_writer().unwrap();
    let err = p.run_batch(&["x"], Utc::now()).unwrap_err();
    assert!(matches!(err, PipelineError::Store(StoreError::WriterBusy)));
}

#[test]
fn live_mode_needs_a_runtime() {
    let p = pipeline();
    let (tx, _rx) = mpsc::channel::<LiveEvent>(8);
    assert!(matches!(p.start_live(tx), Err(PipelineError::NoRuntime)));
    assert!(!p.store().is_writer_active());
}

#[tokio::test]
async fn live_events_follow_arrival_order() {
    let p = pipeline();
    let (tx, mut rx) = mpsc::channel::<LiveEvent>(64);
    let session = p.start_live(tx).unwrap();
    assert!(p.store().is_writer_active());

    let input = session.sender();
    input.send("I/ActivityManager: bindService com.app".to_string()).await.unwrap();
    input.send("plain text".to_string()).await.unwrap();
    input.send("socket closed".to_string()).await.unwrap();
    drop(input);

    let stats = session.stop().await.unwrap();
    assert_eq!(stats.lines, 3);
    assert_eq!(stats.categorized, 2);
    assert_eq!(stats.per_category[&CategoryKind::Service], 1);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    let expected = vec![
        LiveEvent::Raw { line: "I/ActivityManager: bindService com.app".into() },
        LiveEvent::Categorized { category: CategoryKind::Application, line: "I/ActivityManager: bindService com.app".into() },
        LiveEvent::Categorized { category: CategoryKind::Service, line: "I/ActivityManager: bindService com.app".into() },
        LiveEvent::Raw { line: "plain text".into() },
        LiveEvent::Raw { line: "socket closed".into() },
        LiveEvent::Categorized { category: CategoryKind::Network, line: "socket closed".into() },
    ];
    assert_eq!(events, expected);
    assert!(!p.store().is_writer_active());
    assert_eq!(p.store().lines(CategoryKind::Network), vec!["socket closed"]);
}

#[tokio::test]
async fn stop_drains_every_queued_line() {
    let config = IngestConfig { channel_capacity: 512, drain_batch: 4, ..Default::default() };
    let p = pipeline_with(Arc::new(CategoryStore::in_memory()), config);
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    let sink = FnSink(move |ev: LiveEvent| {
        if matches!(ev, LiveEvent::Raw { .. }) {
            *counter.lock().unwrap() += 1;
        }
    });
    let session = p.start_live(sink).unwrap();
    let input = session.sender();
    for i in 0..300 {
        input.send(format!("line {i} tcp retransmit")).await.unwrap();
    }
    let stats = session.stop().await.unwrap();
    assert_eq!(stats.lines, 300);
    assert_eq!(*seen.lock().unwrap(), 300);
    assert_eq!(p.store().len(CategoryKind::Network), 300);

    // the queue is closed once the session has stopped
    assert!(input.send("late".to_string()).await.is_err());
}

#[tokio::test]
async fn reader_feeds_lines_until_eof() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CategoryStore::with_dir(dir.path()));
    let p = pipeline_with(Arc::clone(&store), IngestConfig::default());
    let (tx, mut rx) = mpsc::channel::<LiveEvent>(64);
    let mut session = p.start_live(tx).unwrap();

    let data: &'static [u8] = b"FATAL EXCEPTION: main\r\nGC_CONCURRENT freed 1K\nno newline at end";
    session.spawn_reader(data);
    session.join_readers().await;
    let stats = session.stop().await.unwrap();
    assert_eq!(stats.lines, 3);
    assert_eq!(stats.categorized, 2);

    let mut raws = Vec::new();
    while let Some(ev) = rx.recv().await {
        if let LiveEvent::Raw { line } = ev {
            raws.push(line);
        }
    }
    assert_eq!(raws, vec!["FATAL EXCEPTION: main", "GC_CONCURRENT freed 1K", "no newline at end"]);
    let crash = std::fs::read_to_string(dir.path().join("crash_logs.txt")).unwrap();
    assert_eq!(crash, "=== Crash Logs ===\nFATAL EXCEPTION: main\n");
}

#[tokio::test]
async fn stop_keeps_the_line_a_blocked_reader_holds() {
    let config = IngestConfig { channel_capacity: 1, drain_batch: 1, ..Default::default() };
    let p = pipeline_with(Arc::new(CategoryStore::in_memory()), config);
    let (tx, mut rx) = mpsc::channel::<LiveEvent>(1);
    let mut session = p.start_live(tx).unwrap();

    let data: &'static [u8] = b"l0\nl1\nl2\nl3\nl4\nl5\nl6\nl7\nl8\nl9\n";
    session.spawn_reader(data);
    // nobody reads events yet: the consumer stalls on its sink, the queue
    // fills and the reader parks in send with a line in hand
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let collector = tokio::spawn(async move {
        let mut raws = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let LiveEvent::Raw { line } = ev {
                raws.push(line);
            }
        }
        raws
    });
    let stats = session.stop().await.unwrap();
    let raws = collector.await.unwrap();

    assert_eq!(raws.len(), stats.lines);
    let expected: Vec<String> = (0..stats.lines).map(|i| format!("l{i}")).collect();
    assert_eq!(raws, expected);
    assert_eq!(stats.lines, 4);
    assert!(!p.store().is_writer_active());
}

#[tokio::test]
async fn recent_history_is_bounded() {
    let config = IngestConfig { recent_capacity: 10, recent_trim: 5, ..Default::default() };
    let p = pipeline_with(Arc::new(CategoryStore::in_memory()), config);
    let session = p.start_live(FnSink(|_ev: LiveEvent| {})).unwrap();
    let input = session.sender();
    for i in 0..11 {
        input.send(format!("line {i}")).await.unwrap();
    }
    drop(input);
    // wait until the consumer has seen everything, then inspect before stopping
    for _ in 0..100 {
        if session.recent().last().map(String::as_str) == Some("line 10") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let recent = session.recent();
    assert_eq!(recent.len(), 6);
    assert_eq!(recent[0], "line 5");
    session.stop().await.unwrap();
}
