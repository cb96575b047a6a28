//! Batch and live ingestion.
//!
//! Batch mode classifies a whole source at once and rebuilds the category
//! store. Live mode runs one consumer task that reads from a bounded queue,
//! classifies each line in arrival order and hands the results to an
//! [`EventSink`]:
//!
//! ```text
//! reader task(s) -> mpsc<String> -> consumer -> StoreWriter
//!                                            -> EventSink (Raw, Categorized...)
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, LogLine};
use crate::config::IngestConfig;
use crate::filter::{FilterEngine, FilterError, FilterSpec};
use crate::store::{CategoryStore, StoreError, StoreWriter};
use crate::taxonomy::CategoryKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("live ingestion requires a running tokio runtime")]
    NoRuntime,
    #[error("ingestion task failed: {0}")]
    Task(String),
}

/// Contents of one input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLines {
    NotFound,
    Lines(Vec<String>),
}

impl SourceLines {
    pub fn lines(&self) -> &[String] {
        match self {
            SourceLines::Lines(l) => l,
            SourceLines::NotFound => &[],
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SourceLines::Lines(_))
    }
}

/// Split raw bytes into lines. Invalid UTF-8 is replaced, never rejected.
pub fn decode_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes).lines().map(str::to_string).collect()
}

pub fn read_source(path: &Path) -> Result<SourceLines, PipelineError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(SourceLines::Lines(decode_lines(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "source not found");
            Ok(SourceLines::NotFound)
        }
        Err(source) => Err(PipelineError::Io { path: path.display().to_string(), source }),
    }
}

/// Classified result of one batch run.
#[derive(Debug, Clone)]
pub struct Batch {
    classifier: Arc<Classifier>,
    lines: Vec<LogLine>,
}

impl Batch {
    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn filter(&self, spec: &FilterSpec) -> Result<Vec<&LogLine>, PipelineError> {
        let engine = FilterEngine::new(spec, self.classifier.taxonomy())?;
        Ok(engine.apply(&self.lines))
    }

    pub fn in_category(&self, kind: CategoryKind) -> impl Iterator<Item = &LogLine> + '_ {
        self.lines.iter().filter(move |l| l.in_category(kind))
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.lines.iter().filter_map(|l| l.timestamp).collect()
    }

    pub fn category_counts(&self) -> BTreeMap<CategoryKind, usize> {
        let mut counts: BTreeMap<CategoryKind, usize> =
            CategoryKind::ALL.iter().map(|k| (*k, 0)).collect();
        for kind in self.lines.iter().flat_map(|l| l.categories.iter()) {
            *counts.entry(*kind).or_insert(0) += 1;
        }
        counts
    }
}

/// One notification emitted by a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    Raw { line: String },
    Categorized { category: CategoryKind, line: String },
}

/// Receiver of live events. Called from the consumer task, in arrival order.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: LiveEvent) -> impl Future<Output = ()> + Send;
}

impl EventSink for mpsc::Sender<LiveEvent> {
    fn publish(&self, event: LiveEvent) -> impl Future<Output = ()> + Send {
        async move {
            if self.send(event).await.is_err() {
                debug!("live event receiver dropped");
            }
        }
    }
}

/// Adapts a synchronous closure into an [`EventSink`].
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(LiveEvent) + Send + Sync + 'static,
{
    fn publish(&self, event: LiveEvent) -> impl Future<Output = ()> + Send {
        (self.0)(event);
        std::future::ready(())
    }
}

/// Bounded display history. Once `capacity` is exceeded the oldest `trim`
/// lines are dropped in one step.
#[derive(Debug, Clone)]
pub struct RecentLines {
    lines: VecDeque<String>,
    capacity: usize,
    trim: usize,
}

impl RecentLines {
    pub fn new(capacity: usize, trim: usize) -> Self {
        Self { lines: VecDeque::with_capacity(capacity + 1), capacity, trim: trim.max(1) }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        if self.lines.len() > self.capacity {
            let n = self.trim.min(self.lines.len());
            self.lines.drain(..n);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub lines: usize,
    pub categorized: usize,
    pub per_category: BTreeMap<CategoryKind, usize>,
}

pub struct IngestionPipeline {
    classifier: Arc<Classifier>,
    store: Arc<CategoryStore>,
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(classifier: Arc<Classifier>, store: Arc<CategoryStore>, config: IngestConfig) -> Self {
        Self { classifier, store, config }
    }

    pub fn classifier(&self) -> &Arc<Classifier> {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<CategoryStore> {
        &self.store
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Classify `lines`, rebuild every category buffer from them and return
    /// the classified batch.
    pub fn run_batch<S>(&self, lines: &[S], now: DateTime<Utc>) -> Result<Batch, PipelineError>
    where
        S: AsRef<str> + Sync,
    {
        let started = Instant::now();
        let mut writer = self.store.acquire_writer()?;
        writer.reset()?;
        let classified = self.classifier.classify_all(lines, now);
        let mut categorized = 0usize;
        for line in &classified {
            if line.is_categorized() {
                categorized += 1;
            }
            for kind in &line.categories {
                writer.append(*kind, &line.raw);
            }
        }
        writer.flush();
        info!(
            lines = classified.len(),
            categorized,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch classified"
        );
        Ok(Batch { classifier: Arc::clone(&self.classifier), lines: classified })
    }

    /// Take the writer lease and start the live consumer on the current
    /// tokio runtime. New lines are appended to the existing buffers.
    pub fn start_live<K: EventSink>(&self, sink: K) -> Result<LiveSession, PipelineError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let writer = self.store.acquire_writer()?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let cancel = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let recent = Arc::new(Mutex::new(RecentLines::new(
            self.config.recent_capacity,
            self.config.recent_trim,
        )));
        let consumer = Consumer {
            classifier: Arc::clone(&self.classifier),
            writer,
            rx,
            sink,
            recent: Arc::clone(&recent),
            drain_batch: self.config.drain_batch.max(1),
            stats: LiveStats::default(),
        };
        let task = handle.spawn(consumer.run(shutdown.clone()));
        info!(capacity = self.config.channel_capacity, "live session started");
        Ok(LiveSession { tx, cancel, shutdown, consumer: task, readers: Vec::new(), recent })
    }
}

struct Consumer<K> {
    classifier: Arc<Classifier>,
    writer: StoreWriter,
    rx: mpsc::Receiver<String>,
    sink: K,
    recent: Arc<Mutex<RecentLines>>,
    drain_batch: usize,
    stats: LiveStats,
}

impl<K: EventSink> Consumer<K> {
    async fn run(mut self, shutdown: CancellationToken) -> LiveStats {
        loop {
            let first = tokio::select! {
                line = self.rx.recv() => line,
                _ = shutdown.cancelled() => break,
            };
            let Some(first) = first else {
                debug!("live queue closed by all producers");
                break;
            };
            self.process(first).await;
            let mut taken = 1;
            while taken < self.drain_batch {
                match self.rx.try_recv() {
                    Ok(line) => {
                        self.process(line).await;
                        taken += 1;
                    }
                    Err(_) => break,
                }
            }
            tokio::task::yield_now().await;
        }

        // no new lines are accepted; everything already queued is processed
        self.rx.close();
        let mut drained = 0usize;
        while let Some(line) = self.rx.recv().await {
            self.process(line).await;
            drained += 1;
        }
        self.writer.flush();
        info!(
            lines = self.stats.lines,
            categorized = self.stats.categorized,
            drained,
            "live session stopped"
        );
        self.stats
    }

    async fn process(&mut self, raw: String) {
        let line = self.classifier.classify_at(&raw, Utc::now());
        self.stats.lines += 1;
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(raw.as_str());
        self.sink.publish(LiveEvent::Raw { line: raw.clone() }).await;
        if line.is_categorized() {
            self.stats.categorized += 1;
        }
        for kind in line.categories {
            self.writer.append(kind, &raw);
            *self.stats.per_category.entry(kind).or_insert(0) += 1;
            self.sink
                .publish(LiveEvent::Categorized { category: kind, line: raw.clone() })
                .await;
        }
    }
}

/// Handle to a running live ingestion. Holds the store's writer lease until
/// [`LiveSession::stop`] returns.
///
/// `cancel` stops the readers; `shutdown` stops the consumer once every
/// reader has handed over the line it was holding.
pub struct LiveSession {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    consumer: JoinHandle<LiveStats>,
    readers: Vec<JoinHandle<()>>,
    recent: Arc<Mutex<RecentLines>>,
}

impl LiveSession {
    /// Bounded producer handle; `send` waits while the queue is full.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }

    /// Token that stops the reader tasks. The consumer keeps running until
    /// [`LiveSession::stop`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Feed lines from `reader` until EOF, a read error or cancellation.
    pub fn spawn_reader<R>(&mut self, reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.readers.push(tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    r = reader.read_until(b'\n', &mut buf) => r,
                };
                match read {
                    Ok(0) => {
                        debug!("live reader reached end of input");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "live reader failed");
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if let Err(mpsc::error::SendError(line)) = tx.send(line).await {
                    warn!(%line, "live queue closed, line not ingested");
                    break;
                }
            }
        }));
    }

    /// Wait until every reader task has finished.
    pub async fn join_readers(&mut self) {
        for handle in self.readers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "live reader task aborted");
            }
        }
    }

    pub fn recent(&self) -> Vec<String> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).to_vec()
    }

    /// Stop the readers and wait for them to deliver the lines they already
    /// read, then drain every queued line and release the lease.
    pub async fn stop(mut self) -> Result<LiveStats, PipelineError> {
        self.cancel.cancel();
        self.join_readers().await;
        drop(self.tx);
        self.shutdown.cancel();
        self.consumer.await.map_err(|e| PipelineError::Task(e.to_string()))
    }
}
