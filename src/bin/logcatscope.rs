use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::Parser;
use logcatscope::aggregate::{self, BinMode, IdentifierExtractor};
use logcatscope::classifier::{Classifier, LogLine};
use logcatscope::config::IngestConfig;
use logcatscope::filter::{FilterEngine, FilterSpec, Severity, TimeRange};
use logcatscope::pipeline::{self, IngestionPipeline, LiveEvent, SourceLines};
use logcatscope::report::ForensicReport;
use logcatscope::store::CategoryStore;
use logcatscope::taxonomy::{CategoryKind, Taxonomy};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

#[derive(Parser, Debug)]
#[command(name = "logcatscope", version, about = "Device log categorization and forensic summaries")]
struct Cli {
    /// Logcat input files (`-` for stdin). May be repeated.
    #[arg(required = false)]
    input: Vec<String>,

    /// Call record dump (one call per line)
    #[arg(long = "calls")] calls: Option<PathBuf>,
    /// Message record dump (one message per line)
    #[arg(long = "sms")] sms: Option<PathBuf>,

    /// Print only one view: categories | filter | activity | callers | senders | distribution | severity | report
    #[arg(long = "only")] only: Option<String>,

    // Filter flags, shared by every view
    /// 1h | 24h | 7d | all
    #[arg(long = "range", default_value = "24h")] range: String,
    #[arg(long = "keyword")] keyword: Option<String>,
    #[arg(long = "severity")] severity: Option<String>,
    /// Restrict to one category (also selects the category for --only distribution)
    #[arg(long = "category")] category: Option<String>,
    /// Sub-type within --category
    #[arg(long = "subtype")] subtype: Option<String>,
    /// Reference time (RFC 3339); defaults to the current time
    #[arg(long = "now")] now: Option<String>,

    #[arg(long = "top")] top: Option<usize>,
    /// Emit empty hours between the first and last active hour
    #[arg(long = "zero-fill", default_value_t = false)] zero_fill: bool,
    /// Percentage below which distribution slices merge into Other
    #[arg(long = "threshold")] threshold: Option<f64>,

    /// JSON file overriding category patterns and sub-types
    #[arg(long = "taxonomy")] taxonomy: Option<PathBuf>,
    /// JSON ingestion settings
    #[arg(long = "config")] config: Option<PathBuf>,
    /// Write `<category>_logs.txt` files here
    #[arg(long = "out-dir")] out_dir: Option<PathBuf>,

    /// Live mode: classify stdin as it arrives and print one JSON event per line
    #[arg(long = "follow", default_value_t = false)] follow: bool,

    #[arg(long = "log-level", default_value = "warn")] log_level: String,
    /// json | pretty | compact
    #[arg(long = "log-format", default_value = "compact")] log_format: String,
}

fn read_stdin_lines() -> io::Result<Vec<String>> {
    let mut bytes = Vec::new();
    io::stdin().lock().read_to_end(&mut bytes)?;
    Ok(pipeline::decode_lines(&bytes))
}

fn read_all_lines(paths: &[String]) -> anyhow::Result<SourceLines> {
    let mut out = Vec::new();
    let mut found = false;
    for p in paths {
        if p == "-" {
            out.extend(read_stdin_lines()?);
            found = true;
            continue;
        }
        match pipeline::read_source(Path::new(p))? {
            SourceLines::Lines(lines) => {
                out.extend(lines);
                found = true;
            }
            SourceLines::NotFound => warn!(path = %p, "logcat input not found"),
        }
    }
    Ok(if found { SourceLines::Lines(out) } else { SourceLines::NotFound })
}

fn read_optional(path: Option<&Path>) -> anyhow::Result<SourceLines> {
    match path {
        Some(p) => Ok(pipeline::read_source(p)?),
        None => Ok(SourceLines::NotFound),
    }
}

fn parse_now(now: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match now {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now value: {s}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn build_filter(cli: &Cli, category: Option<CategoryKind>, now: DateTime<Utc>) -> anyhow::Result<FilterSpec> {
    let mut spec = FilterSpec::all(now).with_range(cli.range.parse::<TimeRange>()?);
    if let Some(k) = &cli.keyword {
        spec = spec.with_keyword(k.clone());
    }
    if let Some(s) = &cli.severity {
        spec = spec.with_severity(s.parse::<Severity>()?);
    }
    match (&cli.subtype, category) {
        (Some(name), Some(kind)) => spec = spec.with_subtype(kind, name.clone()),
        (Some(_), None) => bail!("--subtype requires --category"),
        _ => {}
    }
    Ok(spec)
}

fn load_config(cli: &Cli) -> anyhow::Result<IngestConfig> {
    let mut cfg = match &cli.config {
        Some(p) => IngestConfig::from_json_file(p)?,
        None => IngestConfig::default(),
    };
    if let Some(d) = &cli.out_dir {
        cfg.output_dir = Some(d.clone());
    }
    if let Some(n) = cli.top {
        cfg.top_n = n;
    }
    if let Some(t) = cli.threshold {
        cfg.distribution_threshold_pct = t;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Classify a secondary source (calls, messages) and keep the lines passing `engine`.
fn filtered_raw(classifier: &Classifier, source: &SourceLines, engine: &FilterEngine, now: DateTime<Utc>) -> Vec<String> {
    let lines = classifier.classify_all(source.lines(), now);
    engine.apply_owned(&lines).into_iter().map(|l| l.raw).collect()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logcatscope::logging::init_tracing(&cli.log_level, &cli.log_format)?;
    init_parallelism();

    let cfg = load_config(&cli)?;
    let taxonomy = match &cli.taxonomy {
        Some(p) => Taxonomy::from_json_file(p)?,
        None => Taxonomy::builtin()?,
    };
    let classifier = Arc::new(Classifier::new(Arc::new(taxonomy)));
    let store = Arc::new(match &cfg.output_dir {
        Some(d) => CategoryStore::with_dir(d),
        None => CategoryStore::in_memory(),
    });
    let pipeline = IngestionPipeline::new(Arc::clone(&classifier), Arc::clone(&store), cfg.clone());

    if cli.follow {
        return run_follow(&pipeline);
    }

    let now = parse_now(cli.now.as_deref())?;
    let category = cli.category.as_deref().map(str::parse::<CategoryKind>).transpose()?;
    let spec = build_filter(&cli, category, now)?;
    let engine = FilterEngine::new(&spec, classifier.taxonomy())?;

    let input_files = if cli.input.is_empty() { vec!["-".to_string()] } else { cli.input.clone() };
    // call/message views do not need logcat input
    let needs_logcat = !matches!(cli.only.as_deref(), Some("callers") | Some("senders"));
    let logcat = if needs_logcat { read_all_lines(&input_files)? } else { SourceLines::NotFound };
    let batch = pipeline.run_batch(logcat.lines(), now)?;

    let selected: Vec<&LogLine> = batch
        .lines()
        .iter()
        .filter(|l| category.map_or(true, |k| l.in_category(k)))
        .filter(|l| engine.matches(l))
        .collect();
    let mode = if cli.zero_fill { BinMode::ZeroFill } else { BinMode::Sparse };

    match cli.only.as_deref() {
        Some("categories") => {
            let out = serde_json::json!({
                "total_lines": batch.len(),
                "categories": batch.category_counts(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Some("filter") => {
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        Some("activity") => {
            let series = aggregate::hourly_activity(selected.iter().copied(), mode);
            println!("{}", serde_json::to_string_pretty(&series)?);
        }
        Some("callers") => {
            let calls = read_optional(cli.calls.as_deref())?;
            let lines = filtered_raw(&classifier, &calls, &engine, now);
            let top = aggregate::top_identifiers(&lines, &IdentifierExtractor::phone_numbers(), cfg.top_n);
            println!("{}", serde_json::to_string_pretty(&top)?);
        }
        Some("senders") => {
            let sms = read_optional(cli.sms.as_deref())?;
            let lines = filtered_raw(&classifier, &sms, &engine, now);
            let top = aggregate::top_identifiers(&lines, &IdentifierExtractor::sms_senders(), cfg.top_n);
            println!("{}", serde_json::to_string_pretty(&top)?);
        }
        Some("distribution") => {
            let Some(kind) = category else {
                bail!("--only distribution requires --category");
            };
            let table = aggregate::subtype_distribution(&classifier, kind, selected.iter().map(|l| l.raw.as_str()));
            let grouped = aggregate::group_distribution(&table, cfg.distribution_threshold_pct);
            println!("{}", serde_json::to_string_pretty(&grouped)?);
        }
        Some("severity") => {
            let dist = aggregate::severity_distribution(&classifier, selected.iter().map(|l| l.raw.as_str()));
            println!("{}", serde_json::to_string_pretty(&dist)?);
        }
        Some("report") => {
            let calls = read_optional(cli.calls.as_deref())?;
            let sms = read_optional(cli.sms.as_deref())?;
            let report = ForensicReport::build(&logcat, &calls, &sms, &store, now);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(other) => bail!("unknown --only view: {other}"),
        None => {
            let out = serde_json::json!({
                "total_lines": batch.len(),
                "selected_lines": selected.len(),
                "categories": batch.category_counts(),
                "activity": aggregate::hourly_activity(selected.iter().copied(), mode),
                "severity": aggregate::severity_distribution(&classifier, selected.iter().map(|l| l.raw.as_str())),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn run_follow(pipeline: &IngestionPipeline) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = rt.block_on(async {
        let (event_tx, mut event_rx) = mpsc::channel::<LiveEvent>(pipeline.config().event_capacity);
        let mut session = pipeline.start_live(event_tx)?;
        let cancel = session.cancel_token();
        ctrlc::set_handler(move || cancel.cancel())?;

        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(s) => println!("{s}"),
                    Err(e) => warn!(error = %e, "failed to encode live event"),
                }
            }
        });

        session.spawn_reader(tokio::io::stdin());
        session.join_readers().await;
        let stats = session.stop().await?;
        printer.await?;
        info!(lines = stats.lines, "follow finished");
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "summary": stats }))?);
        anyhow::Ok(())
    });
    // a blocked stdin read would otherwise hold up runtime shutdown
    rt.shutdown_background();
    result
}
