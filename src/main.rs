//! # open_eyes
//!
//! Collects news articles from configured landing pages, drops navigation
//! links and already-stored URLs, extracts article content (through an LLM
//! when configured, DOM heuristics otherwise), and stores deduplicated
//! records.
//!
//! ## Usage
//!
//! ```sh
//! open_eyes collect -c sources.yaml
//! open_eyes supervise -c sources.yaml --log-dir ./logs
//! open_eyes query -c sources.yaml -d 3d -o report.json
//! ```
//!
//! ## Architecture
//!
//! Each scheduled source runs as its own pipeline:
//! 1. **Discovery**: render the landing page and list candidate links
//! 2. **Filtering**: URL/title heuristics, then the dedup oracle
//! 3. **Fetching**: fallback chain per URL (bounded parallelism)
//! 4. **Persisting**: one batch insert per source
//!
//! Up to `source_workers` pipelines run at once; a failing source never
//! affects its siblings.

use chrono::{Datelike, Local};
use clap::Parser;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod discover;
mod error;
mod extract;
mod fetch;
mod filter;
mod models;
mod persist;
mod pipeline;
mod query;
mod registry;
mod render;
mod runner;
mod store;
mod supervisor;
mod utils;

use cli::{Cli, CollectArgs, Command, QueryArgs};
use config::{Config, LlmConfig};
use dedup::DedupOracle;
use extract::{AwfulExtractor, Extractor};
use models::SourceOutcome;
use persist::PersistenceGateway;
use pipeline::SourcePipeline;
use registry::{Collaborators, CollectorRegistry};
use render::build_renderer;
use store::{MemoryStore, PgStore, RecordStore};
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_tracing(args.log_dir.as_deref(), args.command.name()).await?;

    let start_time = std::time::Instant::now();
    info!(command = args.command.name(), "open_eyes starting up");

    let result = match &args.command {
        Command::Collect(collect_args) => collect(collect_args).await,
        Command::Supervise(collect_args) => {
            let status = supervisor::supervise(&collect_args.to_child_args(args.log_dir.as_deref())).await?;
            if !status.success() && collect_args.fail_on_error {
                Err(format!("collector exited with {status}").into())
            } else {
                Ok(())
            }
        }
        Command::Query(query_args) => run_query(query_args).await,
    };

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(elapsed_s = elapsed.as_secs_f64(), "open_eyes finished"),
        Err(e) => error!(elapsed_s = elapsed.as_secs_f64(), error = %e, "open_eyes failed"),
    }
    result
}

/// Console logging, plus a per-day log file when `log_dir` is given.
async fn init_tracing(log_dir: Option<&str>, command: &str) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    let file = match log_dir {
        Some(dir) => {
            let day_dir = Path::new(dir).join(Local::now().format("%Y-%m-%d").to_string());
            ensure_writable_dir(&day_dir.to_string_lossy()).await?;
            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(day_dir.join(format!("{command}.log")))?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(log_file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

/// Pick the record store: memory for dry runs or when storage is not configured.
async fn open_store(config: &Config, dry_run: bool) -> Result<Arc<dyn RecordStore>, Box<dyn Error>> {
    if dry_run {
        info!("Dry run; records are kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    match &config.storage {
        Some(storage) => {
            let store = PgStore::connect(storage).await.map_err(|e| {
                error!(%storage, error = %e, "Cannot connect to record store");
                e
            })?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No storage configured; records are kept in memory and discarded on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Load the extractor; a broken LLM setup degrades to DOM-only collection.
async fn load_extractor(llm: Option<&LlmConfig>) -> Option<Arc<dyn Extractor>> {
    let llm = llm?;
    match AwfulExtractor::load(llm).await {
        Ok(extractor) => Some(Arc::new(extractor)),
        Err(e) => {
            warn!(error = %e, "LLM extraction unavailable; continuing with DOM heuristics");
            None
        }
    }
}

#[instrument(level = "info", skip_all)]
async fn collect(args: &CollectArgs) -> Result<(), Box<dyn Error>> {
    let config = Config::load_or_default(args.config.as_deref());
    config.log_summary(args.config.as_deref());

    let store = open_store(&config, args.dry_run).await?;
    let collab = Collaborators {
        renderer: build_renderer(&config.renderer)?,
        extractor: load_extractor(config.llm.as_ref()).await,
        content_limit: config.pipeline.content_limit,
    };
    let oracle = DedupOracle::new(store.clone(), config.dedup);
    info!(policy = ?oracle.policy(), "Dedup oracle ready");
    let gateway = PersistenceGateway::new(store, oracle.clone());

    let pipelines: Vec<SourcePipeline> = CollectorRegistry::default()
        .build_all(&config.sources, &collab)
        .into_iter()
        .map(|(source, collector)| {
            SourcePipeline::new(
                source,
                collector,
                oracle.clone(),
                gateway.clone(),
                config.pipeline.clone(),
                config.mode,
            )
        })
        .collect();

    let day_of_year = Local::now().ordinal();
    let run = runner::run_sources(pipelines, day_of_year, config.pipeline.source_workers);
    let Some(outcomes) = supervisor::run_until_interrupted(run).await else {
        warn!("Run interrupted before completion; unfinished batches were not written");
        return if args.fail_on_error {
            Err("interrupted".into())
        } else {
            Ok(())
        };
    };

    let failures = report(&outcomes);
    if failures > 0 && args.fail_on_error {
        return Err(format!("{failures} source(s) failed").into());
    }
    Ok(())
}

/// Log one status line per source; returns the number of failed sources.
fn report(outcomes: &BTreeMap<String, SourceOutcome>) -> usize {
    for (source, outcome) in outcomes {
        if outcome.is_failure() {
            error!(%source, "{outcome}");
        } else {
            info!(%source, "{outcome}");
        }
    }
    let failures = outcomes.values().filter(|o| o.is_failure()).count();
    info!(sources = outcomes.len(), failures, "Collection summary");
    failures
}

#[instrument(level = "info", skip_all)]
async fn run_query(args: &QueryArgs) -> Result<(), Box<dyn Error>> {
    let (start, end) = query::resolve_window(
        args.duration.as_deref(),
        args.start.as_deref(),
        args.end.as_deref(),
        Local::now().naive_local(),
    )?;
    let kinds = query::parse_kinds(args.kinds.as_deref());
    info!(%start, %end, ?kinds, "Query window");

    let config = Config::load_or_default(args.config.as_deref());
    let Some(storage) = &config.storage else {
        return Err("no `storage` section in config; nothing to query".into());
    };
    let store = PgStore::connect(storage).await?;

    let records = query::load_records(&store, start, end, kinds.as_deref()).await?;
    query::write_records(&records, args.output.as_deref()).await?;
    Ok(())
}
