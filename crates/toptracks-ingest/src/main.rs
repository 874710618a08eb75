//! TopTracks ingest - EPF feed synchronization job

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use toptracks_common::logging::{init_logging, LogConfig, LogLevel};
use toptracks_ingest::checkpoint::{
    CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, S3CheckpointStore,
};
use toptracks_ingest::config::{CheckpointConfig, IngestConfig};
use toptracks_ingest::discovery::EpfDiscovery;
use toptracks_ingest::epf::ArchiveFetcher;
use toptracks_ingest::storage::Storage;
use toptracks_ingest::store::{DocumentStore, MemoryStore, PgStore};
use toptracks_ingest::sync::{CycleReport, IngestPipeline};
use toptracks_ingest::telemetry::{CollectingReporter, ErrorReporter, TracingReporter};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "toptracks-ingest")]
#[command(author, version, about = "Synchronize popular tracks from the EPF feeds")]
struct Cli {
    /// Confirm the start of an ingestion cycle
    #[arg(long, env = "TOPTRACKS_CONFIRM_START")]
    confirm: bool,

    /// Run the whole cycle against an in-memory store and checkpoint
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

async fn checkpoint_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    Ok(match config {
        CheckpointConfig::File { path } => Arc::new(FileCheckpointStore::new(path.clone())),
        CheckpointConfig::S3 { key, storage } => {
            let storage = Storage::new(storage.clone()).await?;
            Arc::new(S3CheckpointStore::new(storage, key.clone()))
        },
    })
}

fn log_summary(report: &CycleReport) {
    for feed in &report.feeds {
        info!(
            feed = %feed.kind,
            snapshot = %feed.snapshot_date.date_naive(),
            popularity_rows = feed.aggregation.rows,
            popularity_accepted = feed.aggregation.accepted,
            charts_saved = feed.charts.saved,
            charts_failed = feed.charts.failed,
            tracks_scanned = feed.merge.scanned,
            tracks_inserted = feed.merge.inserted,
            tracks_updated = feed.merge.updated,
            tracks_failed = feed.merge.failed,
            elapsed_ms = feed.elapsed_ms,
            "Feed summary"
        );
    }

    info!(
        plan = %report.plan,
        feeds = report.feeds.len(),
        checkpoint = ?report.checkpoint.map(|c| c.last_imported_at),
        "Ingestion cycle finished"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("toptracks-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    if !cli.confirm {
        warn!("Refusing to start without --confirm or TOPTRACKS_CONFIRM_START=true");
        return Ok(());
    }

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    info!(
        base_url = %config.feed.base_url,
        top_n = config.aggregation.top_n,
        genres = %config.aggregation.allowed_genres,
        storefronts = %config.aggregation.allowed_storefronts,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    let credentials = config.feed.credentials.clone();
    let discovery = EpfDiscovery::new(&config.feed.base_url, credentials.clone(), &config.http)?;
    let fetcher = ArchiveFetcher::new(&config.http, credentials)?;

    let durable_checkpoints = checkpoint_store(&config.checkpoint).await?;

    let (store, checkpoints, reporter): (
        Arc<dyn DocumentStore>,
        Arc<dyn CheckpointStore>,
        Arc<dyn ErrorReporter>,
    ) = if cli.dry_run {
        let seed = durable_checkpoints.load().await?;
        info!(checkpoint = ?seed.map(|c| c.last_imported_at), "Dry run, nothing will be persisted");
        (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCheckpointStore::new(seed)),
            Arc::new(CollectingReporter::new()),
        )
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
            .connect(&config.database.url)
            .await
            .context("Failed to connect to the document store")?;
        info!("Database connection pool established");

        (
            Arc::new(PgStore::new(pool)),
            durable_checkpoints,
            Arc::new(TracingReporter),
        )
    };

    let pipeline = IngestPipeline::new(Arc::new(discovery), fetcher, store, checkpoints, reporter)
        .with_archives(config.feed.archives.clone())
        .with_policy(config.aggregation.clone())
        .with_progress_interval(config.progress_interval);

    let report = pipeline.run_cycle().await?;
    log_summary(&report);

    Ok(())
}
