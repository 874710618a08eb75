//! Ingestion cycle
//!
//! One run of [`IngestPipeline::run_cycle`]:
//!
//! 1. Discover the published feeds and load the checkpoint
//! 2. Decide which feed kinds to import; stop if none
//! 3. Load storefront and genre maps from the full feed (concurrently)
//! 4. Per feed kind, full first: prepare shadows, aggregate popularity,
//!    write charts, merge tracks, swap, advance the checkpoint
//!
//! Any error aborts the cycle. Collections already swapped and the
//! checkpoint already saved for an earlier feed kind stay as they are.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use toptracks_common::types::{Checkpoint, FeedDescriptor, FeedKind};
use tracing::{debug, info, instrument};

use crate::checkpoint::CheckpointStore;
use crate::config::{ArchiveNames, DEFAULT_PROGRESS_INTERVAL};
use crate::discovery::FeedDiscovery;
use crate::epf::archive::{ArchiveFetcher, EntryReader};
use crate::epf::popularity::{aggregate, AggregationPolicy, AggregationStats};
use crate::epf::reference::{reduce_genres, reduce_storefronts, ReferenceMaps};
use crate::error::{IngestError, IngestResult};
use crate::store::{CollectionKind, DocumentStore};
use crate::telemetry::ErrorReporter;

use super::catalog::{CatalogMerge, MergeMode, MergeStats};
use super::charts::{write_charts, ChartStats};
use super::publication::Publication;
use super::reconcile::SyncPlan;

/// Outcome of one imported feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub kind: FeedKind,
    pub snapshot_date: DateTime<Utc>,
    pub aggregation: AggregationStats,
    pub charts: ChartStats,
    pub merge: MergeStats,
    pub elapsed_ms: u64,
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub plan: SyncPlan,
    pub feeds: Vec<FeedReport>,
    /// Checkpoint after the cycle
    pub checkpoint: Option<Checkpoint>,
}

pub struct IngestPipeline {
    discovery: Arc<dyn FeedDiscovery>,
    fetcher: ArchiveFetcher,
    store: Arc<dyn DocumentStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    reporter: Arc<dyn ErrorReporter>,
    archives: ArchiveNames,
    policy: AggregationPolicy,
    progress_interval: u64,
}

impl IngestPipeline {
    pub fn new(
        discovery: Arc<dyn FeedDiscovery>,
        fetcher: ArchiveFetcher,
        store: Arc<dyn DocumentStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            discovery,
            fetcher,
            store,
            checkpoints,
            reporter,
            archives: ArchiveNames::default(),
            policy: AggregationPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_archives(mut self, archives: ArchiveNames) -> Self {
        self.archives = archives;
        self
    }

    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Run one complete ingestion cycle
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> IngestResult<CycleReport> {
        let cycle_start = Instant::now();

        info!("Phase 1: Discovering feeds");
        let feeds = self.discovery.discover().await?;
        let checkpoint = self.checkpoints.load().await.map_err(IngestError::Checkpoint)?;

        let plan = SyncPlan::decide(checkpoint.as_ref(), &feeds);
        info!(
            plan = %plan,
            full = %feeds.full.snapshot_date,
            incremental = ?feeds.incremental.as_ref().map(|feed| feed.snapshot_date),
            last_imported_at = ?checkpoint.map(|c| c.last_imported_at),
            "Decided sync plan"
        );

        if plan.is_noop() {
            info!("No new feeds found");
            return Ok(CycleReport {
                plan,
                feeds: Vec::new(),
                checkpoint,
            });
        }

        info!("Phase 2: Loading reference tables");
        let references = self.load_reference_maps(&feeds.full).await?;

        let mut current = checkpoint;
        let mut reports = Vec::new();

        for kind in plan.kinds() {
            let feed = feeds.get(kind).ok_or_else(|| {
                IngestError::Config(format!("{} feed planned but not discovered", kind))
            })?;

            info!(feed = %kind, "Phase 3: Importing feed");
            let report = self.sync_feed(feed, &references).await?;

            let next = Checkpoint::advance(current.as_ref(), feed.snapshot_date);
            self.checkpoints.save(&next).await.map_err(IngestError::Checkpoint)?;
            current = Some(next);

            reports.push(report);
        }

        info!(
            feeds = reports.len(),
            elapsed_ms = cycle_start.elapsed().as_millis() as u64,
            "Cycle complete"
        );

        Ok(CycleReport {
            plan,
            feeds: reports,
            checkpoint: current,
        })
    }

    /// Storefront and genre maps of `feed`, loaded side by side
    pub async fn load_reference_maps(&self, feed: &FeedDescriptor) -> IngestResult<ReferenceMaps> {
        let start = Instant::now();
        let storefront_url = feed.catalog_archive_url(&self.archives.storefront);
        let genre_url = feed.catalog_archive_url(&self.archives.genre);

        let (storefront_countries, genre_names) = tokio::try_join!(
            async {
                let reader = self.open_table(&storefront_url).await?;
                reduce_storefronts(reader)
                    .await
                    .map_err(|e| IngestError::transport(&storefront_url, e))
            },
            async {
                let reader = self.open_table(&genre_url).await?;
                reduce_genres(reader)
                    .await
                    .map_err(|e| IngestError::transport(&genre_url, e))
            },
        )?;

        let references = ReferenceMaps {
            storefront_countries,
            genre_names,
        };

        info!(
            storefronts = references.storefront_countries.len(),
            unresolved_storefronts = references.unresolved_storefronts(),
            genres = references.genre_names.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded reference tables"
        );

        Ok(references)
    }

    #[instrument(skip_all, fields(feed = %feed.kind, snapshot = %feed.snapshot_date.date_naive()))]
    async fn sync_feed(&self, feed: &FeedDescriptor, references: &ReferenceMaps) -> IngestResult<FeedReport> {
        let start = Instant::now();
        let store = self.store.as_ref();
        let reporter = self.reporter.as_ref();

        let mut publication = Publication::new(store, reporter, feed.kind);
        publication.prepare().await?;

        let popularity_url = feed.popularity_archive_url(&self.archives.popularity);
        let reader = self.open_table(&popularity_url).await?;
        let aggregation = aggregate(reader, self.policy.clone())
            .await
            .map_err(|e| IngestError::transport(&popularity_url, e))?;

        let charts = write_charts(
            store,
            publication.shadow(CollectionKind::Charts),
            &aggregation.matrix,
            references,
            reporter,
        )
        .await;

        let track_url = feed.catalog_archive_url(&self.archives.track);
        let reader = self.open_table(&track_url).await?;
        let merge = CatalogMerge::new(
            store,
            reporter,
            publication.shadow(CollectionKind::Tracks),
            MergeMode::for_feed(feed.kind),
        )
        .with_progress_interval(self.progress_interval)
        .run(reader, &aggregation.referenced_track_ids)
        .await
        .map_err(|e| IngestError::transport(&track_url, e))?;

        publication.mark_populated()?;
        publication.swap().await?;
        publication.finish()?;

        let report = FeedReport {
            kind: feed.kind,
            snapshot_date: feed.snapshot_date,
            aggregation: aggregation.stats,
            charts,
            merge,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            charts_saved = report.charts.saved,
            charts_failed = report.charts.failed,
            tracks_inserted = report.merge.inserted,
            tracks_updated = report.merge.updated,
            tracks_failed = report.merge.failed,
            elapsed_ms = report.elapsed_ms,
            "Feed published"
        );

        Ok(report)
    }

    /// Open the single table file inside the archive at `url`
    async fn open_table(&self, url: &str) -> IngestResult<EntryReader> {
        let archive = self
            .fetcher
            .open(url)
            .await
            .map_err(|e| IngestError::transport(url, e))?;
        let entry = archive
            .first_entry()
            .await
            .map_err(|e| IngestError::transport(url, e))?;

        debug!(url = %url, entry = %entry.name(), "Reading archive entry");
        Ok(entry.into_reader())
    }
}
