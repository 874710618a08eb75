//! End-to-end ingestion cycles against a mocked EPF host and the in-memory store

mod common;

use common::{
    default_genres, default_storefronts, popularity_table, song_table, FeedServer, Snapshot,
};
use std::sync::Arc;
use toptracks_common::types::{snapshot_date_from_folder, ChartKey, Checkpoint, FeedKind, Track};
use toptracks_ingest::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use toptracks_ingest::config::HttpConfig;
use toptracks_ingest::discovery::{
    feed_from_folder, DiscoveredFeeds, EpfDiscovery, FeedDiscovery, StaticDiscovery,
};
use toptracks_ingest::epf::ArchiveFetcher;
use toptracks_ingest::store::{CollectionKind, DocumentStore, MemoryStore};
use toptracks_ingest::sync::IngestPipeline;
use toptracks_ingest::telemetry::CollectingReporter;
use toptracks_ingest::IngestError;

const TRACKS: &str = "itunes_tracks";
const CHARTS: &str = "popular_charts";

struct Harness {
    store: Arc<MemoryStore>,
    checkpoints: Arc<MemoryCheckpointStore>,
    reporter: Arc<CollectingReporter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_checkpoint(None)
    }

    fn with_checkpoint(checkpoint: Option<Checkpoint>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new(checkpoint)),
            reporter: Arc::new(CollectingReporter::new()),
        }
    }

    fn pipeline(&self, feeds: &FeedServer) -> IngestPipeline {
        let discovery = EpfDiscovery::new(feeds.root_url(), None, &HttpConfig::default()).unwrap();
        self.pipeline_with(Arc::new(discovery))
    }

    fn pipeline_with(&self, discovery: Arc<dyn FeedDiscovery>) -> IngestPipeline {
        let fetcher = ArchiveFetcher::new(&HttpConfig::default(), None).unwrap();

        IngestPipeline::new(
            discovery,
            fetcher,
            self.store.clone(),
            self.checkpoints.clone(),
            self.reporter.clone(),
        )
        .with_progress_interval(2)
    }
}

fn date(yyyymmdd: &str) -> chrono::DateTime<chrono::Utc> {
    snapshot_date_from_folder(&format!("itunes{}", yyyymmdd), "itunes").unwrap()
}

fn full_snapshot() -> Snapshot {
    Snapshot::new(
        "20240110",
        popularity_table(&[(1, 6, 100, 1), (1, 6, 101, 2), (1, 99, 200, 1)]),
        song_table(&[(100, "First"), (101, "Second"), (200, "Spoken")]),
    )
}

fn incremental_snapshot() -> Snapshot {
    Snapshot::new(
        "20240116",
        popularity_table(&[(2, 14, 300, 1), (2, 14, 100, 2)]),
        song_table(&[(100, "First (Remastered)"), (300, "Third"), (301, "Unranked")]),
    )
}

async fn track_ids(store: &MemoryStore) -> Vec<i64> {
    store
        .all_tracks(TRACKS)
        .await
        .unwrap()
        .into_iter()
        .map(|track| track.itunes_track_id)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_feed_publishes_allow_listed_charts() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(&full_snapshot(), &default_storefronts(), &default_genres(), None)
        .await;

    let harness = Harness::new();
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();

    assert_eq!(report.plan.to_string(), "full");
    assert_eq!(report.feeds.len(), 1);
    assert_eq!(report.feeds[0].aggregation.rejected_genre, 1);
    assert_eq!(report.feeds[0].charts.saved, 1);
    assert_eq!(report.feeds[0].merge.inserted, 2);
    assert_eq!(report.feeds[0].merge.unreferenced, 1);

    let chart = harness
        .store
        .find_chart(CHARTS, ChartKey::new(1, 6))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chart.top_track_ids, vec![100, 101]);
    assert_eq!(chart.country_code, "US");
    assert_eq!(chart.genre_name, "Country");
    assert!(harness
        .store
        .find_chart(CHARTS, ChartKey::new(1, 99))
        .await
        .unwrap()
        .is_none());

    assert_eq!(track_ids(&harness.store).await, vec![100, 101]);

    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240110"))));
    assert!(harness.reporter.is_empty());

    // Only live collections remain after publication
    let mut collections = harness.store.list_collections().await.unwrap();
    collections.sort();
    assert_eq!(collections, vec![CHARTS.to_string(), TRACKS.to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_then_incremental_in_one_cycle() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(
            &full_snapshot(),
            &default_storefronts(),
            &default_genres(),
            Some(&incremental_snapshot()),
        )
        .await;

    let harness = Harness::new();
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();

    assert_eq!(report.plan.to_string(), "full+incremental");
    assert_eq!(report.feeds.len(), 2);
    assert_eq!(report.feeds[1].merge.updated, 1);
    assert_eq!(report.feeds[1].merge.inserted, 1);
    assert_eq!(report.checkpoint, Some(Checkpoint::new(date("20240116"))));
    assert_eq!(harness.checkpoints.current(), report.checkpoint);

    // Incremental merges on top of the full catalog
    assert_eq!(track_ids(&harness.store).await, vec![100, 101, 300]);
    let updated = harness.store.find_track(TRACKS, 100).await.unwrap().unwrap();
    assert_eq!(updated.title, "First (Remastered)");

    let charts = harness.store.all_charts(CHARTS).await.unwrap();
    assert_eq!(charts.len(), 2);
    assert_eq!(charts[0].key(), ChartKey::new(1, 6));
    assert_eq!(charts[1].key(), ChartKey::new(2, 14));
    assert_eq!(charts[1].country_code, "NL");
    assert_eq!(charts[1].top_track_ids, vec![300, 100]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_run_is_noop() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(
            &full_snapshot(),
            &default_storefronts(),
            &default_genres(),
            Some(&incremental_snapshot()),
        )
        .await;

    let harness = Harness::new();
    let pipeline = harness.pipeline(&feeds);
    pipeline.run_cycle().await.unwrap();
    let tracks_before = harness.store.all_tracks(TRACKS).await.unwrap();

    let report = pipeline.run_cycle().await.unwrap();

    assert!(report.plan.is_noop());
    assert!(report.feeds.is_empty());
    assert_eq!(report.checkpoint, Some(Checkpoint::new(date("20240116"))));
    assert_eq!(harness.store.all_tracks(TRACKS).await.unwrap(), tracks_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reimport_yields_identical_contents() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(&full_snapshot(), &default_storefronts(), &default_genres(), None)
        .await;

    let harness = Harness::new();
    harness.pipeline(&feeds).run_cycle().await.unwrap();
    let tracks = harness.store.all_tracks(TRACKS).await.unwrap();
    let charts = harness.store.all_charts(CHARTS).await.unwrap();

    // Forget the checkpoint and import the same snapshot again
    harness.checkpoints.save(&Checkpoint::new(date("20240101"))).await.unwrap();
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();

    assert_eq!(report.plan.to_string(), "full");
    assert_eq!(harness.store.all_tracks(TRACKS).await.unwrap(), tracks);
    assert_eq!(harness.store.all_charts(CHARTS).await.unwrap(), charts);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_only_newer_incremental_is_imported() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(
            &full_snapshot(),
            &default_storefronts(),
            &default_genres(),
            Some(&incremental_snapshot()),
        )
        .await;

    let harness = Harness::with_checkpoint(Some(Checkpoint::new(date("20240110"))));
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();

    assert_eq!(report.plan.to_string(), "incremental");
    assert_eq!(report.feeds.len(), 1);
    // No live catalog to merge into, so the delta alone is published
    assert_eq!(track_ids(&harness.store).await, vec![100, 300]);
    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240116"))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_incremental_swap_failure_keeps_full_checkpoint() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(
            &full_snapshot(),
            &default_storefronts(),
            &default_genres(),
            Some(&incremental_snapshot()),
        )
        .await;

    let harness = Harness::new();
    // The first-ever full swap has no live collection to retire, so only
    // the incremental swap renames into *_old
    harness.store.fail_renames_to(CollectionKind::Tracks.old());

    let result = harness.pipeline(&feeds).run_cycle().await;

    match result {
        Err(IngestError::Swap { collection, .. }) => assert_eq!(collection, TRACKS),
        other => panic!("expected swap failure, got {:?}", other.map(|r| r.plan)),
    }

    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240110"))));
    assert_eq!(track_ids(&harness.store).await, vec![100, 101]);

    let reports = harness.reporter.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].context, "swap itunes_tracks");

    // The next cycle cleans up the leftovers and retries the delta
    harness.store.clear_failures();
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();
    assert_eq!(report.plan.to_string(), "incremental");
    assert_eq!(track_ids(&harness.store).await, vec![100, 101, 300]);
    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240116"))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_archive_aborts_before_publication() {
    let feeds = FeedServer::start().await;
    // Reference tables only, no listings; popularity and song archives 404
    let snapshot = full_snapshot();
    let catalog = snapshot.catalog_folder();
    feeds
        .serve(
            format!("{}/{}/storefront.tbz", common::ROOT_PATH, catalog),
            common::tbz(&catalog, "storefront", &default_storefronts()),
        )
        .await;
    feeds
        .serve(
            format!("{}/{}/genre.tbz", common::ROOT_PATH, catalog),
            common::tbz(&catalog, "genre", &default_genres()),
        )
        .await;

    let discovered = DiscoveredFeeds {
        full: feed_from_folder(FeedKind::Full, &feeds.root_url(), &catalog).unwrap(),
        incremental: None,
    };

    let harness = Harness::new();
    let result = harness
        .pipeline_with(Arc::new(StaticDiscovery(discovered)))
        .run_cycle()
        .await;

    assert!(matches!(result, Err(IngestError::Transport { .. })));
    assert_eq!(harness.checkpoints.current(), None);
    assert!(!harness.store.has_collection(TRACKS));
    assert!(!harness.store.has_collection(CHARTS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undroppable_leftover_aborts_cycle() {
    let feeds = FeedServer::start().await;
    feeds
        .publish(&full_snapshot(), &default_storefronts(), &default_genres(), None)
        .await;

    let harness = Harness::with_checkpoint(Some(Checkpoint::new(date("20240101"))));
    let live = Track {
        itunes_track_id: 7,
        title: "Live".to_string(),
        artist_name: "Artist".to_string(),
        collection_name: None,
        view_url: "https://music.example.com/track/7".to_string(),
        original_release_date: None,
        catalog_release_date: None,
        duration_ms: None,
        preview_url: None,
    };
    for kind in CollectionKind::ALL {
        harness.store.create_collection(kind.live(), kind).await.unwrap();
    }
    harness.store.save_track(TRACKS, &live).await.unwrap();
    harness
        .store
        .create_collection(CollectionKind::Charts.old(), CollectionKind::Charts)
        .await
        .unwrap();
    harness.store.keep_on_drop(CollectionKind::Charts.old());

    let result = harness.pipeline(&feeds).run_cycle().await;

    match result {
        Err(IngestError::ShadowState(survivors)) => {
            assert_eq!(survivors, vec![CollectionKind::Charts.old().to_string()])
        },
        other => panic!("expected stale collections, got {:?}", other.map(|r| r.plan)),
    }
    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240101"))));
    assert_eq!(harness.store.all_tracks(TRACKS).await.unwrap(), vec![live]);
    assert!(!harness.store.has_collection(CollectionKind::Tracks.shadow()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unresolved_storefront_chart_is_reported() {
    let feeds = FeedServer::start().await;
    let snapshot = Snapshot::new(
        "20240110",
        popularity_table(&[(1, 6, 100, 1), (3, 6, 100, 1)]),
        song_table(&[(100, "First")]),
    );
    let storefronts = common::storefront_table(&[(1, "USA"), (3, "XXX")]);
    feeds.publish(&snapshot, &storefronts, &default_genres(), None).await;

    let harness = Harness::new();
    let report = harness.pipeline(&feeds).run_cycle().await.unwrap();

    assert_eq!(report.feeds[0].charts.saved, 1);
    assert_eq!(report.feeds[0].charts.failed, 1);
    assert_eq!(harness.reporter.reports()[0].context, "save_chart 3.6");
    assert_eq!(harness.checkpoints.current(), Some(Checkpoint::new(date("20240110"))));
}
