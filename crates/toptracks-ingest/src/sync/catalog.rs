//! Catalog merge
//!
//! Streams the `song` table and writes the tracks that some chart references
//! into the shadow catalog. Full feeds go to an empty shadow and can insert
//! blindly; incremental feeds merge into a copy of the live catalog and look
//! every track up first. Nothing is ever deleted here.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::io;
use std::time::Instant;
use tokio::io::AsyncBufRead;
use toptracks_common::types::{FeedKind, Track};
use tracing::info;

use crate::epf::parser::{columns, peek_field, Record, RecordReader, TRACK};
use crate::store::DocumentStore;
use crate::telemetry::ErrorReporter;

/// Release dates in the song table look like `2009 06 23`
const EPF_DATE_FORMAT: &str = "%Y %m %d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Shadow starts empty; every referenced row is inserted
    InsertOnly,
    /// Shadow holds the live catalog; find, then update or insert
    Upsert,
}

impl MergeMode {
    pub fn for_feed(kind: FeedKind) -> Self {
        match kind {
            FeedKind::Full => MergeMode::InsertOnly,
            FeedKind::Incremental => MergeMode::Upsert,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub scanned: u64,
    pub unreferenced: u64,
    pub malformed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
}

fn parse_date(record: &Record, index: usize) -> Option<NaiveDate> {
    record
        .non_empty(index)
        .and_then(|s| NaiveDate::parse_from_str(s, EPF_DATE_FORMAT).ok())
}

/// Build a track from a song row; `None` without a numeric id
pub fn track_from_record(record: &Record) -> Option<Track> {
    use columns::track as col;

    Some(Track {
        itunes_track_id: record.parse_field(col::ID)?,
        title: record.field(col::TITLE).unwrap_or_default().to_string(),
        artist_name: record.field(col::ARTIST_NAME).unwrap_or_default().to_string(),
        collection_name: record.non_empty(col::COLLECTION_NAME).map(str::to_string),
        view_url: record.field(col::VIEW_URL).unwrap_or_default().to_string(),
        original_release_date: parse_date(record, col::ORIGINAL_RELEASE_DATE),
        catalog_release_date: parse_date(record, col::CATALOG_RELEASE_DATE),
        duration_ms: record.parse_field(col::DURATION_MS),
        preview_url: record.non_empty(col::PREVIEW_URL).map(str::to_string),
    })
}

/// Merges referenced tracks into one shadow catalog collection
pub struct CatalogMerge<'a> {
    store: &'a dyn DocumentStore,
    reporter: &'a dyn ErrorReporter,
    collection: &'a str,
    mode: MergeMode,
    progress_interval: u64,
}

impl<'a> CatalogMerge<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        reporter: &'a dyn ErrorReporter,
        collection: &'a str,
        mode: MergeMode,
    ) -> Self {
        Self {
            store,
            reporter,
            collection,
            mode,
            progress_interval: crate::config::DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Stream the song table and write every referenced track
    ///
    /// Write failures are reported and counted; only a failing read of the
    /// table itself ends the merge with an error.
    pub async fn run<R>(&self, reader: R, referenced: &HashSet<i64>) -> io::Result<MergeStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let start = Instant::now();
        let mut records = RecordReader::new(reader, TRACK);
        let mut stats = MergeStats::default();

        info!(
            collection = %self.collection,
            mode = ?self.mode,
            referenced = referenced.len(),
            "Started merging tracks"
        );

        // Rows whose raw id no chart references are never split
        let unreferenced = |raw: &[u8]| {
            matches!(peek_field::<i64>(raw, columns::track::ID), Some(id) if !referenced.contains(&id))
        };

        let mut next_progress = self.progress_interval;
        while let Some(record) = records.next_record_unless(unreferenced).await? {
            let parsed = records.stats();
            stats.scanned = parsed.records + parsed.skipped;
            if stats.scanned >= next_progress {
                next_progress = stats.scanned + self.progress_interval;
                info!(
                    scanned = stats.scanned,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    "Scanned tracks so far"
                );
            }

            let Some(id) = record.parse_field::<i64>(columns::track::ID) else {
                stats.malformed += 1;
                continue;
            };
            if !referenced.contains(&id) {
                stats.unreferenced += 1;
                continue;
            }

            let Some(track) = track_from_record(&record) else {
                stats.malformed += 1;
                continue;
            };

            self.write(&track, &mut stats).await;
        }

        let parsed = records.stats();
        stats.scanned = parsed.records + parsed.skipped;
        stats.unreferenced += parsed.skipped;
        stats.malformed += parsed.malformed;

        info!(
            collection = %self.collection,
            scanned = stats.scanned,
            inserted = stats.inserted,
            updated = stats.updated,
            unreferenced = stats.unreferenced,
            malformed = stats.malformed,
            failed = stats.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merged tracks"
        );

        Ok(stats)
    }

    async fn write(&self, track: &Track, stats: &mut MergeStats) {
        let id = track.itunes_track_id;

        let result = match self.mode {
            MergeMode::InsertOnly => self
                .store
                .insert_track(self.collection, track)
                .await
                .map(|()| false),
            MergeMode::Upsert => match self.store.find_track(self.collection, id).await {
                Ok(Some(_)) => self
                    .store
                    .save_track(self.collection, track)
                    .await
                    .map(|()| true),
                Ok(None) => self
                    .store
                    .insert_track(self.collection, track)
                    .await
                    .map(|()| false),
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(true) => stats.updated += 1,
            Ok(false) => stats.inserted += 1,
            Err(e) => {
                stats.failed += 1;
                self.reporter.report(&format!("write_track {}", id), &e);
            },
        }
    }
}
