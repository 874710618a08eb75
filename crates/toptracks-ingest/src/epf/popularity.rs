//! Popularity aggregation
//!
//! Builds the per-market charts from `song_popularity_per_genre`. Each
//! `(storefront, genre)` pair keeps the first `top_n` accepted tracks in feed
//! order; once the table is exhausted every chart is stably sorted by rank.
//! This is not a top-K over the whole table: a well-ranked track that shows
//! up after a chart is full stays out of it.
//!
//! Every accepted track id is remembered in the referenced set, including
//! the ones that did not fit in a chart, so the catalog merge keeps them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Instant;
use tokio::io::AsyncBufRead;
use toptracks_common::types::{ChartKey, DEFAULT_TOP_N};
use tracing::info;

use super::parser::{columns, Record, RecordReader, POPULARITY};

/// Genre ids charted by default
pub const DEFAULT_ALLOWED_GENRES: [i32; 21] = [
    2,    // Blues
    6,    // Country
    7,    // Electronic
    11,   // Jazz
    12,   // Latin
    14,   // Pop
    15,   // R&B/Soul
    17,   // Dance
    18,   // Hip-Hop/Rap
    19,   // World
    20,   // Alternative
    21,   // Rock
    24,   // Reggae
    25,   // Easy Listening
    1044, // Breakbeat
    1046, // Garage
    1047, // Hardcore
    1048, // House
    1049, // Jungle/Drum'n'bass
    1050, // Techno
    1051, // Trance
];

/// Set of accepted ids, or everything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList {
    Any,
    Only(HashSet<i32>),
}

impl AllowList {
    pub fn only(ids: impl IntoIterator<Item = i32>) -> Self {
        AllowList::Only(ids.into_iter().collect())
    }

    pub fn allows(&self, id: i32) -> bool {
        match self {
            AllowList::Any => true,
            AllowList::Only(ids) => ids.contains(&id),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AllowList::Only(ids) if ids.is_empty())
    }
}

impl FromStr for AllowList {
    type Err = String;

    /// `*` allows everything, otherwise a comma-separated list of ids
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(AllowList::Any);
        }

        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i32>()
                    .map_err(|_| format!("invalid id '{}' in allow-list", part))
            })
            .collect::<Result<HashSet<_>, _>>()
            .map(AllowList::Only)
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowList::Any => f.write_str("*"),
            AllowList::Only(ids) => {
                let mut sorted: Vec<_> = ids.iter().collect();
                sorted.sort();
                let joined: Vec<String> = sorted.iter().map(|id| id.to_string()).collect();
                f.write_str(&joined.join(","))
            },
        }
    }
}

/// Which rows enter the charts, and how many tracks a chart keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPolicy {
    pub allowed_genres: AllowList,
    pub allowed_storefronts: AllowList,
    pub top_n: usize,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            allowed_genres: AllowList::only(DEFAULT_ALLOWED_GENRES),
            allowed_storefronts: AllowList::Any,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One row of the popularity table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopularityRow {
    pub storefront_id: i32,
    pub genre_id: i32,
    pub track_id: i64,
    pub rank: Option<i64>,
}

impl PopularityRow {
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            storefront_id: record.parse_field(columns::popularity::STOREFRONT_ID)?,
            genre_id: record.parse_field(columns::popularity::GENRE_ID)?,
            track_id: record.parse_field(columns::popularity::TRACK_ID)?,
            rank: record.parse_field(columns::popularity::RANK),
        })
    }

    pub fn key(&self) -> ChartKey {
        ChartKey::new(self.storefront_id, self.genre_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub rows: u64,
    pub accepted: u64,
    pub rejected_genre: u64,
    pub rejected_storefront: u64,
    /// Accepted rows that arrived after their chart was full
    pub over_cap: u64,
    pub malformed: u64,
}

/// Result of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Ranked track ids per chart, at most `top_n` each
    pub matrix: BTreeMap<ChartKey, Vec<i64>>,
    pub referenced_track_ids: HashSet<i64>,
    pub stats: AggregationStats,
}

/// Streaming accumulator behind [`aggregate`]
#[derive(Debug)]
pub struct PopularityAggregator {
    policy: AggregationPolicy,
    charts: BTreeMap<ChartKey, Vec<(i64, Option<i64>)>>,
    referenced: HashSet<i64>,
    stats: AggregationStats,
}

impl PopularityAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self {
            policy,
            charts: BTreeMap::new(),
            referenced: HashSet::new(),
            stats: AggregationStats::default(),
        }
    }

    /// Feed one row; returns whether it passed the allow-lists
    pub fn observe(&mut self, row: PopularityRow) -> bool {
        self.stats.rows += 1;

        if !self.policy.allowed_genres.allows(row.genre_id) {
            self.stats.rejected_genre += 1;
            return false;
        }
        if !self.policy.allowed_storefronts.allows(row.storefront_id) {
            self.stats.rejected_storefront += 1;
            return false;
        }

        self.stats.accepted += 1;

        let chart = self.charts.entry(row.key()).or_default();
        if chart.len() < self.policy.top_n {
            chart.push((row.track_id, row.rank));
        } else {
            self.stats.over_cap += 1;
        }

        self.referenced.insert(row.track_id);
        true
    }

    pub fn record_malformed(&mut self) {
        self.stats.malformed += 1;
    }

    pub fn stats(&self) -> AggregationStats {
        self.stats
    }

    /// Rank-sort every chart and hand out the result
    ///
    /// A chart is sorted only when all of its entries carry a rank; otherwise
    /// feed order stands.
    pub fn finish(self) -> Aggregation {
        let matrix = self
            .charts
            .into_iter()
            .map(|(key, mut entries)| {
                if entries.iter().all(|(_, rank)| rank.is_some()) {
                    entries.sort_by_key(|(_, rank)| *rank);
                }
                (key, entries.into_iter().map(|(track_id, _)| track_id).collect())
            })
            .collect();

        Aggregation {
            matrix,
            referenced_track_ids: self.referenced,
            stats: self.stats,
        }
    }
}

/// Aggregate a popularity table stream
pub async fn aggregate<R>(reader: R, policy: AggregationPolicy) -> io::Result<Aggregation>
where
    R: AsyncBufRead + Unpin,
{
    let start = Instant::now();
    let mut records = RecordReader::new(reader, POPULARITY);
    let mut aggregator = PopularityAggregator::new(policy);

    while let Some(record) = records.next_record().await? {
        match PopularityRow::from_record(&record) {
            Some(row) => {
                aggregator.observe(row);
            },
            None => aggregator.record_malformed(),
        }
    }

    let aggregation = aggregator.finish();
    let stats = aggregation.stats;

    info!(
        rows = stats.rows,
        accepted = stats.accepted,
        rejected_genre = stats.rejected_genre,
        rejected_storefront = stats.rejected_storefront,
        over_cap = stats.over_cap,
        malformed = stats.malformed + records.stats().malformed,
        charts = aggregation.matrix.len(),
        referenced_tracks = aggregation.referenced_track_ids.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Aggregated popularity"
    );

    Ok(aggregation)
}
