//! Document store abstraction
//!
//! The pipeline sees the catalog and the charts as named collections of
//! documents. Each logical collection exists under three names during a
//! cycle:
//!
//! | Role       | Catalog                     | Charts                       |
//! |------------|-----------------------------|------------------------------|
//! | live       | `itunes_tracks`             | `popular_charts`             |
//! | shadow     | `itunes_tracks_processing`  | `popular_charts_processing`  |
//! | superseded | `itunes_tracks_old`         | `popular_charts_old`         |
//!
//! Readers only ever look at the live names.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use toptracks_common::types::{ChartKey, PopularChart, Track};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate key {key} in {collection}")]
    DuplicateKey { collection: String, key: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Collection {collection} does not hold {expected} documents")]
    KindMismatch {
        collection: String,
        expected: CollectionKind,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The two logical collections the pipeline publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Tracks,
    Charts,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Tracks, CollectionKind::Charts];

    pub fn live(&self) -> &'static str {
        match self {
            CollectionKind::Tracks => "itunes_tracks",
            CollectionKind::Charts => "popular_charts",
        }
    }

    pub fn shadow(&self) -> &'static str {
        match self {
            CollectionKind::Tracks => "itunes_tracks_processing",
            CollectionKind::Charts => "popular_charts_processing",
        }
    }

    pub fn old(&self) -> &'static str {
        match self {
            CollectionKind::Tracks => "itunes_tracks_old",
            CollectionKind::Charts => "popular_charts_old",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Tracks => f.write_str("track"),
            CollectionKind::Charts => f.write_str("chart"),
        }
    }
}

/// Persistent collections of tracks and charts
///
/// Uniqueness: `itunes_track_id` on track collections; `(storefront_id,
/// genre_id)` and `(country_code, genre_id)` on chart collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Create an empty collection; fails if `name` exists
    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<()>;

    /// Declare the unique indexes of `kind` on `name`; idempotent
    async fn ensure_indexes(&self, name: &str, kind: CollectionKind) -> StoreResult<()>;

    /// Copy every document of `from` into the existing collection `to`
    async fn copy_collection(&self, from: &str, to: &str) -> StoreResult<u64>;

    /// Drop `name` if it exists
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Rename `from` to `to`; fails if `to` exists
    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Publish `shadow` under the `live` name and discard the previous live data
    ///
    /// The default runs rename, rename, drop. Between the two renames the live
    /// name is unbound; stores with transactional DDL should override this.
    async fn swap_collections(&self, live: &str, shadow: &str, old: &str) -> StoreResult<()> {
        let existing = self.list_collections().await?;
        if existing.iter().any(|name| name == live) {
            self.rename_collection(live, old).await?;
        }
        self.rename_collection(shadow, live).await?;
        self.drop_collection(old).await
    }

    async fn count(&self, collection: &str) -> StoreResult<u64>;

    async fn find_track(&self, collection: &str, itunes_track_id: i64) -> StoreResult<Option<Track>>;

    /// Insert a new track; `DuplicateKey` if the id is taken
    async fn insert_track(&self, collection: &str, track: &Track) -> StoreResult<()>;

    /// Insert or replace a track by id
    async fn save_track(&self, collection: &str, track: &Track) -> StoreResult<()>;

    async fn find_chart(&self, collection: &str, key: ChartKey) -> StoreResult<Option<PopularChart>>;

    /// Insert or replace a chart by `(storefront_id, genre_id)`
    async fn save_chart(&self, collection: &str, chart: &PopularChart) -> StoreResult<()>;

    /// Every track, ordered by id
    async fn all_tracks(&self, collection: &str) -> StoreResult<Vec<Track>>;

    /// Every chart, ordered by `(storefront_id, genre_id)`
    async fn all_charts(&self, collection: &str) -> StoreResult<Vec<PopularChart>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(CollectionKind::Tracks.live(), "itunes_tracks");
        assert_eq!(CollectionKind::Tracks.shadow(), "itunes_tracks_processing");
        assert_eq!(CollectionKind::Charts.old(), "popular_charts_old");
    }
}
