//! In-process document store
//!
//! Same collection and uniqueness semantics as [`super::PgStore`]. Backs
//! `--dry-run` and the pipeline tests, and can be told to fail specific
//! writes or renames, or to keep collections it was asked to drop.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use toptracks_common::types::{ChartKey, PopularChart, Track};

use super::{CollectionKind, DocumentStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Collection {
    Tracks(BTreeMap<i64, Track>),
    Charts(BTreeMap<ChartKey, PopularChart>),
}

impl Collection {
    fn empty(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Tracks => Collection::Tracks(BTreeMap::new()),
            CollectionKind::Charts => Collection::Charts(BTreeMap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Collection::Tracks(tracks) => tracks.len(),
            Collection::Charts(charts) => charts.len(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    failing_renames: HashSet<String>,
    sticky_collections: HashSet<String>,
    failing_tracks: HashSet<i64>,
    failing_charts: HashSet<ChartKey>,
}

impl Inner {
    fn tracks_mut(&mut self, name: &str) -> StoreResult<&mut BTreeMap<i64, Track>> {
        match self.collections.get_mut(name) {
            Some(Collection::Tracks(tracks)) => Ok(tracks),
            Some(_) => Err(kind_mismatch(name, CollectionKind::Tracks)),
            None => Err(StoreError::CollectionNotFound(name.to_string())),
        }
    }

    fn charts_mut(&mut self, name: &str) -> StoreResult<&mut BTreeMap<ChartKey, PopularChart>> {
        match self.collections.get_mut(name) {
            Some(Collection::Charts(charts)) => Ok(charts),
            Some(_) => Err(kind_mismatch(name, CollectionKind::Charts)),
            None => Err(StoreError::CollectionNotFound(name.to_string())),
        }
    }

    fn check_track_write(&self, collection: &str, id: i64) -> StoreResult<()> {
        if self.failing_tracks.contains(&id) {
            return Err(StoreError::Unavailable(format!("write of track {} to {}", id, collection)));
        }
        Ok(())
    }
}

fn kind_mismatch(name: &str, expected: CollectionKind) -> StoreError {
    StoreError::KindMismatch {
        collection: name.to_string(),
        expected,
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every rename onto `name` fail
    pub fn fail_renames_to(&self, name: &str) {
        self.lock().failing_renames.insert(name.to_string());
    }

    /// Acknowledge drops of `name` without removing the collection
    pub fn keep_on_drop(&self, name: &str) {
        self.lock().sticky_collections.insert(name.to_string());
    }

    /// Make every write of track `id` fail
    pub fn fail_track_writes(&self, id: i64) {
        self.lock().failing_tracks.insert(id);
    }

    /// Make every write of chart `key` fail
    pub fn fail_chart_writes(&self, key: ChartKey) {
        self.lock().failing_charts.insert(key);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.failing_renames.clear();
        inner.sticky_collections.clear();
        inner.failing_tracks.clear();
        inner.failing_charts.clear();
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.lock().collections.contains_key(name)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.lock().collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        inner.collections.insert(name.to_string(), Collection::empty(kind));
        Ok(())
    }

    async fn ensure_indexes(&self, name: &str, kind: CollectionKind) -> StoreResult<()> {
        // Uniqueness is structural here; only validate the target
        let mut inner = self.lock();
        match kind {
            CollectionKind::Tracks => {
                inner.tracks_mut(name)?;
            },
            CollectionKind::Charts => {
                inner.charts_mut(name)?;
            },
        }
        Ok(())
    }

    async fn copy_collection(&self, from: &str, to: &str) -> StoreResult<u64> {
        let mut inner = self.lock();
        let source = inner
            .collections
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::CollectionNotFound(from.to_string()))?;

        let copied = source.len() as u64;
        match source {
            Collection::Tracks(tracks) => inner.tracks_mut(to)?.extend(tracks),
            Collection::Charts(charts) => inner.charts_mut(to)?.extend(charts),
        }
        Ok(copied)
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.sticky_collections.contains(name) {
            inner.collections.remove(name);
        }
        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.failing_renames.contains(to) {
            return Err(StoreError::Unavailable(format!("rename {} -> {}", from, to)));
        }
        if inner.collections.contains_key(to) {
            return Err(StoreError::CollectionExists(to.to_string()));
        }
        let collection = inner
            .collections
            .remove(from)
            .ok_or_else(|| StoreError::CollectionNotFound(from.to_string()))?;
        inner.collections.insert(to.to_string(), collection);
        Ok(())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.lock()
            .collections
            .get(collection)
            .map(|c| c.len() as u64)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    async fn find_track(&self, collection: &str, itunes_track_id: i64) -> StoreResult<Option<Track>> {
        Ok(self.lock().tracks_mut(collection)?.get(&itunes_track_id).cloned())
    }

    async fn insert_track(&self, collection: &str, track: &Track) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_track_write(collection, track.itunes_track_id)?;

        let tracks = inner.tracks_mut(collection)?;
        if tracks.contains_key(&track.itunes_track_id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: track.itunes_track_id.to_string(),
            });
        }
        tracks.insert(track.itunes_track_id, track.clone());
        Ok(())
    }

    async fn save_track(&self, collection: &str, track: &Track) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check_track_write(collection, track.itunes_track_id)?;
        inner
            .tracks_mut(collection)?
            .insert(track.itunes_track_id, track.clone());
        Ok(())
    }

    async fn find_chart(&self, collection: &str, key: ChartKey) -> StoreResult<Option<PopularChart>> {
        Ok(self.lock().charts_mut(collection)?.get(&key).cloned())
    }

    async fn save_chart(&self, collection: &str, chart: &PopularChart) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.failing_charts.contains(&chart.key()) {
            return Err(StoreError::Unavailable(format!(
                "write of chart {} to {}",
                chart.key(),
                collection
            )));
        }

        let charts = inner.charts_mut(collection)?;
        let clash = charts.values().any(|existing| {
            existing.key() != chart.key()
                && existing.country_code == chart.country_code
                && existing.genre_id == chart.genre_id
        });
        if clash {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: format!("{}.{}", chart.country_code, chart.genre_id),
            });
        }

        charts.insert(chart.key(), chart.clone());
        Ok(())
    }

    async fn all_tracks(&self, collection: &str) -> StoreResult<Vec<Track>> {
        Ok(self.lock().tracks_mut(collection)?.values().cloned().collect())
    }

    async fn all_charts(&self, collection: &str) -> StoreResult<Vec<PopularChart>> {
        Ok(self.lock().charts_mut(collection)?.values().cloned().collect())
    }
}
