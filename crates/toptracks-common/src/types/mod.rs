//! Domain value types shared by the ingestion pipeline and its readers

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Maximum number of tracks kept per popularity chart
pub const DEFAULT_TOP_N: usize = 100;

/// Kind of EPF snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Complete snapshot of every market
    Full,
    /// Delta since the last full or incremental snapshot
    Incremental,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Full => "full",
            FeedKind::Incremental => "incremental",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(FeedKind::Full),
            "incremental" => Ok(FeedKind::Incremental),
            other => Err(CommonError::InvalidFeedKind(other.to_string())),
        }
    }
}

/// One published EPF snapshot, as found by feed discovery
///
/// Folder URLs end with `/`; archive URLs are the folder URL followed by the
/// archive file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub kind: FeedKind,
    /// Folder holding the catalog tables (storefront, genre, song)
    pub catalog_folder_url: String,
    /// Folder holding the popularity tables
    pub popularity_folder_url: String,
    pub snapshot_date: DateTime<Utc>,
}

impl FeedDescriptor {
    pub fn catalog_archive_url(&self, file_name: &str) -> String {
        join_url(&self.catalog_folder_url, file_name)
    }

    pub fn popularity_archive_url(&self, file_name: &str) -> String {
        join_url(&self.popularity_folder_url, file_name)
    }
}

fn join_url(folder: &str, file_name: &str) -> String {
    if folder.ends_with('/') {
        format!("{}{}", folder, file_name)
    } else {
        format!("{}/{}", folder, file_name)
    }
}

/// Parse the `YYYYMMDD` date carried by EPF folder names (`itunes20240110/`)
///
/// The date is interpreted as midnight UTC.
pub fn snapshot_date_from_folder(folder_name: &str, prefix: &str) -> Result<DateTime<Utc>> {
    let digits = folder_name
        .trim()
        .trim_end_matches('/')
        .strip_prefix(prefix)
        .ok_or_else(|| CommonError::InvalidFolderName(folder_name.to_string()))?;

    let date = NaiveDate::parse_from_str(digits, "%Y%m%d")
        .map_err(|_| CommonError::InvalidSnapshotDate(digits.to_string()))?;

    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| CommonError::InvalidSnapshotDate(digits.to_string()))
}

/// Durable marker of the most recently published snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub last_imported_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(last_imported_at: DateTime<Utc>) -> Self {
        Self { last_imported_at }
    }

    /// Checkpoint after publishing a snapshot taken at `snapshot_date`
    ///
    /// Never moves backwards relative to `previous`.
    pub fn advance(previous: Option<&Checkpoint>, snapshot_date: DateTime<Utc>) -> Self {
        match previous {
            Some(prev) if prev.last_imported_at > snapshot_date => *prev,
            _ => Self::new(snapshot_date),
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Identity of a popularity chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChartKey {
    pub storefront_id: i32,
    pub genre_id: i32,
}

impl ChartKey {
    pub fn new(storefront_id: i32, genre_id: i32) -> Self {
        Self {
            storefront_id,
            genre_id,
        }
    }
}

impl fmt::Display for ChartKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.storefront_id, self.genre_id)
    }
}

/// Catalog track, identified by its iTunes track id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub itunes_track_id: i64,
    pub title: String,
    pub artist_name: String,
    pub collection_name: Option<String>,
    pub view_url: String,
    pub original_release_date: Option<NaiveDate>,
    pub catalog_release_date: Option<NaiveDate>,
    pub duration_ms: Option<i64>,
    pub preview_url: Option<String>,
}

/// Ranked top tracks of one storefront and genre
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularChart {
    pub storefront_id: i32,
    pub genre_id: i32,
    pub genre_name: String,
    /// ISO 3166 alpha-2 code of the storefront
    pub country_code: String,
    /// Most popular first
    pub top_track_ids: Vec<i64>,
}

impl PopularChart {
    pub fn key(&self) -> ChartKey {
        ChartKey::new(self.storefront_id, self.genre_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_kind_round_trip() {
        assert_eq!("Full".parse::<FeedKind>().unwrap(), FeedKind::Full);
        assert_eq!(FeedKind::Incremental.to_string(), "incremental");
        assert!("delta".parse::<FeedKind>().is_err());
    }

    #[test]
    fn test_snapshot_date_from_folder() {
        let date = snapshot_date_from_folder("itunes20240110/", "itunes").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-10T00:00:00+00:00");

        assert!(snapshot_date_from_folder("popularity20240110/", "itunes").is_err());
        assert!(snapshot_date_from_folder("itunes2024011/", "itunes").is_err());
        assert!(snapshot_date_from_folder("itunes20241340/", "itunes").is_err());
    }

    #[test]
    fn test_archive_urls() {
        let feed = FeedDescriptor {
            kind: FeedKind::Full,
            catalog_folder_url: "https://feeds.example.com/current/itunes20240110/".to_string(),
            popularity_folder_url: "https://feeds.example.com/current/popularity20240110".to_string(),
            snapshot_date: snapshot_date_from_folder("itunes20240110", "itunes").unwrap(),
        };

        assert_eq!(
            feed.catalog_archive_url("song.tbz"),
            "https://feeds.example.com/current/itunes20240110/song.tbz"
        );
        assert_eq!(
            feed.popularity_archive_url("song_popularity_per_genre.tbz"),
            "https://feeds.example.com/current/popularity20240110/song_popularity_per_genre.tbz"
        );
    }

    #[test]
    fn test_checkpoint_json_shape() {
        let checkpoint = Checkpoint::new(snapshot_date_from_folder("itunes20240110", "itunes").unwrap());
        let json: serde_json::Value = serde_json::from_slice(&checkpoint.to_json().unwrap()).unwrap();
        assert_eq!(json["lastImportedAt"], "2024-01-10T00:00:00Z");

        let parsed = Checkpoint::from_json(br#"{"lastImportedAt":"2024-01-10T00:00:00.000Z"}"#).unwrap();
        assert_eq!(parsed, checkpoint);
    }

    #[test]
    fn test_checkpoint_never_moves_backwards() {
        let older = snapshot_date_from_folder("itunes20240101", "itunes").unwrap();
        let newer = snapshot_date_from_folder("itunes20240110", "itunes").unwrap();

        let first = Checkpoint::advance(None, newer);
        assert_eq!(first.last_imported_at, newer);
        assert_eq!(Checkpoint::advance(Some(&first), older).last_imported_at, newer);
        assert_eq!(
            Checkpoint::advance(Some(&Checkpoint::new(older)), newer).last_imported_at,
            newer
        );
    }

    #[test]
    fn test_chart_key_display() {
        assert_eq!(ChartKey::new(143441, 14).to_string(), "143441.14");
    }
}
