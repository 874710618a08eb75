//! Full/incremental sync decision

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use toptracks_common::types::{Checkpoint, FeedKind};

use crate::discovery::DiscoveredFeeds;

/// Feed kinds one cycle has to import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    pub full: bool,
    pub incremental: bool,
}

impl SyncPlan {
    /// Compare the published feeds against the checkpoint
    ///
    /// Without a checkpoint everything available is imported. Otherwise a
    /// feed is imported when its snapshot is strictly newer than the
    /// checkpoint.
    pub fn decide(checkpoint: Option<&Checkpoint>, feeds: &DiscoveredFeeds) -> Self {
        match checkpoint {
            None => SyncPlan {
                full: true,
                incremental: feeds.incremental.is_some(),
            },
            Some(checkpoint) => {
                let newer = |date: DateTime<Utc>| date > checkpoint.last_imported_at;
                SyncPlan {
                    full: newer(feeds.full.snapshot_date),
                    incremental: feeds
                        .incremental
                        .as_ref()
                        .is_some_and(|feed| newer(feed.snapshot_date)),
                }
            },
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.full && !self.incremental
    }

    /// Kinds to run, full first
    pub fn kinds(&self) -> Vec<FeedKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.full {
            kinds.push(FeedKind::Full);
        }
        if self.incremental {
            kinds.push(FeedKind::Incremental);
        }
        kinds
    }
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.full, self.incremental) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("full"),
            (false, true) => f.write_str("incremental"),
            (true, true) => f.write_str("full+incremental"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toptracks_common::types::{snapshot_date_from_folder, FeedDescriptor};

    fn feed(kind: FeedKind, folder: &str) -> FeedDescriptor {
        FeedDescriptor {
            kind,
            catalog_folder_url: format!("https://feeds.example.com/{}/", folder),
            popularity_folder_url: format!("https://feeds.example.com/{}/", folder.replace("itunes", "popularity")),
            snapshot_date: snapshot_date_from_folder(folder, "itunes").unwrap(),
        }
    }

    fn checkpoint(folder: &str) -> Checkpoint {
        Checkpoint::new(snapshot_date_from_folder(folder, "itunes").unwrap())
    }

    fn feeds(incremental: Option<&str>) -> DiscoveredFeeds {
        DiscoveredFeeds {
            full: feed(FeedKind::Full, "itunes20240110"),
            incremental: incremental.map(|folder| feed(FeedKind::Incremental, folder)),
        }
    }

    #[test]
    fn test_no_checkpoint_full_only() {
        let plan = SyncPlan::decide(None, &feeds(None));
        assert_eq!(plan, SyncPlan { full: true, incremental: false });
        assert_eq!(plan.kinds(), vec![FeedKind::Full]);
    }

    #[test]
    fn test_no_checkpoint_with_incremental() {
        let plan = SyncPlan::decide(None, &feeds(Some("itunes20240116")));
        assert_eq!(plan.kinds(), vec![FeedKind::Full, FeedKind::Incremental]);
    }

    #[test]
    fn test_checkpoint_equal_to_both_dates_is_noop() {
        let feeds = DiscoveredFeeds {
            full: feed(FeedKind::Full, "itunes20240110"),
            incremental: Some(feed(FeedKind::Incremental, "itunes20240110")),
        };
        let plan = SyncPlan::decide(Some(&checkpoint("itunes20240110")), &feeds);
        assert!(plan.is_noop());
        assert!(plan.kinds().is_empty());
        assert_eq!(plan.to_string(), "none");
    }

    #[test]
    fn test_only_newer_incremental() {
        let plan = SyncPlan::decide(Some(&checkpoint("itunes20240110")), &feeds(Some("itunes20240116")));
        assert_eq!(plan, SyncPlan { full: false, incremental: true });
    }

    #[test]
    fn test_newer_full_after_old_checkpoint() {
        let plan = SyncPlan::decide(Some(&checkpoint("itunes20240101")), &feeds(Some("itunes20240103")));
        assert_eq!(plan.to_string(), "full+incremental");
    }

    #[test]
    fn test_checkpoint_ahead_of_feeds() {
        let plan = SyncPlan::decide(Some(&checkpoint("itunes20240201")), &feeds(Some("itunes20240116")));
        assert!(plan.is_noop());
    }
}
