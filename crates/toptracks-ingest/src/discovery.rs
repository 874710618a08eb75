//! EPF feed discovery
//!
//! The EPF host publishes plain directory listings. The root listing holds
//! one `itunesYYYYMMDD/` folder (the current full feed), the matching
//! `popularityYYYYMMDD/` folder and, when a delta exists, an `incremental/`
//! folder whose `current/` listing has the same shape.

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use toptracks_common::types::{snapshot_date_from_folder, FeedDescriptor, FeedKind};
use toptracks_common::CommonError;
use tracing::{debug, info, warn};

use crate::config::{Credentials, HttpConfig};

const CATALOG_PREFIX: &str = "itunes";
const POPULARITY_PREFIX: &str = "popularity";
const INCREMENTAL_PREFIX: &str = "incremental";
const LINK_SELECTOR: &str = "tr > td > a";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The listing does not hold exactly one full-feed folder
    #[error("{prefix} feed link not found in {url} ({found} candidates)")]
    LinkNotFound {
        prefix: String,
        url: String,
        found: usize,
    },

    #[error("Invalid feed folder: {0}")]
    InvalidFolder(#[from] CommonError),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// Feeds currently published by the EPF host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFeeds {
    pub full: FeedDescriptor,
    pub incremental: Option<FeedDescriptor>,
}

impl DiscoveredFeeds {
    pub fn get(&self, kind: FeedKind) -> Option<&FeedDescriptor> {
        match kind {
            FeedKind::Full => Some(&self.full),
            FeedKind::Incremental => self.incremental.as_ref(),
        }
    }
}

#[async_trait]
pub trait FeedDiscovery: Send + Sync {
    async fn discover(&self) -> Result<DiscoveredFeeds, DiscoveryError>;
}

/// Fixed answer, for tests and replays
#[derive(Debug, Clone)]
pub struct StaticDiscovery(pub DiscoveredFeeds);

#[async_trait]
impl FeedDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<DiscoveredFeeds, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Texts of listing links starting with `prefix`, in page order
pub fn listing_links(html: &str, prefix: &str) -> Result<Vec<String>, DiscoveryError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(LINK_SELECTOR).map_err(|e| DiscoveryError::Selector(e.to_string()))?;

    Ok(document
        .select(&selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| text.starts_with(prefix))
        .collect())
}

/// Describe the feed rooted at `{parent_url}/{folder}`
pub fn feed_from_folder(
    kind: FeedKind,
    parent_url: &str,
    folder: &str,
) -> Result<FeedDescriptor, DiscoveryError> {
    let folder = folder.trim().trim_end_matches('/');
    let snapshot_date = snapshot_date_from_folder(folder, CATALOG_PREFIX)?;
    let popularity_folder = folder.replacen(CATALOG_PREFIX, POPULARITY_PREFIX, 1);
    let parent = parent_url.trim_end_matches('/');

    Ok(FeedDescriptor {
        kind,
        catalog_folder_url: format!("{}/{}/", parent, folder),
        popularity_folder_url: format!("{}/{}/", parent, popularity_folder),
        snapshot_date,
    })
}

/// Discovery against the live EPF directory listings
pub struct EpfDiscovery {
    client: reqwest::Client,
    root_url: String,
    credentials: Option<Credentials>,
}

impl EpfDiscovery {
    pub fn new(
        root_url: impl Into<String>,
        credentials: Option<Credentials>,
        http: &HttpConfig,
    ) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(http.discovery_timeout())
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            root_url: root_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn fetch_listing(&self, url: &str) -> Result<String, DiscoveryError> {
        debug!(url = %url, "Fetching EPF listing");

        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        Ok(response.text().await?)
    }

    async fn discover_incremental(&self, root_page: &str) -> Result<Option<FeedDescriptor>, DiscoveryError> {
        if listing_links(root_page, INCREMENTAL_PREFIX)?.is_empty() {
            debug!("No incremental feed published");
            return Ok(None);
        }

        let incremental_url = format!("{}/incremental/current", self.root_url);
        let page = self.fetch_listing(&incremental_url).await?;

        // Folder names embed YYYYMMDD, so the greatest is the newest
        let Some(folder) = listing_links(&page, CATALOG_PREFIX)?.into_iter().max() else {
            warn!(url = %incremental_url, "Incremental listing has no itunes folder");
            return Ok(None);
        };

        feed_from_folder(FeedKind::Incremental, &incremental_url, &folder).map(Some)
    }
}

#[async_trait]
impl FeedDiscovery for EpfDiscovery {
    async fn discover(&self) -> Result<DiscoveredFeeds, DiscoveryError> {
        let root_page = self.fetch_listing(&self.root_url).await?;

        let links = listing_links(&root_page, CATALOG_PREFIX)?;
        let [folder] = links.as_slice() else {
            return Err(DiscoveryError::LinkNotFound {
                prefix: CATALOG_PREFIX.to_string(),
                url: self.root_url.clone(),
                found: links.len(),
            });
        };

        let full = feed_from_folder(FeedKind::Full, &self.root_url, folder)?;
        let incremental = self.discover_incremental(&root_page).await?;

        info!(
            full = %full.snapshot_date.date_naive(),
            incremental = ?incremental.as_ref().map(|feed| feed.snapshot_date.date_naive()),
            "Discovered EPF feeds"
        );

        Ok(DiscoveredFeeds { full, incremental })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT_LISTING: &str = r#"
        <html><body><table>
          <tr><th>Name</th><th>Last modified</th></tr>
          <tr><td><a href="../">Parent Directory</a></td><td></td></tr>
          <tr><td><a href="incremental/">incremental/</a></td><td>2024-01-16</td></tr>
          <tr><td><a href="itunes20240110/">itunes20240110/</a></td><td>2024-01-10</td></tr>
          <tr><td><a href="popularity20240110/">popularity20240110/</a></td><td>2024-01-10</td></tr>
        </table></body></html>
    "#;

    #[test]
    fn test_listing_links() {
        assert_eq!(
            listing_links(ROOT_LISTING, "itunes").unwrap(),
            vec!["itunes20240110/".to_string()]
        );
        assert_eq!(listing_links(ROOT_LISTING, "incremental").unwrap().len(), 1);
        assert!(listing_links(ROOT_LISTING, "pricing").unwrap().is_empty());
    }

    #[test]
    fn test_links_outside_tables_are_ignored() {
        let html = r#"<p><a href="itunes20240110/">itunes20240110/</a></p>"#;
        assert!(listing_links(html, "itunes").unwrap().is_empty());
    }

    #[test]
    fn test_feed_from_folder() {
        let feed = feed_from_folder(
            FeedKind::Full,
            "https://feeds.example.com/epf/current/",
            "itunes20240110/",
        )
        .unwrap();

        assert_eq!(feed.catalog_folder_url, "https://feeds.example.com/epf/current/itunes20240110/");
        assert_eq!(
            feed.popularity_folder_url,
            "https://feeds.example.com/epf/current/popularity20240110/"
        );
        assert_eq!(feed.snapshot_date.to_rfc3339(), "2024-01-10T00:00:00+00:00");
    }

    #[test]
    fn test_feed_from_bad_folder() {
        let result = feed_from_folder(FeedKind::Full, "https://feeds.example.com", "itunesLATEST/");
        assert!(matches!(result, Err(DiscoveryError::InvalidFolder(_))));
    }
}
