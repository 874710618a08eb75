//! Ingestion configuration
//!
//! Everything is read from the environment (after loading `.env`) with the
//! defaults below, then validated once at startup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::epf::popularity::{AggregationPolicy, AllowList, DEFAULT_ALLOWED_GENRES};
use crate::storage::StorageConfig;
use toptracks_common::types::DEFAULT_TOP_N;

/// EPF v4 root listing
pub const DEFAULT_EPF_BASE_URL: &str = "https://feeds.itunes.apple.com/feeds/epf/v4/current/current";

pub const DEFAULT_STOREFRONT_ARCHIVE: &str = "storefront.tbz";
pub const DEFAULT_GENRE_ARCHIVE: &str = "genre.tbz";
pub const DEFAULT_POPULARITY_ARCHIVE: &str = "song_popularity_per_genre.tbz";
pub const DEFAULT_TRACK_ARCHIVE: &str = "song.tbz";

pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Longest silence tolerated on an archive download
pub const DEFAULT_HTTP_READ_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 60;

/// Decoded chunks that may wait for a slow consumer
pub const DEFAULT_STREAM_BUFFER_CHUNKS: usize = 16;

pub const DEFAULT_USER_AGENT: &str = concat!("toptracks-ingest/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1_000_000;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/toptracks";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CHECKPOINT_PATH: &str = "./stats.json";
pub const DEFAULT_CHECKPOINT_S3_KEY: &str = "epf/checkpoint.json";

/// HTTP basic auth for the EPF host
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Archive file names inside each feed folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNames {
    pub storefront: String,
    pub genre: String,
    pub popularity: String,
    pub track: String,
}

impl Default for ArchiveNames {
    fn default() -> Self {
        Self {
            storefront: DEFAULT_STOREFRONT_ARCHIVE.to_string(),
            genre: DEFAULT_GENRE_ARCHIVE.to_string(),
            popularity: DEFAULT_POPULARITY_ARCHIVE.to_string(),
            track: DEFAULT_TRACK_ARCHIVE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub archives: ArchiveNames,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EPF_BASE_URL.to_string(),
            credentials: None,
            archives: ArchiveNames::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Per-read timeout for archive bodies
    pub read_timeout_secs: u64,
    /// Whole-request timeout for listing pages
    pub discovery_timeout_secs: u64,
    pub stream_buffer_chunks: usize,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_HTTP_READ_TIMEOUT_SECS,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            stream_buffer_chunks: DEFAULT_STREAM_BUFFER_CHUNKS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Where the checkpoint lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointConfig {
    File { path: PathBuf },
    S3 { key: String, storage: StorageConfig },
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        CheckpointConfig::File {
            path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
        }
    }
}

/// Complete configuration of one ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub feed: FeedConfig,
    pub http: HttpConfig,
    pub aggregation: AggregationPolicy,
    pub database: DatabaseConfig,
    pub checkpoint: CheckpointConfig,
    /// Scanned track rows between progress log lines
    pub progress_interval: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            http: HttpConfig::default(),
            aggregation: AggregationPolicy::default(),
            database: DatabaseConfig::default(),
            checkpoint: CheckpointConfig::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_allow_list(key: &str, default: AllowList) -> anyhow::Result<AllowList> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .parse()
            .map_err(|e: String| anyhow::anyhow!("{}: {}", key, e)),
        _ => Ok(default),
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let credentials = match (std::env::var("EPF_USERNAME"), std::env::var("EPF_PASSWORD")) {
            (Ok(username), Ok(password)) if !username.is_empty() => {
                Some(Credentials::new(username, password))
            },
            _ => None,
        };

        let checkpoint = match env_string("CHECKPOINT_BACKEND", "file").to_lowercase().as_str() {
            "file" => CheckpointConfig::File {
                path: PathBuf::from(env_string("CHECKPOINT_PATH", DEFAULT_CHECKPOINT_PATH)),
            },
            "s3" => CheckpointConfig::S3 {
                key: env_string("CHECKPOINT_S3_KEY", DEFAULT_CHECKPOINT_S3_KEY),
                storage: StorageConfig::from_env(),
            },
            other => anyhow::bail!("Unknown CHECKPOINT_BACKEND '{}', expected file or s3", other),
        };

        let config = IngestConfig {
            feed: FeedConfig {
                base_url: env_string("EPF_BASE_URL", DEFAULT_EPF_BASE_URL),
                credentials,
                archives: ArchiveNames {
                    storefront: env_string("EPF_STOREFRONT_ARCHIVE", DEFAULT_STOREFRONT_ARCHIVE),
                    genre: env_string("EPF_GENRE_ARCHIVE", DEFAULT_GENRE_ARCHIVE),
                    popularity: env_string("EPF_POPULARITY_ARCHIVE", DEFAULT_POPULARITY_ARCHIVE),
                    track: env_string("EPF_TRACK_ARCHIVE", DEFAULT_TRACK_ARCHIVE),
                },
            },
            http: HttpConfig {
                connect_timeout_secs: env_parse(
                    "EPF_HTTP_CONNECT_TIMEOUT_SECS",
                    DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
                ),
                read_timeout_secs: env_parse("EPF_HTTP_READ_TIMEOUT_SECS", DEFAULT_HTTP_READ_TIMEOUT_SECS),
                discovery_timeout_secs: env_parse(
                    "EPF_DISCOVERY_TIMEOUT_SECS",
                    DEFAULT_DISCOVERY_TIMEOUT_SECS,
                ),
                stream_buffer_chunks: env_parse("EPF_STREAM_BUFFER_CHUNKS", DEFAULT_STREAM_BUFFER_CHUNKS),
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            aggregation: AggregationPolicy {
                allowed_genres: env_allow_list(
                    "EPF_ALLOWED_GENRES",
                    AllowList::only(DEFAULT_ALLOWED_GENRES),
                )?,
                allowed_storefronts: env_allow_list("EPF_ALLOWED_STOREFRONTS", AllowList::Any)?,
                top_n: env_parse("EPF_TOP_N", DEFAULT_TOP_N),
            },
            database: DatabaseConfig {
                url: env_string("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            checkpoint,
            progress_interval: env_parse("EPF_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feed.base_url.trim().is_empty() {
            anyhow::bail!("EPF base URL cannot be empty");
        }

        if self.aggregation.top_n == 0 {
            anyhow::bail!("Top-N must be greater than 0");
        }

        if self.aggregation.allowed_genres.is_empty() {
            anyhow::bail!("Genre allow-list cannot be empty");
        }

        if self.aggregation.allowed_storefronts.is_empty() {
            anyhow::bail!("Storefront allow-list cannot be empty, use * for all");
        }

        if self.http.stream_buffer_chunks == 0 {
            anyhow::bail!("Stream buffer must hold at least one chunk");
        }

        if self.progress_interval == 0 {
            anyhow::bail!("Progress interval must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.feed.credentials.is_none() {
            tracing::warn!("EPF_USERNAME/EPF_PASSWORD not set - feed requests will be anonymous");
        }

        Ok(())
    }
}
