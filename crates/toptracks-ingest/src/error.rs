//! Ingestion error taxonomy
//!
//! Every variant here aborts the running cycle. Recoverable conditions
//! (malformed rows, unresolved country codes, individual write failures) are
//! counted in phase statistics and never become an `IngestError`.

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::epf::archive::ArchiveError;
use crate::store::StoreError;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Archive fetch, decompression, or member read failure
    #[error("Transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: ArchiveError,
    },

    #[error("Feed discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    /// Stale shadow or superseded collections survived cleanup
    #[error("Inconsistent shadow state, leftover collections: {0:?}")]
    ShadowState(Vec<String>),

    /// Publishing a shadow collection failed after the live name was touched
    #[error("Swap of {collection} failed: {source}")]
    Swap {
        collection: String,
        #[source]
        source: StoreError,
    },

    /// Publication steps invoked out of order
    #[error("Publication step out of order: {0}")]
    Publication(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn transport(url: impl Into<String>, source: impl Into<ArchiveError>) -> Self {
        IngestError::Transport {
            url: url.into(),
            source: source.into(),
        }
    }
}
