//! TopTracks ingestion library
//!
//! Batch job that keeps the popular-tracks catalog in sync with the EPF
//! music feeds.
//!
//! # Overview
//!
//! - **Archive decoding** (`epf::archive`): streaming tar.bz2 / tar.gz
//!   bodies straight off the HTTP connection, one table member at a time
//! - **Record parsing** (`epf::parser`): `\x01`/`\x02` delimited EPF rows
//! - **Reference tables** (`epf::reference`): storefront → country code and
//!   genre → name maps
//! - **Popularity aggregation** (`epf::popularity`): top-N track ids per
//!   (storefront, genre)
//! - **Publication** (`sync`): shadow collections, catalog merge and the
//!   rename swap that makes a snapshot visible
//! - **Reconciliation** (`sync::pipeline`): full/incremental decision against
//!   the durable checkpoint
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use toptracks_ingest::{
//!     checkpoint::FileCheckpointStore, config::IngestConfig, discovery::EpfDiscovery,
//!     epf::ArchiveFetcher, store::MemoryStore, sync::IngestPipeline, telemetry::TracingReporter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let credentials = config.feed.credentials.clone();
//!     let discovery = EpfDiscovery::new(&config.feed.base_url, credentials.clone(), &config.http)?;
//!     let fetcher = ArchiveFetcher::new(&config.http, credentials)?;
//!
//!     let pipeline = IngestPipeline::new(
//!         Arc::new(discovery),
//!         fetcher,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(FileCheckpointStore::new("./stats.json")),
//!         Arc::new(TracingReporter),
//!     );
//!     let report = pipeline.run_cycle().await?;
//!     println!("{}", report.plan);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod config;
pub mod discovery;
pub mod epf;
pub mod error;
pub mod storage;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use error::{IngestError, IngestResult};
pub use sync::{CycleReport, FeedReport, IngestPipeline};
