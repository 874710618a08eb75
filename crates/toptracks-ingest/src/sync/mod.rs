//! Feed synchronization
//!
//! Everything that turns decoded EPF tables into published collections:
//! chart and catalog writers, the shadow publication protocol, the sync
//! decision and the cycle driver.

pub mod catalog;
pub mod charts;
pub mod pipeline;
pub mod publication;
pub mod reconcile;

pub use catalog::{CatalogMerge, MergeMode, MergeStats};
pub use charts::ChartStats;
pub use pipeline::{CycleReport, FeedReport, IngestPipeline};
pub use publication::{Publication, PublicationState};
pub use reconcile::SyncPlan;
