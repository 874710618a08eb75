//! EPF (Enterprise Partner Feed) reading
//!
//! - `archive`: streaming download and decompression of `.tbz` table archives
//! - `parser`: the `0x01`/`0x02` delimited record format shared by every table
//! - `reference`: storefront and genre lookup maps
//! - `popularity`: per-market chart aggregation

pub mod archive;
pub mod countries;
pub mod parser;
pub mod popularity;
pub mod reference;

pub use archive::{ArchiveEntry, ArchiveError, ArchiveFetcher, FeedArchive};
pub use parser::{Layout, Record, RecordReader};
pub use popularity::{Aggregation, AggregationPolicy, AllowList};
pub use reference::ReferenceMaps;
