//! TopTracks Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging bootstrap, and error handling for the TopTracks workspace.
//!
//! - **Types**: feed descriptors, checkpoints, catalog tracks and popularity charts
//! - **Error Handling**: [`CommonError`] and its result alias
//! - **Logging**: [`logging::init_logging`] configured from `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use toptracks_common::types::Checkpoint;
//!
//! fn read(json: &str) -> toptracks_common::Result<()> {
//!     let checkpoint = Checkpoint::from_json(json.as_bytes())?;
//!     println!("last import: {}", checkpoint.last_imported_at);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
