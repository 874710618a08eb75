//! Chart persistence
//!
//! Turns the aggregated matrix into labelled `PopularChart` documents and
//! writes them into the shadow chart collection. One bad chart is reported
//! and skipped; the rest are still written.

use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use toptracks_common::types::{ChartKey, PopularChart};
use tracing::info;

use crate::epf::reference::ReferenceMaps;
use crate::store::{DocumentStore, StoreError};
use crate::telemetry::ErrorReporter;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("No country code for storefront {0}")]
    UnknownCountry(i32),

    #[error("No genre name for genre {0}")]
    UnknownGenre(i32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChartStats {
    pub saved: u64,
    pub failed: u64,
}

/// Label one chart with its country code and genre name
pub fn build_chart(
    key: ChartKey,
    track_ids: &[i64],
    references: &ReferenceMaps,
) -> Result<PopularChart, ChartError> {
    let country_code = references
        .country_code(key.storefront_id)
        .ok_or(ChartError::UnknownCountry(key.storefront_id))?;
    let genre_name = references
        .genre_name(key.genre_id)
        .ok_or(ChartError::UnknownGenre(key.genre_id))?;

    Ok(PopularChart {
        storefront_id: key.storefront_id,
        genre_id: key.genre_id,
        genre_name: genre_name.to_string(),
        country_code: country_code.to_string(),
        top_track_ids: track_ids.to_vec(),
    })
}

/// Write every chart of `matrix` into `collection`
pub async fn write_charts(
    store: &dyn DocumentStore,
    collection: &str,
    matrix: &BTreeMap<ChartKey, Vec<i64>>,
    references: &ReferenceMaps,
    reporter: &dyn ErrorReporter,
) -> ChartStats {
    let start = Instant::now();
    let mut stats = ChartStats::default();

    for (key, track_ids) in matrix {
        let result = match build_chart(*key, track_ids, references) {
            Ok(chart) => store.save_chart(collection, &chart).await.map_err(ChartError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => stats.saved += 1,
            Err(e) => {
                stats.failed += 1;
                reporter.report(&format!("save_chart {}", key), &e);
            },
        }
    }

    info!(
        collection = %collection,
        saved = stats.saved,
        failed = stats.failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Saved popularity charts"
    );

    stats
}
