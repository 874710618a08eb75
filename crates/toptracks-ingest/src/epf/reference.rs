//! Reference table reducers
//!
//! Storefront and genre tables hold a few thousand rows at most, so both are
//! reduced into plain in-memory maps.

use std::collections::HashMap;
use std::io;
use tokio::io::AsyncBufRead;
use tracing::{info, warn};

use super::countries::alpha2_for_alpha3;
use super::parser::{columns, RecordReader, GENRE, STOREFRONT};

/// Lookup maps used to label popularity charts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMaps {
    /// Storefront id to alpha-2 country code; `None` when the code did not resolve
    pub storefront_countries: HashMap<i32, Option<String>>,
    pub genre_names: HashMap<i32, String>,
}

impl ReferenceMaps {
    pub fn country_code(&self, storefront_id: i32) -> Option<&str> {
        self.storefront_countries
            .get(&storefront_id)
            .and_then(|code| code.as_deref())
    }

    pub fn genre_name(&self, genre_id: i32) -> Option<&str> {
        self.genre_names.get(&genre_id).map(String::as_str)
    }

    pub fn unresolved_storefronts(&self) -> usize {
        self.storefront_countries
            .values()
            .filter(|code| code.is_none())
            .count()
    }
}

/// Reduce the storefront table into `storefront id -> alpha-2 code`
///
/// Alpha-3 codes without an alpha-2 counterpart are kept as `None` and logged.
pub async fn reduce_storefronts<R>(reader: R) -> io::Result<HashMap<i32, Option<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut records = RecordReader::new(reader, STOREFRONT);
    let mut map = HashMap::new();

    while let Some(record) = records.next_record().await? {
        let Some(storefront_id) = record.parse_field::<i32>(columns::storefront::ID) else {
            continue;
        };
        let alpha3 = record.field(columns::storefront::COUNTRY_CODE).unwrap_or_default();

        let alpha2 = alpha2_for_alpha3(alpha3);
        if alpha2.is_none() {
            warn!(storefront_id, country_code = %alpha3, "Country code has no ISO alpha-2 match");
        }

        map.insert(storefront_id, alpha2.map(str::to_string));
    }

    info!(
        storefronts = map.len(),
        malformed = records.stats().malformed,
        "Loaded storefronts"
    );
    Ok(map)
}

/// Reduce the genre table into `genre id -> display name`
pub async fn reduce_genres<R>(reader: R) -> io::Result<HashMap<i32, String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut records = RecordReader::new(reader, GENRE);
    let mut map = HashMap::new();

    while let Some(record) = records.next_record().await? {
        let Some(genre_id) = record.parse_field::<i32>(columns::genre::ID) else {
            continue;
        };
        let name = record.field(columns::genre::NAME).unwrap_or_default();
        map.insert(genre_id, name.to_string());
    }

    info!(genres = map.len(), "Loaded genres");
    Ok(map)
}
