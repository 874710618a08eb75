//! PostgreSQL document store
//!
//! Every collection is a table in the current schema. Unique constraints are
//! added without explicit names so PostgreSQL picks fresh index names; a
//! renamed table keeps its indexes and a new shadow table never collides
//! with them.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPool;
use sqlx::{Executor, FromRow, Postgres};
use toptracks_common::types::{ChartKey, PopularChart, Track};
use tracing::{debug, info};

use super::{CollectionKind, DocumentStore, StoreError, StoreResult};

const UNDEFINED_TABLE: &str = "42P01";
const DUPLICATE_TABLE: &str = "42P07";

const TRACK_COLUMNS: &str = "itunes_track_id, title, artist_name, collection_name, view_url, \
     original_release_date, catalog_release_date, duration_ms, preview_url";

const CHART_COLUMNS: &str = "storefront_id, genre_id, genre_name, country_code, top_track_ids";

#[derive(Debug, FromRow)]
struct TrackRow {
    itunes_track_id: i64,
    title: String,
    artist_name: String,
    collection_name: Option<String>,
    view_url: String,
    original_release_date: Option<NaiveDate>,
    catalog_release_date: Option<NaiveDate>,
    duration_ms: Option<i64>,
    preview_url: Option<String>,
}

impl From<TrackRow> for Track {
    fn from(row: TrackRow) -> Self {
        Track {
            itunes_track_id: row.itunes_track_id,
            title: row.title,
            artist_name: row.artist_name,
            collection_name: row.collection_name,
            view_url: row.view_url,
            original_release_date: row.original_release_date,
            catalog_release_date: row.catalog_release_date,
            duration_ms: row.duration_ms,
            preview_url: row.preview_url,
        }
    }
}

#[derive(Debug, FromRow)]
struct ChartRow {
    storefront_id: i32,
    genre_id: i32,
    genre_name: String,
    country_code: String,
    top_track_ids: Vec<i64>,
}

impl From<ChartRow> for PopularChart {
    fn from(row: ChartRow) -> Self {
        PopularChart {
            storefront_id: row.storefront_id,
            genre_id: row.genre_id,
            genre_name: row.genre_name,
            country_code: row.country_code,
            top_track_ids: row.top_track_ids,
        }
    }
}

/// Quote a collection name for use as a table identifier
///
/// Only lowercase ASCII letters, digits and `_` are accepted.
fn quote_ident(name: &str) -> StoreResult<String> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StoreError::InvalidCollectionName(name.to_string()))
    }
}

fn table_ddl(table: &str, kind: CollectionKind) -> String {
    match kind {
        CollectionKind::Tracks => format!(
            r#"
            CREATE TABLE {table} (
                itunes_track_id BIGINT NOT NULL,
                title TEXT NOT NULL,
                artist_name TEXT NOT NULL,
                collection_name TEXT,
                view_url TEXT NOT NULL,
                original_release_date DATE,
                catalog_release_date DATE,
                duration_ms BIGINT,
                preview_url TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
        CollectionKind::Charts => format!(
            r#"
            CREATE TABLE {table} (
                storefront_id INTEGER NOT NULL,
                genre_id INTEGER NOT NULL,
                genre_name TEXT NOT NULL,
                country_code TEXT NOT NULL,
                top_track_ids BIGINT[] NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        ),
    }
}

/// Unique constraints per kind, as column lists
fn unique_keys(kind: CollectionKind) -> &'static [&'static str] {
    match kind {
        CollectionKind::Tracks => &["itunes_track_id"],
        CollectionKind::Charts => &["storefront_id, genre_id", "country_code, genre_id"],
    }
}

fn map_ddl_error(err: sqlx::Error, from: &str, to: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some(UNDEFINED_TABLE) => return StoreError::CollectionNotFound(from.to_string()),
            Some(DUPLICATE_TABLE) => return StoreError::CollectionExists(to.to_string()),
            _ => {},
        }
    }
    StoreError::Database(err)
}

fn map_write_error(err: sqlx::Error, collection: &str, key: impl ToString) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: key.to_string(),
            };
        }
        if db_err.code().as_deref() == Some(UNDEFINED_TABLE) {
            return StoreError::CollectionNotFound(collection.to_string());
        }
    }
    StoreError::Database(err)
}

async fn table_exists<'e, E>(executor: E, name: &str) -> StoreResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM pg_tables
            WHERE schemaname = current_schema() AND tablename = $1
        )
        "#,
    )
    .bind(name)
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

/// Document store on a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn unique_index_count(&self, name: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            WHERE c.relname = $1
              AND c.relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = current_schema())
              AND i.indisunique
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT tablename::TEXT FROM pg_tables WHERE schemaname = current_schema() ORDER BY tablename",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    async fn create_collection(&self, name: &str, kind: CollectionKind) -> StoreResult<()> {
        let table = quote_ident(name)?;
        sqlx::query(&table_ddl(&table, kind))
            .execute(&self.pool)
            .await
            .map_err(|e| map_ddl_error(e, name, name))?;

        debug!(collection = %name, %kind, "Created collection");
        Ok(())
    }

    async fn ensure_indexes(&self, name: &str, kind: CollectionKind) -> StoreResult<()> {
        let table = quote_ident(name)?;
        let keys = unique_keys(kind);

        if self.unique_index_count(name).await? >= keys.len() as i64 {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for columns in keys {
            sqlx::query(&format!("ALTER TABLE {} ADD UNIQUE ({})", table, columns))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_ddl_error(e, name, name))?;
        }
        tx.commit().await?;

        debug!(collection = %name, indexes = keys.len(), "Created unique indexes");
        Ok(())
    }

    async fn copy_collection(&self, from: &str, to: &str) -> StoreResult<u64> {
        let source = quote_ident(from)?;
        let target = quote_ident(to)?;

        let result = sqlx::query(&format!("INSERT INTO {} SELECT * FROM {}", target, source))
            .execute(&self.pool)
            .await
            .map_err(|e| map_ddl_error(e, from, to))?;

        Ok(result.rows_affected())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let table = quote_ident(name)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        let source = quote_ident(from)?;
        let target = quote_ident(to)?;

        sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", source, target))
            .execute(&self.pool)
            .await
            .map_err(|e| map_ddl_error(e, from, to))?;
        Ok(())
    }

    /// Rename, rename and drop in one transaction
    ///
    /// Readers see either the previous live table or the new one.
    async fn swap_collections(&self, live: &str, shadow: &str, old: &str) -> StoreResult<()> {
        let live_table = quote_ident(live)?;
        let shadow_table = quote_ident(shadow)?;
        let old_table = quote_ident(old)?;

        let mut tx = self.pool.begin().await?;

        if table_exists(&mut *tx, live).await? {
            sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", live_table, old_table))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_ddl_error(e, live, old))?;
        }

        sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", shadow_table, live_table))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_ddl_error(e, shadow, live))?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", old_table))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(live = %live, shadow = %shadow, "Swapped collections");
        Ok(())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        let table = quote_ident(collection)?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_ddl_error(e, collection, collection))?;

        Ok(count.max(0) as u64)
    }

    async fn find_track(&self, collection: &str, itunes_track_id: i64) -> StoreResult<Option<Track>> {
        let table = quote_ident(collection)?;
        let row: Option<TrackRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} WHERE itunes_track_id = $1",
            TRACK_COLUMNS, table
        ))
        .bind(itunes_track_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, collection, itunes_track_id))?;

        Ok(row.map(Track::from))
    }

    async fn insert_track(&self, collection: &str, track: &Track) -> StoreResult<()> {
        let table = quote_ident(collection)?;
        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            table, TRACK_COLUMNS
        ))
        .bind(track.itunes_track_id)
        .bind(&track.title)
        .bind(&track.artist_name)
        .bind(&track.collection_name)
        .bind(&track.view_url)
        .bind(track.original_release_date)
        .bind(track.catalog_release_date)
        .bind(track.duration_ms)
        .bind(&track.preview_url)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, collection, track.itunes_track_id))?;

        Ok(())
    }

    async fn save_track(&self, collection: &str, track: &Track) -> StoreResult<()> {
        let table = quote_ident(collection)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (itunes_track_id) DO UPDATE SET
                title = EXCLUDED.title,
                artist_name = EXCLUDED.artist_name,
                collection_name = EXCLUDED.collection_name,
                view_url = EXCLUDED.view_url,
                original_release_date = EXCLUDED.original_release_date,
                catalog_release_date = EXCLUDED.catalog_release_date,
                duration_ms = EXCLUDED.duration_ms,
                preview_url = EXCLUDED.preview_url,
                updated_at = NOW()
            "#,
            table, TRACK_COLUMNS
        ))
        .bind(track.itunes_track_id)
        .bind(&track.title)
        .bind(&track.artist_name)
        .bind(&track.collection_name)
        .bind(&track.view_url)
        .bind(track.original_release_date)
        .bind(track.catalog_release_date)
        .bind(track.duration_ms)
        .bind(&track.preview_url)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, collection, track.itunes_track_id))?;

        Ok(())
    }

    async fn find_chart(&self, collection: &str, key: ChartKey) -> StoreResult<Option<PopularChart>> {
        let table = quote_ident(collection)?;
        let row: Option<ChartRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} WHERE storefront_id = $1 AND genre_id = $2",
            CHART_COLUMNS, table
        ))
        .bind(key.storefront_id)
        .bind(key.genre_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, collection, key))?;

        Ok(row.map(PopularChart::from))
    }

    async fn save_chart(&self, collection: &str, chart: &PopularChart) -> StoreResult<()> {
        let table = quote_ident(collection)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (storefront_id, genre_id) DO UPDATE SET
                genre_name = EXCLUDED.genre_name,
                country_code = EXCLUDED.country_code,
                top_track_ids = EXCLUDED.top_track_ids,
                updated_at = NOW()
            "#,
            table, CHART_COLUMNS
        ))
        .bind(chart.storefront_id)
        .bind(chart.genre_id)
        .bind(&chart.genre_name)
        .bind(&chart.country_code)
        .bind(&chart.top_track_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, collection, chart.key()))?;

        Ok(())
    }

    async fn all_tracks(&self, collection: &str) -> StoreResult<Vec<Track>> {
        let table = quote_ident(collection)?;
        let rows: Vec<TrackRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} ORDER BY itunes_track_id",
            TRACK_COLUMNS, table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_ddl_error(e, collection, collection))?;

        Ok(rows.into_iter().map(Track::from).collect())
    }

    async fn all_charts(&self, collection: &str) -> StoreResult<Vec<PopularChart>> {
        let table = quote_ident(collection)?;
        let rows: Vec<ChartRow> = sqlx::query_as(&format!(
            "SELECT {} FROM {} ORDER BY storefront_id, genre_id",
            CHART_COLUMNS, table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_ddl_error(e, collection, collection))?;

        Ok(rows.into_iter().map(PopularChart::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("itunes_tracks").unwrap(), "\"itunes_tracks\"");
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1tracks").is_err());
        assert!(quote_ident("tracks; DROP TABLE x").is_err());
        assert!(quote_ident("Tracks").is_err());
        assert!(quote_ident(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_table_ddl_uses_quoted_name() {
        let ddl = table_ddl("\"popular_charts_processing\"", CollectionKind::Charts);
        assert!(ddl.contains("CREATE TABLE \"popular_charts_processing\""));
        assert!(ddl.contains("top_track_ids BIGINT[] NOT NULL DEFAULT '{}'"));
    }

    #[test]
    fn test_unique_keys() {
        assert_eq!(unique_keys(CollectionKind::Tracks), &["itunes_track_id"]);
        assert_eq!(unique_keys(CollectionKind::Charts).len(), 2);
    }
}
