//! Shared fixtures for the ingestion integration tests
//!
//! Builds EPF tables in memory, packs them as `.tbz`/`.tgz` archives and
//! serves them from a wiremock server laid out like the EPF host:
//!
//! ```text
//! /epf/current                                   root listing
//! /epf/current/itunesYYYYMMDD/{storefront,genre,song}.tbz
//! /epf/current/popularityYYYYMMDD/song_popularity_per_genre.tbz
//! /epf/current/incremental/current               incremental listing
//! /epf/current/incremental/current/itunesYYYYMMDD/song.tbz
//! /epf/current/incremental/current/popularityYYYYMMDD/song_popularity_per_genre.tbz
//! ```

#![allow(dead_code)]

use std::io::{self, Write};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ROOT_PATH: &str = "/epf/current";

const EXPORT_DATE: &str = "1704844800000";

// ============================================================================
// Archives
// ============================================================================

/// Plain tar with a leading folder entry, the way EPF packs its tables
pub fn tar_bytes(folder: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    builder
        .append_data(&mut dir, format!("{}/", folder), io::empty())
        .unwrap();

    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("{}/{}", folder, name), *data)
            .unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn bzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Single-table `.tbz` archive
pub fn tbz(folder: &str, table: &str, contents: &str) -> Vec<u8> {
    bzip(&tar_bytes(folder, &[(table, contents.as_bytes())]))
}

// ============================================================================
// EPF tables
// ============================================================================

fn row(fields: &[String]) -> String {
    format!("{}\x02\n", fields.join("\x01"))
}

fn header(columns: &[&str]) -> String {
    format!("#{}\x02\n#dbTypes:BIGINT\x02\n", columns.join("\x01"))
}

pub fn storefront_table(rows: &[(i32, &str)]) -> String {
    let mut out = header(&["export_date", "storefront_id", "country_code", "name"]);
    for (id, alpha3) in rows {
        out.push_str(&row(&[
            EXPORT_DATE.to_string(),
            id.to_string(),
            alpha3.to_string(),
            format!("Store {}", id),
        ]));
    }
    out
}

pub fn genre_table(rows: &[(i32, &str)]) -> String {
    let mut out = header(&["export_date", "genre_id", "parent_id", "name"]);
    for (id, name) in rows {
        out.push_str(&row(&[
            EXPORT_DATE.to_string(),
            id.to_string(),
            "34".to_string(),
            name.to_string(),
        ]));
    }
    out
}

/// `(storefront_id, genre_id, track_id, rank)` rows
pub fn popularity_table(rows: &[(i32, i32, i64, u32)]) -> String {
    let mut out = header(&["export_date", "storefront_id", "genre_id", "song_id", "song_rank"]);
    for (storefront, genre, track, rank) in rows {
        out.push_str(&row(&[
            EXPORT_DATE.to_string(),
            storefront.to_string(),
            genre.to_string(),
            track.to_string(),
            rank.to_string(),
        ]));
    }
    out
}

/// `(track_id, title)` rows
pub fn song_table(rows: &[(i64, &str)]) -> String {
    let mut out = header(&["export_date", "song_id", "name"]);
    for (id, title) in rows {
        out.push_str(&row(&[
            EXPORT_DATE.to_string(),
            id.to_string(),
            title.to_string(),
            String::new(),
            String::new(),
            "2".to_string(),
            "Artist".to_string(),
            "Album".to_string(),
            format!("https://music.example.com/track/{}", id),
            "2009 06 23".to_string(),
            "2009 07 01".to_string(),
            "215000".to_string(),
            "(C) Label".to_string(),
            "(P) Label".to_string(),
            format!("https://audio.example.com/{}.m4a", id),
        ]));
    }
    out
}

// ============================================================================
// Feed server
// ============================================================================

pub fn listing(folders: &[&str]) -> String {
    let rows: String = folders
        .iter()
        .map(|folder| format!("<tr><td><a href=\"{0}\">{0}</a></td><td>-</td></tr>\n", folder))
        .collect();
    format!(
        "<html><body><table>\n<tr><th>Name</th></tr>\n\
         <tr><td><a href=\"../\">Parent Directory</a></td></tr>\n{}</table></body></html>",
        rows
    )
}

/// Tables of one published snapshot
pub struct Snapshot {
    /// `YYYYMMDD`
    pub date: String,
    pub popularity: String,
    pub songs: String,
}

impl Snapshot {
    pub fn new(date: &str, popularity: String, songs: String) -> Self {
        Self {
            date: date.to_string(),
            popularity,
            songs,
        }
    }

    pub fn catalog_folder(&self) -> String {
        format!("itunes{}", self.date)
    }

    pub fn popularity_folder(&self) -> String {
        format!("popularity{}", self.date)
    }
}

pub struct FeedServer {
    pub server: MockServer,
}

impl FeedServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn root_url(&self) -> String {
        format!("{}{}", self.server.uri(), ROOT_PATH)
    }

    pub async fn serve(&self, url_path: String, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_listing(&self, url_path: String, folders: &[&str]) {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(listing(folders)),
            )
            .mount(&self.server)
            .await;
    }

    async fn serve_snapshot(&self, parent: &str, snapshot: &Snapshot) {
        let catalog = snapshot.catalog_folder();
        let popularity = snapshot.popularity_folder();

        self.serve(
            format!("{}/{}/song.tbz", parent, catalog),
            tbz(&catalog, "song", &snapshot.songs),
        )
        .await;
        self.serve(
            format!("{}/{}/song_popularity_per_genre.tbz", parent, popularity),
            tbz(&popularity, "song_popularity_per_genre", &snapshot.popularity),
        )
        .await;
    }

    /// Publish a full feed with its reference tables and an optional delta
    pub async fn publish(
        &self,
        full: &Snapshot,
        storefronts: &str,
        genres: &str,
        incremental: Option<&Snapshot>,
    ) {
        let catalog = full.catalog_folder();
        let popularity = full.popularity_folder();

        let mut root_folders = vec![format!("{}/", catalog), format!("{}/", popularity)];
        if incremental.is_some() {
            root_folders.insert(0, "incremental/".to_string());
        }
        let root_folders: Vec<&str> = root_folders.iter().map(String::as_str).collect();
        self.serve_listing(ROOT_PATH.to_string(), &root_folders).await;

        self.serve(
            format!("{}/{}/storefront.tbz", ROOT_PATH, catalog),
            tbz(&catalog, "storefront", storefronts),
        )
        .await;
        self.serve(
            format!("{}/{}/genre.tbz", ROOT_PATH, catalog),
            tbz(&catalog, "genre", genres),
        )
        .await;
        self.serve_snapshot(ROOT_PATH, full).await;

        if let Some(delta) = incremental {
            let parent = format!("{}/incremental/current", ROOT_PATH);
            let folders = [
                format!("{}/", delta.catalog_folder()),
                format!("{}/", delta.popularity_folder()),
            ];
            self.serve_listing(parent.clone(), &[&folders[0], &folders[1]])
                .await;
            self.serve_snapshot(&parent, delta).await;
        }
    }
}

pub fn default_storefronts() -> String {
    storefront_table(&[(1, "USA"), (2, "NLD")])
}

pub fn default_genres() -> String {
    genre_table(&[(6, "Country"), (14, "Pop"), (99, "Spoken Word")])
}
