//! EPF flat-file record parser
//!
//! EPF tables are text files with one record per line. Fields are separated
//! by `0x01` and every record is terminated by `0x02` followed by a newline.
//! Lines starting with `#` carry column names and export metadata.
//!
//! ```text
//! #export_date^Astorefront_id^Acountry_code^Aname^B
//! 1704844800000^A143441^AUSA^AUnited States^B
//! ```
//!
//! One [`RecordReader`] serves every table; the [`Layout`] only decides how
//! many fields a row needs before it is handed out.

use futures::Stream;
use std::io;
use std::ops::Range;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Field separator
pub const FIELD_SEPARATOR: u8 = 0x01;

/// Record terminator, stripped wherever it appears in a line
pub const RECORD_TERMINATOR: u8 = 0x02;

/// Minimum shape of one EPF table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub name: &'static str,
    pub min_fields: usize,
}

/// `export_date, storefront_id, country_code, name`
pub const STOREFRONT: Layout = Layout {
    name: "storefront",
    min_fields: 3,
};

/// `export_date, genre_id, parent_id, name`
pub const GENRE: Layout = Layout {
    name: "genre",
    min_fields: 4,
};

/// `export_date, storefront_id, genre_id, song_id, song_rank`
///
/// Some exports omit the rank column, so it is not required.
pub const POPULARITY: Layout = Layout {
    name: "song_popularity_per_genre",
    min_fields: 4,
};

/// `export_date, song_id, name, ..., track_length, ..., preview_url`
///
/// Rows carry 12 columns, or more when the song has a preview.
pub const TRACK: Layout = Layout {
    name: "song",
    min_fields: 12,
};

/// Column positions shared by the reducers
pub mod columns {
    pub mod storefront {
        pub const ID: usize = 1;
        pub const COUNTRY_CODE: usize = 2;
    }

    pub mod genre {
        pub const ID: usize = 1;
        pub const NAME: usize = 3;
    }

    pub mod popularity {
        pub const STOREFRONT_ID: usize = 1;
        pub const GENRE_ID: usize = 2;
        pub const TRACK_ID: usize = 3;
        pub const RANK: usize = 4;
    }

    pub mod track {
        pub const ID: usize = 1;
        pub const TITLE: usize = 2;
        pub const ARTIST_NAME: usize = 6;
        pub const COLLECTION_NAME: usize = 7;
        pub const VIEW_URL: usize = 8;
        pub const ORIGINAL_RELEASE_DATE: usize = 9;
        pub const CATALOG_RELEASE_DATE: usize = 10;
        pub const DURATION_MS: usize = 11;
        pub const PREVIEW_URL: usize = 14;
    }
}

/// One parsed line
///
/// Fields are slices into the owned line, so looking at a single column does
/// not allocate per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: String,
    bounds: Vec<Range<usize>>,
}

impl Record {
    /// Split a raw line; terminators are stripped first
    pub fn parse(raw: &[u8]) -> Self {
        let cleaned: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|b| *b != RECORD_TERMINATOR)
            .collect();
        let line = String::from_utf8_lossy(&cleaned).into_owned();

        let mut bounds = Vec::new();
        let mut start = 0;
        for (idx, byte) in line.bytes().enumerate() {
            if byte == FIELD_SEPARATOR {
                bounds.push(start..idx);
                start = idx + 1;
            }
        }
        bounds.push(start..line.len());

        Self { line, bounds }
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Raw text of column `index`
    pub fn field(&self, index: usize) -> Option<&str> {
        self.bounds.get(index).map(|range| &self.line[range.clone()])
    }

    /// Column `index`, `None` when missing or blank
    pub fn non_empty(&self, index: usize) -> Option<&str> {
        self.field(index).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Column `index` parsed as `T`, `None` when missing or unparsable
    pub fn parse_field<T: FromStr>(&self, index: usize) -> Option<T> {
        self.non_empty(index).and_then(|s| s.parse().ok())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.bounds.iter().map(|range| &self.line[range.clone()])
    }
}

/// Line counters of one parse run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: u64,
    pub headers: u64,
    pub malformed: u64,
    pub records: u64,
    /// Rows turned away by the caller's filter before being split
    pub skipped: u64,
}

/// Lazy record sequence over an async byte stream
pub struct RecordReader<R> {
    reader: R,
    layout: Layout,
    buf: Vec<u8>,
    stats: ParseStats,
}

impl<R: AsyncBufRead + Unpin> RecordReader<R> {
    pub fn new(reader: R, layout: Layout) -> Self {
        Self {
            reader,
            layout,
            buf: Vec::with_capacity(4096),
            stats: ParseStats::default(),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    /// Next well-formed record, or `None` at end of stream
    ///
    /// Comment lines, blank lines and rows with too few fields are skipped.
    pub async fn next_record(&mut self) -> io::Result<Option<Record>> {
        self.next_record_unless(|_| false).await
    }

    /// Like [`next_record`](Self::next_record), but rows for which `skip`
    /// returns true on the raw line are counted and never split
    pub async fn next_record_unless<F>(&mut self, mut skip: F) -> io::Result<Option<Record>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        loop {
            self.buf.clear();
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 {
                debug!(
                    table = self.layout.name,
                    lines = self.stats.lines,
                    records = self.stats.records,
                    malformed = self.stats.malformed,
                    skipped = self.stats.skipped,
                    "Finished parsing table"
                );
                return Ok(None);
            }

            self.stats.lines += 1;

            let line = trim_line_end(&self.buf);
            if line.first() == Some(&b'#') {
                self.stats.headers += 1;
                continue;
            }
            if line.iter().all(|b| *b == RECORD_TERMINATOR || b.is_ascii_whitespace()) {
                continue;
            }

            if skip(line) {
                self.stats.skipped += 1;
                continue;
            }

            let record = Record::parse(line);
            if record.len() < self.layout.min_fields {
                self.stats.malformed += 1;
                continue;
            }

            self.stats.records += 1;
            return Ok(Some(record));
        }
    }

    /// Adapt into a `Stream` of records
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Record>> {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_record().await?.map(|record| (record, reader)))
        })
    }
}

/// Column `index` of a raw line parsed as `T`, without splitting the rest
///
/// `None` when the column is missing, unparsable or holds a terminator.
pub fn peek_field<T: FromStr>(raw: &[u8], index: usize) -> Option<T> {
    let field = raw.split(|b| *b == FIELD_SEPARATOR).nth(index)?;
    if field.contains(&RECORD_TERMINATOR) {
        return None;
    }
    std::str::from_utf8(field).ok()?.trim().parse().ok()
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}
