//! Streaming archive decoder for EPF feeds
//!
//! EPF tables ship as `.tbz` archives of several gigabytes. Nothing here holds
//! more than a few chunks in memory: the HTTP body is bridged into a blocking
//! task that decompresses and walks the tar members, and every member's bytes
//! travel to the async consumer over a bounded channel. A consumer that stops
//! reading stops the download.
//!
//! ```text
//! HTTP body ──► SyncIoBridge ──► bzip2/gzip ──► tar ──► mpsc(chunks) ──► EntryReader
//!                      (spawn_blocking)                                (AsyncBufRead)
//! ```

use bytes::Bytes;
use futures::TryStreamExt;
use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

use crate::config::{Credentials, HttpConfig};

/// Size of the chunks handed to the consumer
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to decode archive: {0}")]
    Io(#[from] io::Error),

    #[error("Archive contains no file entries")]
    Empty,
}

/// Compression wrapped around the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Bzip2,
    Gzip,
    None,
}

impl Compression {
    /// Sniff the compression from the first bytes of the payload
    pub fn detect(header: &[u8]) -> Self {
        if header.starts_with(b"BZh") {
            Compression::Bzip2
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// Byte stream of one archive member
pub type EntryReader = StreamReader<ReceiverStream<io::Result<Bytes>>, Bytes>;

/// A regular file inside a feed archive
pub struct ArchiveEntry {
    name: String,
    chunks: mpsc::Receiver<io::Result<Bytes>>,
}

impl ArchiveEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume the entry as an async buffered reader
    pub fn into_reader(self) -> EntryReader {
        StreamReader::new(ReceiverStream::new(self.chunks))
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry").field("name", &self.name).finish()
    }
}

/// Lazy, single-pass sequence of archive members
///
/// Members must be read in order; asking for the next entry while the
/// previous one is still unread makes the producer skip the rest of it.
pub struct FeedArchive {
    entries: mpsc::Receiver<Result<ArchiveEntry, ArchiveError>>,
}

impl FeedArchive {
    /// Decode an archive from any async byte source
    ///
    /// Must be called from within a tokio runtime. `buffer_chunks` bounds how
    /// many decoded chunks may wait for the consumer.
    pub fn from_reader<R>(reader: R, buffer_chunks: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let bridge = SyncIoBridge::new(reader);
        let buffer_chunks = buffer_chunks.max(1);

        tokio::task::spawn_blocking(move || {
            if let Err(err) = demultiplex(bridge, &tx, buffer_chunks) {
                warn!(error = %err, "Archive decoding failed");
                // The consumer may have gone already
                let _ = tx.blocking_send(Err(err));
            }
        });

        Self { entries: rx }
    }

    /// Next regular-file member, or `None` once the archive is exhausted
    pub async fn next_entry(&mut self) -> Result<Option<ArchiveEntry>, ArchiveError> {
        match self.entries.recv().await {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// First regular-file member; EPF table archives hold exactly one
    pub async fn first_entry(mut self) -> Result<ArchiveEntry, ArchiveError> {
        self.next_entry().await?.ok_or(ArchiveError::Empty)
    }
}

enum Pumped {
    Complete,
    /// Entry reader was dropped; the remainder was skipped
    Skipped,
    /// Entry reader and archive were both dropped
    Abandoned,
}

fn demultiplex<R: Read>(
    reader: R,
    entries: &mpsc::Sender<Result<ArchiveEntry, ArchiveError>>,
    buffer_chunks: usize,
) -> Result<(), ArchiveError> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
    let compression = Compression::detect(reader.fill_buf()?);
    debug!(?compression, "Detected archive compression");

    let decoder: Box<dyn Read> = match compression {
        Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        Compression::None => Box::new(reader),
    };

    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer_chunks);

        debug!(entry = %name, size = entry.size(), "Streaming archive entry");

        let announced = ArchiveEntry {
            name: name.clone(),
            chunks: chunk_rx,
        };
        if entries.blocking_send(Ok(announced)).is_err() {
            debug!("Archive consumer went away, stopping");
            return Ok(());
        }

        let size = entry.size();
        match pump_entry(&mut entry, size, &chunk_tx, entries)? {
            Pumped::Complete => {},
            Pumped::Skipped => debug!(entry = %name, "Skipped unread remainder of entry"),
            Pumped::Abandoned => {
                debug!(entry = %name, "Archive abandoned mid-entry, stopping");
                return Ok(());
            },
        }
    }

    Ok(())
}

/// Forward `entry` to its consumer in `CHUNK_SIZE` pieces
///
/// A member that ends before its header's `size` bytes is a truncated
/// archive; plain tar readers report that as a clean end of file.
fn pump_entry<R: Read>(
    entry: &mut R,
    size: u64,
    chunks: &mpsc::Sender<io::Result<Bytes>>,
    entries: &mpsc::Sender<Result<ArchiveEntry, ArchiveError>>,
) -> io::Result<Pumped> {
    let mut pumped = 0u64;
    loop {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = match entry.read(&mut buf) {
            Ok(0) if pumped < size => {
                let err = truncated(pumped, size);
                let _ = chunks.blocking_send(Err(truncated(pumped, size)));
                return Err(err);
            },
            Ok(0) => return Ok(Pumped::Complete),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // The reader sees the failure first; the archive sees it next
                let _ = chunks.blocking_send(Err(io::Error::new(err.kind(), err.to_string())));
                return Err(err);
            },
        };
        buf.truncate(read);
        pumped += read as u64;

        if chunks.blocking_send(Ok(Bytes::from(buf))).is_err() {
            if entries.is_closed() {
                return Ok(Pumped::Abandoned);
            }
            let skipped = io::copy(entry, &mut io::sink())?;
            if pumped + skipped < size {
                return Err(truncated(pumped + skipped, size));
            }
            return Ok(Pumped::Skipped);
        }
    }
}

fn truncated(read: u64, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("archive member ended after {} of {} bytes", read, size),
    )
}

/// Opens remote feed archives over HTTP
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    buffer_chunks: usize,
}

impl ArchiveFetcher {
    pub fn new(http: &HttpConfig, credentials: Option<Credentials>) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .read_timeout(Duration::from_secs(http.read_timeout_secs))
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            credentials,
            buffer_chunks: http.stream_buffer_chunks,
        })
    }

    /// Start downloading `url` and decode it as a stream of archive members
    ///
    /// Fails before yielding anything if the request fails or the server
    /// answers with a non-success status.
    pub async fn open(&self, url: &str) -> Result<FeedArchive, ArchiveError> {
        info!(url = %url, "Opening feed archive");

        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ArchiveError::Status(response.status()));
        }

        let body = response.bytes_stream().map_err(io::Error::other);
        let reader = StreamReader::new(Box::pin(body));

        Ok(FeedArchive::from_reader(reader, self.buffer_chunks))
    }
}
