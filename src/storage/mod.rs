//! Store capability sets
//!
//! A mirror run talks to exactly two collaborators: a read-only source
//! container that can be listed page by page and opened object by object,
//! and a writable destination share that can be written with overwrite,
//! listed per directory and pruned. Backends implement [`SourceStore`] and
//! [`DestinationStore`]; the engine never sees anything else.

mod chunked;
pub mod local;
pub mod memory;
#[cfg(feature = "native_s3")]
pub mod native_s3;

pub use chunked::*;

use crate::config::{Backend, MirrorConfig};
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Cache-control value set on every destination write by default.
pub const DEFAULT_CACHE_CONTROL: &str = "no-transform";

/// Default number of chunk writes a destination keeps in flight.
pub const DEFAULT_PARALLELISM: usize = 3;

/// Default chunk size for destination writes: 4 MB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Marker side for source container listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSide;

/// Marker side for destination share listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareSide;

#[derive(Debug, Clone, PartialEq, Eq)]
enum MarkerState {
    Start,
    Next(String),
    Done,
}

/// Opaque continuation token returned by a paged listing.
///
/// The side parameter keeps source and share markers from being mixed up.
/// A marker only ever advances to the value the store handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMarker<S> {
    state: MarkerState,
    _side: PhantomData<S>,
}

/// Continuation token of the source container
pub type SourceMarker = PageMarker<SourceSide>;

/// Continuation token of the destination share
pub type ShareMarker = PageMarker<ShareSide>;

impl<S> PageMarker<S> {
    fn with_state(state: MarkerState) -> Self {
        Self {
            state,
            _side: PhantomData,
        }
    }

    /// Marker for the first page of a listing
    pub fn start() -> Self {
        Self::with_state(MarkerState::Start)
    }

    /// Marker pointing at a further page
    pub fn next(token: impl Into<String>) -> Self {
        Self::with_state(MarkerState::Next(token.into()))
    }

    /// Sentinel signalling that no pages remain
    pub fn done() -> Self {
        Self::with_state(MarkerState::Done)
    }

    /// Build from a raw server token; absent or empty means done.
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(t) if !t.is_empty() => Self::next(t),
            _ => Self::done(),
        }
    }

    /// Raw token to send with the next request
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            MarkerState::Next(t) => Some(t),
            _ => None,
        }
    }

    /// Check if this is the first-page marker
    pub fn is_start(&self) -> bool {
        self.state == MarkerState::Start
    }

    /// Check if the listing is exhausted
    pub fn is_done(&self) -> bool {
        self.state == MarkerState::Done
    }
}

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page<T, S> {
    /// Items on this page, in store order
    pub items: Vec<T>,
    /// Marker for the following page
    pub next_marker: PageMarker<S>,
}

impl<T, S> Page<T, S> {
    /// Page followed by more pages
    pub fn more(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            next_marker: PageMarker::next(token),
        }
    }

    /// Final page of the listing
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: PageMarker::done(),
        }
    }
}

/// A transferable unit in the source container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Logical name, shared with the destination entry
    pub name: String,
    /// Store-specific handle used to open the content
    pub key: String,
    /// Size in bytes, when the listing reports it
    pub size: Option<u64>,
}

impl ObjectRef {
    /// Create a reference whose handle is its name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            size: None,
        }
    }

    /// Create a reference with a distinct store handle
    pub fn with_key(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            size: None,
        }
    }

    /// Attach a listed size
    pub fn sized(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }
}

/// Kind of a destination entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// An entry listed from the destination share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEntry {
    /// Path relative to the share root, `/`-separated
    pub name: String,
    /// File or directory
    pub kind: EntryKind,
    /// Size in bytes for files, when known
    pub size: Option<u64>,
}

impl DestinationEntry {
    /// Create a file entry
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    /// Create a directory entry
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            size: None,
        }
    }

    /// Check if this entry is a file
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Byte stream opened on a source object
pub struct ObjectStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    size: Option<u64>,
}

impl ObjectStream {
    /// Wrap a reader with an optional known length
    pub fn new(reader: impl AsyncRead + Send + 'static, size: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            size,
        }
    }

    /// Stream over an in-memory buffer
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::new(std::io::Cursor::new(data), Some(size))
    }

    /// Known content length
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Take the underlying reader
    pub fn into_reader(self) -> Pin<Box<dyn AsyncRead + Send>> {
        self.reader
    }

    /// Read the whole stream into memory
    pub async fn read_to_end(mut self) -> std::io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.size.unwrap_or(0) as usize);
        self.reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Attributes and tuning for a destination write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Cache-control header stored with the file
    pub cache_control: Option<String>,
    /// User metadata stored with the file
    pub metadata: BTreeMap<String, String>,
    /// Maximum chunk writes in flight
    pub parallelism: usize,
    /// Bytes per chunk
    pub chunk_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            cache_control: Some(DEFAULT_CACHE_CONTROL.to_string()),
            metadata: BTreeMap::new(),
            parallelism: DEFAULT_PARALLELISM,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Receives cumulative byte counts while a destination write progresses
pub trait WriteProgress: Send + Sync {
    /// Called with the total bytes written so far
    fn bytes_written(&self, cumulative: u64);
}

impl<F> WriteProgress for F
where
    F: Fn(u64) + Send + Sync,
{
    fn bytes_written(&self, cumulative: u64) {
        self(cumulative)
    }
}

/// Read-only origin container
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Fetch one page of object references
    async fn list_page(&self, marker: &SourceMarker) -> Result<Page<ObjectRef, SourceSide>>;

    /// Open a byte stream on an object's content
    async fn open_read(&self, object: &ObjectRef) -> Result<ObjectStream>;
}

/// Writable hierarchical target share
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Write `content` under `name`, replacing any existing file.
    ///
    /// Returns the number of bytes written.
    async fn write_overwrite(
        &self,
        name: &str,
        content: ObjectStream,
        options: &WriteOptions,
        progress: &dyn WriteProgress,
    ) -> Result<u64>;

    /// Fetch one page of the entries directly inside `directory`
    /// (`""` is the share root). Entry names are relative to the root.
    async fn list_page(
        &self,
        directory: &str,
        marker: &ShareMarker,
    ) -> Result<Page<DestinationEntry, ShareSide>>;

    /// Delete the file `name`
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Index range of the page of `items` (sorted by name) starting at `token`,
/// plus the token of the page after it. Tokens are entry names.
pub(crate) fn page_bounds<T>(
    items: &[T],
    name_of: impl Fn(&T) -> &str,
    token: Option<&str>,
    page_size: usize,
) -> (Range<usize>, Option<String>) {
    let start = match token {
        Some(t) => items.partition_point(|item| name_of(item) < t),
        None => 0,
    };
    let end = (start + page_size.max(1)).min(items.len());
    let next = items.get(end).map(|item| name_of(item).to_string());
    (start..end, next)
}

/// Open the source and destination stores named by the configuration
pub async fn connect(
    config: &MirrorConfig,
) -> Result<(Arc<dyn SourceStore>, Arc<dyn DestinationStore>)> {
    let destination: Arc<dyn DestinationStore> = Arc::new(
        local::LocalShare::new(&config.share)
            .with_page_size(config.page_size)
            .persist_attributes(config.persist_attributes),
    );

    let source: Arc<dyn SourceStore> = match config.backend {
        Backend::Local => {
            Arc::new(local::LocalSource::new(&config.container).with_page_size(config.page_size))
        }
        #[cfg(feature = "native_s3")]
        Backend::S3 => Arc::new(native_s3::S3Source::connect(config).await?),
        #[cfg(not(feature = "native_s3"))]
        Backend::S3 => {
            return Err(MirrorError::config(
                "S3 backend requires building with the `native_s3` feature",
            ))
        }
    };

    tracing::info!(
        "Mirroring {} into {}",
        source.describe(),
        destination.describe()
    );

    Ok((source, destination))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_states() {
        let start = SourceMarker::start();
        assert!(start.is_start());
        assert!(!start.is_done());
        assert_eq!(start.token(), None);

        let next = SourceMarker::from_token(Some("b.txt".into()));
        assert_eq!(next.token(), Some("b.txt"));

        assert!(ShareMarker::from_token(Some(String::new())).is_done());
        assert!(ShareMarker::from_token(None).is_done());
    }

    #[test]
    fn test_default_write_options() {
        let options = WriteOptions::default();
        assert_eq!(options.cache_control.as_deref(), Some("no-transform"));
        assert!(options.metadata.is_empty());
        assert_eq!(options.parallelism, 3);
    }

    #[tokio::test]
    async fn test_object_stream_read_to_end() {
        let stream = ObjectStream::from_bytes(b"hello".to_vec());
        assert_eq!(stream.size(), Some(5));
        assert_eq!(stream.read_to_end().await.unwrap(), b"hello");
    }
}
