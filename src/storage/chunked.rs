//! Chunked parallel writes
//!
//! Destination stores split an incoming byte stream into fixed-size chunks
//! and keep a bounded number of chunk writes in flight. The stream is read
//! sequentially while earlier chunks are still being written.

use crate::error::{MirrorError, Result};
use crate::storage::WriteProgress;
use futures::stream::{self, TryStreamExt};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One chunk handed to a store's part writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// Zero-based part number
    pub index: usize,
    /// Byte offset of this chunk in the destination file
    pub offset: u64,
    /// Chunk content
    pub data: Vec<u8>,
}

/// Outcome of a chunked upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedUpload {
    /// Total bytes written
    pub bytes_written: u64,
    /// Number of parts written
    pub parts: usize,
}

/// Splits a stream into parts and writes them with bounded parallelism
#[derive(Debug, Clone, Copy)]
pub struct ChunkedUploader {
    chunk_size: usize,
    parallelism: usize,
}

impl ChunkedUploader {
    /// Create a new uploader; zero values are raised to one
    pub fn new(chunk_size: usize, parallelism: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            parallelism: parallelism.max(1),
        }
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Maximum parts in flight
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Drain `reader` into `write_part`.
    ///
    /// `progress` receives the cumulative count of bytes whose part write has
    /// completed. The first failing read or part write ends the upload; parts
    /// still in flight at that point are dropped.
    pub async fn upload<R, F, Fut>(
        &self,
        name: &str,
        reader: R,
        progress: &dyn WriteProgress,
        mut write_part: F,
    ) -> Result<ChunkedUpload>
    where
        R: AsyncRead + Unpin,
        F: FnMut(UploadPart) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let chunk_size = self.chunk_size;
        let name = name.to_string();
        let parts = stream::try_unfold((reader, 0u64, 0usize), move |(mut reader, offset, index)| {
            let name = name.clone();
            async move {
                let data = match read_chunk(&mut reader, chunk_size).await {
                    Ok(data) => data,
                    Err(e) => return Err(MirrorError::source_read(name.as_str(), e)),
                };
                if data.is_empty() {
                    return Ok(None);
                }
                let next = offset + data.len() as u64;
                let part = UploadPart {
                    index,
                    offset,
                    data,
                };
                Ok(Some((part, (reader, next, index + 1))))
            }
        });

        // The next chunk is read while up to `parallelism` writes are pending.
        let writes = parts
            .map_ok(|part| {
                let len = part.data.len() as u64;
                let write = write_part(part);
                async move { write.await.map(|()| len) }
            })
            .try_buffer_unordered(self.parallelism);
        let mut writes = std::pin::pin!(writes);

        let mut written = 0u64;
        let mut count = 0usize;
        while let Some(len) = writes.try_next().await? {
            written += len;
            count += 1;
            progress.bytes_written(written);
        }

        Ok(ChunkedUpload {
            bytes_written: written,
            parts: count,
        })
    }
}

/// Read up to `size` bytes, stopping early only at end of stream
async fn read_chunk<R>(reader: &mut R, size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    reader.take(size as u64).read_to_end(&mut data).await?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Cursor that records the offset of every successful read
    struct RecordingReader {
        inner: std::io::Cursor<Vec<u8>>,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl AsyncRead for RecordingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let this = self.get_mut();
            let offset = this.inner.position();
            let before = buf.filled().len();
            let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
            if buf.filled().len() > before {
                this.events.lock().unwrap().push(format!("read@{}", offset));
            }
            poll
        }
    }

    #[tokio::test]
    async fn test_upload_splits_into_parts() {
        let data: Vec<u8> = (0..10u8).collect();
        let parts = Mutex::new(Vec::new());
        let reported = Mutex::new(Vec::new());
        let progress = |n: u64| reported.lock().unwrap().push(n);

        let uploader = ChunkedUploader::new(4, 3);
        let result = uploader
            .upload("obj", std::io::Cursor::new(data), &progress, |part| {
                parts.lock().unwrap().push((part.index, part.offset, part.data.len()));
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(result.bytes_written, 10);
        assert_eq!(result.parts, 3);
        assert_eq!(
            *parts.lock().unwrap(),
            vec![(0, 0, 4), (1, 4, 4), (2, 8, 2)]
        );
        assert_eq!(reported.lock().unwrap().last(), Some(&10));
    }

    #[tokio::test]
    async fn test_upload_empty_stream() {
        let uploader = ChunkedUploader::new(4, 3);
        let result = uploader
            .upload("empty", std::io::Cursor::new(Vec::new()), &|_: u64| {}, |_| async {
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(result.bytes_written, 0);
        assert_eq!(result.parts, 0);
    }

    #[tokio::test]
    async fn test_upload_bounds_parallelism() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let uploader = ChunkedUploader::new(1, 3);
        uploader
            .upload("obj", std::io::Cursor::new(vec![7u8; 12]), &|_: u64| {}, |_| {
                let active = &active;
                let peak = &peak;
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_upload_stops_on_part_failure() {
        let attempted = AtomicUsize::new(0);
        let uploader = ChunkedUploader::new(2, 1);

        let err = uploader
            .upload("obj", std::io::Cursor::new(vec![0u8; 10]), &|_: u64| {}, |part| {
                attempted.fetch_add(1, Ordering::SeqCst);
                async move {
                    if part.index == 1 {
                        Err(MirrorError::destination_write("obj", "disk full"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MirrorError::DestinationWrite { .. }));
        assert_eq!(attempted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_writes_start_before_stream_is_drained() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let reader = RecordingReader {
            inner: std::io::Cursor::new(vec![1u8; 4]),
            events: Arc::clone(&events),
        };

        let uploader = ChunkedUploader::new(1, 3);
        let result = uploader
            .upload("obj", reader, &|_: u64| {}, |part| {
                let events = Arc::clone(&events);
                async move {
                    events.lock().unwrap().push(format!("write{}", part.index));
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(result.parts, 4);

        let events = events.lock().unwrap();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(position("write0") < position("read@3"), "{:?}", events);
    }

    #[tokio::test]
    async fn test_large_chunk_size_on_small_stream() {
        let uploader = ChunkedUploader::new(usize::MAX, 3);
        let result = uploader
            .upload("small", std::io::Cursor::new(b"hello".to_vec()), &|_: u64| {}, |part| {
                assert_eq!(part.data, b"hello");
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(result.bytes_written, 5);
        assert_eq!(result.parts, 1);
    }
}
