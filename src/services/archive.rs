use crate::models::UploadedFile;
use crate::services::store::{Store, StoreError};
use crate::services::zip_stream::ZipStreamWriter;
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Archive bytes are handed to the response in chunks of this size
pub const OUTPUT_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks in flight between the encoder and the response body
const CHANNEL_DEPTH: usize = 2;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("writing archive: {0}")]
    Write(#[from] io::Error),

    #[error("saving files to store: {0}")]
    Store(#[from] StoreError),

    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("archive pipeline ended without output")]
    NoOutput,
}

/// Pipeline phases after the request was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Archiving,
    Persisting,
    Finalizing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Archiving => f.write_str("archiving"),
            Phase::Persisting => f.write_str("persisting"),
            Phase::Finalizing => f.write_str("finalizing"),
        }
    }
}

type Chunk = Result<Bytes, ArchiveError>;

/// `Write` adapter that cuts the archive into chunks and sends them to the
/// response body. Sends block, so the sink must only be used on a blocking
/// thread; a full channel is the backpressure from a slow client.
///
/// Buffered bytes are only sent on a full chunk or an explicit `flush`;
/// dropping the sink discards them.
struct ChannelSink {
    tx: mpsc::Sender<Chunk>,
    buffer: BytesMut,
    sent: Arc<AtomicU64>,
}

impl ChannelSink {
    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        let len = chunk.len() as u64;
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "response body receiver dropped")
        })?;
        self.sent.fetch_add(len, Ordering::Release);
        Ok(())
    }
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        while self.buffer.len() >= OUTPUT_CHUNK_BYTES {
            let chunk = self.buffer.split_to(OUTPUT_CHUNK_BYTES).freeze();
            self.send(chunk)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            let chunk = self.buffer.split().freeze();
            self.send(chunk)?;
        }
        Ok(())
    }
}

/// Encodes uploaded files into a ZIP streamed as the response body and hands
/// the same files to the store.
pub struct ArchiveStreamer {
    store: Arc<dyn Store>,
}

impl ArchiveStreamer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Starts the pipeline and waits for its first output chunk.
    ///
    /// Failures before the first chunk are returned as errors, so the caller
    /// can still answer with an error status. Later failures abort the
    /// returned body mid-stream.
    pub async fn stream(&self, files: Vec<UploadedFile>) -> Result<Body, ArchiveError> {
        let (tx, mut rx) = mpsc::channel::<Chunk>(CHANNEL_DEPTH);
        let sent = Arc::new(AtomicU64::new(0));

        let pipeline = run_pipeline(files, self.store.clone(), tx.clone(), sent.clone());
        tokio::spawn(
            async move {
                if let Err(e) = pipeline.await {
                    let flushed = sent.load(Ordering::Acquire);
                    if flushed > 0 {
                        tracing::error!(
                            "Archive failed after {} bytes were sent, response truncated: {}",
                            flushed,
                            e
                        );
                    }
                    // Nobody listening means the client is gone or the
                    // handler already answered; either way there is no one to tell.
                    let _ = tx.send(Err(e)).await;
                }
            }
            .in_current_span(),
        );

        let first = match rx.recv().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e),
            None => return Err(ArchiveError::NoOutput),
        };

        let rest = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        Ok(Body::from_stream(stream::once(async move { Ok(first) }).chain(rest)))
    }
}

async fn run_pipeline(
    files: Vec<UploadedFile>,
    store: Arc<dyn Store>,
    tx: mpsc::Sender<Chunk>,
    sent: Arc<AtomicU64>,
) -> Result<(), ArchiveError> {
    let mut phase = Phase::Archiving;
    let result = async {
        let sink = ChannelSink {
            tx,
            buffer: BytesMut::with_capacity(OUTPUT_CHUNK_BYTES),
            sent: sent.clone(),
        };

        let (writer, files) = tokio::task::spawn_blocking(move || {
            let mut writer = ZipStreamWriter::new(sink);
            for file in &files {
                writer.write_entry(&file.name, &file.contents, file.upload.time)?;
            }
            Ok::<_, io::Error>((writer, files))
        })
        .await??;
        tracing::debug!(
            "Archived {} entries ({} bytes encoded)",
            writer.entry_count(),
            writer.bytes_written()
        );

        phase = Phase::Persisting;
        store.save(&files).await?;

        phase = Phase::Finalizing;
        tokio::task::spawn_blocking(move || writer.finish()).await??;
        Ok::<(), ArchiveError>(())
    }
    .await;

    match &result {
        Ok(()) => tracing::debug!("Archive complete ({} bytes)", sent.load(Ordering::Acquire)),
        Err(e) => tracing::debug!("Archive pipeline failed while {}: {}", phase, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadInfo;
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use std::io::{Cursor, Read};

    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn init(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn save(&self, _files: &[UploadedFile]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }
    }

    fn file(name: &str, contents: Vec<u8>) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            contents: Bytes::from(contents),
            upload: UploadInfo {
                time: Utc::now(),
                client_agent: "archive-test".to_string(),
            },
        }
    }

    /// Deterministic, poorly compressible bytes
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    #[tokio::test]
    async fn test_streams_archive_and_saves_files() {
        let store = Arc::new(MemoryStore::new());
        let files = vec![
            file("foo.txt", b"foo foo foo".to_vec()),
            file("bar.txt", b"bar bar bar bar".to_vec()),
        ];

        let body = ArchiveStreamer::new(store.clone())
            .stream(files.clone())
            .await
            .unwrap();
        let archive = body.collect().await.unwrap().to_bytes();

        let mut zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
        assert_eq!(zip.len(), 2);
        for (i, expected) in files.iter().enumerate() {
            let mut entry = zip.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            assert_eq!(entry.name(), expected.name);
            assert_eq!(data, expected.contents.to_vec());
        }
        assert_eq!(store.saved_files(), files);
    }

    #[tokio::test]
    async fn test_large_archive_spans_many_chunks() {
        let store = Arc::new(MemoryStore::new());
        let contents = noise(3 * OUTPUT_CHUNK_BYTES);
        let body = ArchiveStreamer::new(store.clone())
            .stream(vec![file("noise.bin", contents.clone())])
            .await
            .unwrap();
        let archive = body.collect().await.unwrap().to_bytes();
        assert!(archive.len() > 3 * OUTPUT_CHUNK_BYTES);

        let mut zip = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
        let mut data = Vec::new();
        zip.by_index(0).unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, contents);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_before_output_is_an_error() {
        let result = ArchiveStreamer::new(Arc::new(FailingStore))
            .stream(vec![file("small.txt", b"tiny".to_vec())])
            .await;
        assert!(matches!(result, Err(ArchiveError::Store(_))));
    }

    #[tokio::test]
    async fn test_store_failure_after_output_truncates_body() {
        let body = ArchiveStreamer::new(Arc::new(FailingStore))
            .stream(vec![file("noise.bin", noise(2 * OUTPUT_CHUNK_BYTES))])
            .await
            .expect("first chunk is sent before the store is called");
        assert!(body.collect().await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_body_stops_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let body = ArchiveStreamer::new(store.clone())
            .stream(vec![
                file("a.bin", noise(4 * OUTPUT_CHUNK_BYTES)),
                file("b.bin", noise(4 * OUTPUT_CHUNK_BYTES)),
            ])
            .await
            .unwrap();
        drop(body);

        // The encoder hits a closed channel and never reaches the store
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(store.is_empty());
    }
}
