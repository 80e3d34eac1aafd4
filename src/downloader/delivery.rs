// Delivery - streams an artifact to the caller and deletes it afterwards
//
// Deletion is scheduled when the stream finishes or is dropped, after a
// grace period so a slow client still reading buffered data is not cut off.
// Eviction remains the safety net if scheduling never happens.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::io::ReaderStream;

use super::errors::DownloadError;
use super::models::Artifact;
use super::store::ArtifactStore;

/// MIME type for the extensions this engine produces
pub fn content_type(extension: Option<&str>) -> &'static str {
    match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("opus") | Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Resolves once the delivered artifact's deletion has been attempted
pub struct CleanupReceipt {
    rx: oneshot::Receiver<bool>,
}

impl CleanupReceipt {
    /// True if the file was removed (or already gone)
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

struct CleanupGuard {
    store: Arc<ArtifactStore>,
    path: PathBuf,
    grace: Duration,
    runtime: Handle,
    done: Option<oneshot::Sender<bool>>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let store = self.store.clone();
        let path = std::mem::take(&mut self.path);
        let grace = self.grace;
        let done = self.done.take();

        self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let removed = match store.remove(&path).await {
                Ok(bytes) => {
                    tracing::debug!(bytes, "Removed delivered artifact {}", path.display());
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to remove delivered artifact: {}", e);
                    false
                }
            };
            if let Some(done) = done {
                let _ = done.send(removed);
            }
        });
    }
}

/// Byte stream over a finished artifact
pub struct Delivery {
    file_name: String,
    content_length: u64,
    content_type: &'static str,
    stream: ReaderStream<File>,
    cleanup: Option<CleanupGuard>,
}

impl Delivery {
    /// Open `artifact` for streaming. Deletion is scheduled on completion
    /// or drop, whichever comes first.
    pub async fn open(
        store: Arc<ArtifactStore>,
        artifact: &Artifact,
        grace: Duration,
    ) -> Result<(Self, CleanupReceipt), DownloadError> {
        let file = File::open(&artifact.path).await.map_err(|e| {
            DownloadError::Filesystem(format!(
                "cannot open {}: {}",
                artifact.path.display(),
                e
            ))
        })?;
        let content_length = file.metadata().await?.len();

        let (tx, rx) = oneshot::channel();
        let guard = CleanupGuard {
            store,
            path: artifact.path.clone(),
            grace,
            runtime: Handle::current(),
            done: Some(tx),
        };

        tracing::info!(
            file = %artifact.file_name(),
            bytes = content_length,
            "Delivering artifact"
        );

        Ok((
            Self {
                file_name: artifact.file_name(),
                content_length,
                content_type: content_type(artifact.extension()),
                stream: ReaderStream::new(file),
                cleanup: Some(guard),
            },
            CleanupReceipt { rx },
        ))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Stop streaming now; deletion is scheduled as if the stream ended
    pub fn finish(mut self) {
        self.cleanup.take();
    }
}

impl Stream for Delivery {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.stream).poll_next(cx);
        if let Poll::Ready(None) = polled {
            // End of file: hand the artifact over to delayed deletion
            this.cleanup.take();
        }
        polled
    }
}
