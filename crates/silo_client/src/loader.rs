//! HTTP segment loader with delete-on-close semantics.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use anyhow::{bail, Context};
use futures_util::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// Fetches spooled segments by their opaque URI.
///
/// The loader owns its HTTP client; dropping it releases pooled
/// connections. Redirects issued by the coordinator are followed
/// transparently.
#[derive(Clone, Default)]
pub struct SegmentLoader {
    client: reqwest::Client,
}

impl SegmentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Open a segment for reading.
    ///
    /// A non-success status is an error carrying the status and the server's
    /// message body. The returned stream acknowledges the segment when
    /// closed.
    pub async fn load(&self, uri: &str) -> anyhow::Result<SegmentStream> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .with_context(|| format!("request segment {uri}"))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            bail!("segment download failed with status {status}: {message}");
        }

        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(SegmentStream {
            inner: Box::pin(StreamReader::new(stream)),
            client: self.client.clone(),
            uri: uri.to_string(),
            acknowledged: false,
        })
    }

    /// Fetch a whole segment into memory and acknowledge it.
    pub async fn load_bytes(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
        let mut stream = self.load(uri).await?;
        let mut bytes = Vec::new();
        stream
            .read_to_end(&mut bytes)
            .await
            .with_context(|| format!("read segment {uri}"))?;
        Ok(bytes)
    }
}

/// Byte stream over one spooled segment.
///
/// Closing the stream, explicitly or by drop, sends a single
/// fire-and-forget `DELETE` for the segment. Delete failures are logged
/// and never propagated; an unacknowledged segment becomes unreadable
/// once its TTL lapses.
pub struct SegmentStream {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    client: reqwest::Client,
    uri: String,
    acknowledged: bool,
}

impl SegmentStream {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Acknowledge the segment without waiting for the server.
    pub fn close(mut self) {
        self.spawn_acknowledge();
    }

    fn spawn_acknowledge(&mut self) {
        if self.acknowledged {
            return;
        }
        self.acknowledged = true;
        let client = self.client.clone();
        let uri = self.uri.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(uri, "no async runtime available to acknowledge segment");
            return;
        };
        handle.spawn(async move {
            match client.delete(&uri).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(uri, "segment acknowledged");
                }
                Ok(response) => {
                    warn!(uri, status = %response.status(), "segment delete rejected");
                }
                Err(error) => {
                    warn!(uri, %error, "segment delete failed");
                }
            }
        });
    }
}

impl fmt::Debug for SegmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentStream")
            .field("uri", &self.uri)
            .field("acknowledged", &self.acknowledged)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for SegmentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_read(cx, buf)
    }
}

impl Drop for SegmentStream {
    fn drop(&mut self) {
        self.spawn_acknowledge();
    }
}
