//! Streaming Proxy
//!
//! `GET /<proxy-path>?query=<url>` fetches a remote resource into a scratch
//! file, then streams that file back as the response body. The scratch file
//! lives exactly as long as one request: it is deleted when the body ends or
//! is dropped.
//!
//! # Status Modes
//!
//! - **optimistic** (default): the response is `200 OK` before the fetch
//!   starts. Any failure is logged and the body ends early (or is empty).
//! - **deferred**: the fetch completes before a status is chosen. Bad
//!   requests get `400`, upstream failures `502`.

use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::infrastructure::config::{ProxySettings, ProxyStatusMode};
use crate::infrastructure::metrics;

/// Scratch file name prefix.
pub const SCRATCH_PREFIX: &str = "pano-proxy-";

/// Scratch file name suffix.
pub const SCRATCH_SUFFIX: &str = ".data";

// =============================================================================
// Errors
// =============================================================================

/// Proxy failures.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No `query` parameter.
    #[error("missing 'query' parameter")]
    MissingQuery,

    /// The target is not a fetchable URL.
    #[error("invalid target URL '{url}': {reason}")]
    InvalidUrl {
        /// The rejected target.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The upstream request failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("upstream returned {0}")]
    UpstreamStatus(StatusCode),

    /// Scratch file I/O failed.
    #[error("scratch file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingQuery => "missing_query",
            Self::InvalidUrl { .. } => "invalid_url",
            Self::Fetch(_) => "fetch",
            Self::UpstreamStatus(_) => "upstream_status",
            Self::Io(_) => "io",
        }
    }

    /// Status used in deferred mode.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingQuery | Self::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            Self::Fetch(_) | Self::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// Fetched Resource
// =============================================================================

/// A resource fetched into its scratch file, rewound for reading.
#[derive(Debug)]
pub struct Fetched {
    file: File,
    path: TempPath,
    len: u64,
    content_type: Option<HeaderValue>,
}

impl Fetched {
    /// Number of bytes fetched.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the resource was empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Upstream content type, if any.
    #[must_use]
    pub const fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    /// Stream the scratch file in `chunk_size` pieces.
    #[must_use]
    pub fn into_stream(self, chunk_size: usize) -> ScratchFileStream {
        ScratchFileStream {
            reader: Some(ReaderStream::with_capacity(self.file, chunk_size)),
            path: Some(self.path),
        }
    }
}

/// Body stream over a scratch file that deletes the file when done.
///
/// Read errors end the stream early instead of failing the response.
pub struct ScratchFileStream {
    reader: Option<ReaderStream<File>>,
    path: Option<TempPath>,
}

impl std::fmt::Debug for ScratchFileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchFileStream")
            .field("open", &self.reader.is_some())
            .field("path", &self.path)
            .finish()
    }
}

impl ScratchFileStream {
    fn finish(&mut self) {
        // Close before unlinking.
        self.reader = None;
        if let Some(path) = self.path.take()
            && let Err(e) = path.close()
        {
            tracing::warn!(error = %e, "Failed to remove proxy scratch file");
        }
    }
}

impl Stream for ScratchFileStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(reader).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(error = %e, "Proxy scratch read failed, truncating body");
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Temp-file-backed fetch proxy.
#[derive(Debug, Clone)]
pub struct StreamingProxy {
    client: reqwest::Client,
    settings: ProxySettings,
}

impl StreamingProxy {
    /// Create a proxy with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: ProxySettings) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client, settings })
    }

    /// Proxy settings.
    #[must_use]
    pub const fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Fetch `target` fully into a fresh scratch file.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] for invalid targets, network failures,
    /// non-success upstream statuses and scratch file I/O. The scratch file
    /// is removed on every error path.
    pub async fn fetch(&self, target: &str) -> Result<Fetched, ProxyError> {
        let url = parse_target(target)?;

        let (std_file, path) = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(&self.settings.scratch_dir)?
            .into_parts();
        let mut file = File::from_std(std_file);

        let started = Instant::now();
        let mut request = self.client.get(url.clone());
        if let Some(timeout) = self.settings.fetch_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::UpstreamStatus(status));
        }
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();

        let mut len: u64 = 0;
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            len += chunk.len() as u64;
        }
        file.flush().await?;
        file.seek(SeekFrom::Start(0)).await?;

        metrics::record_proxy_fetch_duration(started.elapsed());
        metrics::record_proxy_bytes(len);
        tracing::debug!(
            url = %url,
            bytes = len,
            elapsed_ms = started.elapsed().as_millis(),
            "Proxy fetch complete"
        );

        Ok(Fetched {
            file,
            path,
            len,
            content_type,
        })
    }

    /// Build the response for a proxy request.
    pub async fn respond(self: Arc<Self>, target: Option<String>) -> Response {
        metrics::record_proxy_request(self.settings.status_mode.as_str());

        match self.settings.status_mode {
            ProxyStatusMode::Optimistic => self.respond_optimistic(target),
            ProxyStatusMode::Deferred => self.respond_deferred(target).await,
        }
    }

    fn respond_optimistic(self: Arc<Self>, target: Option<String>) -> Response {
        let chunk_size = self.settings.buffer_size;

        let body = stream::once(async move {
            let target = target.ok_or(ProxyError::MissingQuery)?;
            self.fetch(&target).await.inspect_err(|e| {
                tracing::warn!(url = %target, error = %e, "Proxy fetch failed");
            })
        })
        .flat_map(move |result| match result {
            Ok(fetched) => fetched.into_stream(chunk_size).left_stream(),
            Err(e) => {
                if matches!(e, ProxyError::MissingQuery) {
                    tracing::warn!("Proxy request without 'query' parameter");
                }
                metrics::record_proxy_error(e.kind());
                stream::empty().right_stream()
            }
        });

        (StatusCode::OK, Body::from_stream(body)).into_response()
    }

    async fn respond_deferred(self: Arc<Self>, target: Option<String>) -> Response {
        let result = match target {
            Some(target) => self.fetch(&target).await.inspect_err(|e| {
                tracing::warn!(url = %target, error = %e, "Proxy fetch failed");
            }),
            None => Err(ProxyError::MissingQuery),
        };

        match result {
            Ok(fetched) => {
                let len = fetched.len();
                let content_type = fetched.content_type().cloned();
                let body = Body::from_stream(fetched.into_stream(self.settings.buffer_size));

                let mut response = (StatusCode::OK, body).into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                if let Some(content_type) = content_type {
                    headers.insert(header::CONTENT_TYPE, content_type);
                }
                response
            }
            Err(e) => {
                metrics::record_proxy_error(e.kind());
                (e.status(), e.to_string()).into_response()
            }
        }
    }
}

fn parse_target(target: &str) -> Result<reqwest::Url, ProxyError> {
    let invalid = |reason: String| ProxyError::InvalidUrl {
        url: target.to_string(),
        reason,
    };

    let url = reqwest::Url::parse(target.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(format!("unsupported scheme '{scheme}'"))),
    }
}

// =============================================================================
// Handler
// =============================================================================

/// Query string of a proxy request. Other parameters are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    /// Target URL.
    pub query: Option<String>,
}

/// `GET /<proxy-path>`
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ProxyQuery>, QueryRejection>,
) -> Response {
    let target = match query {
        Ok(Query(ProxyQuery { query })) => query.filter(|q| !q.trim().is_empty()),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Unparseable proxy query string");
            None
        }
    };

    Arc::clone(state.proxy()).respond(target).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_must_be_http_urls() {
        assert!(parse_target("http://example.com/a.jpg").is_ok());
        assert!(parse_target(" https://example.com/a.jpg ").is_ok());
        assert!(matches!(
            parse_target("not a url"),
            Err(ProxyError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_target("file:///etc/passwd"),
            Err(ProxyError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn deferred_statuses() {
        assert_eq!(ProxyError::MissingQuery.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::UpstreamStatus(StatusCode::NOT_FOUND).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Io(std::io::Error::other("disk")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn invalid_target_leaves_no_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = StreamingProxy::new(ProxySettings {
            scratch_dir: dir.path().to_path_buf(),
            ..ProxySettings::default()
        })
        .unwrap();

        assert!(proxy.fetch("ftp://example.com/x").await.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scratch_stream_removes_file_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let named = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .suffix(SCRATCH_SUFFIX)
            .tempfile_in(dir.path())
            .unwrap();
        std::fs::write(named.path(), b"hello panorama").unwrap();
        let (std_file, path) = named.into_parts();

        let fetched = Fetched {
            file: File::from_std(std_file),
            path,
            len: 14,
            content_type: None,
        };
        let chunks: Vec<_> = fetched.into_stream(4).collect().await;

        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"hello panorama");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn dropped_stream_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let (std_file, path) = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(dir.path())
            .unwrap()
            .into_parts();

        let stream = Fetched {
            file: File::from_std(std_file),
            path,
            len: 0,
            content_type: None,
        }
        .into_stream(1024);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(stream);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
