//! Feed sources: where a run's bytes come from.

use crate::config::FeedConfig;
use crate::error::IngestError;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::info;

/// Body of one feed fetch.
pub type FeedReader = Box<dyn AsyncRead + Send + Unpin>;

pub type FeedFuture<'a> =
    Pin<Box<dyn Future<Output = Result<FeedReader, IngestError>> + Send + 'a>>;

/// Something that can be fetched once per run.
pub trait FeedSource: Send + Sync + 'static {
    /// Start a fetch and hand back the body as a byte stream.
    fn open(&self) -> FeedFuture<'_>;

    /// Where the feed comes from, for logs.
    fn describe(&self) -> String;
}

/// Upstream HTTP feed. One GET per run, no retries.
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
    header_timeout: Duration,
}

impl HttpFeed {
    pub fn new(config: &FeedConfig) -> Result<Self, IngestError> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| IngestError::FeedUnreachable("no feed url configured".to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| IngestError::FeedUnreachable(e.to_string()))?;
        Ok(HttpFeed {
            client,
            url,
            header_timeout: config.request_timeout,
        })
    }
}

impl FeedSource for HttpFeed {
    fn open(&self) -> FeedFuture<'_> {
        Box::pin(async move {
            info!(url = %self.url, "requesting flight feed");
            let request = self
                .client
                .get(&self.url)
                .header(CONTENT_TYPE, "application/json")
                .send();

            let response = tokio::time::timeout(self.header_timeout, request)
                .await
                .map_err(|_| {
                    IngestError::FeedUnreachable(format!(
                        "no response within {:?}",
                        self.header_timeout
                    ))
                })?
                .map_err(|e| IngestError::FeedUnreachable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(IngestError::FeedUnreachable(format!(
                    "upstream returned {}",
                    status
                )));
            }

            let body = response
                .bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
            let reader: FeedReader = Box::new(StreamReader::new(Box::pin(body)));
            Ok(reader)
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A fixed document served from memory, optionally split into chunks.
///
/// Used by tests, the benchmark, and simulation runs.
#[derive(Debug, Clone)]
pub struct StaticFeed {
    body: Bytes,
    chunk_size: Option<usize>,
}

impl StaticFeed {
    pub fn new(body: impl Into<Bytes>) -> Self {
        StaticFeed {
            body: body.into(),
            chunk_size: None,
        }
    }

    /// Deliver the body in pieces of `size` bytes.
    pub fn chunked(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl FeedSource for StaticFeed {
    fn open(&self) -> FeedFuture<'_> {
        let chunk_size = self.chunk_size.unwrap_or(self.body.len().max(1));
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < self.body.len() {
            let end = (offset + chunk_size).min(self.body.len());
            chunks.push(Ok::<_, io::Error>(self.body.slice(offset..end)));
            offset = end;
        }
        Box::pin(async move {
            let reader: FeedReader = Box::new(StreamReader::new(futures::stream::iter(chunks)));
            Ok(reader)
        })
    }

    fn describe(&self) -> String {
        format!("static feed ({} bytes)", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_static_feed_reassembles() {
        let feed = StaticFeed::new(&b"{\"flights\": []}"[..]).chunked(3);
        for _ in 0..2 {
            let mut reader = feed.open().await.unwrap();
            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            assert_eq!(out, b"{\"flights\": []}");
        }
    }

    #[tokio::test]
    async fn test_empty_static_feed() {
        let feed = StaticFeed::new(Bytes::new());
        let mut reader = feed.open().await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_http_feed_requires_url() {
        let config = FeedConfig::default();
        assert!(matches!(
            HttpFeed::new(&config),
            Err(IngestError::FeedUnreachable(_))
        ));

        let config = FeedConfig {
            url: Some("http://127.0.0.1:9/flights".to_string()),
            ..FeedConfig::default()
        };
        let feed = HttpFeed::new(&config).unwrap();
        assert_eq!(feed.describe(), "http://127.0.0.1:9/flights");
    }

    #[tokio::test]
    async fn test_http_feed_connection_refused() {
        let config = FeedConfig {
            url: Some("http://127.0.0.1:9/flights".to_string()),
            request_timeout: Duration::from_secs(2),
            ..FeedConfig::default()
        };
        let feed = HttpFeed::new(&config).unwrap();
        let result = feed.open().await;
        assert!(matches!(result, Err(IngestError::FeedUnreachable(_))));
    }
}
