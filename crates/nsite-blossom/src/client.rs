//! HTTP access to blob mirrors.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode, header};
use tracing::trace;

use crate::error::BlobError;

/// A stream of body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, BlobError>>;

/// A mirror's answer to a GET, with the body not yet read.
pub struct MirrorResponse {
    /// `None` when the transport produced no status line.
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl MirrorResponse {
    /// The declared `content-length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header(header::CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    /// A header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl fmt::Debug for MirrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// The two requests the fetcher makes against a mirror.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// `HEAD url`: does the mirror hold the blob?
    async fn probe(&self, url: &url::Url) -> Result<bool, BlobError>;

    /// `GET url`, returning as soon as the response head arrives.
    async fn get(&self, url: &url::Url) -> Result<MirrorResponse, BlobError>;
}

/// [`MirrorClient`] over reqwest.
///
/// Requests carry no client-wide timeout; the fetcher bounds each call.
#[derive(Clone, Default)]
pub struct HttpMirrorClient {
    http: reqwest::Client,
}

impl HttpMirrorClient {
    pub fn new() -> Result<Self, BlobError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("nsite-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MirrorClient for HttpMirrorClient {
    async fn probe(&self, url: &url::Url) -> Result<bool, BlobError> {
        let response = self.http.head(url.clone()).send().await?;
        trace!(%url, status = %response.status(), "probe");
        Ok(response.status().is_success())
    }

    async fn get(&self, url: &url::Url) -> Result<MirrorResponse, BlobError> {
        let response = self.http.get(url.clone()).send().await?;
        trace!(%url, status = %response.status(), "get");
        let status = Some(response.status());
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(BlobError::from).boxed();
        Ok(MirrorResponse {
            status,
            headers,
            body,
        })
    }
}
