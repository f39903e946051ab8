//! Blob discovery and retrieval across mirrors.
//!
//! Retrieval happens in two phases:
//!
//! 1. **Discovery.** Every candidate mirror is probed with a HEAD request, all
//!    at once. Mirrors that answer with success are recorded in the order
//!    their probes completed, and the list (even an empty one) is cached per
//!    content hash.
//! 2. **Retrieval.** The verified mirrors are tried one at a time, in that
//!    order. The first response with a success status and an acceptable
//!    declared size wins and is returned as a [`VerifiedBody`] stream.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use http::{HeaderMap, StatusCode};
use nsite_cache::CacheFabric;
use nsite_types::Sha256Hash;
use tracing::{debug, info, warn};

use crate::client::MirrorClient;
use crate::error::BlobError;
use crate::verify::VerifiedBody;
use crate::{FETCH_TIMEOUT, PROBE_TIMEOUT};

/// Settings for [`BlobFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Largest blob served, in bytes. `None` means unlimited.
    pub max_size: Option<u64>,
    /// Bound on each discovery probe.
    pub probe_timeout: Duration,
    /// Bound on each retrieval attempt, up to the response head.
    pub fetch_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_size: None,
            probe_timeout: PROBE_TIMEOUT,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }
}

/// A blob stream from the first mirror that accepted the request.
#[derive(Debug)]
pub struct BlobResponse {
    /// The mirror URL the body comes from.
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The mirror's declared `content-length`.
    pub content_length: Option<u64>,
    pub body: VerifiedBody,
}

impl BlobResponse {
    /// A response header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// Finds and streams blobs by content hash.
pub struct BlobFetcher {
    cache: CacheFabric,
    client: Arc<dyn MirrorClient>,
    config: FetcherConfig,
}

impl BlobFetcher {
    pub fn new(cache: CacheFabric, client: Arc<dyn MirrorClient>, config: FetcherConfig) -> Self {
        Self {
            cache,
            client,
            config,
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Discover which `mirrors` hold `hash` and stream it from the first one
    /// that serves it. `None` when no mirror does.
    pub async fn fetch(&self, hash: &Sha256Hash, mirrors: &[String]) -> Option<BlobResponse> {
        let urls = self.discover(hash, mirrors).await;
        self.retrieve(hash, &urls).await
    }

    /// Blob URLs verified to exist, in probe completion order.
    pub async fn discover(&self, hash: &Sha256Hash, mirrors: &[String]) -> Vec<String> {
        let key = hash.to_hex();
        if let Some(cached) = self.cache.blobs.lookup(&key).await {
            debug!(%hash, mirrors = cached.len(), "blob location cache hit");
            return cached;
        }

        let timeout = self.config.probe_timeout;
        let mut probes: FuturesUnordered<_> = blob_urls(hash, mirrors)
            .into_iter()
            .map(|url| {
                let client = Arc::clone(&self.client);
                async move {
                    let outcome = tokio::time::timeout(timeout, client.probe(&url)).await;
                    (url, outcome)
                }
            })
            .collect();

        let mut found = Vec::new();
        while let Some((url, outcome)) = probes.next().await {
            match outcome {
                Ok(Ok(true)) => found.push(url.to_string()),
                Ok(Ok(false)) => debug!(%url, "mirror does not have blob"),
                Ok(Err(e)) => debug!(%url, error = %e, "probe failed"),
                Err(_) => debug!(%url, ?timeout, "probe timed out"),
            }
        }

        info!(%hash, candidates = mirrors.len(), found = found.len(), "discovered blob");
        self.cache.blobs.store(&key, &found).await;
        found
    }

    /// Try each URL in order and return the first acceptable response.
    pub async fn retrieve(&self, hash: &Sha256Hash, urls: &[String]) -> Option<BlobResponse> {
        for url in urls {
            match self.attempt(hash, url).await {
                Ok(response) => {
                    debug!(%hash, url = %url, length = ?response.content_length, "streaming blob");
                    return Some(response);
                }
                Err(e) => warn!(%hash, url = %url, error = %e, "mirror attempt failed"),
            }
        }
        None
    }

    async fn attempt(&self, hash: &Sha256Hash, url: &str) -> Result<BlobResponse, BlobError> {
        let parsed = url::Url::parse(url).map_err(|e| BlobError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let timeout = self.config.fetch_timeout;
        let response = tokio::time::timeout(timeout, self.client.get(&parsed))
            .await
            .map_err(|_| BlobError::Timeout(timeout))??;

        let status = response.status.ok_or(BlobError::MissingStatus)?;
        let content_length = response.content_length();
        if let (Some(max), Some(size)) = (self.config.max_size, content_length)
            && size > max
        {
            return Err(BlobError::TooLarge { size, max });
        }
        if !status.is_success() {
            return Err(BlobError::Status(status.as_u16()));
        }

        Ok(BlobResponse {
            url: url.to_string(),
            status,
            headers: response.headers,
            content_length,
            body: VerifiedBody::new(response.body, *hash, self.config.max_size),
        })
    }
}

/// The blob URL on each mirror, without duplicates. Mirrors that are not
/// valid http(s) base URLs are skipped.
pub fn blob_urls(hash: &Sha256Hash, mirrors: &[String]) -> Vec<url::Url> {
    let name = hash.to_hex();
    let mut out: Vec<url::Url> = Vec::with_capacity(mirrors.len());
    for mirror in mirrors {
        let joined = url::Url::parse(mirror.trim()).and_then(|base| base.join(&name));
        match joined {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if !out.contains(&url) {
                    out.push(url);
                }
            }
            Ok(_) => debug!(mirror = %mirror, "skipping non-http mirror"),
            Err(e) => debug!(mirror = %mirror, error = %e, "skipping invalid mirror"),
        }
    }
    out
}
