//! [`Gateway`]: the per-request pipeline.
//!
//! hostname → identity → relays → (mirror list ‖ path record) → blob stream.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use http::{HeaderMap, HeaderValue, StatusCode, header};
use nsite_blossom::{BlobFetcher, BlobResponse, FetcherConfig, MirrorClient, VerifiedBody};
use nsite_cache::{CacheFabric, DEFAULT_TTL};
use nsite_relay::RelayClient;
use nsite_resolver::{
    DnsLookup, IdentityConfig, IdentityResolver, MetadataConfig, MetadataResolver, NameDirectory,
    ProfileConfig, ProfileResolver, merge_relays,
};
use nsite_types::{Pubkey, SiteRecord};
use tracing::{debug, info, warn};

use crate::error::GatewayError;

/// Path served when the requested one has no record.
pub const NOT_FOUND_PAGE: &str = "/404.html";

/// Configuration for creating a [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Domain the gateway itself is served on. When set, the homepage
    /// fallback only applies to requests for exactly this host.
    pub public_domain: Option<String>,
    /// Identity served for hosts that resolve to nothing.
    pub homepage: Option<Pubkey>,
    /// Relays always consulted for site records, and watched for updates.
    pub subscription_relays: Vec<String>,
    /// Further relays always consulted for site records.
    pub extra_relays: Vec<String>,
    /// Mirrors tried for every blob after the identity's own servers.
    pub extra_mirrors: Vec<String>,
    /// Advertised in `cache-control`.
    pub cache_ttl: Duration,
    pub identity: IdentityConfig,
    pub profile: ProfileConfig,
    pub metadata: MetadataConfig,
    pub fetcher: FetcherConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            public_domain: None,
            homepage: None,
            subscription_relays: Vec::new(),
            extra_relays: Vec::new(),
            extra_mirrors: Vec::new(),
            cache_ttl: DEFAULT_TTL,
            identity: IdentityConfig::default(),
            profile: ProfileConfig::default(),
            metadata: MetadataConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

/// The network collaborators a [`Gateway`] runs on.
#[derive(Clone)]
pub struct GatewayParts {
    pub cache: CacheFabric,
    pub relays: Arc<dyn RelayClient>,
    pub dns: Arc<dyn DnsLookup>,
    pub directory: Arc<dyn NameDirectory>,
    pub mirrors: Arc<dyn MirrorClient>,
}

/// A resolved file, ready to stream.
#[derive(Debug)]
pub struct SiteContent {
    /// 200, or 404 when the site's own not-found page is served.
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: String,
    pub last_modified: String,
    pub cache_control: String,
    pub identity: Pubkey,
    pub record: SiteRecord,
    /// The blob URL the body is read from.
    pub mirror: String,
    pub body: VerifiedBody,
}

impl SiteContent {
    /// Response headers describing the content. Values that are not valid
    /// header text are left out.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: header::HeaderName, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        };
        if let Some(content_type) = &self.content_type {
            put(header::CONTENT_TYPE, content_type);
        }
        if let Some(length) = self.content_length {
            put(header::CONTENT_LENGTH, &length.to_string());
        }
        put(header::ETAG, &self.etag);
        put(header::LAST_MODIFIED, &self.last_modified);
        put(header::CACHE_CONTROL, &self.cache_control);
        headers
    }
}

/// The request pipeline.
///
/// Owns no state of its own: everything it learns lives in the shared
/// [`CacheFabric`].
pub struct Gateway {
    config: GatewayConfig,
    cache: CacheFabric,
    relays: Arc<dyn RelayClient>,
    identity: IdentityResolver,
    profile: ProfileResolver,
    metadata: MetadataResolver,
    fetcher: BlobFetcher,
}

impl Gateway {
    pub fn new(config: GatewayConfig, parts: GatewayParts) -> Self {
        let GatewayParts {
            cache,
            relays,
            dns,
            directory,
            mirrors,
        } = parts;
        Self {
            identity: IdentityResolver::new(cache.clone(), dns, directory, config.identity.clone()),
            profile: ProfileResolver::new(cache.clone(), Arc::clone(&relays), config.profile.clone()),
            metadata: MetadataResolver::new(
                cache.clone(),
                Arc::clone(&relays),
                config.metadata.clone(),
            ),
            fetcher: BlobFetcher::new(cache.clone(), mirrors, config.fetcher.clone()),
            config,
            cache,
            relays,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheFabric {
        &self.cache
    }

    pub fn relay_client(&self) -> &Arc<dyn RelayClient> {
        &self.relays
    }

    /// Resolve a request to a streamable file.
    pub async fn resolve_content(
        &self,
        hostname: &str,
        path: &str,
    ) -> Result<SiteContent, GatewayError> {
        let identity = self.resolve_identity(hostname).await?;

        let outboxes = self.profile.get_outboxes(&identity).await;
        let relays = merge_relays(
            &merge_relays(&outboxes, &self.config.subscription_relays),
            &self.config.extra_relays,
        );
        if relays.is_empty() {
            return Err(GatewayError::NoRelays { identity });
        }

        let (servers, found) = tokio::join!(
            self.profile.get_mirror_servers(&identity, &relays),
            self.find_record(&identity, path, &relays),
        );
        let Some((record, status)) = found else {
            info!(%identity, path, relays = relays.len(), "no record for path");
            return Err(GatewayError::path_not_found(path, identity, relays));
        };

        let mirrors = merge_relays(&servers, &self.config.extra_mirrors);
        if mirrors.is_empty() {
            return Err(GatewayError::NoMirrors { identity });
        }

        let Some(blob) = self.fetcher.fetch(&record.content_hash, &mirrors).await else {
            warn!(%identity, path = %record.path, hash = %record.content_hash, "blob unavailable");
            return Err(GatewayError::BlobUnavailable {
                hash: record.content_hash,
                path: record.path,
                mirrors,
            });
        };

        debug!(%identity, path = %record.path, mirror = %blob.url, %status, "serving");
        Ok(self.content(identity, record, status, blob))
    }

    /// The identity behind `hostname`, or the homepage when it applies.
    async fn resolve_identity(&self, hostname: &str) -> Result<Pubkey, GatewayError> {
        if let Some(identity) = self.identity.resolve(hostname).await {
            return Ok(identity);
        }
        let host = hostname.trim_end_matches('.');
        let serves_homepage = match &self.config.public_domain {
            None => true,
            Some(domain) => domain.eq_ignore_ascii_case(host),
        };
        match self.config.homepage {
            Some(homepage) if serves_homepage => {
                debug!(host, %homepage, "serving homepage");
                Ok(homepage)
            }
            _ => Err(GatewayError::NoIdentity {
                host: host.to_string(),
            }),
        }
    }

    /// The record for `path`, else the site's not-found page with a 404.
    async fn find_record(
        &self,
        identity: &Pubkey,
        path: &str,
        relays: &[String],
    ) -> Option<(SiteRecord, StatusCode)> {
        if let Some(record) = self.metadata.get_descriptor(identity, path, relays).await {
            return Some((record, StatusCode::OK));
        }
        self.metadata
            .get_descriptor(identity, NOT_FOUND_PAGE, relays)
            .await
            .map(|record| (record, StatusCode::NOT_FOUND))
    }

    fn content(
        &self,
        identity: Pubkey,
        record: SiteRecord,
        status: StatusCode,
        blob: BlobResponse,
    ) -> SiteContent {
        let content_type = mime_guess::from_path(&record.path)
            .first_raw()
            .map(str::to_string)
            .or_else(|| blob.header(header::CONTENT_TYPE.as_str()).map(str::to_string));
        let etag = blob
            .header(header::ETAG.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("\"{}\"", record.content_hash));
        let last_modified = blob
            .header(header::LAST_MODIFIED.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| http_date(record.created_at));

        SiteContent {
            status,
            content_type,
            content_length: blob.content_length,
            etag,
            last_modified,
            cache_control: format!("public, max-age={}", self.config.cache_ttl.as_secs()),
            identity,
            record,
            mirror: blob.url,
            body: blob.body,
        }
    }
}

fn http_date(unix_secs: u64) -> String {
    httpdate::fmt_http_date(UNIX_EPOCH + Duration::from_secs(unix_secs))
}
