//! The gateway's cache namespaces over one shared backend.

use std::sync::Arc;
use std::time::Duration;

use nsite_types::{Pubkey, RecordSet, SignedEvent, SiteRecord};
use tracing::info;

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::fjall_backend::FjallBackend;
use crate::memory::MemoryBackend;
use crate::namespace::CacheNamespace;

/// Default TTL of resolution results.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default retention of raw events and sync timestamps.
pub const DEFAULT_SYNC_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default lifetime of a remembered path miss.
pub const DEFAULT_MISS_TTL: Duration = Duration::from_secs(60);

/// Per-namespace TTL overrides. `None` falls back to [`CacheSettings::ttl`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceTtls {
    pub domains: Option<Duration>,
    pub relays: Option<Duration>,
    pub servers: Option<Duration>,
    pub paths: Option<Duration>,
    pub blobs: Option<Duration>,
    pub sites: Option<Duration>,
}

/// Expiry settings for the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// TTL of resolution results without an override.
    pub ttl: Duration,
    /// Overrides of `ttl` for single namespaces.
    pub namespaces: NamespaceTtls,
    /// TTL of raw events and last-sync timestamps.
    pub sync_retention: Duration,
    /// TTL of remembered path misses.
    pub miss_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            namespaces: NamespaceTtls::default(),
            sync_retention: DEFAULT_SYNC_RETENTION,
            miss_ttl: DEFAULT_MISS_TTL,
        }
    }
}

/// Every namespace the resolvers read and write.
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone, Debug)]
pub struct CacheFabric {
    /// hostname → identity, `None` caching a failed resolution.
    pub domains: CacheNamespace<Option<Pubkey>>,
    /// identity → outbox relays.
    pub relays: CacheNamespace<Vec<String>>,
    /// identity → mirror servers.
    pub servers: CacheNamespace<Vec<String>>,
    /// identity + path → authoritative record.
    pub paths: CacheNamespace<SiteRecord>,
    /// content hash → mirror URLs verified to hold it.
    pub blobs: CacheNamespace<Vec<String>>,
    /// identity → deduplicated record set.
    pub sites: CacheNamespace<RecordSet>,
    /// identity → raw site events, seeding the next sync.
    pub events: CacheNamespace<Vec<SignedEvent>>,
    /// identity → unix seconds the next incremental sync starts from.
    pub synced: CacheNamespace<u64>,
    /// identity + path → unix seconds of a direct query that found nothing.
    pub misses: CacheNamespace<u64>,
}

impl CacheFabric {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        let ns = settings.namespaces;
        let ttl = |over: Option<Duration>| Some(over.unwrap_or(settings.ttl));
        let retention = Some(settings.sync_retention);
        Self {
            domains: CacheNamespace::new(Arc::clone(&backend), "domains", ttl(ns.domains)),
            relays: CacheNamespace::new(Arc::clone(&backend), "relays", ttl(ns.relays)),
            servers: CacheNamespace::new(Arc::clone(&backend), "servers", ttl(ns.servers)),
            paths: CacheNamespace::new(Arc::clone(&backend), "paths", ttl(ns.paths)),
            blobs: CacheNamespace::new(Arc::clone(&backend), "blobs", ttl(ns.blobs)),
            sites: CacheNamespace::new(Arc::clone(&backend), "sites", ttl(ns.sites)),
            events: CacheNamespace::new(Arc::clone(&backend), "events", retention),
            synced: CacheNamespace::new(Arc::clone(&backend), "synced", retention),
            misses: CacheNamespace::new(backend, "misses", Some(settings.miss_ttl)),
        }
    }

    /// A fabric over a fresh [`MemoryBackend`].
    pub fn in_memory(settings: CacheSettings) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), settings)
    }
}

/// Key of the `paths` namespace.
pub fn path_key(identity: &Pubkey, path: &str) -> String {
    format!("{}{}", identity.to_hex(), path)
}

/// Open the backend named by a cache location.
///
/// An empty location or `in-memory` selects [`MemoryBackend`]; `fjall://<path>`
/// or a bare filesystem path selects [`FjallBackend`]. Any other scheme is
/// rejected.
pub fn open_backend(location: &str) -> Result<Arc<dyn CacheBackend>, CacheError> {
    let location = location.trim();
    match location {
        "" | "in-memory" | "memory" => {
            info!("using in-memory cache");
            Ok(Arc::new(MemoryBackend::new()))
        }
        _ => {
            let path = match location.split_once("://") {
                Some(("fjall", path)) if !path.is_empty() => path,
                Some(_) => return Err(CacheError::UnsupportedLocation(location.to_string())),
                None => location,
            };
            let backend = FjallBackend::open(path)?;
            info!(path, "using fjall cache");
            Ok(Arc::new(backend))
        }
    }
}
