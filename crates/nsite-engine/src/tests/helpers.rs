//! Fixtures shared by the engine tests: a scripted relay network, canned
//! mirrors and a gateway wired to them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, StatusCode};
use nsite_blossom::{BlobError, MirrorClient, MirrorResponse};
use nsite_cache::{CacheFabric, CacheSettings};
use nsite_relay::MemoryRelays;
use nsite_resolver::{DnsLookup, LookupError, NameDirectory, ProfileConfig};
use nsite_types::{
    EventBuilder, Pubkey, RELAY_LIST_KIND, SERVER_LIST_KIND, SITE_KIND, Sha256Hash, SignedEvent,
    derive_pubkey, unix_now,
};

use crate::gateway::{Gateway, GatewayConfig, GatewayParts};

pub const ALICE: [u8; 32] = [0xa1; 32];
pub const LOOKUP: &str = "wss://lookup.test/";
pub const OUTBOX: &str = "wss://outbox.test/";
pub const MIRROR: &str = "https://mirror.test/";
pub const BACKUP: &str = "https://backup.test/";

pub fn alice() -> Pubkey {
    derive_pubkey(&ALICE).unwrap()
}

pub fn site_event(path: &str, body: &[u8], created_at: u64) -> SignedEvent {
    EventBuilder::new(SITE_KIND)
        .tag(["d", path])
        .tag(["x", Sha256Hash::digest(body).to_hex().as_str()])
        .created_at(created_at)
        .sign(&ALICE)
        .unwrap()
}

/// Hosts that never resolve through DNS or name directories.
pub struct NoNames;

#[async_trait]
impl DnsLookup for NoNames {
    async fn resolve_cname(&self, host: &str) -> Result<Vec<String>, LookupError> {
        Err(LookupError::InvalidAddress(format!("no cname for {host}")))
    }

    async fn resolve_txt(&self, host: &str) -> Result<Vec<Vec<String>>, LookupError> {
        Err(LookupError::InvalidAddress(format!("no txt for {host}")))
    }
}

#[async_trait]
impl NameDirectory for NoNames {
    async fn query_profile(&self, _address: &str) -> Result<Option<Pubkey>, LookupError> {
        Ok(None)
    }
}

/// A blob held by a fake mirror, with the headers it is served with.
#[derive(Clone)]
struct StoredBlob {
    body: Bytes,
    headers: Vec<(&'static str, String)>,
}

/// Mirrors keyed by base URL, each holding blobs by hex hash.
#[derive(Default)]
pub struct FakeMirrors {
    blobs: Mutex<HashMap<String, HashMap<String, StoredBlob>>>,
}

impl FakeMirrors {
    pub fn put(&self, mirror: &str, body: &[u8]) -> Sha256Hash {
        self.put_with_headers(mirror, body, &[])
    }

    pub fn put_with_headers(
        &self,
        mirror: &str,
        body: &[u8],
        headers: &[(&'static str, &str)],
    ) -> Sha256Hash {
        let hash = Sha256Hash::digest(body);
        let blob = StoredBlob {
            body: Bytes::copy_from_slice(body),
            headers: headers.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        };
        self.blobs
            .lock()
            .unwrap()
            .entry(mirror.to_string())
            .or_default()
            .insert(hash.to_hex(), blob);
        hash
    }

    fn find(&self, url: &url::Url) -> Option<StoredBlob> {
        let base = url.join("/").ok()?;
        let name = url.path().trim_start_matches('/');
        let blobs = self.blobs.lock().unwrap();
        blobs.get(base.as_str())?.get(name).cloned()
    }
}

#[async_trait]
impl MirrorClient for FakeMirrors {
    async fn probe(&self, url: &url::Url) -> Result<bool, BlobError> {
        Ok(self.find(url).is_some())
    }

    async fn get(&self, url: &url::Url) -> Result<MirrorResponse, BlobError> {
        let Some(blob) = self.find(url) else {
            return Ok(MirrorResponse {
                status: Some(StatusCode::NOT_FOUND),
                headers: HeaderMap::new(),
                body: futures::stream::empty().boxed(),
            });
        };
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from(blob.body.len()));
        for (name, value) in &blob.headers {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        let chunks: Vec<Result<Bytes, BlobError>> = vec![Ok(blob.body)];
        Ok(MirrorResponse {
            status: Some(StatusCode::OK),
            headers,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// A relay network and mirror set with Alice's profile published: her relay
/// list on the lookup relay pointing at her outbox, and her server list on
/// the outbox pointing at the mirror.
pub struct World {
    pub relays: Arc<MemoryRelays>,
    pub mirrors: Arc<FakeMirrors>,
    pub cache: CacheFabric,
}

impl World {
    pub fn new() -> Self {
        let relays = Arc::new(MemoryRelays::new());
        relays.add_relay(LOOKUP, &[]);
        relays.add_relay(OUTBOX, &[]);
        let now = unix_now();
        relays.store(
            LOOKUP,
            EventBuilder::new(RELAY_LIST_KIND)
                .tag(["r", OUTBOX])
                .created_at(now - 1000)
                .sign(&ALICE)
                .unwrap(),
        );
        relays.store(
            OUTBOX,
            EventBuilder::new(SERVER_LIST_KIND)
                .tag(["server", MIRROR])
                .created_at(now - 1000)
                .sign(&ALICE)
                .unwrap(),
        );
        Self {
            relays,
            mirrors: Arc::new(FakeMirrors::default()),
            cache: CacheFabric::in_memory(CacheSettings::default()),
        }
    }

    /// A bare world: no relay list, no server list.
    pub fn empty() -> Self {
        Self {
            relays: Arc::new(MemoryRelays::new()),
            mirrors: Arc::new(FakeMirrors::default()),
            cache: CacheFabric::in_memory(CacheSettings::default()),
        }
    }

    /// Publish a file: the record on the outbox, the bytes on the mirror.
    pub fn publish(&self, path: &str, body: &[u8], created_at: u64) -> Sha256Hash {
        self.relays.store(OUTBOX, site_event(path, body, created_at));
        self.mirrors.put(MIRROR, body)
    }

    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            profile: ProfileConfig {
                lookup_relays: vec![LOOKUP.to_string()],
                query_timeout: Duration::from_millis(500),
                ..ProfileConfig::default()
            },
            ..GatewayConfig::default()
        }
    }

    pub fn gateway(&self, config: GatewayConfig) -> Gateway {
        let names = Arc::new(NoNames);
        Gateway::new(
            config,
            GatewayParts {
                cache: self.cache.clone(),
                relays: self.relays.clone(),
                dns: names.clone(),
                directory: names,
                mirrors: self.mirrors.clone(),
            },
        )
    }
}

/// Host name that resolves to Alice without any lookup.
pub fn alice_host() -> String {
    format!("{}.nsite.test", alice().to_npub())
}
