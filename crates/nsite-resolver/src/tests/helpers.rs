//! Fakes and fixtures shared by the resolver tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use nsite_cache::{CacheFabric, CacheSettings};
use nsite_types::{EventBuilder, Pubkey, SITE_KIND, Sha256Hash, SignedEvent, derive_pubkey};

use crate::directory::NameDirectory;
use crate::dns::DnsLookup;
use crate::error::LookupError;

pub const ALICE: [u8; 32] = [0xa1; 32];
pub const RELAY: &str = "wss://relay.test/";
pub const SYNC_RELAY: &str = "wss://sync.test/";

pub fn alice() -> Pubkey {
    derive_pubkey(&ALICE).unwrap()
}

pub fn fabric() -> CacheFabric {
    CacheFabric::in_memory(CacheSettings::default())
}

/// A signed site record event whose hash is derived from `body`.
pub fn site_event(secret: &[u8; 32], path: &str, body: &str, created_at: u64) -> SignedEvent {
    EventBuilder::new(SITE_KIND)
        .tag(["d", path])
        .tag(["x", Sha256Hash::digest(body.as_bytes()).to_hex().as_str()])
        .created_at(created_at)
        .sign(secret)
        .unwrap()
}

/// DNS with canned answers. Unknown hosts fail like NXDOMAIN.
#[derive(Default)]
pub struct FakeDns {
    pub cnames: HashMap<String, Vec<String>>,
    pub txts: HashMap<String, Vec<Vec<String>>>,
    pub calls: AtomicUsize,
}

impl FakeDns {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsLookup for FakeDns {
    async fn resolve_cname(&self, host: &str) -> Result<Vec<String>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cnames
            .get(host)
            .cloned()
            .ok_or_else(|| LookupError::InvalidAddress(format!("no cname for {host}")))
    }

    async fn resolve_txt(&self, host: &str) -> Result<Vec<Vec<String>>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.txts
            .get(host)
            .cloned()
            .ok_or_else(|| LookupError::InvalidAddress(format!("no txt for {host}")))
    }
}

/// Name directory with canned entries, recording every queried address.
#[derive(Default)]
pub struct FakeDirectory {
    pub entries: HashMap<String, Pubkey>,
    pub queried: Mutex<Vec<String>>,
}

#[async_trait]
impl NameDirectory for FakeDirectory {
    async fn query_profile(&self, address: &str) -> Result<Option<Pubkey>, LookupError> {
        self.queried.lock().unwrap().push(address.to_string());
        Ok(self.entries.get(address).copied())
    }
}
