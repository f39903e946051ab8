//! Site metadata: which content hash serves which path.
//!
//! The full record set of an identity is synchronized from its relays once per
//! cache TTL. Relays that advertise negentropy support get a differential sync
//! seeded with the raw events kept from the previous run; the others get a
//! plain query. Individual paths are then answered from that set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use nsite_cache::{CacheFabric, SingleFlight, path_key};
use nsite_relay::{NEGENTROPY_NIP, RelayClient};
use nsite_types::{
    EventId, Filter, Pubkey, RecordSet, SITE_KIND, SignedEvent, SiteRecord, search_paths, unix_now,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{QUERY_TIMEOUT, SYNC_CAP, SYNC_IDLE, SYNC_OVERLAP};

/// Settings for [`MetadataResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Relays that receive every newly fetched site event.
    pub cache_relays: Vec<String>,
    /// Cap on plain queries.
    pub query_timeout: Duration,
    /// A differential sync ends once no event arrived for this long.
    pub sync_idle: Duration,
    /// Hard cap on a differential sync.
    pub sync_cap: Duration,
    /// Reach-back of the next incremental sync before this one's start.
    pub sync_overlap: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            cache_relays: Vec::new(),
            query_timeout: QUERY_TIMEOUT,
            sync_idle: SYNC_IDLE,
            sync_cap: SYNC_CAP,
            sync_overlap: SYNC_OVERLAP,
        }
    }
}

/// Resolves identities and paths to site records.
pub struct MetadataResolver {
    cache: CacheFabric,
    client: Arc<dyn RelayClient>,
    config: MetadataConfig,
    flights: SingleFlight<Pubkey, RecordSet>,
    lookups: SingleFlight<String, Option<SiteRecord>>,
}

impl MetadataResolver {
    pub fn new(cache: CacheFabric, client: Arc<dyn RelayClient>, config: MetadataConfig) -> Self {
        Self {
            cache,
            client,
            config,
            flights: SingleFlight::new(),
            lookups: SingleFlight::new(),
        }
    }

    /// Record for `path`, or for `<path>/index.html` when `path` has no
    /// extension. The newest matching record wins.
    pub async fn get_descriptor(
        &self,
        identity: &Pubkey,
        path: &str,
        relays: &[String],
    ) -> Option<SiteRecord> {
        let candidates = search_paths(path);
        let key = path_key(identity, &candidates[0]);
        if let Some(cached) = self.cache.paths.lookup(&key).await {
            return Some(cached);
        }

        let set = self.get_record_set(identity, relays).await;
        let found = match set.select(&candidates) {
            Some(record) => Some(record.clone()),
            None => self.lookup_missing(identity, &key, &candidates, relays).await,
        };
        match &found {
            Some(record) => {
                debug!(%identity, path, resolved = %record.path, hash = %record.content_hash, "found descriptor");
                self.cache.paths.store(&key, record).await;
            }
            None => debug!(%identity, path, records = set.len(), "no descriptor"),
        }
        found
    }

    /// Ask `relays` directly for a path the record set lacks.
    ///
    /// Covers relays that cap how many events a full sync returns. Misses are
    /// remembered in `misses`, and concurrent lookups of one key share a query.
    async fn lookup_missing(
        &self,
        identity: &Pubkey,
        key: &str,
        candidates: &[String],
        relays: &[String],
    ) -> Option<SiteRecord> {
        if self.cache.misses.lookup(key).await.is_some() {
            debug!(%identity, key, "remembered miss");
            return None;
        }

        let client = Arc::clone(&self.client);
        let timeout = self.config.query_timeout;
        let identity = *identity;
        let candidates = candidates.to_vec();
        let relays = relays.to_vec();
        let query = move || query_descriptor(client, timeout, identity, candidates, relays);
        let found = match self.lookups.run(key.to_string(), query).await {
            Ok(found) => found,
            Err(e) => {
                warn!(%identity, key, error = %e, "direct lookup failed");
                None
            }
        };
        if found.is_none() {
            self.cache.misses.store(key, &unix_now()).await;
        }
        found
    }

    /// All records of `identity`, synchronized from `relays` unless a cached
    /// set is still fresh.
    ///
    /// Concurrent calls for one identity share a single synchronization.
    pub async fn get_record_set(&self, identity: &Pubkey, relays: &[String]) -> RecordSet {
        let key = identity.to_hex();
        if let Some(cached) = self.cache.sites.lookup(&key).await {
            return cached;
        }

        let sync = Synchronizer {
            cache: self.cache.clone(),
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            identity: *identity,
            relays: relays.to_vec(),
        };
        match self.flights.run(*identity, move || sync.run()).await {
            Ok(set) => set,
            Err(e) => {
                warn!(%identity, error = %e, "record set sync failed");
                RecordSet::empty(*identity, unix_now())
            }
        }
    }
}

/// One synchronization of one identity's record set.
struct Synchronizer {
    cache: CacheFabric,
    client: Arc<dyn RelayClient>,
    config: MetadataConfig,
    identity: Pubkey,
    relays: Vec<String>,
}

impl Synchronizer {
    async fn run(self) -> RecordSet {
        let identity = self.identity;
        let key = identity.to_hex();
        let resume_from = unix_now().saturating_sub(self.config.sync_overlap.as_secs());

        let cached_events = self.cache.events.lookup(&key).await;
        let last_sync = self.cache.synced.lookup(&key).await;
        let since = match (&cached_events, last_sync) {
            (Some(_), Some(ts)) => Some(ts),
            _ => None,
        };

        let mut store: HashMap<EventId, SignedEvent> = cached_events
            .unwrap_or_default()
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        let seeded = store.len();

        let mut filter = Filter::new().kind(SITE_KIND).author(identity);
        if let Some(since) = since {
            filter = filter.since(since);
        }

        let (sync_relays, query_relays) = self.partition_relays().await;
        info!(
            %identity,
            incremental = since.is_some(),
            negentropy = sync_relays.len(),
            direct = query_relays.len(),
            cached = seeded,
            "syncing site"
        );

        let local: Vec<SignedEvent> = store.values().cloned().collect();
        let synced = async {
            if sync_relays.is_empty() {
                return Vec::new();
            }
            let stream = self.client.sync(&sync_relays, &filter, &local);
            collect_window(stream, self.config.sync_idle, self.config.sync_cap).await
        };
        let queried = async {
            if query_relays.is_empty() {
                return Vec::new();
            }
            self.client
                .query(&query_relays, &filter, self.config.query_timeout)
                .await
        };
        let (synced, queried) = tokio::join!(synced, queried);
        debug!(
            %identity,
            synced = synced.len(),
            queried = queried.len(),
            "fetched site events"
        );

        let mut fresh: Vec<SignedEvent> = Vec::new();
        for event in synced.into_iter().chain(queried) {
            if event.pubkey != identity || event.kind != SITE_KIND {
                continue;
            }
            if !store.contains_key(&event.id) {
                fresh.push(event.clone());
                store.insert(event.id, event);
            }
        }

        let now = unix_now();
        let events: Vec<SignedEvent> = store.into_values().collect();
        let set = RecordSet::from_records(
            identity,
            events.iter().filter_map(SiteRecord::from_event),
            now,
        );
        info!(
            %identity,
            new = fresh.len(),
            events = events.len(),
            paths = set.len(),
            "site synced"
        );

        self.cache.events.store(&key, &events).await;
        self.cache.synced.store(&key, &resume_from).await;
        self.cache.sites.store(&key, &set).await;

        if !fresh.is_empty() && !self.config.cache_relays.is_empty() {
            persist_to_cache_relays(Arc::clone(&self.client), self.config.cache_relays, fresh);
        }
        set
    }

    /// Split relays into negentropy-capable and plain ones.
    async fn partition_relays(&self) -> (Vec<String>, Vec<String>) {
        let checks = self.relays.iter().map(|relay| async move {
            let caps = self.client.capabilities(relay).await;
            (relay.clone(), caps.contains(&NEGENTROPY_NIP))
        });
        let mut sync_relays = Vec::new();
        let mut query_relays = Vec::new();
        for (relay, negentropy) in futures::future::join_all(checks).await {
            if negentropy {
                sync_relays.push(relay);
            } else {
                query_relays.push(relay);
            }
        }
        (sync_relays, query_relays)
    }
}

/// Query `relays` for the candidate paths by `d` tag.
///
/// `/` is never sent as a tag value because some relays reject it.
async fn query_descriptor(
    client: Arc<dyn RelayClient>,
    timeout: Duration,
    identity: Pubkey,
    candidates: Vec<String>,
    relays: Vec<String>,
) -> Option<SiteRecord> {
    let tags: Vec<&String> = candidates.iter().filter(|p| p.as_str() != "/").collect();
    if tags.is_empty() || relays.is_empty() {
        return None;
    }
    let filter = Filter::new()
        .kind(SITE_KIND)
        .author(identity)
        .d_tags(tags.into_iter().cloned());
    let events = client.query(&relays, &filter, timeout).await;
    let set = RecordSet::from_records(
        identity,
        events.iter().filter_map(SiteRecord::from_event),
        unix_now(),
    );
    set.select(&candidates).cloned()
}

/// Drain `stream` until it ends, `cap` elapses, or `idle` passes without a new
/// event. The idle timer only starts with the first event.
pub(crate) async fn collect_window(
    mut stream: BoxStream<'static, SignedEvent>,
    idle: Duration,
    cap: Duration,
) -> Vec<SignedEvent> {
    let hard_stop = tokio::time::sleep(cap);
    tokio::pin!(hard_stop);
    let mut idle_deadline: Option<Instant> = None;
    let mut out = Vec::new();

    loop {
        let idle_timer = async {
            match idle_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = &mut hard_stop => {
                debug!(count = out.len(), "sync window hit hard cap");
                break;
            }
            _ = idle_timer => break,
            next = stream.next() => match next {
                Some(event) => {
                    out.push(event);
                    idle_deadline = Some(Instant::now() + idle);
                }
                None => break,
            },
        }
    }
    out
}

fn persist_to_cache_relays(client: Arc<dyn RelayClient>, relays: Vec<String>, events: Vec<SignedEvent>) {
    tokio::spawn(async move {
        let count = events.len();
        for event in &events {
            for (relay, result) in client.publish(&relays, event).await {
                if let Err(e) = result {
                    debug!(relay = %relay, id = %event.id, error = %e, "cache relay publish failed");
                }
            }
        }
        debug!(count, relays = relays.len(), "persisted events to cache relays");
    });
}
