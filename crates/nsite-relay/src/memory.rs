//! An in-process [`RelayClient`] backed by per-relay event lists.
//!
//! `MemoryRelays` stands in for the relay network in tests and offline tools.
//! Relays are plain URLs with a list of stored events, advertised capability
//! codes and an online flag. Calls are counted so callers can assert how much
//! network work a code path caused, and an optional random latency can be
//! injected before queries.
//!
//! # Example
//!
//! ```ignore
//! let relays = MemoryRelays::new().latency(5, 20).seed(42);
//! relays.add_relay("wss://relay.example/", &[NEGENTROPY_NIP]);
//! relays.store("wss://relay.example/", event);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use nsite_types::{EventId, Filter, SignedEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::{RelayClient, RelayError, Subscription};

#[derive(Debug, Default)]
struct MemoryRelay {
    events: Vec<SignedEvent>,
    nips: Vec<u16>,
    offline: bool,
}

struct LiveSubscription {
    relays: Vec<String>,
    filter: Filter,
    tx: mpsc::UnboundedSender<SignedEvent>,
    token: CancellationToken,
}

/// Call counters of a [`MemoryRelays`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRelayStats {
    pub queries: usize,
    pub capability_checks: usize,
    pub syncs: usize,
    pub subscriptions: usize,
    pub publishes: usize,
}

/// In-memory relay network.
pub struct MemoryRelays {
    relays: Mutex<HashMap<String, MemoryRelay>>,
    live: Mutex<Vec<LiveSubscription>>,
    last_sync: Mutex<Option<(Filter, Vec<EventId>)>>,
    query_log: Mutex<Vec<Filter>>,
    latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    queries: AtomicUsize,
    capability_checks: AtomicUsize,
    syncs: AtomicUsize,
    subscriptions: AtomicUsize,
    publishes: AtomicUsize,
}

impl Default for MemoryRelays {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRelays {
    /// An empty network with no latency.
    pub fn new() -> Self {
        Self {
            relays: Mutex::new(HashMap::new()),
            live: Mutex::new(Vec::new()),
            last_sync: Mutex::new(None),
            query_log: Mutex::new(Vec::new()),
            latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            queries: AtomicUsize::new(0),
            capability_checks: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
        }
    }

    /// Delay every query by a uniform random duration in `[min, max]` ms.
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic latency.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Register a relay advertising `nips`. Replaces the capability list of
    /// an existing relay.
    pub fn add_relay(&self, url: &str, nips: &[u16]) {
        let mut relays = self.relays.lock().expect("lock poisoned");
        relays.entry(url.to_string()).or_default().nips = nips.to_vec();
    }

    /// Take a relay off (or back on) the network.
    pub fn set_offline(&self, url: &str, offline: bool) {
        let mut relays = self.relays.lock().expect("lock poisoned");
        relays.entry(url.to_string()).or_default().offline = offline;
    }

    /// Store an event on a relay without notifying subscribers.
    pub fn store(&self, url: &str, event: SignedEvent) {
        let mut relays = self.relays.lock().expect("lock poisoned");
        relays.entry(url.to_string()).or_default().events.push(event);
    }

    /// Store an event on a relay and deliver it to live subscriptions that
    /// include that relay.
    pub fn broadcast(&self, url: &str, event: SignedEvent) {
        self.store(url, event.clone());
        let mut live = self.live.lock().expect("lock poisoned");
        live.retain(|sub| !sub.token.is_cancelled() && !sub.tx.is_closed());
        for sub in live.iter() {
            if sub.relays.iter().any(|r| r == url) && sub.filter.matches(&event) {
                let _ = sub.tx.unbounded_send(event.clone());
            }
        }
    }

    /// Events stored on a relay.
    pub fn events(&self, url: &str) -> Vec<SignedEvent> {
        let relays = self.relays.lock().expect("lock poisoned");
        relays.get(url).map(|r| r.events.clone()).unwrap_or_default()
    }

    /// The filter and local ids of the most recent sync call.
    pub fn last_sync(&self) -> Option<(Filter, Vec<EventId>)> {
        self.last_sync.lock().expect("lock poisoned").clone()
    }

    /// Filters of every query, oldest first.
    pub fn query_log(&self) -> Vec<Filter> {
        self.query_log.lock().expect("lock poisoned").clone()
    }

    /// Subscriptions that are still open.
    pub fn open_subscriptions(&self) -> usize {
        let mut live = self.live.lock().expect("lock poisoned");
        live.retain(|sub| !sub.token.is_cancelled() && !sub.tx.is_closed());
        live.len()
    }

    pub fn stats(&self) -> MemoryRelayStats {
        MemoryRelayStats {
            queries: self.queries.load(Ordering::SeqCst),
            capability_checks: self.capability_checks.load(Ordering::SeqCst),
            syncs: self.syncs.load(Ordering::SeqCst),
            subscriptions: self.subscriptions.load(Ordering::SeqCst),
            publishes: self.publishes.load(Ordering::SeqCst),
        }
    }

    /// Verified events matching `filter` across the online `relays`,
    /// deduplicated by id.
    fn matching(&self, relays: &[String], filter: &Filter) -> Vec<SignedEvent> {
        let store = self.relays.lock().expect("lock poisoned");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for url in relays {
            let Some(relay) = store.get(url).filter(|r| !r.offline) else {
                continue;
            };
            for event in &relay.events {
                if filter.matches(event) && event.verify().is_ok() && seen.insert(event.id) {
                    out.push(event.clone());
                }
            }
        }
        out
    }

    fn pick_latency(&self) -> Duration {
        let (min, max) = self.latency_ms;
        if max == 0 {
            return Duration::ZERO;
        }
        let ms = if min == max {
            min
        } else {
            self.rng.lock().expect("lock poisoned").random_range(min..=max)
        };
        Duration::from_millis(ms)
    }
}

#[async_trait::async_trait]
impl RelayClient for MemoryRelays {
    async fn query(
        &self,
        relays: &[String],
        filter: &Filter,
        timeout: Duration,
    ) -> Vec<SignedEvent> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.query_log
            .lock()
            .expect("lock poisoned")
            .push(filter.clone());
        let delay = self.pick_latency();
        if delay >= timeout {
            tokio::time::sleep(timeout).await;
            return Vec::new();
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.matching(relays, filter)
    }

    async fn capabilities(&self, relay: &str) -> Vec<u16> {
        self.capability_checks.fetch_add(1, Ordering::SeqCst);
        let relays = self.relays.lock().expect("lock poisoned");
        relays
            .get(relay)
            .filter(|r| !r.offline)
            .map(|r| r.nips.clone())
            .unwrap_or_default()
    }

    fn sync(
        &self,
        relays: &[String],
        filter: &Filter,
        local: &[SignedEvent],
    ) -> BoxStream<'static, SignedEvent> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        let local_ids: HashSet<EventId> = local.iter().map(|e| e.id).collect();
        *self.last_sync.lock().expect("lock poisoned") =
            Some((filter.clone(), local_ids.iter().copied().collect()));
        let missing: Vec<SignedEvent> = self
            .matching(relays, filter)
            .into_iter()
            .filter(|e| !local_ids.contains(&e.id))
            .collect();
        futures::stream::iter(missing).boxed()
    }

    fn subscribe(&self, relays: &[String], filter: &Filter) -> Subscription {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded();
        let token = CancellationToken::new();
        self.live.lock().expect("lock poisoned").push(LiveSubscription {
            relays: relays.to_vec(),
            filter: filter.clone(),
            tx,
            token: token.clone(),
        });
        Subscription::new(rx.boxed(), token)
    }

    async fn publish(
        &self,
        relays: &[String],
        event: &SignedEvent,
    ) -> Vec<(String, Result<(), RelayError>)> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        let mut store = self.relays.lock().expect("lock poisoned");
        relays
            .iter()
            .map(|url| {
                let relay = store.entry(url.clone()).or_default();
                let result = if relay.offline {
                    Err(RelayError::ConnectionClosed)
                } else {
                    if !relay.events.iter().any(|e| e.id == event.id) {
                        relay.events.push(event.clone());
                    }
                    Ok(())
                };
                (url.clone(), result)
            })
            .collect()
    }
}
