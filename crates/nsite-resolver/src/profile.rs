//! Per-identity relay and mirror lists.

use std::sync::Arc;
use std::time::Duration;

use nsite_cache::{CacheFabric, SingleFlight};
use nsite_relay::RelayClient;
use nsite_types::{Filter, Pubkey, RELAY_LIST_KIND, SERVER_LIST_KIND, SignedEvent};
use tracing::{debug, info, warn};

use crate::QUERY_TIMEOUT;

/// Settings for [`ProfileResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    /// Relays that index relay lists.
    pub lookup_relays: Vec<String>,
    /// Relays that mirror previously seen events; queried alongside the lookup
    /// relays.
    pub cache_relays: Vec<String>,
    pub query_timeout: Duration,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            lookup_relays: Vec::new(),
            cache_relays: Vec::new(),
            query_timeout: QUERY_TIMEOUT,
        }
    }
}

/// Resolves an identity's outbox relays (kind 10002) and blob servers
/// (kind 10063).
pub struct ProfileResolver {
    cache: CacheFabric,
    client: Arc<dyn RelayClient>,
    config: ProfileConfig,
    outbox_flights: SingleFlight<Pubkey, Vec<String>>,
    server_flights: SingleFlight<Pubkey, Vec<String>>,
}

impl ProfileResolver {
    pub fn new(cache: CacheFabric, client: Arc<dyn RelayClient>, config: ProfileConfig) -> Self {
        Self {
            cache,
            client,
            config,
            outbox_flights: SingleFlight::new(),
            server_flights: SingleFlight::new(),
        }
    }

    /// Relays the identity publishes to. Empty when no relay list is found.
    pub async fn get_outboxes(&self, identity: &Pubkey) -> Vec<String> {
        let key = identity.to_hex();
        if let Some(cached) = self.cache.relays.lookup(&key).await {
            return cached;
        }

        let identity = *identity;
        let cache = self.cache.clone();
        let client = Arc::clone(&self.client);
        let relays = merge_relays(&self.config.lookup_relays, &self.config.cache_relays);
        let timeout = self.config.query_timeout;

        let result = self
            .outbox_flights
            .run(identity, move || async move {
                let filter = Filter::new().kind(RELAY_LIST_KIND).author(identity);
                let events = client.query(&relays, &filter, timeout).await;
                let Some(list) = newest(&events) else {
                    debug!(%identity, "no relay list found");
                    return Vec::new();
                };
                let outboxes = outboxes_from(list);
                info!(%identity, count = outboxes.len(), "found outboxes");
                cache.relays.store(&key, &outboxes).await;
                outboxes
            })
            .await;
        result.unwrap_or_else(|e| {
            warn!(%identity, error = %e, "outbox lookup failed");
            Vec::new()
        })
    }

    /// Blob servers the identity advertises on `relays`. Empty when no server
    /// list is found.
    pub async fn get_mirror_servers(&self, identity: &Pubkey, relays: &[String]) -> Vec<String> {
        let key = identity.to_hex();
        if let Some(cached) = self.cache.servers.lookup(&key).await {
            return cached;
        }

        let identity = *identity;
        let cache = self.cache.clone();
        let client = Arc::clone(&self.client);
        let relays = relays.to_vec();
        let timeout = self.config.query_timeout;

        let result = self
            .server_flights
            .run(identity, move || async move {
                let filter = Filter::new().kind(SERVER_LIST_KIND).author(identity);
                let events = client.query(&relays, &filter, timeout).await;
                let Some(list) = newest(&events) else {
                    debug!(%identity, "no server list found");
                    return Vec::new();
                };
                let servers = servers_from(list);
                info!(%identity, count = servers.len(), "found blob servers");
                cache.servers.store(&key, &servers).await;
                servers
            })
            .await;
        result.unwrap_or_else(|e| {
            warn!(%identity, error = %e, "server list lookup failed");
            Vec::new()
        })
    }
}

/// Concatenate relay lists, dropping duplicates and keeping first-seen order.
pub fn merge_relays(first: &[String], second: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(first.len() + second.len());
    for relay in first.iter().chain(second) {
        if !merged.contains(relay) {
            merged.push(relay.clone());
        }
    }
    merged
}

/// The newest replaceable event; ties go to the greater id.
fn newest(events: &[SignedEvent]) -> Option<&SignedEvent> {
    events
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Write relays of a relay list: `r` tags without a marker or marked `write`.
fn outboxes_from(event: &SignedEvent) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for values in event.tags_named("r") {
        let Some(relay) = values.first() else { continue };
        let writable = match values.get(1).map(String::as_str) {
            None | Some("") | Some("write") => true,
            Some(_) => false,
        };
        if !writable {
            continue;
        }
        let Ok(url) = url::Url::parse(relay.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "ws" | "wss") {
            continue;
        }
        let url = url.to_string();
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

/// Blob servers of a server list: `server` tags with an http(s) URL.
fn servers_from(event: &SignedEvent) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for values in event.tags_named("server") {
        let Some(Ok(url)) = values.first().map(|s| url::Url::parse(s.trim())) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let url = url.to_string();
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}
