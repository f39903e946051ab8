//! Reactive cache busting.
//!
//! A single long-lived subscription watches the subscription relays for new
//! site records. Each one is merged into the identity's cached raw events, then
//! evicts the cached path record it replaces and the identity's record set, so
//! the next request rebuilds the set with the update in it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nsite_cache::{CacheFabric, path_key};
use nsite_relay::{RelayClient, Subscription};
use nsite_types::{Filter, SITE_KIND, SignedEvent, SiteRecord, unix_now};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How far back the subscription starts.
pub const LOOKBACK: Duration = Duration::from_secs(60 * 60);

/// Handle to the running listener.
pub struct InvalidationListener {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl InvalidationListener {
    /// Subscribe to `relays` and start evicting. With no relays there is
    /// nothing to watch and the listener is inert.
    pub fn spawn(cache: CacheFabric, client: Arc<dyn RelayClient>, relays: &[String]) -> Self {
        let token = CancellationToken::new();
        if relays.is_empty() {
            info!("no subscription relays, invalidation disabled");
            return Self { token, task: None };
        }

        let since = unix_now().saturating_sub(LOOKBACK.as_secs());
        let filter = Filter::new().kind(SITE_KIND).since(since);
        let subscription = client.subscribe(relays, &filter);
        info!(relays = relays.len(), since, "watching for site updates");

        let task = tokio::spawn(run(cache, subscription, token.clone()));
        Self {
            token,
            task: Some(task),
        }
    }

    /// Whether a subscription is running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the listener and close its subscription.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "invalidation listener task failed");
        }
    }
}

impl Drop for InvalidationListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(cache: CacheFabric, mut subscription: Subscription, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = subscription.next() => match event {
                Some(event) => evict(&cache, &event).await,
                None => {
                    warn!("invalidation subscription ended");
                    break;
                }
            },
        }
    }
    subscription.close();
    debug!("invalidation listener stopped");
}

/// Drop the cache entries `event` makes stale.
async fn evict(cache: &CacheFabric, event: &SignedEvent) {
    let Some(record) = SiteRecord::from_event(event) else {
        debug!(id = %event.id, "ignoring malformed site record");
        return;
    };
    let identity = record.identity;
    let key = identity.to_hex();

    // An incremental sync may not reach back far enough to see this event.
    if let Some(mut events) = cache.events.lookup(&key).await
        && !events.iter().any(|e| e.id == event.id)
    {
        events.push(event.clone());
        cache.events.store(&key, &events).await;
    }

    for path in request_paths(&record.path) {
        let entry = path_key(&identity, &path);
        if let Err(e) = cache.paths.delete(&entry).await {
            warn!(%identity, path = %path, error = %e, "failed to evict path");
        }
        if let Err(e) = cache.misses.delete(&entry).await {
            warn!(%identity, path = %path, error = %e, "failed to evict miss");
        }
    }
    if let Err(e) = cache.sites.delete(&key).await {
        warn!(%identity, error = %e, "failed to evict record set");
    }
    debug!(%identity, path = %record.path, "invalidated");
}

/// Request paths whose cached answer may be the record at `path`.
///
/// An `index.html` also answers for its directory, with and without the
/// trailing slash.
fn request_paths(path: &str) -> Vec<String> {
    let mut paths = vec![path.to_string()];
    if let Some(dir) = path.strip_suffix("index.html")
        && dir.ends_with('/')
    {
        paths.push(dir.to_string());
        if dir.len() > 1 {
            paths.push(dir.trim_end_matches('/').to_string());
        }
    }
    paths
}
