//! WebSocket relay pool.
//!
//! Every operation opens its own connection per relay and fans the results
//! into one channel. Operations run under child tokens of the pool's shutdown
//! token, so [`RelayPool::shutdown`] stops all of them.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::BoxStream;
use nsite_types::{EventId, Filter, SignedEvent, unix_now};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{RelayConnection, info_url};
use crate::error::RelayError;
use crate::message::{ClientMessage, RelayMessage};
use crate::negentropy::{Item, Negentropy};
use crate::{RelayClient, Subscription};

/// Maximum ids requested in one `REQ` after reconciliation.
const IDS_PER_REQUEST: usize = 256;

/// Buffered events per operation before relay tasks wait on the consumer.
const CHANNEL_CAPACITY: usize = 256;

/// How far before a dropped subscription's disconnect the next one resumes.
pub(crate) const RESUME_OVERLAP: Duration = Duration::from_secs(60);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

fn next_subscription_id() -> String {
    format!("nsite-{}", NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
}

/// Timeouts and retry policy for [`RelayPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Time allowed to establish a WebSocket connection.
    pub connect_timeout: Duration,
    /// Time allowed to fetch a relay information document.
    pub info_timeout: Duration,
    /// Time allowed for a relay to acknowledge a published event.
    pub publish_timeout: Duration,
    /// First delay before reconnecting a dropped subscription.
    pub reconnect_delay: Duration,
    /// Upper bound of the reconnect backoff.
    pub max_reconnect_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            info_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize)]
struct RelayInformation {
    #[serde(default)]
    supported_nips: Vec<serde_json::Value>,
}

/// Relay client over WebSocket connections.
pub struct RelayPool {
    config: PoolConfig,
    http: reqwest::Client,
    /// relay url → advertised capability codes.
    capabilities: RwLock<HashMap<String, Vec<u16>>>,
    subscriptions: Mutex<Vec<CancellationToken>>,
    shutdown: CancellationToken,
}

impl RelayPool {
    pub fn new(config: PoolConfig) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(config.info_timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            capabilities: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Close every subscription and abort every in-flight operation.
    pub fn shutdown(&self) {
        let subs = std::mem::take(&mut *self.subscriptions.lock().expect("lock poisoned"));
        info!(subscriptions = subs.len(), "shutting down relay pool");
        for token in subs {
            token.cancel();
        }
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of subscriptions that are still open.
    pub fn active_subscriptions(&self) -> usize {
        let mut subs = self.subscriptions.lock().expect("lock poisoned");
        subs.retain(|t| !t.is_cancelled());
        subs.len()
    }

    /// Run `work` against each distinct relay and merge what they send.
    ///
    /// The stream ends when every relay task has finished; dropping it cancels
    /// `token`, which stops the tasks.
    fn fan_out<F, Fut>(
        &self,
        relays: &[String],
        token: CancellationToken,
        work: F,
    ) -> BoxStream<'static, SignedEvent>
    where
        F: Fn(String, mpsc::Sender<SignedEvent>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut seen = HashSet::new();
        for relay in relays.iter().filter(|r| seen.insert(r.as_str())) {
            let task = work(relay.clone(), tx.clone(), token.child_token());
            let relay = relay.clone();
            tokio::spawn(async move {
                if let Err(e) = task.await {
                    debug!(relay = %relay, error = %e, "relay operation failed");
                }
            });
        }
        drop(tx);

        let guard = token.drop_guard();
        futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|event| (event, (rx, guard)))
        })
        .boxed()
    }

    async fn fetch_capabilities(&self, relay: &str) -> Result<Vec<u16>, RelayError> {
        let url = info_url(relay)?;
        let info: RelayInformation = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/nostr+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info
            .supported_nips
            .iter()
            .filter_map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .filter_map(|n| u16::try_from(n).ok())
            .collect())
    }

    async fn publish_one(&self, relay: &str, event: &SignedEvent) -> Result<(), RelayError> {
        let mut conn = RelayConnection::open(relay, self.config.connect_timeout).await?;
        conn.send(&ClientMessage::Event(event.clone())).await?;

        let wait = await_ok(&mut conn, event.id);
        let timeout = self.config.publish_timeout;
        let result = tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(RelayError::Timeout(timeout)));
        conn.close().await;
        result
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait::async_trait]
impl RelayClient for RelayPool {
    async fn query(
        &self,
        relays: &[String],
        filter: &Filter,
        timeout: Duration,
    ) -> Vec<SignedEvent> {
        let connect_timeout = self.config.connect_timeout;
        let wire = filter.clone();
        let mut stream = self.fan_out(relays, self.shutdown.child_token(), move |relay, tx, token| {
            let filter = wire.clone();
            async move {
                let mut conn = RelayConnection::open(&relay, connect_timeout).await?;
                let result = stream_req(&mut conn, &filter, &tx, &token, false).await;
                conn.close().await;
                result
            }
        });

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!(relays = relays.len(), ?timeout, "query reached time cap");
                    break;
                }
                next = stream.next() => match next {
                    Some(event) => {
                        if seen.insert(event.id) {
                            events.push(event);
                        }
                    }
                    None => break,
                },
            }
        }
        events
    }

    async fn capabilities(&self, relay: &str) -> Vec<u16> {
        let known = self
            .capabilities
            .read()
            .expect("lock poisoned")
            .get(relay)
            .cloned();
        if let Some(known) = known {
            return known;
        }
        match self.fetch_capabilities(relay).await {
            Ok(nips) => {
                debug!(relay, ?nips, "fetched relay information");
                self.capabilities
                    .write()
                    .expect("lock poisoned")
                    .insert(relay.to_string(), nips.clone());
                nips
            }
            Err(e) => {
                debug!(relay, error = %e, "relay information unavailable");
                Vec::new()
            }
        }
    }

    fn sync(
        &self,
        relays: &[String],
        filter: &Filter,
        local: &[SignedEvent],
    ) -> BoxStream<'static, SignedEvent> {
        let items: Vec<Item> = local
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| Item {
                timestamp: e.created_at,
                id: *e.id.as_bytes(),
            })
            .collect();
        let connect_timeout = self.config.connect_timeout;
        let wire = filter.clone();
        self.fan_out(relays, self.shutdown.child_token(), move |relay, tx, token| {
            let filter = wire.clone();
            let negentropy = Negentropy::new(items.iter().copied());
            async move {
                let mut conn = RelayConnection::open(&relay, connect_timeout).await?;
                let result = sync_relay(&mut conn, &filter, &negentropy, &tx, &token).await;
                conn.close().await;
                result
            }
        })
    }

    fn subscribe(&self, relays: &[String], filter: &Filter) -> Subscription {
        let token = self.shutdown.child_token();
        self.subscriptions
            .lock()
            .expect("lock poisoned")
            .push(token.clone());

        let config = self.config.clone();
        let wire = filter.clone();
        let events = self.fan_out(relays, token.clone(), move |relay, tx, token| {
            live_subscription(relay, wire.clone(), tx, token, config.clone())
        });
        info!(relays = relays.len(), "opened subscription");
        Subscription::new(events, token)
    }

    async fn publish(
        &self,
        relays: &[String],
        event: &SignedEvent,
    ) -> Vec<(String, Result<(), RelayError>)> {
        let attempts = relays.iter().map(|relay| async move {
            let result = self.publish_one(relay, event).await;
            match &result {
                Ok(()) => trace!(relay = %relay, id = %event.id, "published"),
                Err(e) => debug!(relay = %relay, id = %event.id, error = %e, "publish failed"),
            }
            (relay.clone(), result)
        });
        futures::future::join_all(attempts).await
    }
}

/// Wait for the relay's verdict on a published event.
async fn await_ok(conn: &mut RelayConnection, id: EventId) -> Result<(), RelayError> {
    loop {
        match conn.recv().await? {
            Some(RelayMessage::Ok {
                event_id,
                accepted,
                message,
            }) if event_id == id => {
                return if accepted {
                    Ok(())
                } else {
                    Err(RelayError::Rejected(message))
                };
            }
            Some(RelayMessage::Notice(notice)) => {
                debug!(relay = %conn.url(), notice = %notice, "relay notice");
            }
            Some(_) => {}
            None => return Err(RelayError::ConnectionClosed),
        }
    }
}

/// Whether an event from a relay is authentic and was actually asked for.
fn accept(relay: &str, filter: &Filter, event: &SignedEvent) -> bool {
    if let Err(e) = event.verify() {
        debug!(relay, id = %event.id, error = %e, "dropping invalid event");
        return false;
    }
    if !filter.matches(event) {
        debug!(relay, id = %event.id, "dropping event outside filter");
        return false;
    }
    true
}

/// Issue a `REQ` and forward matching events.
///
/// Returns after `EOSE` unless `live`, in which case it keeps forwarding until
/// cancelled or the relay hangs up.
async fn stream_req(
    conn: &mut RelayConnection,
    filter: &Filter,
    tx: &mpsc::Sender<SignedEvent>,
    token: &CancellationToken,
    live: bool,
) -> Result<(), RelayError> {
    let subscription_id = next_subscription_id();
    conn.send(&ClientMessage::Req {
        subscription_id: subscription_id.clone(),
        filters: vec![filter.clone()],
    })
    .await?;

    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = conn.recv() => msg?,
        };
        match msg {
            None => return Err(RelayError::ConnectionClosed),
            Some(RelayMessage::Event {
                subscription_id: id,
                event,
            }) if id == subscription_id => {
                if accept(conn.url(), filter, &event) && tx.send(*event).await.is_err() {
                    // Consumer went away.
                    break;
                }
            }
            Some(RelayMessage::Eose(id)) if id == subscription_id => {
                trace!(relay = %conn.url(), "end of stored events");
                if !live {
                    break;
                }
            }
            Some(RelayMessage::Closed {
                subscription_id: id,
                message,
            }) if id == subscription_id => {
                return Err(RelayError::Closed {
                    subscription_id: id,
                    message,
                });
            }
            Some(RelayMessage::Notice(notice)) => {
                debug!(relay = %conn.url(), notice = %notice, "relay notice");
            }
            Some(_) => {}
        }
    }

    // Best effort; the connection is about to close anyway.
    let _ = conn.send(&ClientMessage::Close(subscription_id)).await;
    Ok(())
}

/// Reconcile with one relay, then fetch and forward the missing events.
async fn sync_relay(
    conn: &mut RelayConnection,
    filter: &Filter,
    negentropy: &Negentropy,
    tx: &mpsc::Sender<SignedEvent>,
    token: &CancellationToken,
) -> Result<(), RelayError> {
    let subscription_id = next_subscription_id();
    conn.send(&ClientMessage::NegOpen {
        subscription_id: subscription_id.clone(),
        filter: filter.clone(),
        message: hex::encode(negentropy.initiate()),
    })
    .await?;

    let mut need = Vec::new();
    let mut rounds = 0usize;
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            msg = conn.recv() => msg?,
        };
        match msg {
            None => return Err(RelayError::ConnectionClosed),
            Some(RelayMessage::NegMsg {
                subscription_id: id,
                message,
            }) if id == subscription_id => {
                rounds += 1;
                let bytes = hex::decode(&message)
                    .map_err(|e| RelayError::Protocol(format!("bad NEG-MSG hex: {e}")))?;
                match negentropy.reconcile(&bytes, &mut need)? {
                    Some(next) => {
                        conn.send(&ClientMessage::NegMsg {
                            subscription_id: subscription_id.clone(),
                            message: hex::encode(next),
                        })
                        .await?;
                    }
                    None => break,
                }
            }
            Some(RelayMessage::NegErr {
                subscription_id: id,
                message,
            }) if id == subscription_id => {
                return Err(RelayError::Closed {
                    subscription_id: id,
                    message,
                });
            }
            Some(RelayMessage::Notice(notice)) => {
                debug!(relay = %conn.url(), notice = %notice, "relay notice");
            }
            Some(_) => {}
        }
    }
    let _ = conn.send(&ClientMessage::NegClose(subscription_id)).await;

    debug!(
        relay = %conn.url(),
        local = negentropy.len(),
        missing = need.len(),
        rounds,
        "reconciled"
    );
    for chunk in need.chunks(IDS_PER_REQUEST) {
        let wanted = filter
            .clone()
            .ids(chunk.iter().map(|id| EventId::from(*id)));
        stream_req(conn, &wanted, tx, token, false).await?;
        if token.is_cancelled() || tx.is_closed() {
            break;
        }
    }
    Ok(())
}

/// Keep a subscription open on one relay, reconnecting with backoff.
///
/// After a drop the filter's `since` moves up to shortly before the
/// disconnect, so a reconnect does not replay what was already delivered.
async fn live_subscription(
    relay: String,
    mut filter: Filter,
    tx: mpsc::Sender<SignedEvent>,
    token: CancellationToken,
    config: PoolConfig,
) -> Result<(), RelayError> {
    let mut delay = config.reconnect_delay;
    loop {
        let started = Instant::now();
        let result = match RelayConnection::open(&relay, config.connect_timeout).await {
            Ok(mut conn) => {
                let result = stream_req(&mut conn, &filter, &tx, &token, true).await;
                conn.close().await;
                let resume = unix_now().saturating_sub(RESUME_OVERLAP.as_secs());
                if filter.since.is_none_or(|since| since < resume) {
                    filter = filter.since(resume);
                }
                result
            }
            Err(e) => Err(e),
        };

        if token.is_cancelled() || tx.is_closed() {
            return Ok(());
        }
        match result {
            Ok(()) => debug!(relay = %relay, "subscription ended, reconnecting"),
            Err(e) => warn!(relay = %relay, error = %e, ?delay, "subscription dropped, reconnecting"),
        }

        // A connection that stayed up for a while earns a fresh backoff.
        if started.elapsed() > config.max_reconnect_delay {
            delay = config.reconnect_delay;
        }
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(config.max_reconnect_delay);
    }
}
