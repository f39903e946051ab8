//! Shared test harness for nsite integration tests.
//!
//! Everything runs in-process over real sockets:
//!
//! - [`LocalRelay`]: a WebSocket relay that stores events, answers `REQ`
//!   with stored events and `EOSE`, and keeps subscriptions live.
//! - [`LocalMirror`]: a blob server answering `HEAD`/`GET /<sha256>`.
//! - [`LocalDirectory`]: a `/.well-known/nostr.json` name directory.
//! - [`TestGateway`]: the full gateway (relay pool, HTTP mirror client,
//!   invalidation listener and HTTP server) bound to an ephemeral port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use nsite_blossom::{FetcherConfig, HttpMirrorClient};
use nsite_cache::{CacheFabric, CacheSettings};
use nsite_engine::{Gateway, GatewayConfig, GatewayParts, InvalidationListener};
use nsite_http::{GatewayServer, GatewayServerConfig};
use nsite_relay::message::{ClientMessage, RelayMessage};
use nsite_relay::{PoolConfig, RelayPool};
use nsite_resolver::{
    DnsLookup, LookupError, MetadataConfig, Nip05Directory, ProfileConfig,
};
use nsite_types::{
    EventBuilder, Filter, Pubkey, RELAY_LIST_KIND, SERVER_LIST_KIND, SITE_KIND, Sha256Hash,
    SignedEvent, derive_pubkey,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Bound on every relay query the gateway makes in tests.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

// =========================================================================
// Relay
// =========================================================================

#[derive(Default)]
struct RelayState {
    events: Mutex<Vec<SignedEvent>>,
    reqs: AtomicUsize,
    /// Live subscriptions not scoped to any author.
    watchers: AtomicUsize,
}

/// In-process WebSocket relay.
pub struct LocalRelay {
    addr: SocketAddr,
    state: Arc<RelayState>,
    feed: broadcast::Sender<SignedEvent>,
    shutdown: CancellationToken,
}

impl LocalRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::default());
        let (feed, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let accept_state = Arc::clone(&state);
        let accept_feed = feed.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(handle_connection(
                            stream,
                            Arc::clone(&accept_state),
                            accept_feed.clone(),
                            token.clone(),
                        ));
                    }
                }
            }
        });
        Self {
            addr,
            state,
            feed,
            shutdown,
        }
    }

    /// The relay URL in the normalized form relay lists produce.
    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Store an event without notifying live subscriptions.
    pub fn store(&self, event: SignedEvent) {
        self.state.events.lock().unwrap().push(event);
    }

    /// Store an event and deliver it to matching live subscriptions.
    pub fn broadcast(&self, event: SignedEvent) {
        self.store(event.clone());
        let _ = self.feed.send(event);
    }

    /// `REQ` frames received so far.
    pub fn reqs(&self) -> usize {
        self.state.reqs.load(Ordering::SeqCst)
    }

    /// Open subscriptions that watch every author.
    pub fn watchers(&self) -> usize {
        self.state.watchers.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` author-less subscriptions are open.
    pub async fn wait_for_watchers(&self, n: usize) {
        wait_until(Duration::from_secs(5), || self.watchers() >= n).await;
    }

    /// Stop accepting connections and drop every open one.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for LocalRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RelayState>,
    feed: broadcast::Sender<SignedEvent>,
    shutdown: CancellationToken,
) {
    if !is_websocket_upgrade(&stream).await {
        serve_information(stream).await;
        return;
    }
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();
    let mut live: HashMap<String, Filter> = HashMap::new();
    let mut feed_rx = feed.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(msg) = ClientMessage::from_json(&text) else {
                    continue;
                };
                for reply in respond(msg, &state, &feed, &mut live) {
                    if write.send(Message::Text(reply.to_json().into())).await.is_err() {
                        break;
                    }
                }
            }
            event = feed_rx.recv() => {
                let Ok(event) = event else { continue };
                for (id, filter) in &live {
                    if filter.matches(&event) {
                        let frame = RelayMessage::Event {
                            subscription_id: id.clone(),
                            event: Box::new(event.clone()),
                        };
                        let _ = write.send(Message::Text(frame.to_json().into())).await;
                    }
                }
            }
        }
    }
    let watching = live.values().filter(|f| f.authors.is_none()).count();
    state.watchers.fetch_sub(watching, Ordering::SeqCst);
}

fn respond(
    msg: ClientMessage,
    state: &RelayState,
    feed: &broadcast::Sender<SignedEvent>,
    live: &mut HashMap<String, Filter>,
) -> Vec<RelayMessage> {
    match msg {
        ClientMessage::Req {
            subscription_id,
            filters,
        } => {
            state.reqs.fetch_add(1, Ordering::SeqCst);
            let filter = filters.into_iter().next().unwrap_or_default();
            let mut out: Vec<RelayMessage> = state
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| filter.matches(e))
                .map(|e| RelayMessage::Event {
                    subscription_id: subscription_id.clone(),
                    event: Box::new(e.clone()),
                })
                .collect();
            out.push(RelayMessage::Eose(subscription_id.clone()));
            let watching = filter.authors.is_none();
            if live.insert(subscription_id, filter).is_none() && watching {
                state.watchers.fetch_add(1, Ordering::SeqCst);
            }
            out
        }
        ClientMessage::Close(id) => {
            if let Some(filter) = live.remove(&id)
                && filter.authors.is_none()
            {
                state.watchers.fetch_sub(1, Ordering::SeqCst);
            }
            Vec::new()
        }
        ClientMessage::Event(event) => {
            state.events.lock().unwrap().push(event.clone());
            let _ = feed.send(event.clone());
            vec![RelayMessage::Ok {
                event_id: event.id,
                accepted: true,
                message: String::new(),
            }]
        }
        ClientMessage::NegOpen {
            subscription_id, ..
        } => vec![RelayMessage::NegErr {
            subscription_id,
            message: "error: negentropy not supported".into(),
        }],
        ClientMessage::NegMsg { .. } | ClientMessage::NegClose(_) => Vec::new(),
    }
}

async fn is_websocket_upgrade(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 4096];
    for _ in 0..50 {
        let n = stream.peek(&mut buf).await.unwrap_or(0);
        let head = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
        if head.contains("\r\n\r\n") || n == buf.len() {
            return head.contains("upgrade: websocket");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Relay information document advertising plain queries only.
async fn serve_information(mut stream: TcpStream) {
    let mut buf = [0u8; 4096];
    let _ = stream.read(&mut buf).await;
    let body = serde_json::json!({
        "name": "local relay",
        "supported_nips": [1, 11],
    })
    .to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/nostr+json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

// =========================================================================
// Mirror
// =========================================================================

#[derive(Default)]
struct MirrorState {
    /// hex sha256 → body served under that name.
    blobs: Mutex<HashMap<String, Bytes>>,
    delay: Mutex<Duration>,
    probes: AtomicUsize,
    gets: AtomicUsize,
}

/// In-process blob server.
pub struct LocalMirror {
    addr: SocketAddr,
    state: Arc<MirrorState>,
    shutdown: CancellationToken,
}

impl LocalMirror {
    pub async fn start() -> Self {
        let state = Arc::new(MirrorState::default());
        let router = Router::new()
            .route("/{name}", get(get_blob).head(head_blob))
            .with_state(Arc::clone(&state));
        let (addr, shutdown) = serve_router(router).await;
        Self {
            addr,
            state,
            shutdown,
        }
    }

    /// Base URL in the normalized form server lists produce.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Serve `body` under its own hash. Returns the hash.
    pub fn put(&self, body: &[u8]) -> Sha256Hash {
        let hash = Sha256Hash::digest(body);
        self.put_as(&hash, body);
        hash
    }

    /// Serve `body` under `hash`, whether or not it matches.
    pub fn put_as(&self, hash: &Sha256Hash, body: &[u8]) {
        self.state
            .blobs
            .lock()
            .unwrap()
            .insert(hash.to_hex(), Bytes::copy_from_slice(body));
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.state.gets.load(Ordering::SeqCst)
    }
}

impl Drop for LocalMirror {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MirrorState {
    async fn lookup(&self, name: &str) -> Option<Bytes> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let hash = name.split('.').next().unwrap_or(name);
        self.blobs.lock().unwrap().get(hash).cloned()
    }
}

async fn head_blob(State(state): State<Arc<MirrorState>>, Path(name): Path<String>) -> Response {
    state.probes.fetch_add(1, Ordering::SeqCst);
    match state.lookup(&name).await {
        Some(_) => ([(header::CONTENT_TYPE, "application/octet-stream")], ()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_blob(State(state): State<Arc<MirrorState>>, Path(name): Path<String>) -> Response {
    state.gets.fetch_add(1, Ordering::SeqCst);
    match state.lookup(&name).await {
        Some(body) => ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// =========================================================================
// Name directory
// =========================================================================

/// In-process `nostr.json` directory.
pub struct LocalDirectory {
    addr: SocketAddr,
    names: Arc<Mutex<HashMap<String, String>>>,
    shutdown: CancellationToken,
}

impl LocalDirectory {
    pub async fn start() -> Self {
        let names = Arc::new(Mutex::new(HashMap::new()));
        let router = Router::new()
            .route("/.well-known/nostr.json", get(nostr_json))
            .with_state(Arc::clone(&names));
        let (addr, shutdown) = serve_router(router).await;
        Self {
            addr,
            names,
            shutdown,
        }
    }

    /// The directory domain, as used in `name@domain` addresses.
    pub fn domain(&self) -> String {
        self.addr.to_string()
    }

    pub fn register(&self, name: &str, identity: &Pubkey) {
        self.names
            .lock()
            .unwrap()
            .insert(name.to_string(), identity.to_hex());
    }
}

impl Drop for LocalDirectory {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn nostr_json(State(names): State<Arc<Mutex<HashMap<String, String>>>>) -> Response {
    let names = names.lock().unwrap().clone();
    (
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "names": names }).to_string(),
    )
        .into_response()
}

async fn serve_router(router: Router) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
    });
    (addr, shutdown)
}

// =========================================================================
// Publisher
// =========================================================================

/// Signs the events that make up a site.
pub struct Publisher {
    secret: [u8; 32],
    pub identity: Pubkey,
}

impl Publisher {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            secret,
            identity: derive_pubkey(&secret).unwrap(),
        }
    }

    /// Hostname that carries the identity in its leftmost label.
    pub fn host(&self) -> String {
        format!("{}.nsite.test", self.identity.to_npub())
    }

    /// Relay list announcing `relays` as outboxes.
    pub fn relay_list(&self, relays: &[String]) -> SignedEvent {
        let mut builder = EventBuilder::new(RELAY_LIST_KIND);
        for relay in relays {
            builder = builder.tag(["r", relay.as_str()]);
        }
        builder.sign(&self.secret).unwrap()
    }

    /// Server list announcing `servers` as blob mirrors.
    pub fn server_list(&self, servers: &[String]) -> SignedEvent {
        let mut builder = EventBuilder::new(SERVER_LIST_KIND);
        for server in servers {
            builder = builder.tag(["server", server.as_str()]);
        }
        builder.sign(&self.secret).unwrap()
    }

    /// Site record mapping `path` to the hash of `body`.
    pub fn file(&self, path: &str, body: &[u8], created_at: u64) -> SignedEvent {
        EventBuilder::new(SITE_KIND)
            .tag(["d", path])
            .tag(["x", Sha256Hash::digest(body).to_hex().as_str()])
            .created_at(created_at)
            .sign(&self.secret)
            .unwrap()
    }
}

// =========================================================================
// Gateway
// =========================================================================

/// DNS that knows no names, so hostnames fall through to the directories.
pub struct NoDns;

#[async_trait]
impl DnsLookup for NoDns {
    async fn resolve_cname(&self, _host: &str) -> Result<Vec<String>, LookupError> {
        Ok(Vec::new())
    }

    async fn resolve_txt(&self, _host: &str) -> Result<Vec<Vec<String>>, LookupError> {
        Ok(Vec::new())
    }
}

/// Gateway configuration with short timeouts, looking profiles up on
/// `lookup`.
pub fn gateway_config(lookup: &LocalRelay) -> GatewayConfig {
    GatewayConfig {
        profile: ProfileConfig {
            lookup_relays: vec![lookup.url()],
            query_timeout: QUERY_TIMEOUT,
            ..ProfileConfig::default()
        },
        metadata: MetadataConfig {
            query_timeout: QUERY_TIMEOUT,
            ..MetadataConfig::default()
        },
        fetcher: FetcherConfig {
            probe_timeout: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(2),
            ..FetcherConfig::default()
        },
        ..GatewayConfig::default()
    }
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    addr: SocketAddr,
    pub gateway: Arc<Gateway>,
    pub pool: Arc<RelayPool>,
    pub cache: CacheFabric,
    http: reqwest::Client,
    listener: Option<InvalidationListener>,
    shutdown: CancellationToken,
}

impl TestGateway {
    /// Start a gateway over an in-memory cache.
    pub async fn start(config: GatewayConfig) -> Self {
        Self::start_with_cache(config, CacheFabric::in_memory(CacheSettings::default())).await
    }

    pub async fn start_with_cache(config: GatewayConfig, cache: CacheFabric) -> Self {
        let pool = Arc::new(
            RelayPool::new(PoolConfig {
                connect_timeout: Duration::from_secs(2),
                info_timeout: Duration::from_secs(2),
                publish_timeout: Duration::from_secs(2),
                reconnect_delay: Duration::from_millis(50),
                max_reconnect_delay: Duration::from_millis(200),
            })
            .unwrap(),
        );
        let directory = Nip05Directory::new(QUERY_TIMEOUT).unwrap().insecure();
        let subscription_relays = config.subscription_relays.clone();

        let gateway = Arc::new(Gateway::new(
            config,
            GatewayParts {
                cache: cache.clone(),
                relays: pool.clone(),
                dns: Arc::new(NoDns),
                directory: Arc::new(directory),
                mirrors: Arc::new(HttpMirrorClient::new().unwrap()),
            },
        ));
        let listener = InvalidationListener::spawn(cache.clone(), pool.clone(), &subscription_relays);

        let router = GatewayServer::new(GatewayServerConfig {
            gateway: Arc::clone(&gateway),
        })
        .into_router();
        let (addr, shutdown) = serve_router(router).await;

        Self {
            addr,
            gateway,
            pool,
            cache,
            http: reqwest::Client::new(),
            listener: Some(listener),
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// `GET path` with the given `Host` header.
    pub async fn get(&self, host: &str, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, host, path).await
    }

    pub async fn request(&self, method: reqwest::Method, host: &str, path: &str) -> reqwest::Response {
        self.http
            .request(method, self.url(path))
            .header(header::HOST, host)
            .send()
            .await
            .unwrap()
    }

    /// `GET` and read the whole body. Panics if the body does not arrive
    /// intact.
    pub async fn fetch(&self, host: &str, path: &str) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.get(host, path).await;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.unwrap();
        (status, headers, body)
    }

    pub fn listener_active(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.is_active())
    }

    /// Stop the server, the listener and the relay pool.
    pub async fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }
        self.pool.shutdown();
        self.shutdown.cancel();
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.pool.shutdown();
        self.shutdown.cancel();
    }
}

/// Poll `condition` every 20ms until it holds. Panics after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let started = tokio::time::Instant::now();
    while !condition() {
        assert!(
            started.elapsed() < limit,
            "condition not met within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A lookup relay, an outbox relay and a mirror, with `publisher`'s relay
/// list and server list already in place.
pub struct Network {
    pub lookup: LocalRelay,
    pub outbox: LocalRelay,
    pub mirror: LocalMirror,
    pub publisher: Publisher,
}

impl Network {
    pub async fn start() -> Self {
        let lookup = LocalRelay::start().await;
        let outbox = LocalRelay::start().await;
        let mirror = LocalMirror::start().await;
        let publisher = Publisher::new([0x5e; 32]);

        lookup.store(publisher.relay_list(&[outbox.url()]));
        outbox.store(publisher.server_list(&[mirror.url()]));
        Self {
            lookup,
            outbox,
            mirror,
            publisher,
        }
    }

    /// Upload `body` to the mirror and publish its record for `path`.
    pub fn publish(&self, path: &str, body: &[u8], created_at: u64) {
        self.mirror.put(body);
        self.outbox.store(self.publisher.file(path, body, created_at));
    }

    pub fn config(&self) -> GatewayConfig {
        gateway_config(&self.lookup)
    }
}
