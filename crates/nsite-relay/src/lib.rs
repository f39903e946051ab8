//! Relay client for the nsite gateway.
//!
//! This crate talks to relays over WebSocket:
//!
//! - [`RelayClient`]: the operations the resolvers need (query, capability
//!   probe, incremental sync, live subscription, publish).
//! - [`RelayPool`]: the WebSocket implementation, with event verification,
//!   relay information lookup and negentropy sync.
//! - [`MemoryRelays`]: an in-process stand-in for the relay network.
//! - [`message`]: the JSON frames exchanged with relays.
//! - [`negentropy`]: range-based set reconciliation used by incremental sync.

mod connection;
mod error;
pub mod memory;
pub mod message;
pub mod negentropy;
mod pool;

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use futures::stream::BoxStream;
use nsite_types::{Filter, SignedEvent};
use tokio_util::sync::CancellationToken;

pub use error::RelayError;
pub use memory::{MemoryRelayStats, MemoryRelays};
pub use pool::{PoolConfig, RelayPool};

/// Relay information capability code for negentropy sync.
pub const NEGENTROPY_NIP: u16 = 77;

/// Trait abstracting the relay network operations used by the resolvers.
///
/// Individual relay failures are soft: they are logged by the implementation
/// and contribute nothing to the result.
#[async_trait::async_trait]
pub trait RelayClient: Send + Sync {
    /// Fetch stored events matching `filter` from every relay.
    ///
    /// Returns what arrived before every relay finished or `timeout` elapsed,
    /// deduplicated by event id.
    async fn query(&self, relays: &[String], filter: &Filter, timeout: Duration)
    -> Vec<SignedEvent>;

    /// Capability codes a relay advertises. Empty if unknown.
    async fn capabilities(&self, relay: &str) -> Vec<u16>;

    /// Reconcile `local` against each relay and stream the events we lack.
    ///
    /// The stream ends when every relay has finished. It carries no deadline;
    /// the consumer decides when to stop reading.
    fn sync(
        &self,
        relays: &[String],
        filter: &Filter,
        local: &[SignedEvent],
    ) -> BoxStream<'static, SignedEvent>;

    /// Open a live subscription across `relays`.
    fn subscribe(&self, relays: &[String], filter: &Filter) -> Subscription;

    /// Publish an event, returning the outcome per relay.
    async fn publish(
        &self,
        relays: &[String],
        event: &SignedEvent,
    ) -> Vec<(String, Result<(), RelayError>)>;
}

/// A live event stream. Dropping or closing it stops the underlying work.
pub struct Subscription {
    events: BoxStream<'static, SignedEvent>,
    token: CancellationToken,
}

impl Subscription {
    pub fn new(events: BoxStream<'static, SignedEvent>, token: CancellationToken) -> Self {
        Self { events, token }
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = SignedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
