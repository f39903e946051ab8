//! Keyed deduplication of concurrent async work.
//!
//! The first caller for a key spawns the work; callers arriving while it runs
//! await the same result. The key is released when the work finishes, so the
//! next call after that starts a fresh execution.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

/// The shared work did not produce a value (it panicked or was aborted).
#[derive(Debug, Clone, thiserror::Error)]
#[error("in-flight task failed: {0}")]
pub struct FlightError(String);

type Flight<V> = Shared<BoxFuture<'static, Result<V, FlightError>>>;
type FlightMap<K, V> = Arc<Mutex<HashMap<K, Flight<V>>>>;

/// Deduplicates concurrent calls that share a key.
pub struct SingleFlight<K, V> {
    inflight: FlightMap<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or join the execution already in flight.
    ///
    /// `work` is only called when no execution is in flight. It runs on its own
    /// task, so dropping every caller does not cancel it.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let flight = {
            let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match map.get(&key) {
                Some(flight) => flight.clone(),
                None => {
                    let release = Release {
                        map: Arc::clone(&self.inflight),
                        key: key.clone(),
                    };
                    let fut = work();
                    let handle = tokio::spawn(async move {
                        let _release = release;
                        fut.await
                    });
                    let flight = async move {
                        handle.await.map_err(|e| FlightError(e.to_string()))
                    }
                    .boxed()
                    .shared();
                    map.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Removes the key when the spawned work ends, including by panic.
struct Release<K: Eq + Hash, V> {
    map: FlightMap<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for Release<K, V> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
