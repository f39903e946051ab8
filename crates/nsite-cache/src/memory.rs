//! In-memory cache backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::backend::CacheBackend;
use crate::error::CacheError;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local backend backed by a `RwLock<HashMap>`.
///
/// Contents are lost on restart. This is the default backend.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<(String, String), Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    #[cfg(test)]
    pub(crate) fn raw_len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let id = (namespace.to_string(), key.to_string());
        let now = Instant::now();
        {
            let map = self.entries.read().expect("lock poisoned");
            match map.get(&id) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: purge unless someone refreshed it in between.
        let mut map = self.entries.write().expect("lock poisoned");
        if map.get(&id).is_some_and(|e| !e.is_live(now)) {
            map.remove(&id);
            trace!(namespace, key, "purged expired entry");
        }
        Ok(None)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert((namespace.to_string(), key.to_string()), entry);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
