//! Typed views over one namespace of a backend.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// A namespace whose values are `V`, encoded with postcard.
pub struct CacheNamespace<V> {
    backend: Arc<dyn CacheBackend>,
    name: &'static str,
    ttl: Option<Duration>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for CacheNamespace<V> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            name: self.name,
            ttl: self.ttl,
            _value: PhantomData,
        }
    }
}

impl<V> fmt::Debug for CacheNamespace<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheNamespace")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V> CacheNamespace<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn new(backend: Arc<dyn CacheBackend>, name: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            backend,
            name,
            ttl,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        match self.backend.get(self.name, key).await? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store `value` with this namespace's TTL.
    pub async fn set(&self, key: &str, value: &V) -> Result<(), CacheError> {
        let bytes = postcard::to_allocvec(value)?;
        self.backend.set(self.name, key, bytes, self.ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.backend.delete(self.name, key).await
    }

    /// [`get`](Self::get), with failures logged and read as a miss.
    pub async fn lookup(&self, key: &str) -> Option<V> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(namespace = self.name, key, error = %e, "cache read failed");
                None
            }
        }
    }

    /// [`set`](Self::set), with failures logged.
    pub async fn store(&self, key: &str, value: &V) {
        if let Err(e) = self.set(key, value).await {
            warn!(namespace = self.name, key, error = %e, "cache write failed");
        }
    }

    /// [`delete`](Self::delete), with failures logged.
    pub async fn evict(&self, key: &str) {
        if let Err(e) = self.delete(key).await {
            warn!(namespace = self.name, key, error = %e, "cache delete failed");
        }
    }
}
