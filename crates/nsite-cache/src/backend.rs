//! The storage trait every cache backend implements.

use std::time::Duration;

use crate::error::CacheError;

/// A namespaced key/value store with per-entry expiry.
///
/// Expiry is passive: an expired entry reads as absent and may be purged on
/// that read. Implementations must be safe to call concurrently from any task.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a live entry. Returns `None` if absent or expired.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write an entry, replacing any previous value. `None` never expires.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError>;
}
