//! Persistent cache backend wrapping a Fjall keyspace.
//!
//! All namespaces share one keyspace. The storage key is
//! `namespace ++ 0x00 ++ key`; the stored value is an 8-byte big-endian
//! expiry (unix milliseconds, `0` = never) followed by the payload.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tracing::{debug, trace};

use crate::backend::CacheBackend;
use crate::error::CacheError;

type Result<T> = std::result::Result<T, CacheError>;

const HEADER_LEN: usize = 8;

/// Cache backend that survives restarts.
pub struct FjallBackend {
    #[allow(dead_code)]
    db: Database,
    entries: Keyspace,
}

impl FjallBackend {
    /// Open (or create) a cache database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::builder(path).open()?;
        debug!(path = %path.display(), "opened fjall cache");
        Self::init(db)
    }

    /// Open a database that is deleted when dropped.
    pub fn open_temporary(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).temporary(true).open()?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        let entries = db.keyspace("cache", KeyspaceCreateOptions::default)?;
        Ok(Self { db, entries })
    }
}

fn storage_key(namespace: &str, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(namespace.len() + 1 + key.len());
    out.extend_from_slice(namespace.as_bytes());
    out.push(0);
    out.extend_from_slice(key.as_bytes());
    out
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn encode_value(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
    let expires_at = ttl.map_or(0, |ttl| now_millis().saturating_add(ttl.as_millis() as u64).max(1));
    let mut out = Vec::with_capacity(HEADER_LEN + value.len());
    out.extend_from_slice(&expires_at.to_be_bytes());
    out.extend_from_slice(value);
    out
}

#[async_trait::async_trait]
impl CacheBackend for FjallBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let skey = storage_key(namespace, key);
        let Some(raw) = self.entries.get(&skey)? else {
            return Ok(None);
        };
        if raw.len() < HEADER_LEN {
            return Err(CacheError::Corrupt {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        let expires_at = u64::from_be_bytes(header);
        if expires_at != 0 && expires_at <= now_millis() {
            self.entries.remove(skey.as_slice())?;
            trace!(namespace, key, "purged expired entry");
            return Ok(None);
        }
        Ok(Some(raw[HEADER_LEN..].to_vec()))
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let skey = storage_key(namespace, key);
        self.entries
            .insert(skey.as_slice(), encode_value(&value, ttl).as_slice())?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.entries.remove(storage_key(namespace, key).as_slice())?;
        Ok(())
    }
}
