//! Cache fabric for the nsite gateway.
//!
//! Resolution results live in independent namespaces of one pluggable
//! [`CacheBackend`], each with its own TTL:
//!
//! - [`MemoryBackend`]: process-local `RwLock<HashMap>`, the default.
//! - [`FjallBackend`]: persistent, survives restarts.
//!
//! [`CacheFabric`] bundles the typed namespaces the resolvers use, and
//! [`SingleFlight`] collapses concurrent resolutions of the same key.

mod backend;
mod error;
mod fabric;
mod fjall_backend;
mod memory;
mod namespace;
mod single_flight;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use fabric::{
    CacheFabric, CacheSettings, DEFAULT_MISS_TTL, DEFAULT_SYNC_RETENTION, DEFAULT_TTL,
    NamespaceTtls, open_backend, path_key,
};
pub use fjall_backend::FjallBackend;
pub use memory::MemoryBackend;
pub use namespace::CacheNamespace;
pub use single_flight::{FlightError, SingleFlight};
