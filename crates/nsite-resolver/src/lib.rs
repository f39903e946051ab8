//! Resolution stages of the nsite gateway.
//!
//! - [`IdentityResolver`]: request hostname → identity, via the hostname itself,
//!   DNS (CNAME then TXT) and name directories.
//! - [`ProfileResolver`]: identity → outbox relays and blob servers.
//! - [`MetadataResolver`]: identity + path → site record, backed by a cached,
//!   incrementally synchronized record set.
//!
//! Every resolver is infallible: network failures are logged and treated as
//! "nothing found". Results go through the shared [`nsite_cache::CacheFabric`].

pub mod directory;
pub mod dns;
mod error;
pub mod identity;
pub mod metadata;
pub mod profile;

use std::time::Duration;

pub use directory::{NameDirectory, Nip05Directory};
pub use dns::{DnsLookup, HickoryDns};
pub use error::LookupError;
pub use identity::{IdentityConfig, IdentityResolver, identity_from_hostname};
pub use metadata::{MetadataConfig, MetadataResolver};
pub use profile::{ProfileConfig, ProfileResolver, merge_relays};

/// Cap on a plain relay query.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Quiet period that ends a differential sync.
pub const SYNC_IDLE: Duration = Duration::from_millis(500);

/// Hard cap on a differential sync.
pub const SYNC_CAP: Duration = Duration::from_secs(5);

/// How far before a sync's start the next incremental sync reaches back.
///
/// Records are often signed a little before they reach a relay.
pub const SYNC_OVERLAP: Duration = Duration::from_secs(10 * 60);

#[cfg(test)]
mod tests;
