//! Error types for name lookups.

use nsite_types::TypesError;

/// A DNS or name directory lookup failed.
///
/// The resolvers treat these as soft misses: they log them and move on to the
/// next strategy.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("dns: {0}")]
    Dns(#[from] hickory_resolver::ResolveError),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid name address: {0}")]
    InvalidAddress(String),

    #[error("invalid directory entry: {0}")]
    InvalidEntry(#[from] TypesError),
}
