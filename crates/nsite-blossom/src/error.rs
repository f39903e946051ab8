//! Error types for blob retrieval.

use std::time::Duration;

use nsite_types::Sha256Hash;

/// A single mirror attempt failed.
///
/// The fetcher logs these and moves on to the next mirror; only the body
/// stream surfaces them to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid mirror url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("mirror response has no status code")]
    MissingStatus,

    #[error("mirror returned status {0}")]
    Status(u16),

    #[error("blob too large: {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("mirror did not respond within {0:?}")]
    Timeout(Duration),

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: Sha256Hash,
        actual: Sha256Hash,
    },

    #[error("body stream: {0}")]
    Stream(String),

    #[error("invalid size {0:?}")]
    InvalidSize(String),
}
