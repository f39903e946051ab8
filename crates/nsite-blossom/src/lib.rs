//! Blob retrieval from blossom mirrors.
//!
//! - [`MirrorClient`]: HEAD/GET against a mirror, with the reqwest-backed
//!   [`HttpMirrorClient`].
//! - [`BlobFetcher`]: concurrent discovery of which mirrors hold a hash, then
//!   sequential retrieval from the verified ones.
//! - [`VerifiedBody`]: a body stream that enforces the size limit and checks
//!   the content hash as bytes pass through.

pub mod client;
mod error;
pub mod fetcher;
mod size;
pub mod verify;

use std::time::Duration;

pub use client::{ByteStream, HttpMirrorClient, MirrorClient, MirrorResponse};
pub use error::BlobError;
pub use fetcher::{BlobFetcher, BlobResponse, FetcherConfig, blob_urls};
pub use size::parse_size;
pub use verify::VerifiedBody;

/// Bound on a discovery probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on a retrieval attempt.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
