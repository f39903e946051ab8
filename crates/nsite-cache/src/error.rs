//! Error types for cache operations.

/// Errors returned by cache backends and typed namespaces.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A cached value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// A stored entry is shorter than its header.
    #[error("corrupt cache entry in {namespace}: {key}")]
    Corrupt {
        /// Namespace of the entry.
        namespace: String,
        /// Key of the entry.
        key: String,
    },

    /// The configured cache location names no known backend.
    #[error("unsupported cache location: {0}")]
    UnsupportedLocation(String),
}
