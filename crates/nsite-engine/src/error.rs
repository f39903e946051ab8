//! Error types for the request pipeline.

use nsite_types::{Pubkey, Sha256Hash, SITE_KIND};

/// Why a request could not be served.
///
/// The resolvers below the gateway never fail; these variants are the
/// absences they report, turned into request outcomes.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The hostname maps to no identity and no fallback applies.
    #[error("no site is published for host {host}")]
    NoIdentity { host: String },

    /// Neither the path nor `/404.html` has a record.
    #[error(
        "Not Found: no events found\npath: {path}\nkind: {kind}\npubkey: {identity}\nrelays: {}",
        .relays.join(", ")
    )]
    PathNotFound {
        path: String,
        kind: u16,
        identity: Pubkey,
        relays: Vec<String>,
    },

    /// No mirror produced the blob.
    #[error(
        "Failed to find blob\npath: {path}\nsha256: {hash}\nservers: {}",
        .mirrors.join(", ")
    )]
    BlobUnavailable {
        hash: Sha256Hash,
        path: String,
        mirrors: Vec<String>,
    },

    /// The identity has no outbox relays and none are configured.
    #[error("no relays found for {identity}")]
    NoRelays { identity: Pubkey },

    /// The identity lists no blob servers and none are configured.
    #[error("no blob servers found for {identity}")]
    NoMirrors { identity: Pubkey },
}

impl GatewayError {
    pub(crate) fn path_not_found(path: &str, identity: Pubkey, relays: Vec<String>) -> Self {
        Self::PathNotFound {
            path: path.to_string(),
            kind: SITE_KIND,
            identity,
            relays,
        }
    }

    /// HTTP status a front end should answer with.
    pub fn status(&self) -> http::StatusCode {
        match self {
            Self::NoIdentity { .. } | Self::PathNotFound { .. } => http::StatusCode::NOT_FOUND,
            Self::BlobUnavailable { .. } => http::StatusCode::BAD_GATEWAY,
            Self::NoRelays { .. } | Self::NoMirrors { .. } => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
