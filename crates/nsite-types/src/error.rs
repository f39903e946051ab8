//! Error types for parsing identifiers and verifying events.

/// Errors produced while decoding identities, hashes and signed events.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A hex string did not decode to exactly 32 bytes.
    #[error("invalid {what} hex: {value:?}")]
    InvalidHex {
        /// Which identifier was being parsed.
        what: &'static str,
        /// The offending input.
        value: String,
    },

    /// A bech32 string failed to decode.
    #[error("invalid bech32: {0}")]
    Bech32(String),

    /// A bech32 string decoded but carried the wrong human-readable prefix.
    #[error("unexpected bech32 prefix: expected {expected}, found {found}")]
    WrongPrefix {
        /// The prefix we wanted (e.g. `npub`).
        expected: &'static str,
        /// The prefix that was present.
        found: String,
    },

    /// A decoded payload had the wrong length.
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    /// The event id does not match the hash of its serialized content.
    #[error("event id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch {
        /// Id carried by the event.
        claimed: String,
        /// Id computed from the event fields.
        computed: String,
    },

    /// The Schnorr signature did not verify against the event author.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
