//! Shared types and identifiers for the nsite gateway.
//!
//! This crate defines the core vocabulary used across the workspace:
//! identifiers ([`Pubkey`], [`Sha256Hash`], [`EventId`]), the signed relay
//! event ([`SignedEvent`]) and its query [`Filter`], and the site model built
//! from those events ([`SiteRecord`], [`RecordSet`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod error;
pub mod event;
pub mod filter;
pub mod site;

pub use error::TypesError;
pub use event::{EventBuilder, SignedEvent, derive_pubkey};
pub use filter::Filter;
pub use site::{RecordSet, SiteRecord, has_extension, normalize_path, search_paths};

/// Event kind of a site file record (`d` = path, `x` = sha256).
pub const SITE_KIND: u16 = 34128;

/// Event kind of a relay list (NIP-65 outboxes).
pub const RELAY_LIST_KIND: u16 = 10002;

/// Event kind of a blob server list.
pub const SERVER_LIST_KIND: u16 = 10063;

/// Human-readable prefix of bech32-encoded public keys.
const NPUB_HRP: bech32::Hrp = bech32::Hrp::parse_unchecked("npub");

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex encoding (64 characters).
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, TypesError> {
                let mut out = [0u8; 32];
                hex::decode_to_slice(s.trim(), &mut out).map_err(|_| TypesError::InvalidHex {
                    what: $what,
                    value: s.to_string(),
                })?;
                Ok(Self(out))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        // Wire and cache encoding is always hex, whatever `Display` shows.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// A 32-byte x-only public key identifying a site owner.
    ///
    /// Displays as bech32 `npub1…`; serializes as hex.
    Pubkey,
    "pubkey"
);

define_id!(
    /// A sha256 digest addressing a blob on the mirrors.
    Sha256Hash,
    "sha256"
);

define_id!(
    /// The id of a signed event: sha256 of its canonical serialization.
    EventId,
    "event id"
);

impl Sha256Hash {
    /// Hash arbitrary data.
    pub fn digest(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Sha256Hash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Pubkey {
    /// Encode as bech32 `npub1…`.
    pub fn to_npub(&self) -> String {
        // Encoding 32 bytes never exceeds the bech32 length limit.
        bech32::encode::<bech32::Bech32>(NPUB_HRP, &self.0).unwrap_or_default()
    }

    /// Decode a bech32 `npub1…` string.
    pub fn from_npub(s: &str) -> Result<Self, TypesError> {
        let (hrp, data) = bech32::decode(s).map_err(|e| TypesError::Bech32(e.to_string()))?;
        let prefix = hrp.to_lowercase();
        if prefix != NPUB_HRP.to_lowercase() {
            return Err(TypesError::WrongPrefix {
                expected: "npub",
                found: prefix,
            });
        }
        let bytes: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| TypesError::InvalidLength(data.len()))?;
        Ok(Self(bytes))
    }

    /// Parse either an `npub1…` string or 64-character hex.
    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let s = s.trim();
        if s.starts_with("npub1") {
            Self::from_npub(s)
        } else {
            Self::from_hex(s)
        }
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_npub())
    }
}

impl FromStr for Pubkey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
