//! Signed relay events.
//!
//! A [`SignedEvent`] is the JSON object relays store and forward:
//! `{id, pubkey, created_at, kind, tags, content, sig}`. The `id` is the
//! sha256 of the canonical array `[0, pubkey, created_at, kind, tags, content]`
//! and `sig` is a BIP-340 Schnorr signature over that id by `pubkey`.

use std::sync::LazyLock;

use secp256k1::{Keypair, Message, Secp256k1, VerifyOnly, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{EventId, Pubkey, TypesError};

static VERIFIER: LazyLock<Secp256k1<VerifyOnly>> = LazyLock::new(Secp256k1::verification_only);

/// A signed event as exchanged with relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// sha256 of the canonical serialization.
    pub id: EventId,
    /// Author.
    pub pubkey: Pubkey,
    /// Unix timestamp (seconds) chosen by the author.
    pub created_at: u64,
    /// Event kind.
    pub kind: u16,
    /// Tags: each tag is a name followed by values.
    pub tags: Vec<Vec<String>>,
    /// Free-form content.
    pub content: String,
    /// Hex-encoded 64-byte Schnorr signature.
    pub sig: String,
}

impl SignedEvent {
    /// Compute the id this event should carry.
    pub fn compute_id(&self) -> EventId {
        compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Check that `id` matches the content and `sig` is valid for `pubkey`.
    pub fn verify(&self) -> Result<(), TypesError> {
        let computed = self.compute_id();
        if computed != self.id {
            return Err(TypesError::IdMismatch {
                claimed: self.id.to_hex(),
                computed: computed.to_hex(),
            });
        }

        let sig_bytes =
            hex::decode(&self.sig).map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        let key = XOnlyPublicKey::from_slice(self.pubkey.as_bytes())
            .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        let msg = Message::from_digest(*self.id.as_bytes());

        VERIFIER
            .verify_schnorr(&sig, &msg, &key)
            .map_err(|e| TypesError::InvalidSignature(e.to_string()))
    }

    /// Value of the first tag named `name` that carries a non-empty value.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().is_some_and(|n| n == name) && t.get(1).is_some_and(|v| !v.is_empty()))
            .map(|t| t[1].as_str())
    }

    /// All tags named `name`, values only (the name is stripped).
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().is_some_and(|n| n == name))
            .map(|t| &t[1..])
    }
}

fn compute_id(
    pubkey: &Pubkey,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> EventId {
    // serde_json escapes exactly the characters the canonical form requires.
    let canonical = serde_json::json!([0, pubkey.to_hex(), created_at, kind, tags, content]);
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    EventId::from(<[u8; 32]>::from(digest))
}

/// Derive the public key belonging to a 32-byte secret key.
pub fn derive_pubkey(secret_key: &[u8; 32]) -> Result<Pubkey, TypesError> {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_seckey_slice(&secp, secret_key)
        .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
    let (xonly, _parity) = keypair.x_only_public_key();
    Ok(Pubkey::from(xonly.serialize()))
}

/// Builder for signed events.
///
/// The gateway only consumes events; this exists for tooling and for
/// producing fixtures.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: Option<u64>,
}

impl EventBuilder {
    /// Start an event of the given kind.
    pub fn new(kind: u16) -> Self {
        Self {
            kind,
            tags: Vec::new(),
            content: String::new(),
            created_at: None,
        }
    }

    /// Append a tag.
    pub fn tag<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the content.
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set `created_at` (defaults to now).
    pub fn created_at(mut self, ts: u64) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Sign with a 32-byte secret key.
    pub fn sign(self, secret_key: &[u8; 32]) -> Result<SignedEvent, TypesError> {
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_seckey_slice(&secp, secret_key)
            .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        let pubkey = Pubkey::from(keypair.x_only_public_key().0.serialize());
        let created_at = self.created_at.unwrap_or_else(crate::unix_now);

        let id = compute_id(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(*id.as_bytes()), &keypair);

        Ok(SignedEvent {
            id,
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: hex::encode(sig.serialize()),
        })
    }
}
