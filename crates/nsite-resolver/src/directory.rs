//! Name directory lookups (`name@domain` → identity).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use nsite_types::Pubkey;
use serde::Deserialize;
use tracing::debug;

use crate::error::LookupError;

/// Looks up the identity registered for a `name@domain` address.
#[async_trait]
pub trait NameDirectory: Send + Sync {
    async fn query_profile(&self, address: &str) -> Result<Option<Pubkey>, LookupError>;
}

/// NIP-05 directory: `GET https://<domain>/.well-known/nostr.json?name=<name>`.
pub struct Nip05Directory {
    http: reqwest::Client,
    scheme: &'static str,
}

impl Nip05Directory {
    pub fn new(timeout: Duration) -> Result<Self, LookupError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            scheme: "https",
        })
    }

    /// Query directories over plain HTTP. Only useful against local servers.
    pub fn insecure(mut self) -> Self {
        self.scheme = "http";
        self
    }

    fn document_url(&self, name: &str, domain: &str) -> Result<url::Url, LookupError> {
        let mut url = url::Url::parse(&format!("{}://{domain}/.well-known/nostr.json", self.scheme))
            .map_err(|e| LookupError::InvalidAddress(format!("{name}@{domain}: {e}")))?;
        url.query_pairs_mut().append_pair("name", name);
        Ok(url)
    }
}

#[async_trait]
impl NameDirectory for Nip05Directory {
    async fn query_profile(&self, address: &str) -> Result<Option<Pubkey>, LookupError> {
        let (name, domain) = split_address(address)?;
        let url = self.document_url(&name, domain)?;
        let document: NostrJson = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let found = document.pubkey_for(&name)?;
        debug!(address, found = found.is_some(), "name directory lookup");
        Ok(found)
    }
}

/// The `nostr.json` document.
#[derive(Debug, Default, Deserialize)]
struct NostrJson {
    #[serde(default)]
    names: HashMap<String, String>,
}

impl NostrJson {
    fn pubkey_for(&self, name: &str) -> Result<Option<Pubkey>, LookupError> {
        let entry = self
            .names
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, hex)| hex);
        match entry {
            Some(hex) => Ok(Some(Pubkey::from_hex(hex)?)),
            None => Ok(None),
        }
    }
}

/// Split `name@domain`, lowercasing the name. A bare domain means `_@domain`.
fn split_address(address: &str) -> Result<(String, &str), LookupError> {
    let (name, domain) = match address.split_once('@') {
        Some((name, domain)) => (name, domain),
        None => ("_", address),
    };
    if name.is_empty() || domain.is_empty() || domain.contains('/') {
        return Err(LookupError::InvalidAddress(address.to_string()));
    }
    Ok((name.to_ascii_lowercase(), domain))
}
