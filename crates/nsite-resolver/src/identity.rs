//! Hostname → identity resolution.
//!
//! Strategies run in order and stop at the first hit:
//!
//! 1. the leftmost hostname label is itself an `npub`,
//! 2. a CNAME target whose leftmost label is an `npub`,
//! 3. a TXT record entry that is an `npub`,
//! 4. a name directory entry `<leftmost label>@<domain>` for each configured
//!    name domain.
//!
//! The first strategy is pure decoding and bypasses the cache. The outcome of
//! the network strategies is cached, including "not found".

use std::sync::Arc;

use nsite_cache::CacheFabric;
use nsite_types::Pubkey;
use tracing::debug;

use crate::directory::NameDirectory;
use crate::dns::DnsLookup;

/// Settings for [`IdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Domains queried as name directories, in order.
    pub name_domains: Vec<String>,
    /// Hostnames that never resolve and are never cached.
    pub bypass_hosts: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name_domains: Vec::new(),
            bypass_hosts: vec!["localhost".to_string()],
        }
    }
}

/// Resolves request hostnames to the identity that owns the site.
pub struct IdentityResolver {
    cache: CacheFabric,
    dns: Arc<dyn DnsLookup>,
    directory: Arc<dyn NameDirectory>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(
        cache: CacheFabric,
        dns: Arc<dyn DnsLookup>,
        directory: Arc<dyn NameDirectory>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            cache,
            dns,
            directory,
            config,
        }
    }

    /// Resolve `hostname` to an identity. Never fails; `None` means no
    /// strategy produced one.
    pub async fn resolve(&self, hostname: &str) -> Option<Pubkey> {
        let host = hostname.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() || self.config.bypass_hosts.iter().any(|b| b.eq_ignore_ascii_case(&host)) {
            debug!(host = %host, "bypassed hostname");
            return None;
        }

        if let Some(identity) = identity_from_hostname(&host) {
            debug!(host = %host, %identity, "resolved from hostname label");
            return Some(identity);
        }

        if let Some(cached) = self.cache.domains.lookup(&host).await {
            debug!(host = %host, found = cached.is_some(), "hostname cache hit");
            return cached;
        }

        let resolved = self.resolve_uncached(&host).await;
        match &resolved {
            Some(identity) => debug!(host = %host, %identity, "resolved hostname"),
            None => debug!(host = %host, "hostname did not resolve"),
        }
        self.cache.domains.store(&host, &resolved).await;
        resolved
    }

    async fn resolve_uncached(&self, host: &str) -> Option<Pubkey> {
        match self.dns.resolve_cname(host).await {
            Ok(names) => {
                if let Some(identity) = names.iter().find_map(|n| identity_from_hostname(n)) {
                    return Some(identity);
                }
            }
            Err(e) => debug!(host, error = %e, "cname lookup failed"),
        }

        match self.dns.resolve_txt(host).await {
            Ok(records) => {
                let found = records
                    .iter()
                    .flatten()
                    .find_map(|entry| identity_from_hostname(entry.trim()));
                if found.is_some() {
                    return found;
                }
            }
            Err(e) => debug!(host, error = %e, "txt lookup failed"),
        }

        let name = leftmost_label(host);
        for domain in &self.config.name_domains {
            let address = format!("{name}@{domain}");
            match self.directory.query_profile(&address).await {
                Ok(Some(identity)) => return Some(identity),
                Ok(None) => {}
                Err(e) => debug!(address = %address, error = %e, "name directory lookup failed"),
            }
        }
        None
    }
}

/// Decode the leftmost label of `name` as an `npub`.
///
/// Returns `None` for any other label, including malformed `npub`s.
pub fn identity_from_hostname(name: &str) -> Option<Pubkey> {
    let label = leftmost_label(name);
    if !label.starts_with("npub1") {
        return None;
    }
    match Pubkey::from_npub(label) {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!(label, error = %e, "malformed npub label");
            None
        }
    }
}

fn leftmost_label(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}
