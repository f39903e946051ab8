//! TOML configuration for the gateway daemon.
//!
//! Every key is optional. Without a `--config` flag the daemon reads
//! `<config dir>/nsite/nsited.toml` when it exists, and runs on defaults
//! otherwise.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use nsite_blossom::{FetcherConfig, parse_size};
use nsite_cache::{
    CacheSettings, DEFAULT_MISS_TTL, DEFAULT_SYNC_RETENTION, DEFAULT_TTL, NamespaceTtls,
};
use nsite_engine::GatewayConfig;
use nsite_resolver::{IdentityConfig, MetadataConfig, ProfileConfig};
use nsite_types::Pubkey;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Listen address and site fallback.
    pub server: ServerSection,
    /// Relay sets.
    pub relays: RelaysSection,
    /// Blob mirrors.
    pub mirrors: MirrorsSection,
    /// Cache backend and expiry.
    pub cache: CacheSection,
    /// Hostname resolution.
    pub names: NamesSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address for the HTTP server.
    pub listen_addr: String,
    /// Domain the gateway is served on; restricts the homepage fallback to it.
    pub public_domain: Option<String>,
    /// Site (`npub1…` or hex) served for hosts that resolve to nothing.
    pub homepage: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            public_domain: None,
            homepage: None,
        }
    }
}

/// `[relays]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelaysSection {
    /// Relays indexing relay lists.
    pub lookup: Vec<String>,
    /// Relays always searched for site records and watched for updates.
    pub subscription: Vec<String>,
    /// Relays that receive a copy of every fetched site record.
    pub cache: Vec<String>,
}

impl Default for RelaysSection {
    fn default() -> Self {
        Self {
            lookup: vec![
                "wss://user.kindpag.es/".to_string(),
                "wss://purplepag.es/".to_string(),
            ],
            subscription: vec![
                "wss://nos.lol".to_string(),
                "wss://relay.damus.io".to_string(),
            ],
            cache: Vec::new(),
        }
    }
}

/// `[mirrors]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MirrorsSection {
    /// Blob servers tried for every site.
    pub extra: Vec<String>,
    /// Largest blob served (e.g. `"100MB"`). Unlimited if absent.
    pub max_file_size: Option<String>,
}

/// `[cache]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// `"in-memory"`, `"fjall://<dir>"` or a directory path.
    pub location: String,
    /// Lifetime of resolution results, in seconds.
    pub ttl_secs: u64,
    /// Lifetime of raw events kept for incremental sync, in seconds.
    pub sync_retention_secs: u64,
    /// Lifetime of a remembered path miss, in seconds.
    pub miss_ttl_secs: u64,
    /// Per-namespace overrides of `ttl_secs`.
    pub ttls: TtlOverrides,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            location: "in-memory".to_string(),
            ttl_secs: DEFAULT_TTL.as_secs(),
            sync_retention_secs: DEFAULT_SYNC_RETENTION.as_secs(),
            miss_ttl_secs: DEFAULT_MISS_TTL.as_secs(),
            ttls: TtlOverrides::default(),
        }
    }
}

/// `[cache.ttls]` table, in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtlOverrides {
    pub domains: Option<u64>,
    pub relays: Option<u64>,
    pub servers: Option<u64>,
    pub paths: Option<u64>,
    pub blobs: Option<u64>,
    pub sites: Option<u64>,
}

impl TtlOverrides {
    fn to_namespace_ttls(&self) -> NamespaceTtls {
        let secs = |v: Option<u64>| v.map(Duration::from_secs);
        NamespaceTtls {
            domains: secs(self.domains),
            relays: secs(self.relays),
            servers: secs(self.servers),
            paths: secs(self.paths),
            blobs: secs(self.blobs),
            sites: secs(self.sites),
        }
    }
}

/// `[names]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NamesSection {
    /// Domains whose `/.well-known/nostr.json` maps subdomain labels to sites.
    pub domains: Vec<String>,
    /// Hosts that never resolve to a site.
    pub bypass_hosts: Vec<String>,
}

impl Default for NamesSection {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            bypass_hosts: IdentityConfig::default().bypass_hosts,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or the default location if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::read(p),
            None => match default_path() {
                Some(p) if p.is_file() => Self::read(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            namespaces: self.cache.ttls.to_namespace_ttls(),
            sync_retention: Duration::from_secs(self.cache.sync_retention_secs),
            miss_ttl: Duration::from_secs(self.cache.miss_ttl_secs),
        }
    }

    pub fn max_file_size(&self) -> anyhow::Result<Option<u64>> {
        self.mirrors
            .max_file_size
            .as_deref()
            .map(|s| parse_size(s).context("invalid mirrors.max_file_size"))
            .transpose()
    }

    pub fn homepage(&self) -> anyhow::Result<Option<Pubkey>> {
        self.server
            .homepage
            .as_deref()
            .map(|s| Pubkey::parse(s.trim()).context("invalid server.homepage"))
            .transpose()
    }

    /// Pipeline settings derived from every section.
    pub fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        Ok(GatewayConfig {
            public_domain: self
                .server
                .public_domain
                .as_deref()
                .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase()),
            homepage: self.homepage()?,
            subscription_relays: self.relays.subscription.clone(),
            extra_relays: self.relays.cache.clone(),
            extra_mirrors: self.mirrors.extra.clone(),
            cache_ttl: Duration::from_secs(self.cache.ttl_secs),
            identity: IdentityConfig {
                name_domains: self.names.domains.clone(),
                bypass_hosts: self.names.bypass_hosts.clone(),
            },
            profile: ProfileConfig {
                lookup_relays: self.relays.lookup.clone(),
                cache_relays: self.relays.cache.clone(),
                ..ProfileConfig::default()
            },
            metadata: MetadataConfig {
                cache_relays: self.relays.cache.clone(),
                ..MetadataConfig::default()
            },
            fetcher: FetcherConfig {
                max_size: self.max_file_size()?,
                ..FetcherConfig::default()
            },
        })
    }
}

fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nsite").join("nsited.toml"))
}
