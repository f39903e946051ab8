//! DNS lookups used by hostname resolution.

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::{Resolver, TokioResolver};
use tracing::debug;

use crate::error::LookupError;

/// The DNS record types hostname resolution needs.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// Canonical names `host` points at, in chain order, without trailing dots.
    async fn resolve_cname(&self, host: &str) -> Result<Vec<String>, LookupError>;

    /// TXT records of `host`, each as its list of character strings.
    async fn resolve_txt(&self, host: &str) -> Result<Vec<Vec<String>>, LookupError>;
}

/// [`DnsLookup`] backed by hickory's async resolver.
pub struct HickoryDns {
    resolver: TokioResolver,
}

impl HickoryDns {
    /// Use the system resolver configuration (`/etc/resolv.conf` on unix).
    pub fn from_system_conf() -> Result<Self, LookupError> {
        let resolver = Resolver::builder_tokio()?.build();
        Ok(Self { resolver })
    }

    /// Use an explicit upstream configuration.
    pub fn with_config(config: ResolverConfig) -> Self {
        let resolver =
            Resolver::builder_with_config(config, TokioConnectionProvider::default()).build();
        Self { resolver }
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn resolve_cname(&self, host: &str) -> Result<Vec<String>, LookupError> {
        let lookup = self.resolver.lookup(host, RecordType::CNAME).await?;
        let names: Vec<String> = lookup
            .record_iter()
            .filter_map(|record| match record.data() {
                RData::CNAME(cname) => Some(trim_root(&cname.0.to_utf8())),
                _ => None,
            })
            .collect();
        debug!(host, count = names.len(), "cname lookup");
        Ok(names)
    }

    async fn resolve_txt(&self, host: &str) -> Result<Vec<Vec<String>>, LookupError> {
        let lookup = self.resolver.txt_lookup(host).await?;
        let records: Vec<Vec<String>> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect()
            })
            .collect();
        debug!(host, count = records.len(), "txt lookup");
        Ok(records)
    }
}

fn trim_root(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}
