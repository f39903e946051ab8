//! Site records and the per-identity record set.
//!
//! A site is a set of signed path → hash bindings. Each binding is an
//! addressable event: publishing a newer event for the same path replaces the
//! older one, so only the most recent record per path is authoritative.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Pubkey, Sha256Hash, SignedEvent};

/// One path of a site bound to the hash of its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub identity: Pubkey,
    /// Absolute, normalized path (always starts with `/`).
    pub path: String,
    pub content_hash: Sha256Hash,
    pub created_at: u64,
}

impl SiteRecord {
    /// Parse a site file event.
    ///
    /// Returns `None` when the `d` or `x` tag is missing or the hash is not
    /// valid hex. The signature is not checked here.
    pub fn from_event(event: &SignedEvent) -> Option<Self> {
        let path = event.tag_value("d")?;
        let content_hash = Sha256Hash::from_hex(event.tag_value("x")?).ok()?;
        Some(Self {
            identity: event.pubkey,
            path: normalize_path(path),
            content_hash,
            created_at: event.created_at,
        })
    }

    /// Recency order used to pick the authoritative record for a path.
    ///
    /// Newer wins; on equal timestamps the greater content hash wins so the
    /// choice never depends on arrival order.
    fn recency_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.content_hash.cmp(&other.content_hash))
    }
}

/// All known records of one identity, one per path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub identity: Pubkey,
    records: BTreeMap<String, SiteRecord>,
    /// Unix seconds of the synchronization that produced this set.
    pub synced_at: u64,
}

impl RecordSet {
    pub fn empty(identity: Pubkey, synced_at: u64) -> Self {
        Self {
            identity,
            records: BTreeMap::new(),
            synced_at,
        }
    }

    /// Build a set from records, keeping the newest record per path.
    ///
    /// Records belonging to another identity are ignored.
    pub fn from_records(
        identity: Pubkey,
        records: impl IntoIterator<Item = SiteRecord>,
        synced_at: u64,
    ) -> Self {
        let mut set = Self::empty(identity, synced_at);
        for record in records {
            set.insert(record);
        }
        set
    }

    /// Insert a record unless a newer one for the same path is present.
    ///
    /// Returns `true` if the record was stored.
    pub fn insert(&mut self, record: SiteRecord) -> bool {
        if record.identity != self.identity {
            return false;
        }
        match self.records.get(&record.path) {
            Some(existing) if existing.recency_cmp(&record) != Ordering::Less => false,
            _ => {
                self.records.insert(record.path.clone(), record);
                true
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&SiteRecord> {
        self.records.get(path)
    }

    /// Pick the best record among `candidates`.
    ///
    /// The newest matching record wins; on equal `created_at` the earlier
    /// candidate wins.
    pub fn select<S: AsRef<str>>(&self, candidates: &[S]) -> Option<&SiteRecord> {
        let mut best: Option<&SiteRecord> = None;
        for candidate in candidates {
            let Some(record) = self.records.get(candidate.as_ref()) else {
                continue;
            };
            if best.is_none_or(|b| record.created_at > b.created_at) {
                best = Some(record);
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in path order.
    pub fn iter(&self) -> impl Iterator<Item = &SiteRecord> {
        self.records.values()
    }
}

/// Normalize a request or record path into an absolute path.
///
/// Resolves `.` and `..` segments, collapses repeated slashes and keeps a
/// trailing slash. `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(path.len() + 1);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() || (path.ends_with('/') && !segments.is_empty()) {
        out.push('/');
    }
    out
}

/// Whether the last segment of `path` carries a file extension.
///
/// A leading dot alone (`/.well-known`) is not an extension.
pub fn has_extension(path: &str) -> bool {
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    name.rfind('.').is_some_and(|idx| idx > 0)
}

/// Paths to look up for a request path, in preference order.
///
/// The literal path first, then `<path>/index.html` when the path has no
/// extension.
pub fn search_paths(path: &str) -> Vec<String> {
    let literal = normalize_path(path);
    let mut paths = vec![literal.clone()];
    if !has_extension(&literal) {
        paths.push(normalize_path(&format!("{literal}/index.html")));
    }
    paths
}
