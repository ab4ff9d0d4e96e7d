/// Output cache
///
/// Maps resource identity to the artifact paths of its most recent successful
/// run. Freshness is decided by the caller-supplied effective TTL so the same
/// entry can be judged against a resource override or the project default.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::error::Result;
use crate::state::{read_json, write_json_atomic};

/// Last successful output of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub output_paths: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
    /// Resource TTL override at the time of the run, in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl CacheEntry {
    /// Age of the entry relative to `now` (zero if the clock went backwards)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

/// On-disk cache document
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: BTreeMap<String, CacheEntry>,
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
pub struct OutputCache {
    entries: RwLock<BTreeMap<String, CacheEntry>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Record a successful run, replacing any previous entry
    pub fn put(&self, id: &str, output_paths: Vec<PathBuf>, ttl: Option<u64>) -> CacheEntry {
        let entry = CacheEntry {
            output_paths,
            timestamp: Utc::now(),
            ttl,
        };
        self.insert(id, entry.clone());

        tracing::debug!(id = %id, operation = "put", "cache entry stored");
        entry
    }

    /// Store an entry as-is, keeping its timestamp
    pub fn insert(&self, id: &str, entry: CacheEntry) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), entry);
    }

    /// Whether `entry` may be reused under `effective_ttl`
    ///
    /// A zero TTL is never fresh.
    pub fn is_fresh(entry: &CacheEntry, effective_ttl: Duration, now: DateTime<Utc>) -> bool {
        if effective_ttl.is_zero() {
            return false;
        }
        entry.age(now) <= effective_ttl
    }

    /// Snapshot of every entry, ordered by identity
    pub fn entries(&self) -> Vec<(String, CacheEntry)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        write_json_atomic(path, &snapshot)?;

        tracing::debug!(
            operation = "save",
            entry_count = snapshot.entries.len(),
            path = %path.display(),
            "cache snapshot saved"
        );
        Ok(())
    }

    /// Replace the cache contents with a saved snapshot
    pub fn load(&self, path: &Path) -> Result<usize> {
        let Some(snapshot) = read_json::<CacheSnapshot>(path)? else {
            return Ok(0);
        };

        let count = snapshot.entries.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = snapshot.entries;

        tracing::debug!(
            operation = "load",
            entry_count = count,
            path = %path.display(),
            "cache snapshot loaded"
        );
        Ok(count)
    }
}
