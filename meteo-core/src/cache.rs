//! Expiring key/value cache persisted as one JSON blob per namespace.
//!
//! Every operation reads the whole blob, mutates it in memory and writes it
//! back. Storage failures are logged and treated as a miss or a no-op; the
//! cache never surfaces an error to its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::HashMap, fmt, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    clock::{Clock, add_duration},
    store::KeyValueStore,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
}

type Entries<T> = HashMap<String, CacheEntry<T>>;

pub struct ExpiringCache<T> {
    namespace: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_entries: Option<usize>,
    _value: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for ExpiringCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("namespace", &self.namespace)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl<T> ExpiringCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { namespace: namespace.into(), store, clock, max_entries: None, _value: PhantomData }
    }

    /// Bound the namespace; inserts beyond it evict the oldest entries first.
    pub fn with_max_entries(self, max_entries: usize) -> Self {
        Self { max_entries: Some(max_entries), ..self }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Look up `key`. An expired entry is deleted, persisted, and reported absent.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.load();
        let now = self.clock.now();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                debug!(namespace = %self.namespace, key, "cache miss");
                return None;
            }
        };

        if expired {
            debug!(namespace = %self.namespace, key, "cache entry expired");
            entries.remove(key);
            self.persist(&entries);
            return None;
        }

        debug!(namespace = %self.namespace, key, "cache hit");
        entries.remove(key).map(|entry| entry.value)
    }

    pub fn set(&self, key: &str, value: T, ttl: Duration) {
        let mut entries = self.load();
        let now = self.clock.now();

        entries.insert(
            key.to_string(),
            CacheEntry { value, created_at: now, expires_at: add_duration(now, ttl) },
        );

        if let Some(max) = self.max_entries {
            evict_oldest(&mut entries, max, key);
        }

        self.persist(&entries);
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.load();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(&self.namespace) {
            warn!(namespace = %self.namespace, error = %err, "failed to clear cache");
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.load();
        let now = self.clock.now();
        let before = entries.len();

        entries.retain(|_, entry| !entry.is_expired(now));

        let removed = before - entries.len();
        if removed > 0 {
            debug!(namespace = %self.namespace, removed, "swept expired entries");
            self.persist(&entries);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.load();
        let now = self.clock.now();

        CacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| e.is_expired(now)).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self) -> Entries<T> {
        let bytes = match self.store.get(&self.namespace) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Entries::new(),
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "failed to read cache");
                return Entries::new();
            }
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(namespace = %self.namespace, error = %err, "discarding corrupt cache blob");
            Entries::new()
        })
    }

    fn persist(&self, entries: &Entries<T>) {
        let bytes = match serde_json::to_vec(entries) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(namespace = %self.namespace, error = %err, "failed to serialize cache");
                return;
            }
        };

        if let Err(err) = self.store.put(&self.namespace, &bytes) {
            warn!(namespace = %self.namespace, error = %err, "failed to persist cache");
        }
    }
}

/// Trims `entries` down to `max`, oldest first. `keep` (the key just written)
/// is never a candidate, even when its timestamp ties with older entries.
fn evict_oldest<T>(entries: &mut Entries<T>, max: usize, keep: &str) {
    if entries.len() <= max {
        return;
    }

    let mut by_age: Vec<(DateTime<Utc>, String)> = entries
        .iter()
        .filter(|(key, _)| key.as_str() != keep)
        .map(|(key, entry)| (entry.created_at, key.clone()))
        .collect();
    by_age.sort();

    let excess = entries.len() - max;
    for (_, key) in by_age.into_iter().take(excess) {
        debug!(key = %key, "evicting oldest cache entry");
        entries.remove(&key);
    }
}
