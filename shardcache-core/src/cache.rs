//! In-memory key-value store with per-entry TTL expiration
//!
//! Entries expire lazily on read and are reaped by a background sweep
//! so that set-and-forgotten keys do not accumulate forever. The store
//! knows nothing about cluster topology; routing lives in the server.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::sweep::{self, SweepGuard};

/// A single cached value with its creation time and TTL.
#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

impl Entry {
    /// A zero TTL never expires; otherwise the entry is stale strictly
    /// after `created_at + ttl` (still valid at the exact instant).
    fn is_expired(&self, now: Instant) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        now > self.created_at + self.ttl
    }
}

/// Thread-safe TTL cache.
///
/// Cloning yields another handle to the same underlying store. The
/// eviction task runs for as long as any handle is alive and is
/// aborted when the last one drops.
#[derive(Clone)]
pub struct Cache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    _sweeper: Arc<SweepGuard>,
}

impl Cache {
    /// Create a cache whose background sweep runs every `cleanup_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(cleanup_interval: Duration) -> Self {
        let entries = Arc::new(RwLock::new(HashMap::new()));
        let sweeper = sweep::spawn(cleanup_interval, &entries, evict_expired);
        Self {
            entries,
            _sweeper: Arc::new(sweeper),
        }
    }

    /// Store a key-value pair. A `ttl` of zero means the entry never expires.
    /// Overwrites any existing entry for the key.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let entry = Entry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
    }

    /// Retrieve a value by key. Returns `None` for missing or expired keys.
    ///
    /// Expired entries are not removed here; the sweep takes care of them.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// All non-expired keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of non-expired entries.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

/// One eviction pass: drop every expired entry.
fn evict_expired(entries: &RwLock<HashMap<String, Entry>>) {
    let now = Instant::now();
    let mut map = entries.write();
    let before = map.len();
    map.retain(|_, entry| !entry.is_expired(now));
    let evicted = before - map.len();
    if evicted > 0 {
        debug!("evicted {} expired cache entries", evicted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn set_and_get_without_ttl() {
        let cache = Cache::new(Duration::from_secs(1));
        cache.set("name", b"jin".to_vec(), Duration::ZERO);

        assert_eq!(cache.get("name"), Some(b"jin".to_vec()));

        // A zero TTL entry survives an elapsed delay.
        sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("name"), Some(b"jin".to_vec()));
    }

    #[tokio::test]
    async fn get_miss_returns_none() {
        let cache = Cache::new(Duration::from_secs(1));
        assert_eq!(cache.get("doesnotexist"), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let cache = Cache::new(Duration::from_secs(1));
        cache.set("k", b"v1".to_vec(), Duration::ZERO);
        cache.set("k", b"v2".to_vec(), Duration::ZERO);
        assert_eq!(cache.get("k"), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = Cache::new(Duration::from_secs(1));
        cache.set("temp", b"data".to_vec(), Duration::ZERO);
        cache.delete("temp");
        assert_eq!(cache.get("temp"), None);

        // Deleting again must not fail.
        cache.delete("temp");
        assert_eq!(cache.get("temp"), None);
    }

    #[tokio::test]
    async fn ttl_expiration_on_read() {
        let cache = Cache::new(Duration::from_secs(5));
        cache.set("name", b"jin".to_vec(), Duration::from_millis(30));

        assert_eq!(cache.get("name"), Some(b"jin".to_vec()));
        sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("name"), None);
    }

    #[tokio::test]
    async fn sweep_drops_count_without_reads() {
        let cache = Cache::new(Duration::from_millis(20));
        cache.set("short", b"v".to_vec(), Duration::from_millis(10));
        cache.set("keep", b"v".to_vec(), Duration::ZERO);
        assert_eq!(cache.count(), 2);

        // Never call get on "short"; the sweep alone must remove it.
        sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.keys(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn keys_skips_expired_entries() {
        let cache = Cache::new(Duration::from_secs(5));
        cache.set("live", b"v".to_vec(), Duration::ZERO);
        cache.set("dead", b"v".to_vec(), Duration::from_millis(10));

        sleep(Duration::from_millis(50)).await;
        let keys = cache.keys();
        assert_eq!(keys, vec!["live".to_string()]);
        assert_eq!(cache.count(), 1);
    }

    #[tokio::test]
    async fn concurrent_access_on_disjoint_keys() {
        let cache = Cache::new(Duration::from_secs(1));

        let mut handles = Vec::new();
        for id in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..100 {
                    let key = format!("key-{}-{}", id, j);
                    cache.set(&key, b"val".to_vec(), Duration::from_secs(5));
                    assert_eq!(cache.get(&key), Some(b"val".to_vec()));
                    cache.delete(&key);
                    assert_eq!(cache.get(&key), None);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
