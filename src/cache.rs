//! Bounded TTL cache shared by the in-process counter store and session trackers.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Cached value with its expiry window.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When this entry was last written.
    pub touched_at: Instant,
    /// TTL for this entry, measured from `touched_at`.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Check if this cache entry has expired.
    pub fn is_expired(&self) -> bool {
        self.touched_at.elapsed() > self.ttl
    }
}

/// Share of capacity freed by one eviction pass.
const EVICTION_DIVISOR: usize = 16;

/// Thread-safe TTL cache with a capacity bound.
///
/// Expired entries are treated as absent on read and dropped lazily on write.
/// When full, expired entries are evicted first, then the least recently
/// written ones until at least 1/16 of the capacity is free, so a full scan
/// runs at most once per that many inserts.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new cache.
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Get a value if present and not expired.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Store a value with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Store a value with a custom TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            self.make_room(&mut entries, &key);
            entries.insert(
                key,
                CacheEntry {
                    value,
                    touched_at: Instant::now(),
                    ttl,
                },
            );
        }
    }

    /// Read-modify-write a value under a single write lock.
    ///
    /// A missing or expired entry is replaced by `init()` before `update` runs.
    /// The entry's TTL window restarts on every call. Returns `None` only if
    /// the lock is poisoned.
    pub fn upsert<R>(
        &self,
        key: K,
        ttl: Duration,
        init: impl FnOnce() -> V,
        update: impl FnOnce(&mut V) -> R,
    ) -> Option<R> {
        let mut entries = self.entries.write().ok()?;

        let live = entries.get(&key).is_some_and(|entry| !entry.is_expired());
        if !live {
            self.make_room(&mut entries, &key);
            entries.insert(
                key.clone(),
                CacheEntry {
                    value: init(),
                    touched_at: Instant::now(),
                    ttl,
                },
            );
        }

        let entry = entries.get_mut(&key)?;
        entry.touched_at = Instant::now();
        entry.ttl = ttl;
        Some(update(&mut entry.value))
    }

    /// Remove expired entries from the cache.
    pub fn cleanup(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, v| !v.is_expired());
        }
    }

    fn make_room(&self, entries: &mut HashMap<K, CacheEntry<V>>, key: &K) {
        if entries.len() < self.max_entries || entries.contains_key(key) {
            return;
        }

        entries.retain(|_, v| !v.is_expired());

        let target = self.max_entries - (self.max_entries / EVICTION_DIVISOR).max(1);
        if entries.len() <= target {
            return;
        }

        let excess = entries.len() - target;
        let mut by_age: Vec<(Instant, K)> = entries
            .iter()
            .map(|(k, v)| (v.touched_at, k.clone()))
            .collect();
        by_age.select_nth_unstable_by_key(excess - 1, |(touched_at, _)| *touched_at);

        for (_, oldest) in by_age.into_iter().take(excess) {
            entries.remove(&oldest);
        }
    }

    /// Get the number of entries in the cache, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
