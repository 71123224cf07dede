//! Bounded in-memory cache with per-entry TTL and LRU eviction
//!
//! Provides a `TtlCache` that keeps at most `capacity` entries. Expiry is checked
//! lazily on read; eviction on insert always removes the least recently used
//! entry, whatever its remaining TTL.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// A resident value together with its freshness window
#[derive(Debug)]
struct CacheEntry<V> {
    /// The cached value
    value: V,
    /// When the value was stored
    stored_at: Instant,
    /// How long the value stays visible
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Counters describing cache behaviour since construction (or the last `clear`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room for a new key
    pub evictions: u64,
    /// Entries purged because a read found them expired
    pub expirations: u64,
}

#[derive(Debug)]
struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    stats: CacheStats,
}

/// Fixed-capacity cache shared by all request tasks
///
/// Every operation takes the internal lock for its whole duration, so concurrent
/// callers always observe each call as atomic. The lock is never held across an
/// `.await`.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// Creates an empty cache holding at most `capacity` entries
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Stores `value` under `key`, replacing any previous entry
    ///
    /// The entry becomes the most recently used one. If the cache is full and
    /// `key` is new, the least recently used entry is evicted first.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };

        let is_full = inner.entries.len() == inner.entries.cap().get();
        if is_full && !inner.entries.contains(&key) && inner.entries.pop_lru().is_some() {
            inner.stats.evictions += 1;
        }
        inner.entries.put(key, entry);
    }

    /// Returns a clone of the value for `key` if it is present and unexpired
    ///
    /// A successful read refreshes the entry's recency. An expired entry is
    /// removed and reported as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.pop(key);
            inner.stats.expirations += 1;
        }
        inner.stats.misses += 1;
        None
    }

    /// Removes `key`, returning whether an entry was resident
    pub fn delete(&self, key: &K) -> bool {
        self.inner.lock().entries.pop(key).is_some()
    }

    /// Number of resident entries, including expired ones not yet touched
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    /// Drops every entry and resets the counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.stats = CacheStats::default();
    }
}
