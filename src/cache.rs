//! LRU response cache with per-entry TTL, plus request fingerprinting.
//!
//! One [`ResponseCache`] is constructed at startup with explicit `maxsize`
//! and `ttl` parameters and injected into the orchestrator. Entries are keyed
//! by a canonical request fingerprint so that semantically identical requests
//! collide regardless of field ordering or volatile fields.

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ModelMuxError, Result};

/// Compute a stable fingerprint for any serializable value.
///
/// The value is canonicalized through `serde_json::Value` (object keys sort
/// lexicographically, non-primitive leaves serialize to strings) before
/// hashing, so two logically-equal inputs produce the same key no matter how
/// their fields were ordered at the call site.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)?;
    let serialized = serde_json::to_string(&canonical)?;

    let digest = Sha256::digest(serialized.as_bytes());
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.inserted_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Cache statistics, exposed for observability only.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub maxsize: usize,
}

impl CacheStats {
    /// Hit rate as a percentage of all lookups; 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64) * 100.0
    }
}

/// LRU cache with per-entry TTL.
///
/// A hit promotes the entry to most-recently-used; an expired entry is
/// evicted on read and counted as a miss. Inserting beyond `maxsize` evicts
/// the least-recently-used entry. All mutation goes through a mutex so the
/// LRU order cannot corrupt under concurrent access.
pub struct ResponseCache<V: Clone> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Option<Duration>,
    maxsize: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache holding at most `maxsize` entries, each living for
    /// `ttl` (or forever when `None`).
    pub fn new(maxsize: usize, ttl: Option<Duration>) -> Result<Self> {
        let capacity = NonZeroUsize::new(maxsize)
            .ok_or_else(|| ModelMuxError::Config("cache maxsize must be > 0".to_string()))?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            maxsize,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Look up a fingerprint; a hit promotes the entry to most-recently-used.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match cache.get(key) {
            Some(entry) if entry.is_expired(self.ttl) => {
                debug!(key, "Cache entry expired, evicting");
                cache.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or update a value, evicting the least-recently-used entry when
    /// the cache is full.
    pub fn put(&self, key: impl Into<String>, value: V) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop all entries. Statistics are preserved.
    pub fn clear(&self) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }

    /// Snapshot of hit/miss counters and current occupancy.
    pub fn stats(&self) -> CacheStats {
        let cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            maxsize: self.maxsize,
        }
    }
}
