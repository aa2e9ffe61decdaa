//! Response Cache
//!
//! Fingerprint → [`GenerationResult`] store with per-entry expiry.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tiered_prompt_orchestrator::enhanced::ResponseCache;
//! use tiered_prompt_orchestrator::EventBus;
//! # fn example(result: tiered_prompt_orchestrator::GenerationResult) {
//! let cache = ResponseCache::new("v1", 1000, EventBus::new());
//!
//! let key = cache.key("  Hello ");
//! assert_eq!(key, "hello_v1");
//!
//! if cache.get(&key).is_none() {
//!     cache.put(key, result, Duration::from_secs(3600));
//! }
//! # }
//! ```
//!
//! An entry is readable only while `now < expires_at`. Expired entries found
//! by [`get`](ResponseCache::get) are reported as misses but left in place;
//! [`sweep`](ResponseCache::sweep) removes them.
//!
//! Writers serialise on one lock around evict-and-insert, so `max_entries`
//! holds even under concurrent puts. Reads never take it.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::events::{EventBus, EventKind};
use crate::GenerationResult;

/// Default entry lifetime: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    result: GenerationResult,
    expires_at: Instant,
}

/// Response cache shared by every in-flight request and the sweep task.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: DashMap<String, CacheEntry>,
    /// Held across the capacity check, eviction and insert.
    write_lock: Mutex<()>,
    catalog_version: String,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    events: EventBus,
}

/// Build the cache key for `text` under `catalog_version`.
///
/// The text is trimmed and lowercased so trivially different spellings of
/// the same request share an entry.
///
/// # Example
///
/// ```rust
/// use tiered_prompt_orchestrator::enhanced::fingerprint;
/// assert_eq!(fingerprint("  Hi ", "v7"), "hi_v7");
/// ```
pub fn fingerprint(text: &str, catalog_version: &str) -> String {
    format!("{}_{}", text.trim().to_lowercase(), catalog_version)
}

impl ResponseCache {
    /// Create an empty cache.
    ///
    /// - `catalog_version`: combined into every key so a catalog change
    ///   invalidates prior entries.
    /// - `max_entries`: capacity bound, `0` for unbounded.
    pub fn new(catalog_version: impl Into<String>, max_entries: usize, events: EventBus) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store: DashMap::new(),
                write_lock: Mutex::new(()),
                catalog_version: catalog_version.into(),
                max_entries,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Fingerprint `text` under this cache's catalog version.
    pub fn key(&self, text: &str) -> String {
        fingerprint(text, &self.inner.catalog_version)
    }

    /// Get a live entry, tagged `cache_hit = true`.
    pub fn get(&self, key: &str) -> Option<GenerationResult> {
        let now = Instant::now();
        let live = self
            .inner
            .store
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.result.clone());

        match live {
            Some(mut result) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                result.metrics.cache_hit = true;
                debug!("cache hit");
                Some(result)
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!("cache miss");
                None
            }
        }
    }

    /// Store `result` under `key`, overwriting any existing entry.
    pub fn put(&self, key: impl Into<String>, result: GenerationResult, ttl: Duration) {
        let key = key.into();
        let store = &self.inner.store;
        let _write = self.inner.write_lock.lock();

        // Evict if at capacity
        if self.inner.max_entries > 0
            && store.len() >= self.inner.max_entries
            && !store.contains_key(&key)
        {
            // Collect key first to release all DashMap read-guards
            // before calling remove (avoids shard deadlock).
            let evict_key = store
                .iter()
                .min_by_key(|e| e.value().expires_at)
                .map(|e| e.key().clone());
            if let Some(key_to_evict) = evict_key {
                store.remove(&key_to_evict);
                debug!(max_entries = self.inner.max_entries, "evicted entry closest to expiry");
            }
        }

        store.insert(
            key,
            CacheEntry {
                result,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(ttl_secs = ttl.as_secs(), "cached");
    }

    /// Remove every expired entry; returns how many were removed.
    ///
    /// Emits one `cache-cleaned` event when anything was removed, so a
    /// repeated sweep over the same state is silent.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.store.retain(|_, entry| {
            let live = now < entry.expires_at;
            if !live {
                removed += 1;
            }
            live
        });

        if removed > 0 {
            let remaining = self.inner.store.len();
            debug!(removed = removed, remaining = remaining, "cache sweep");
            self.inner.events.emit(
                EventKind::CacheCleaned,
                json!({ "removedEntries": removed, "remainingEntries": remaining }),
            );
        }
        removed
    }

    /// Drop every entry immediately; returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.inner.store.len();
        self.inner.store.clear();
        debug!(removed = removed, "cleared cache");
        self.inner
            .events
            .emit(EventKind::CacheCleared, json!({ "removedEntries": removed }));
        removed
    }

    /// `true` if an entry (live or expired) exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.inner.store.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently held in the cache.
    pub size: usize,
    /// Lookups answered by a live entry.
    pub hits: u64,
    /// Lookups that found no live entry.
    pub misses: u64,
}
