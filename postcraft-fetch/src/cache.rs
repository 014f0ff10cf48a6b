//! Bounded TTL/LRU cache with single-flight computation.
//!
//! Each logical upstream (term extraction, SERP, video, references, URL
//! validity) owns its own [`TtlCache`] instance, so eviction pressure in one
//! domain never starves another. Instances are cheap to clone; clones share
//! the same storage.
//!
//! On a miss, the first caller starts the computation and every concurrent
//! caller for the same key joins it instead of issuing a duplicate upstream
//! call. Successful results are stored with `expires_at = now + ttl`; failures
//! are delivered to every waiter and never stored.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{FetchError, Result};
use crate::sync::lock;

/// Configuration for one logical cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident entries. Inserting beyond this evicts the
    /// least-recently-accessed entry regardless of its remaining TTL.
    pub capacity: usize,
    /// Default time-to-live in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_secs: 600,
        }
    }
}

impl CacheConfig {
    /// Create a config with the given capacity and TTL.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Default TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FetchError::Config(
                "cache capacity must be greater than 0".into(),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(FetchError::Config(
                "cache ttl_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time cache counters, for diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from an unexpired entry.
    pub hits: u64,
    /// Lookups that started a new computation (or found nothing, for [`TtlCache::get`]).
    pub misses: u64,
    /// Lookups that joined a computation already in flight.
    pub coalesced: u64,
    /// Entries dropped to make room for a newer one.
    pub evictions: u64,
    /// Entries found expired and removed on access.
    pub expirations: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    last_accessed_at: Instant,
}

type Computation<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    in_flight: HashMap<String, Computation<V>>,
    stats: CacheStats,
}

impl<V: Clone> Inner<V> {
    /// Return the unexpired value for `key`, marking it most recently used.
    /// An expired entry is removed and reported as absent.
    fn lookup(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = match self.entries.get_mut(key) {
            Some(entry) if now < entry.expires_at => {
                entry.last_accessed_at = now;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(key);
            self.stats.expirations += 1;
        }
        None
    }

    fn store(&mut self, cache: &str, key: String, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
        };
        if let Some((evicted, old)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                self.stats.evictions += 1;
                tracing::trace!(
                    cache,
                    key = %evicted,
                    age_ms = now.saturating_duration_since(old.created_at).as_millis() as u64,
                    idle_ms = now.saturating_duration_since(old.last_accessed_at).as_millis() as u64,
                    "evicted least-recently-accessed entry"
                );
            }
        }
    }
}

/// A bounded key→value cache with per-entry expiry and single-flight
/// computation.
pub struct TtlCache<V> {
    name: Arc<str>,
    ttl: Duration,
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            ttl: self.ttl,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a named cache from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if capacity or TTL is zero.
    pub fn new(name: impl Into<String>, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            name: Arc::from(name.into()),
            ttl: config.ttl(),
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
                stats: CacheStats::default(),
            })),
        })
    }

    /// The cache's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured default TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value for `key`, computing it on a miss.
    ///
    /// - Unexpired entry: returned without calling `compute`.
    /// - Miss with a computation already in flight for `key`: joins it and
    ///   observes the same success or failure.
    /// - Miss otherwise: calls `compute`, stores a successful result for
    ///   `ttl`, and hands the outcome to every joined waiter.
    ///
    /// Failures are never stored, so the next caller retries cleanly. The
    /// computation keeps running as long as at least one waiter polls it.
    ///
    /// `compute` is invoked while the cache lock is held and must only build
    /// the future, not touch this cache synchronously.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let computation = {
            let mut inner = lock(&self.inner);
            if let Some(value) = inner.lookup(key, Instant::now()) {
                inner.stats.hits += 1;
                tracing::trace!(cache = %self.name, key, "cache hit");
                return Ok(value);
            }
            if let Some(existing) = inner.in_flight.get(key) {
                let existing = existing.clone();
                inner.stats.coalesced += 1;
                tracing::trace!(cache = %self.name, key, "joined in-flight computation");
                existing
            } else {
                inner.stats.misses += 1;
                tracing::trace!(cache = %self.name, key, "cache miss");
                let computation = self.start_computation(key.to_owned(), ttl, compute());
                inner.in_flight.insert(key.to_owned(), computation.clone());
                computation
            }
        };
        computation.await
    }

    fn start_computation<Fut>(&self, key: String, ttl: Duration, fut: Fut) -> Computation<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let name = Arc::clone(&self.name);
        async move {
            let result = AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|_| {
                Err(FetchError::TaskFailed("cache computation panicked".into()))
            });
            let mut guard = lock(&inner);
            guard.in_flight.remove(&key);
            match &result {
                Ok(value) => guard.store(&name, key, value.clone(), ttl),
                Err(err) => {
                    tracing::debug!(cache = %name, key = %key, error = %err, "computation failed; not cached");
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Return the unexpired value for `key` without computing anything.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = lock(&self.inner);
        let value = inner.lookup(key, Instant::now());
        if value.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        value
    }

    /// Store `value` under `key` for `ttl`, evicting the least-recently-accessed
    /// entry if the cache is full.
    pub fn insert(&self, key: impl Into<String>, value: V, ttl: Duration) {
        lock(&self.inner).store(&self.name, key.into(), value, ttl);
    }

    /// Returns `true` if an unexpired entry exists for `key`. Does not update recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        lock(&self.inner)
            .entries
            .peek(key)
            .is_some_and(|entry| now < entry.expires_at)
    }

    /// Remove the entry for `key`, if any. In-flight computations are unaffected.
    pub fn invalidate(&self, key: &str) -> bool {
        lock(&self.inner).entries.pop(key).is_some()
    }

    /// Remove all stored entries. In-flight computations are unaffected.
    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }

    /// Number of physically resident entries, including expired ones not yet
    /// touched.
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Returns `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of computations currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner).in_flight.len()
    }

    /// Snapshot of the diagnostic counters.
    pub fn stats(&self) -> CacheStats {
        lock(&self.inner).stats
    }
}

/// Build a deterministic cache key from its parts.
///
/// Parts are kept verbatim: IDs, paths and slugs are case-sensitive, so any
/// normalisation (such as lowercasing a search query) belongs to the caller.
/// Parts are joined with a separator that cannot appear in normal text so
/// `["a b", "c"]` and `["a", "b c"]` stay distinct.
pub fn cache_key(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}
