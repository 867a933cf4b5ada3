//! Cache-aside client over the shared key/value store.
//!
//! Every store round trip is bounded by `operation_timeout` and routed
//! through a dedicated [`CircuitBreaker`]. No method ever returns an error:
//! reads degrade to a miss and writes to `false`.
//!
//! Values are stored in a JSON envelope carrying an absolute expiry, which is
//! checked against the client's clock on read so an entry is never served
//! past its TTL even if the store keeps it longer.
//!
//! # Examples
//!
//! ```no_run
//! use shopsearch_api::performance::cache::CacheClient;
//! use shopsearch_api::resilience::CircuitBreaker;
//! use shopsearch_core::{CacheKey, CacheSettings, CircuitBreakerSettings};
//! use shopsearch_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let breaker = Arc::new(CircuitBreaker::new("redis_cache", CircuitBreakerSettings::default()));
//! let cache = CacheClient::new(Arc::new(MemoryStore::new()), breaker, CacheSettings::default());
//!
//! let key = CacheKey::search("red shoes", None, 10);
//! cache.set(&key, &vec!["1001", "1002"], None).await;
//! let hit: Option<Vec<String>> = cache.get(&key).await;
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shopsearch_core::{
    CacheKey, CacheSettings, Clock, InvalidationEvent, KeyValueStore, StoreError, StoreResult,
    SystemClock,
};
use tracing::{debug, info, warn};

use crate::observability::metrics::ResilienceMetrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::resilience::timeout::with_timeout;

/// Stored form of every cached value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    /// Operations absorbed after a store error, timeout or open breaker.
    pub errors: u64,
    pub writes: u64,
    /// Cache hit rate (0.0 - 1.0).
    pub hit_rate: f64,
    pub breaker_state: CircuitState,
    pub backend: &'static str,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
}

pub struct CacheClient {
    store: Arc<dyn KeyValueStore>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    counters: CacheCounters,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("backend", &self.store.backend())
            .field("breaker", &self.breaker.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CacheClient {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        breaker: Arc<CircuitBreaker>,
        settings: CacheSettings,
    ) -> Self {
        Self::with_clock(store, breaker, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        breaker: Arc<CircuitBreaker>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            breaker,
            clock,
            settings,
            counters: CacheCounters::default(),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs one store call under the timeout and the breaker. `None` on any failure.
    async fn guarded<T, F, Fut>(&self, operation: &'static str, key: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let timeout = self.settings.operation_timeout();
        let result = self
            .breaker
            .call(|| async move { with_timeout(timeout, f()).await.map_err(StoreError::from) })
            .await;

        match result {
            Ok(value) => Some(value),
            Err(CircuitBreakerError::Open { state, .. }) => {
                debug!(operation, key, state = %state, "cache_breaker_open");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                ResilienceMetrics::cache_error(operation);
                None
            }
            Err(CircuitBreakerError::Operation(e)) => {
                warn!(operation, key, error = %e, error_kind = e.kind(), "cache_store_error");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                ResilienceMetrics::cache_error(operation);
                None
            }
        }
    }

    /// Looks up a key. Absent, expired, undecodable and unreachable all read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();
        let layer = key.layer().as_str();

        let raw = self
            .guarded("get", &rendered, || self.store.get(&rendered))
            .await
            .flatten();

        let value = raw.and_then(|raw| match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if !entry.is_expired(self.clock.now()) => Some(entry.value),
            Ok(_) => None,
            Err(e) => {
                debug!(key = %rendered, error = %e, "cache_decode_failed");
                None
            }
        });

        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            ResilienceMetrics::cache_hit(layer);
            debug!(key = %rendered, "cache_hit");
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            ResilienceMetrics::cache_miss(layer);
            debug!(key = %rendered, "cache_miss");
        }
        value
    }

    /// Stores a value; `ttl` defaults to the key's layer TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let rendered = key.to_string();
        let ttl = ttl.unwrap_or_else(|| key.layer().default_ttl(&self.settings.ttls));
        let now = self.clock.now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));

        let entry = CacheEntry {
            value,
            cached_at: now,
            expires_at,
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %rendered, error = %e, "cache_encode_failed");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                ResilienceMetrics::cache_error("set");
                return false;
            }
        };

        let stored = self
            .guarded("set", &rendered, || self.store.set_ex(&rendered, &payload, ttl))
            .await
            .is_some();
        if stored {
            self.counters.writes.fetch_add(1, Ordering::Relaxed);
        }
        stored
    }

    /// Deletes one key, or every key matching a `*` glob. Returns how many went.
    ///
    /// Globs are scanned page by page and each page is deleted in one call, so
    /// the operation timeout bounds a single round trip rather than the scan.
    pub async fn delete(&self, pattern_or_key: &str) -> u64 {
        if !pattern_or_key.contains('*') {
            return self
                .guarded("delete", pattern_or_key, || self.store.delete(pattern_or_key))
                .await
                .unwrap_or(0);
        }

        let mut deleted = 0;
        let mut cursor: Option<String> = None;
        loop {
            let Some(page) = self
                .guarded("scan", pattern_or_key, || {
                    self.store.scan_page(pattern_or_key, cursor.as_deref())
                })
                .await
            else {
                warn!(pattern = pattern_or_key, deleted, "cache_invalidation_incomplete");
                return deleted;
            };

            if !page.keys.is_empty() {
                deleted += self
                    .guarded("delete", pattern_or_key, || self.store.delete_many(&page.keys))
                    .await
                    .unwrap_or(0);
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return deleted,
            }
        }
    }

    /// Deletes every key an upstream change makes stale.
    pub async fn invalidate(&self, event: &InvalidationEvent) -> u64 {
        let mut deleted = 0;
        for pattern in event.patterns() {
            deleted += self.delete(&pattern).await;
        }
        info!(event = ?event, deleted, "cache_invalidated");
        deleted
    }

    /// Whether a live entry exists. `false` on any failure.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        let rendered = key.to_string();
        self.guarded("exists", &rendered, || self.store.get(&rendered))
            .await
            .flatten()
            .and_then(|raw| serde_json::from_str::<CacheEntry<serde_json::Value>>(&raw).ok())
            .map(|entry| !entry.is_expired(self.clock.now()))
            .unwrap_or(false)
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStatistics {
            hits,
            misses,
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            breaker_state: self.breaker.state().await,
            backend: self.store.backend(),
        }
    }
}
