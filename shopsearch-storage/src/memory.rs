//! In-process key/value store.
//!
//! Mirrors the subset of Redis semantics the resilience layer relies on:
//! string values with TTLs, per-key sorted timestamp logs for sliding
//! windows, and glob key listing. Each key is guarded by its DashMap shard
//! lock, so `window_admit` is atomic per key.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shopsearch_core::{
    glob_matches, Clock, KeyPage, KeyValueStore, StoreError, StoreResult, SystemClock,
    WindowOutcome,
};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    Window(VecDeque<DateTime<Utc>>),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    slot: Slot,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// DashMap-backed store, the default when no Redis URL is configured.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Arc<DashMap<String, StoredEntry>>,
    scan_batch_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Arc::new(DashMap::new()),
            scan_batch_size: 500,
        }
    }

    /// Keys returned per `scan_page` call.
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size.max(1);
        self
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purges expired keys until the handle is aborted.
    pub fn start_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                tracing::debug!(purged, live = store.entries.len(), "memory_store_cleanup");
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                return match &entry.slot {
                    Slot::Value(value) => Ok(Some(value.clone())),
                    Slot::Window(_) => Err(StoreError::Backend(format!(
                        "WRONGTYPE key {} holds a window log",
                        key
                    ))),
                };
            }
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.now();
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                slot: Slot::Value(value.to_string()),
                expires_at: Some(now + to_chrono(ttl)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now();
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => Ok(1),
            _ => Ok(0),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        let now = self.clock.now();
        Ok(keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count() as u64)
    }

    /// Pages through matching keys in sorted order; the cursor is the last key returned.
    async fn scan_page(&self, pattern: &str, cursor: Option<&str>) -> StoreResult<KeyPage> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| cursor.map(|after| entry.key().as_str() > after).unwrap_or(true))
            .filter(|entry| !entry.value().is_expired(now) && glob_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_unstable();

        let cursor = if keys.len() > self.scan_batch_size {
            keys.truncate(self.scan_batch_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(KeyPage { keys, cursor })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + to_chrono(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn window_admit(
        &self,
        key: &str,
        _member: &str,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> StoreResult<WindowOutcome> {
        let cutoff = now - to_chrono(window);
        let fresh = || StoredEntry {
            slot: Slot::Window(VecDeque::new()),
            expires_at: None,
        };

        // The entry guard holds the shard lock for the whole prune/count/push.
        let mut entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let mut entry = occupied.into_ref();
                if entry.is_expired(now) {
                    *entry = fresh();
                }
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(fresh()),
        };

        let expires_at = Some(now + to_chrono(window));
        let log = match &mut entry.slot {
            Slot::Window(log) => log,
            Slot::Value(_) => {
                return Err(StoreError::Backend(format!(
                    "WRONGTYPE key {} holds a string value",
                    key
                )))
            }
        };

        while log.front().map(|ts| *ts <= cutoff).unwrap_or(false) {
            log.pop_front();
        }

        let admitted = (log.len() as u64) < ceiling;
        if admitted {
            log.push_back(now);
        }
        let outcome = WindowOutcome {
            admitted,
            count: log.len() as u64,
            oldest: log.front().copied(),
        };
        entry.expires_at = expires_at;

        Ok(outcome)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
