use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::RankedProduct;
use crate::error::{Result, StoreResult};

/// Outcome of one atomic sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether the new entry was recorded.
    pub admitted: bool,
    /// Entries inside the window after the attempt, including the new one when admitted.
    pub count: u64,
    /// Timestamp of the oldest retained entry.
    pub oldest: Option<DateTime<Utc>>,
}

/// One page of a key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Opaque position to resume from; `None` once the scan is complete.
    pub cursor: Option<String>,
}

/// Key/value backing store shared by the rate limiter and the cache client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Removes a single key, returning how many keys were removed.
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Removes several keys in one round trip where the backend allows it.
    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        let mut removed = 0;
        for key in keys {
            removed += self.delete(key).await?;
        }
        Ok(removed)
    }

    /// Returns one bounded page of keys matching a glob where `*` matches any
    /// run of characters and every other character is literal. Start with no
    /// cursor and pass back the returned one until it is `None`. Keys deleted
    /// between pages do not cause others to be skipped.
    async fn scan_page(&self, pattern: &str, cursor: Option<&str>) -> StoreResult<KeyPage>;

    /// Every key matching `pattern`, in one call.
    async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.scan_page(pattern, cursor.as_deref()).await?;
            keys.extend(page.keys);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Prunes entries older than `now - window`, then records `member` only if
    /// fewer than `ceiling` entries remain. The whole sequence is atomic per key.
    async fn window_admit(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> StoreResult<WindowOutcome>;

    async fn ping(&self) -> StoreResult<()>;

    /// Backend name used in logs and health output.
    fn backend(&self) -> &'static str;
}

/// The expensive computation behind search and recommendation endpoints.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        user_id: Option<&str>,
        k: usize,
    ) -> Result<Vec<RankedProduct>>;

    async fn recommend(
        &self,
        user_id: &str,
        category: Option<&str>,
        k: usize,
    ) -> Result<Vec<RankedProduct>>;
}
