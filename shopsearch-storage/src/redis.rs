use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use shopsearch_core::{KeyPage, KeyValueStore, StoreError, StoreResult, WindowOutcome};

/// Prune, count, conditionally add, refresh TTL and report the oldest
/// score, all inside one server-side script so concurrent callers on the
/// same key are serialized by Redis itself.
const WINDOW_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now_ms = tonumber(ARGV[1])
local cutoff_ms = tonumber(ARGV[2])
local ceiling = tonumber(ARGV[3])
local member = ARGV[4]
local window_ms = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff_ms)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < ceiling then
    redis.call('ZADD', key, now_ms, member)
    count = count + 1
    admitted = 1
end
redis.call('PEXPIRE', key, window_ms)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
"#;

/// Configuration for the Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub scan_batch_size: usize,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scan_batch_size: 100,
        }
    }

    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }
}

/// Redis-backed store shared by every instance of the service.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    window_script: Script,
    scan_batch_size: usize,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("scan_batch_size", &self.scan_batch_size)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects and verifies the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(map_redis_error)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;

        let store = Self {
            manager,
            window_script: Script::new(WINDOW_ADMIT_SCRIPT),
            scan_batch_size: config.scan_batch_size,
        };
        store.ping().await?;

        tracing::info!("Redis store connected");
        Ok(store)
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(0)
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

/// Escapes Redis glob syntax so only `*` stays a wildcard.
fn match_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl).max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let mut conn = self.manager.clone();
        let removed: u64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn scan_page(&self, pattern: &str, cursor: Option<&str>) -> StoreResult<KeyPage> {
        let cursor: u64 = match cursor {
            None => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::Backend(format!("invalid scan cursor {}", raw)))?,
        };

        let mut conn = self.manager.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(match_pattern(pattern))
            .arg("COUNT")
            .arg(self.scan_batch_size)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(KeyPage {
            keys,
            cursor: (next != 0).then(|| next.to_string()),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl).max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(updated == 1)
    }

    async fn window_admit(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
        ceiling: u64,
    ) -> StoreResult<WindowOutcome> {
        let mut conn = self.manager.clone();
        let now_ms = now.timestamp_millis();
        let window_ms = millis(window).max(1);
        let cutoff_ms = now_ms - window_ms as i64;

        let (admitted, count, oldest_ms): (i64, u64, i64) = self
            .window_script
            .key(key)
            .arg(now_ms)
            .arg(cutoff_ms)
            .arg(ceiling)
            .arg(member)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let oldest = if oldest_ms >= 0 {
            Utc.timestamp_millis_opt(oldest_ms).single()
        } else {
            None
        };

        Ok(WindowOutcome {
            admitted: admitted == 1,
            count,
            oldest,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
