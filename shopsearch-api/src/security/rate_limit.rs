//! Sliding-window rate limiting backed by the shared key/value store.
//!
//! Every check is one atomic `window_admit` round trip: stale timestamps are
//! pruned and the new one is recorded only while fewer than `limit` remain.
//! Denied requests are not recorded, so once the oldest admitted request
//! leaves the window exactly one slot reopens.
//!
//! The limiter fails open. When the store errors or exceeds the operation
//! timeout the request is admitted, nothing is charged and the decision is
//! marked `degraded`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use shopsearch_core::{
    redact_identifier, ClientIdentity, Clock, Endpoint, KeyValueStore, RateLimitPolicy,
    RateLimitTable, StoreError, SystemClock,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::observability::metrics::ResilienceMetrics;
use crate::resilience::timeout::with_timeout;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// `now + window` at the time of the check.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until one slot reopens, set only on denial.
    pub retry_after: Option<u64>,
    /// The store was unreachable and the request was admitted uncharged.
    pub degraded: bool,
    /// The identifier is allowlisted and was not counted.
    pub bypassed: bool,
}

impl RateLimitDecision {
    fn unlimited(policy: &RateLimitPolicy, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit: policy.limit,
            remaining: policy.limit,
            reset_at,
            retry_after: None,
            degraded: false,
            bypassed: false,
        }
    }
}

/// Named identifier lists consulted before any quota is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessList {
    Allowlist,
    Blocklist,
}

impl AccessList {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessList::Allowlist => "allowlist",
            AccessList::Blocklist => "blocklist",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub backend: &'static str,
    pub allowlist: Vec<String>,
    pub blocklist: Vec<String>,
    pub limits: RateLimitTable,
}

/// Sliding-window limiter shared by every request handler.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    table: RateLimitTable,
    operation_timeout: Duration,
    allowlist: Arc<DashSet<String>>,
    blocklist: Arc<DashSet<String>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.store.backend())
            .field("table", &self.table)
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        table: RateLimitTable,
        operation_timeout: Duration,
    ) -> Self {
        Self::with_clock(store, table, operation_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        table: RateLimitTable,
        operation_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            table,
            operation_timeout,
            allowlist: Arc::new(DashSet::new()),
            blocklist: Arc::new(DashSet::new()),
        }
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }

    /// Checks a client against the configured policy for `endpoint`.
    pub async fn check_client(
        &self,
        identity: &ClientIdentity,
        endpoint: Endpoint,
    ) -> RateLimitDecision {
        if self.is_allowlisted(identity.identifier()) {
            return self.bypass(identity, endpoint);
        }

        let policy = self.table.policy(endpoint, identity.limit_type());
        let decision = self.check(identity.identifier(), endpoint, &policy).await;
        if !decision.allowed {
            ResilienceMetrics::rate_limit_hit(endpoint.as_str(), identity.limit_type().as_str());
        }
        decision
    }

    /// An uncharged admission for an allowlisted client.
    pub fn bypass(&self, identity: &ClientIdentity, endpoint: Endpoint) -> RateLimitDecision {
        let policy = self.table.policy(endpoint, identity.limit_type());
        let mut decision =
            RateLimitDecision::unlimited(&policy, self.clock.now() + to_chrono(policy.window()));
        decision.bypassed = true;
        decision
    }

    /// Records one request for `identifier` on `endpoint` if the window has room.
    pub async fn check(
        &self,
        identifier: &str,
        endpoint: Endpoint,
        policy: &RateLimitPolicy,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let window = to_chrono(policy.window());
        let reset_at = now + window;
        let key = window_key(endpoint, identifier);
        let member = format!("{}-{}", now.timestamp_millis(), Uuid::new_v4());

        let outcome = with_timeout(
            self.operation_timeout,
            self.store
                .window_admit(&key, &member, now, policy.window(), policy.limit),
        )
        .await
        .map_err(StoreError::from);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    identifier = %redact_identifier(identifier),
                    endpoint = %endpoint,
                    error = %e,
                    error_kind = e.kind(),
                    "rate_limit_degraded"
                );
                ResilienceMetrics::rate_limit_degraded(endpoint.as_str());
                let mut decision = RateLimitDecision::unlimited(policy, reset_at);
                decision.degraded = true;
                return decision;
            }
        };

        let remaining = policy.limit.saturating_sub(outcome.count);
        if outcome.admitted {
            debug!(
                identifier = %redact_identifier(identifier),
                endpoint = %endpoint,
                count = outcome.count,
                remaining,
                "rate_limit_admitted"
            );
            return RateLimitDecision {
                allowed: true,
                limit: policy.limit,
                remaining,
                reset_at,
                retry_after: None,
                degraded: false,
                bypassed: false,
            };
        }

        let retry_after = retry_after_seconds(now, outcome.oldest, window);
        warn!(
            identifier = %redact_identifier(identifier),
            endpoint = %endpoint,
            count = outcome.count,
            limit = policy.limit,
            retry_after,
            "rate_limit_exceeded"
        );

        RateLimitDecision {
            allowed: false,
            limit: policy.limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            degraded: false,
            bypassed: false,
        }
    }

    // ===== Access lists =====

    pub fn is_allowlisted(&self, identifier: &str) -> bool {
        self.allowlist.contains(identifier)
    }

    pub fn is_blocklisted(&self, identifier: &str) -> bool {
        self.blocklist.contains(identifier)
    }

    /// Adds an identifier, returning `false` if it was already listed.
    pub fn add_to(&self, list: AccessList, identifier: &str) -> bool {
        let set = self.list(list);
        let inserted = set.insert(identifier.to_string());
        if inserted {
            info!(list = list.as_str(), identifier = %redact_identifier(identifier), "rate_limit_list_added");
        }
        ResilienceMetrics::set_list_size(list.as_str(), set.len());
        inserted
    }

    /// Removes an identifier, returning `false` if it was not listed.
    pub fn remove_from(&self, list: AccessList, identifier: &str) -> bool {
        let set = self.list(list);
        let removed = set.remove(identifier).is_some();
        if removed {
            info!(list = list.as_str(), identifier = %redact_identifier(identifier), "rate_limit_list_removed");
        }
        ResilienceMetrics::set_list_size(list.as_str(), set.len());
        removed
    }

    pub fn members(&self, list: AccessList) -> Vec<String> {
        let mut members: Vec<String> = self.list(list).iter().map(|m| m.key().clone()).collect();
        members.sort();
        members
    }

    pub fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            backend: self.store.backend(),
            allowlist: self.members(AccessList::Allowlist),
            blocklist: self.members(AccessList::Blocklist),
            limits: self.table,
        }
    }

    fn list(&self, list: AccessList) -> &DashSet<String> {
        match list {
            AccessList::Allowlist => &self.allowlist,
            AccessList::Blocklist => &self.blocklist,
        }
    }
}

fn window_key(endpoint: Endpoint, identifier: &str) -> String {
    format!("ratelimit:{}:{}", endpoint.as_str(), identifier)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Whole seconds, at least one, until the oldest retained request leaves the window.
fn retry_after_seconds(
    now: DateTime<Utc>,
    oldest: Option<DateTime<Utc>>,
    window: chrono::Duration,
) -> u64 {
    let wait_ms = match oldest {
        Some(oldest) => (oldest + window - now).num_milliseconds(),
        None => window.num_milliseconds(),
    };
    let seconds = (wait_ms.max(0) as u64).div_ceil(1_000);
    seconds.max(1)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolves who is calling.
///
/// API keys (`Authorization: Bearer|ApiKey <key>` or `X-API-Key`) win over
/// addresses; see [`extract_client_ip`] for the address.
pub fn extract_client_identity(headers: &HeaderMap, remote: Option<SocketAddr>) -> ClientIdentity {
    if let Some(auth) = header_value(headers, "authorization") {
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("ApiKey "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(token) = token {
            return ClientIdentity::ApiKey(token.to_string());
        }
    }

    if let Some(key) = header_value(headers, "x-api-key") {
        return ClientIdentity::ApiKey(key.to_string());
    }

    ClientIdentity::Ip(extract_client_ip(headers, remote))
}

/// The caller's address: first `X-Forwarded-For` hop, then `X-Real-IP`, then
/// the socket, else `"unknown"`.
pub fn extract_client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(first_hop) = header_value(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return first_hop.to_string();
    }

    if let Some(real_ip) = header_value(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    match remote {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Add rate limit headers to response
pub fn add_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    if let Ok(limit) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", limit);
    }
    if let Ok(remaining) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", remaining);
    }
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_at.timestamp().to_string()) {
        headers.insert("X-RateLimit-Reset", reset);
    }
    if let Some(retry_after) = decision.retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert("Retry-After", value);
        }
    }
}
