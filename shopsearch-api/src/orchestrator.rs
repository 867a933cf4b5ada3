//! Per-request composition of the resilience layer.
//!
//! Admission runs strictly before any expensive work: blocklist, allowlist
//! bypass, sliding-window quota, then abuse detection. Admitted requests
//! read through the cache, fall back to the injected computation on a miss,
//! and write the result back without waiting for the store.

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shopsearch_core::{AbuseAction, CacheKey, ClientIdentity, Endpoint};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::performance::cache::CacheClient;
use crate::security::abuse::{AbuseDetector, AbuseFlag};
use crate::security::rate_limit::{AccessList, RateLimitDecision, RateLimiter};

/// What the orchestrator knows about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: ClientIdentity,
    /// Resolved network address. Kept alongside an API key identity so access
    /// lists still apply to the address.
    pub client_ip: Option<String>,
    pub endpoint: Endpoint,
    /// Free-text query, fed to repeated-query detection.
    pub query: Option<String>,
    /// Requested resource ID, fed to enumeration detection.
    pub resource_id: Option<String>,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(identity: ClientIdentity, endpoint: Endpoint, request_id: impl Into<String>) -> Self {
        Self {
            identity,
            client_ip: None,
            endpoint,
            query: None,
            resource_id: None,
            request_id: request_id.into(),
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Every identifier access lists are matched against: the primary identity
    /// first, then the address when it differs.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        let primary = self.identity.identifier();
        std::iter::once(primary).chain(
            self.client_ip
                .as_deref()
                .filter(move |ip| *ip != primary),
        )
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }
}

/// Admission verdict, handled as data rather than as an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allowed {
        decision: RateLimitDecision,
        flags: Vec<AbuseFlag>,
    },
    /// Over quota, or throttled for abuse.
    Denied(RateLimitDecision),
    /// Blocklisted.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// Quota and abuse metadata of a request that passed admission.
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub decision: RateLimitDecision,
    pub flags: Vec<AbuseFlag>,
}

/// A successfully served response plus the metadata handlers surface as headers.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub cache: CacheStatus,
    pub rate_limit: RateLimitDecision,
    pub flags: Vec<AbuseFlag>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    limiter: RateLimiter,
    abuse: Arc<AbuseDetector>,
    cache: Arc<CacheClient>,
}

impl Orchestrator {
    pub fn new(limiter: RateLimiter, abuse: Arc<AbuseDetector>, cache: Arc<CacheClient>) -> Self {
        Self {
            limiter,
            abuse,
            cache,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn abuse(&self) -> &Arc<AbuseDetector> {
        &self.abuse
    }

    pub fn cache(&self) -> &Arc<CacheClient> {
        &self.cache
    }

    /// Decides whether a request may proceed. Charges quota when it does.
    pub async fn admit(&self, ctx: &RequestContext) -> Admission {
        let identifier = ctx.identity.identifier();

        if ctx.identifiers().any(|id| self.limiter.is_blocklisted(id)) {
            warn!(
                client = %ctx.identity,
                endpoint = %ctx.endpoint,
                request_id = %ctx.request_id,
                "rate_limit_blocklisted"
            );
            return Admission::Blocked;
        }

        let decision = if ctx.identifiers().any(|id| self.limiter.is_allowlisted(id)) {
            self.limiter.bypass(&ctx.identity, ctx.endpoint)
        } else {
            self.limiter.check_client(&ctx.identity, ctx.endpoint).await
        };
        if decision.bypassed {
            return Admission::Allowed {
                decision,
                flags: Vec::new(),
            };
        }
        if !decision.allowed {
            return Admission::Denied(decision);
        }

        let flags: Vec<AbuseFlag> = [
            ctx.query
                .as_deref()
                .and_then(|query| self.abuse.observe_query(identifier, query)),
            ctx.resource_id
                .as_deref()
                .and_then(|id| self.abuse.observe_resource(identifier, id)),
        ]
        .into_iter()
        .flatten()
        .collect();

        if flags.iter().any(|flag| flag.escalate) {
            self.limiter.add_to(AccessList::Blocklist, identifier);
            warn!(client = %ctx.identity, request_id = %ctx.request_id, "abuse_escalated_to_blocklist");
        }

        if !flags.is_empty() && self.abuse.thresholds().action == AbuseAction::Throttle {
            let throttled = RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(self.abuse.thresholds().window_seconds),
                ..decision
            };
            return Admission::Denied(throttled);
        }

        Admission::Allowed { decision, flags }
    }

    /// Runs admission and turns a refusal into the matching error response.
    pub async fn admitted(&self, ctx: &RequestContext) -> ApiResult<Admitted> {
        match self.admit(ctx).await {
            Admission::Allowed { decision, flags } => Ok(Admitted { decision, flags }),
            Admission::Denied(decision) => Err(ApiError::RateLimited(decision)),
            Admission::Blocked => Err(ApiError::Forbidden),
        }
    }

    /// Admits the request, then serves `key` from cache or from `compute`.
    ///
    /// Only a failing computation produces a 5xx; cache failures read as a miss.
    pub async fn serve<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: CacheKey,
        compute: F,
    ) -> ApiResult<Served<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = shopsearch_core::Result<T>>,
    {
        let admitted = self.admitted(ctx).await?;
        self.serve_admitted(ctx, admitted, key, compute).await
    }

    /// Serves a request that already passed [`Orchestrator::admitted`].
    pub async fn serve_admitted<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        admitted: Admitted,
        key: CacheKey,
        compute: F,
    ) -> ApiResult<Served<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = shopsearch_core::Result<T>>,
    {
        let Admitted { decision, flags } = admitted;

        if let Some(value) = self.cache.get::<T>(&key).await {
            return Ok(Served {
                value,
                cache: CacheStatus::Hit,
                rate_limit: decision,
                flags,
            });
        }

        let value = compute().await.map_err(|e| match e {
            shopsearch_core::CoreError::Validation(msg) => ApiError::BadRequest(msg),
            other => {
                warn!(request_id = %ctx.request_id, error = %other, "computation_failed");
                ApiError::Unavailable(other.to_string())
            }
        })?;

        let cache = Arc::clone(&self.cache);
        let pending = value.clone();
        let request_id = ctx.request_id.clone();
        tokio::spawn(async move {
            let stored = cache.set(&key, &pending, None).await;
            debug!(request_id = %request_id, key = %key, stored, "cache_write_back");
        });

        Ok(Served {
            value,
            cache: CacheStatus::Miss,
            rate_limit: decision,
            flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use shopsearch_core::{
        AbuseThresholds, CacheSettings, CircuitBreakerSettings, CoreError, ManualClock,
        RateLimitTable,
    };
    use shopsearch_storage::MemoryStore;

    use crate::resilience::circuit_breaker::CircuitBreaker;

    fn orchestrator(abuse: AbuseThresholds) -> Orchestrator {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::with_clock(
            store.clone(),
            RateLimitTable::default(),
            Duration::from_millis(50),
            clock.clone(),
        );
        let breaker = Arc::new(CircuitBreaker::with_clock(
            "test_cache",
            CircuitBreakerSettings::default(),
            clock.clone(),
        ));
        let cache = CacheClient::with_clock(store, breaker, CacheSettings::default(), clock.clone());
        Orchestrator::new(
            limiter,
            Arc::new(AbuseDetector::with_clock(abuse, clock)),
            Arc::new(cache),
        )
    }

    fn ctx(ip: &str) -> RequestContext {
        RequestContext::new(ClientIdentity::Ip(ip.to_string()), Endpoint::Search, "req-1")
    }

    async fn wait_for(cache: &CacheClient, key: &CacheKey) {
        for _ in 0..100 {
            if cache.exists(key).await {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("write-back never landed for {}", key);
    }

    #[tokio::test]
    async fn test_blocklisted_client_never_reaches_compute() {
        let orchestrator = orchestrator(AbuseThresholds::default());
        orchestrator.limiter().add_to(AccessList::Blocklist, "10.0.0.9");
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result = orchestrator
            .serve(&ctx("10.0.0.9"), CacheKey::search("shoes", None, 10), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1u32])
            })
            .await;

        assert!(matches!(result, Err(ApiError::Forbidden)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_allowlisted_client_skips_abuse_detection() {
        let orchestrator = orchestrator(AbuseThresholds {
            same_query: 2,
            action: AbuseAction::Throttle,
            ..AbuseThresholds::default()
        });
        orchestrator.limiter().add_to(AccessList::Allowlist, "10.0.0.7");
        let ctx = ctx("10.0.0.7").with_query("shoes");

        for _ in 0..10 {
            match orchestrator.admit(&ctx).await {
                Admission::Allowed { decision, flags } => {
                    assert!(decision.bypassed);
                    assert!(flags.is_empty());
                }
                other => panic!("unexpected admission {:?}", other),
            }
        }
        assert!(orchestrator.abuse().signals().is_empty());
    }

    fn keyed_ctx(key: &str, ip: &str) -> RequestContext {
        RequestContext::new(ClientIdentity::ApiKey(key.to_string()), Endpoint::Search, "req-2")
            .with_client_ip(ip)
    }

    #[tokio::test]
    async fn test_access_lists_match_address_behind_api_key() {
        let orchestrator = orchestrator(AbuseThresholds::default());
        orchestrator.limiter().add_to(AccessList::Blocklist, "10.0.0.9");
        orchestrator.limiter().add_to(AccessList::Allowlist, "10.0.0.8");

        assert_eq!(
            orchestrator.admit(&keyed_ctx("made-up", "10.0.0.9")).await,
            Admission::Blocked
        );
        match orchestrator.admit(&keyed_ctx("made-up", "10.0.0.8")).await {
            Admission::Allowed { decision, .. } => assert!(decision.bypassed),
            other => panic!("unexpected admission {:?}", other),
        }

        orchestrator.limiter().add_to(AccessList::Blocklist, "stolen-key");
        assert_eq!(
            orchestrator.admit(&keyed_ctx("stolen-key", "10.0.0.8")).await,
            Admission::Blocked
        );
    }

    #[test]
    fn test_identifiers_skip_duplicate_address() {
        let ctx = ctx("10.0.0.1").with_client_ip("10.0.0.1");
        assert_eq!(ctx.identifiers().collect::<Vec<_>>(), vec!["10.0.0.1"]);
        let ctx = keyed_ctx("k", "10.0.0.1");
        assert_eq!(ctx.identifiers().collect::<Vec<_>>(), vec!["k", "10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_repeated_query_is_flagged_but_served_when_monitoring() {
        let orchestrator = orchestrator(AbuseThresholds::default());
        let ctx = ctx("10.0.0.1").with_query("Running Shoes");

        for _ in 0..20 {
            assert!(matches!(
                orchestrator.admit(&ctx).await,
                Admission::Allowed { ref flags, .. } if flags.is_empty()
            ));
        }

        match orchestrator.admit(&ctx).await {
            Admission::Allowed { flags, .. } => {
                assert_eq!(flags.len(), 1);
                assert_eq!(flags[0].observed, 21);
            }
            other => panic!("unexpected admission {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_throttle_action_denies_flagged_requests() {
        let orchestrator = orchestrator(AbuseThresholds {
            same_query: 3,
            action: AbuseAction::Throttle,
            ..AbuseThresholds::default()
        });
        let ctx = ctx("10.0.0.2").with_query("tent");

        for _ in 0..3 {
            assert!(matches!(orchestrator.admit(&ctx).await, Admission::Allowed { .. }));
        }
        match orchestrator.admit(&ctx).await {
            Admission::Denied(decision) => {
                assert!(!decision.allowed);
                assert_eq!(decision.retry_after, Some(60));
            }
            other => panic!("unexpected admission {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_escalation_blocklists_the_client() {
        let orchestrator = orchestrator(AbuseThresholds {
            same_query: 1,
            escalate_after: Some(2),
            ..AbuseThresholds::default()
        });
        let ctx = ctx("10.0.0.3").with_query("tent");

        for _ in 0..3 {
            orchestrator.admit(&ctx).await;
        }

        assert!(orchestrator.limiter().is_blocklisted("10.0.0.3"));
        assert_eq!(orchestrator.admit(&ctx).await, Admission::Blocked);
    }

    #[tokio::test]
    async fn test_miss_then_hit_computes_once() {
        let orchestrator = orchestrator(AbuseThresholds::default());
        let key = CacheKey::search("lamp", None, 5);
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["lamp".to_string()])
        };

        let first = orchestrator.serve(&ctx("10.0.0.4"), key.clone(), compute).await.unwrap();
        assert_eq!(first.cache, CacheStatus::Miss);
        wait_for(orchestrator.cache(), &key).await;

        let second = orchestrator.serve(&ctx("10.0.0.4"), key, compute).await.unwrap();
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.value, vec!["lamp".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_errors_map_to_status() {
        let orchestrator = orchestrator(AbuseThresholds::default());

        let invalid = orchestrator
            .serve::<Vec<u32>, _, _>(&ctx("10.0.0.5"), CacheKey::search("a", None, 1), || async {
                Err(CoreError::Validation("k must be positive".into()))
            })
            .await;
        assert!(matches!(invalid, Err(ApiError::BadRequest(_))));

        let failed = orchestrator
            .serve::<Vec<u32>, _, _>(&ctx("10.0.0.5"), CacheKey::search("b", None, 1), || async {
                Err(CoreError::Internal("ranker crashed".into()))
            })
            .await;
        assert!(matches!(failed, Err(ApiError::Unavailable(_))));
    }
}
