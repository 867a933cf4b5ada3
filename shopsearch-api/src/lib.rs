pub mod dto;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod orchestrator;
pub mod performance;
pub mod resilience;
pub mod security;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use shopsearch_core::{Clock, KeyValueStore, ResilienceSettings, SearchBackend, SystemClock};

pub use error::{ApiError, ApiResult};
pub use orchestrator::{Admission, Admitted, CacheStatus, Orchestrator, RequestContext, Served};

use performance::cache::CacheClient;
use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
use security::{abuse::AbuseDetector, rate_limit::RateLimiter};

/// Breaker guarding the shared key/value store.
pub const CACHE_BREAKER: &str = "redis_cache";
/// Breaker guarding the search and recommendation computation.
pub const BACKEND_BREAKER: &str = "search_backend";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub breakers: CircuitBreakerRegistry,
    pub backend: Arc<dyn SearchBackend>,
    pub backend_breaker: Arc<CircuitBreaker>,
    pub store: Arc<dyn KeyValueStore>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn SearchBackend>,
        settings: ResilienceSettings,
    ) -> Self {
        Self::with_clock(store, backend, settings, Arc::new(SystemClock))
    }

    /// Wires the resilience layer around `store` and `backend`, all reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn SearchBackend>,
        settings: ResilienceSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breakers = CircuitBreakerRegistry::with_clock(settings.circuit_breaker, clock.clone());
        let cache_breaker = breakers.get_or_create(CACHE_BREAKER);
        let backend_breaker = breakers.get_or_create(BACKEND_BREAKER);

        let limiter = RateLimiter::with_clock(
            store.clone(),
            settings.rate_limits,
            settings.cache.operation_timeout(),
            clock.clone(),
        );
        let abuse = Arc::new(AbuseDetector::with_clock(settings.abuse, clock.clone()));
        let cache = Arc::new(CacheClient::with_clock(
            store.clone(),
            cache_breaker,
            settings.cache,
            clock,
        ));

        Self {
            orchestrator: Orchestrator::new(limiter, abuse, cache),
            breakers,
            backend,
            backend_breaker,
            store,
        }
    }
}

/// Builds the full router: public endpoints, admin endpoints, health and metrics.
pub fn routes(state: AppState) -> Router {
    let admin = Router::new()
        .route("/cache/invalidate", post(handlers::admin::invalidate_cache))
        .route("/circuit-breakers", get(handlers::admin::list_circuit_breakers))
        .route(
            "/circuit-breakers/:name/reset",
            post(handlers::admin::reset_circuit_breaker),
        )
        .route(
            "/rate-limit/allowlist",
            post(handlers::admin::add_to_allowlist).delete(handlers::admin::remove_from_allowlist),
        )
        .route(
            "/rate-limit/blocklist",
            post(handlers::admin::add_to_blocklist).delete(handlers::admin::remove_from_blocklist),
        )
        .route("/rate-limit/status", get(handlers::admin::rate_limit_status));

    Router::new()
        .route("/search", get(handlers::search::search))
        .route("/recommend/:user_id", get(handlers::recommend::recommend))
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(observability::metrics::metrics_handler))
        .nest("/admin", admin)
        .layer(middleware::from_fn(observability::logging::request_id_middleware))
        .with_state(state)
}
