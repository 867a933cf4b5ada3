use serde::{Deserialize, Serialize};
use shopsearch_core::{AbuseSignal, InvalidationEvent, RankedProduct};
use validator::Validate;

use crate::orchestrator::CacheStatus;
use crate::performance::cache::CacheStatistics;
use crate::resilience::circuit_breaker::CircuitBreakerSnapshot;
use crate::security::rate_limit::RateLimitStatus;

fn default_k() -> usize {
    10
}

// ===== Search / Recommend =====

#[derive(Debug, Deserialize, Validate)]
pub struct SearchParams {
    #[validate(length(min = 1, max = 500))]
    pub q: String,
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    #[serde(default = "default_k")]
    #[validate(range(min = 1, max = 100))]
    pub k: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecommendParams {
    #[validate(length(min = 1, max = 64))]
    pub category: Option<String>,
    #[serde(default = "default_k")]
    #[validate(range(min = 1, max = 100))]
    pub k: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductsResponse {
    pub results: Vec<RankedProduct>,
    pub cache: CacheStatus,
    pub request_id: String,
}

// ===== Admin =====

/// Either a raw key/glob or a typed upstream event.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InvalidateRequest {
    Pattern { pattern: String },
    Event { event: InvalidationEvent },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub deleted: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListEntryRequest {
    #[validate(length(min = 1, max = 256))]
    pub identifier: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListEntryResponse {
    pub status: String,
    pub identifier: String,
}

#[derive(Debug, Serialize)]
pub struct CircuitBreakersResponse {
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitStatusResponse {
    #[serde(flatten)]
    pub status: RateLimitStatus,
    pub abuse_signals: Vec<AbuseSignal>,
}

// ===== Health =====

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: StoreHealth,
    pub circuit_breakers: Vec<BreakerHealth>,
    pub cache: CacheStatistics,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: String,
}
