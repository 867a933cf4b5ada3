use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::identity::{Endpoint, LimitType};
use crate::error::{CoreError, Result};

// ===== Rate Limiting =====

/// Quota for one kind of client on one endpoint.
///
/// `burst` is carried and validated but does not take part in admission:
/// a request is admitted while the window holds fewer than `limit` entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RateLimitPolicy {
    #[validate(range(min = 1))]
    pub limit: u64,
    #[validate(range(min = 1))]
    pub burst: u64,
    #[validate(range(min = 1))]
    pub window_seconds: u64,
}

impl RateLimitPolicy {
    pub const fn new(limit: u64, burst: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            burst,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Field ranges plus `burst >= limit`.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.burst < self.limit {
            return Err(CoreError::Configuration(format!(
                "burst ({}) must not be lower than limit ({})",
                self.burst, self.limit
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointLimits {
    pub ip: RateLimitPolicy,
    pub api_key: RateLimitPolicy,
}

impl EndpointLimits {
    pub fn for_type(&self, limit_type: LimitType) -> RateLimitPolicy {
        match limit_type {
            LimitType::Ip => self.ip,
            LimitType::ApiKey => self.api_key,
        }
    }
}

/// Per-endpoint quotas, resolved once at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitTable {
    #[serde(default = "default_search_limits")]
    pub search: EndpointLimits,
    #[serde(default = "default_recommend_limits")]
    pub recommend: EndpointLimits,
}

fn default_search_limits() -> EndpointLimits {
    EndpointLimits {
        ip: RateLimitPolicy::new(100, 150, 60),
        api_key: RateLimitPolicy::new(1000, 1500, 60),
    }
}

fn default_recommend_limits() -> EndpointLimits {
    EndpointLimits {
        ip: RateLimitPolicy::new(50, 75, 60),
        api_key: RateLimitPolicy::new(500, 750, 60),
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            search: default_search_limits(),
            recommend: default_recommend_limits(),
        }
    }
}

impl RateLimitTable {
    pub fn limits(&self, endpoint: Endpoint) -> &EndpointLimits {
        match endpoint {
            Endpoint::Search => &self.search,
            Endpoint::Recommend => &self.recommend,
        }
    }

    pub fn policy(&self, endpoint: Endpoint, limit_type: LimitType) -> RateLimitPolicy {
        self.limits(endpoint).for_type(limit_type)
    }

    pub fn check(&self) -> Result<()> {
        for limits in [&self.search, &self.recommend] {
            limits.ip.check()?;
            limits.api_key.check()?;
        }
        Ok(())
    }
}

// ===== Circuit Breaker =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Error rate in `[0, 1]` that opens the circuit.
    #[validate(range(min = 0.0, max = 1.0))]
    pub failure_threshold: f64,
    #[validate(range(min = 1))]
    pub time_window_seconds: u64,
    #[validate(range(min = 1))]
    pub open_duration_seconds: u64,
    /// Fraction of half-open calls admitted as tests.
    #[validate(range(min = 0.01, max = 1.0))]
    pub half_open_test_percentage: f64,
    #[validate(range(min = 1))]
    pub min_requests_for_threshold: u32,
    /// Completed test calls needed before a half-open verdict.
    #[validate(range(min = 1))]
    pub half_open_min_tests: u32,
    /// Success ratio a half-open verdict must exceed to close the circuit.
    #[validate(range(min = 0.0, max = 1.0))]
    pub half_open_success_ratio: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            time_window_seconds: 60,
            open_duration_seconds: 30,
            half_open_test_percentage: 0.1,
            min_requests_for_threshold: 10,
            half_open_min_tests: 5,
            half_open_success_ratio: 0.5,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_seconds)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_seconds)
    }

    /// Every n-th half-open call is admitted as a test.
    pub fn half_open_stride(&self) -> u64 {
        (1.0 / self.half_open_test_percentage).round().max(1.0) as u64
    }

    pub fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}

// ===== Abuse Detection =====

/// What the orchestrator does with an abuse flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AbuseAction {
    /// Log and count, but serve the request.
    #[default]
    Monitor,
    /// Deny the request as if it were over quota.
    Throttle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct AbuseThresholds {
    /// Identical queries tolerated per window; the next one is flagged.
    #[validate(range(min = 1))]
    pub same_query: u32,
    /// Length of a consecutive-ID run that counts as enumeration.
    #[validate(range(min = 2))]
    pub sequential_run: u32,
    #[validate(range(min = 1))]
    pub window_seconds: u64,
    pub action: AbuseAction,
    /// Flags within one window after which the identifier is blocklisted.
    pub escalate_after: Option<u32>,
}

impl Default for AbuseThresholds {
    fn default() -> Self {
        Self {
            same_query: 20,
            sequential_run: 5,
            window_seconds: 60,
            action: AbuseAction::Monitor,
            escalate_after: None,
        }
    }
}

impl AbuseThresholds {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}

// ===== Caching =====

/// Default time-to-live per cache layer, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheTtls {
    pub query_results: u64,
    pub features: u64,
    pub user_features: u64,
    pub configuration: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            query_results: 300,
            features: 3_600,
            user_features: 86_400,
            configuration: 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct CacheSettings {
    /// Bound on every backing-store round trip, independent of the breaker.
    #[validate(range(min = 1))]
    pub operation_timeout_ms: u64,
    pub ttls: CacheTtls,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 50,
            ttls: CacheTtls::default(),
        }
    }
}

impl CacheSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// ===== Aggregate =====

/// Everything the resilience layer needs, resolved once at startup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceSettings {
    pub rate_limits: RateLimitTable,
    pub circuit_breaker: CircuitBreakerSettings,
    pub abuse: AbuseThresholds,
    pub cache: CacheSettings,
}

impl ResilienceSettings {
    pub fn check(&self) -> Result<()> {
        self.rate_limits.check()?;
        self.circuit_breaker.check()?;
        self.abuse.check()?;
        self.cache.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_matches_published_quotas() {
        let table = RateLimitTable::default();
        assert_eq!(
            table.policy(Endpoint::Search, LimitType::Ip),
            RateLimitPolicy::new(100, 150, 60)
        );
        assert_eq!(
            table.policy(Endpoint::Recommend, LimitType::ApiKey),
            RateLimitPolicy::new(500, 750, 60)
        );
        assert!(table.check().is_ok());
    }

    #[test]
    fn test_burst_below_limit_rejected() {
        let policy = RateLimitPolicy::new(100, 50, 60);
        assert!(matches!(policy.check(), Err(CoreError::Configuration(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let policy = RateLimitPolicy::new(10, 10, 0);
        assert!(matches!(policy.check(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_half_open_stride() {
        let settings = CircuitBreakerSettings::default();
        assert_eq!(settings.half_open_stride(), 10);

        let always = CircuitBreakerSettings {
            half_open_test_percentage: 1.0,
            ..Default::default()
        };
        assert_eq!(always.half_open_stride(), 1);
    }

    #[test]
    fn test_resilience_settings_defaults_are_valid() {
        assert!(ResilienceSettings::default().check().is_ok());
    }

    #[test]
    fn test_breaker_settings_out_of_range() {
        let settings = CircuitBreakerSettings {
            failure_threshold: 1.5,
            ..Default::default()
        };
        assert!(settings.check().is_err());
    }
}
