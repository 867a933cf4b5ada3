//! Prometheus metrics for the resilience layer.
//!
//! Series are emitted through the `metrics` facade and rendered by the
//! Prometheus exporter installed in [`init_metrics`]. When no recorder is
//! installed (unit tests) every call is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopsearch_api::observability::metrics::{init_metrics, metrics_handler};
//! use axum::{Router, routing::get};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let app: Router<()> = Router::new().route("/metrics", get(metrics_handler));
//! ```

use std::sync::OnceLock;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::error;

use crate::resilience::circuit_breaker::CircuitState;

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder.
///
/// Subsequent calls return Ok without re-initializing.
///
/// # Errors
///
/// Returns an error if the Prometheus exporter fails to install.
pub fn init_metrics() -> Result<(), MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Installation("Handle already set".to_string()))?;

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    // Rate limiting
    describe_counter!(
        "rate_limit_hits_total",
        Unit::Count,
        "Requests denied by the sliding-window rate limiter"
    );
    describe_counter!(
        "rate_limit_degraded_total",
        Unit::Count,
        "Rate limit checks that failed open because the counter store was unavailable"
    );
    describe_gauge!(
        "rate_limit_list_size",
        Unit::Count,
        "Entries in the rate limiter allowlist and blocklist"
    );
    describe_counter!(
        "abuse_detections_total",
        Unit::Count,
        "Abuse patterns flagged by the abuse detector"
    );

    // Circuit breakers
    describe_gauge!(
        "circuit_breaker_state",
        Unit::Count,
        "Circuit breaker state per dependency (0=closed, 1=open, 2=half_open)"
    );
    describe_counter!(
        "circuit_breaker_transitions_total",
        Unit::Count,
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        Unit::Count,
        "Calls short-circuited by an open or half-open breaker"
    );

    // Cache
    describe_counter!("cache_hits_total", Unit::Count, "Cache hits per layer");
    describe_counter!("cache_misses_total", Unit::Count, "Cache misses per layer");
    describe_counter!(
        "cache_errors_total",
        Unit::Count,
        "Cache operations absorbed after a store error, timeout or open breaker"
    );
}

// ============================================================================
// Metrics Error Types
// ============================================================================

/// Errors that can occur during metrics operations
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Installation(String),

    #[error("Metrics not initialized")]
    NotInitialized,
}

// ============================================================================
// Metrics Endpoint Handler
// ============================================================================

/// Axum handler that returns Prometheus metrics in text format.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => {
            let metrics = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4")],
                metrics,
            )
                .into_response()
        }
        None => {
            error!("{}", MetricsError::NotInitialized);
            (StatusCode::INTERNAL_SERVER_ERROR, "Metrics not initialized").into_response()
        }
    }
}

// ============================================================================
// Resilience Metrics
// ============================================================================

/// Records rate limiter, abuse detector, breaker and cache metrics
pub struct ResilienceMetrics;

impl ResilienceMetrics {
    pub fn rate_limit_hit(endpoint: &str, limit_type: &str) {
        counter!(
            "rate_limit_hits_total",
            "endpoint" => endpoint.to_string(),
            "limit_type" => limit_type.to_string()
        )
        .increment(1);
    }

    pub fn rate_limit_degraded(endpoint: &str) {
        counter!("rate_limit_degraded_total", "endpoint" => endpoint.to_string()).increment(1);
    }

    pub fn set_list_size(list: &str, size: usize) {
        gauge!("rate_limit_list_size", "list" => list.to_string()).set(size as f64);
    }

    pub fn abuse_detected(pattern: &str) {
        counter!("abuse_detections_total", "pattern" => pattern.to_string()).increment(1);
    }

    pub fn set_circuit_state(dependency: &str, state: CircuitState) {
        gauge!("circuit_breaker_state", "dependency" => dependency.to_string())
            .set(state.gauge_value());
    }

    pub fn record_circuit_transition(dependency: &str, from: CircuitState, to: CircuitState) {
        counter!(
            "circuit_breaker_transitions_total",
            "dependency" => dependency.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    pub fn record_circuit_rejection(dependency: &str) {
        counter!("circuit_breaker_rejections_total", "dependency" => dependency.to_string())
            .increment(1);
    }

    pub fn cache_hit(layer: &str) {
        counter!("cache_hits_total", "layer" => layer.to_string()).increment(1);
    }

    pub fn cache_miss(layer: &str) {
        counter!("cache_misses_total", "layer" => layer.to_string()).increment(1);
    }

    pub fn cache_error(operation: &str) {
        counter!("cache_errors_total", "operation" => operation.to_string()).increment(1);
    }
}
