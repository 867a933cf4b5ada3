//! Observability: structured logging with request correlation and
//! Prometheus metrics for the resilience layer.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, request_id_middleware, LogConfig, LogFormat, RequestId, REQUEST_ID_HEADER};
pub use metrics::{init_metrics, metrics_handler, MetricsError, ResilienceMetrics};
