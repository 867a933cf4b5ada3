//! Resilience patterns guarding calls into external dependencies.
//!
//! - **Circuit Breaker**: stops calling a failing dependency for a cool-down
//!   period and probes it with a sampled fraction of traffic afterwards
//! - **Timeout**: bounds every backing-store round trip independently of the breaker
//!
//! # Example
//!
//! ```no_run
//! use shopsearch_api::resilience::{CircuitBreaker, with_timeout};
//! use shopsearch_core::CircuitBreakerSettings;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("redis_cache", CircuitBreakerSettings::default());
//!
//! let result = breaker.call(|| async {
//!     with_timeout(Duration::from_millis(50), async {
//!         Ok::<_, std::io::Error>(42)
//!     }).await
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerRegistry, CircuitBreakerSnapshot,
    CircuitBreakerStats, CircuitState,
};
pub use timeout::{with_timeout, TimeoutError};
