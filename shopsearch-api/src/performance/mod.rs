//! Caching for search and recommendation results.
//!
//! The [`cache::CacheClient`] is a fail-open cache-aside client: the backing
//! store is guarded by a circuit breaker and a short per-call timeout, and
//! any failure reads as a miss.

pub mod cache;

pub use cache::{CacheClient, CacheStatistics};
