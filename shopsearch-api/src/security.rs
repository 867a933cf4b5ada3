//! Request admission: sliding-window rate limiting, allowlist/blocklist and
//! abuse detection.

pub mod abuse;
pub mod rate_limit;

pub use abuse::{AbuseDetector, AbuseFlag};
pub use rate_limit::{
    add_rate_limit_headers, extract_client_identity, extract_client_ip, AccessList,
    RateLimitDecision, RateLimitStatus, RateLimiter,
};
