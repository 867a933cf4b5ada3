//! Namespaced cache keys.
//!
//! Keys render as `{layer}:{identifier}:{params}` so that invalidation can
//! delete a whole family of entries with a single glob.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::config::CacheTtls;

/// Cache layers, each with its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    QueryResult,
    Feature,
    UserFeature,
    Configuration,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::QueryResult => "query_result",
            CacheLayer::Feature => "feature",
            CacheLayer::UserFeature => "user_feature",
            CacheLayer::Configuration => "configuration",
        }
    }

    pub fn default_ttl(&self, ttls: &CacheTtls) -> Duration {
        let seconds = match self {
            CacheLayer::QueryResult => ttls.query_results,
            CacheLayer::Feature => ttls.features,
            CacheLayer::UserFeature => ttls.user_features,
            CacheLayer::Configuration => ttls.configuration,
        };
        Duration::from_secs(seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    /// Search results for a normalized query.
    Search {
        query_hash: String,
        user_id: Option<String>,
        k: usize,
    },
    /// Recommendations for a user, optionally within a category.
    Recommend {
        user_id: String,
        category: Option<String>,
        k: usize,
    },
    ProductFeature {
        product_id: String,
        name: String,
    },
    UserFeature {
        user_id: String,
        name: String,
    },
    Config(String),
}

impl CacheKey {
    pub fn search(query: &str, user_id: Option<&str>, k: usize) -> Self {
        CacheKey::Search {
            query_hash: query_hash(query),
            user_id: user_id.map(str::to_string),
            k,
        }
    }

    pub fn recommend(user_id: &str, category: Option<&str>, k: usize) -> Self {
        CacheKey::Recommend {
            user_id: user_id.to_string(),
            category: category.map(str::to_string),
            k,
        }
    }

    pub fn layer(&self) -> CacheLayer {
        match self {
            CacheKey::Search { .. } | CacheKey::Recommend { .. } => CacheLayer::QueryResult,
            CacheKey::ProductFeature { .. } => CacheLayer::Feature,
            CacheKey::UserFeature { .. } => CacheLayer::UserFeature,
            CacheKey::Config(_) => CacheLayer::Configuration,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Search {
                query_hash,
                user_id,
                k,
            } => write!(
                f,
                "search:{}:{}:{}",
                query_hash,
                user_id.as_deref().unwrap_or("anonymous"),
                k
            ),
            CacheKey::Recommend {
                user_id,
                category,
                k,
            } => write!(
                f,
                "recommend:{}:{}:{}",
                user_id,
                category.as_deref().unwrap_or("global"),
                k
            ),
            CacheKey::ProductFeature { product_id, name } => {
                write!(f, "feature:product:{}:{}", product_id, name)
            }
            CacheKey::UserFeature { user_id, name } => {
                write!(f, "feature:user:{}:{}", user_id, name)
            }
            CacheKey::Config(name) => write!(f, "config:{}", name),
        }
    }
}

/// Upstream data changes that invalidate cached entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationEvent {
    ProductUpdated { product_id: String },
    UserUpdated { user_id: String },
    RankingWeightsChanged,
    ConfigChanged { name: String },
}

impl InvalidationEvent {
    /// Glob patterns whose keys must be deleted.
    pub fn patterns(&self) -> Vec<String> {
        match self {
            InvalidationEvent::ProductUpdated { product_id } => vec![
                format!("feature:product:{}:*", product_id),
                "search:*".to_string(),
                "recommend:*".to_string(),
            ],
            InvalidationEvent::UserUpdated { user_id } => vec![
                format!("feature:user:{}:*", user_id),
                format!("recommend:{}:*", user_id),
                format!("search:*:{}:*", user_id),
            ],
            InvalidationEvent::RankingWeightsChanged => {
                vec!["search:*".to_string(), "recommend:*".to_string()]
            }
            InvalidationEvent::ConfigChanged { name } => vec![format!("config:{}", name)],
        }
    }
}

/// Trims, lower-cases and collapses inner whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable hash of the normalized query, 32 hex characters.
pub fn query_hash(query: &str) -> String {
    let digest = Sha256::digest(normalize_query(query).as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(32);
    hex
}

/// Matches `key` against a glob where `*` stands for any run of characters.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}
