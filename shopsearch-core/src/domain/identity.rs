use std::fmt;

use serde::{Deserialize, Serialize};

/// Rate-limited endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Search,
    Recommend,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Search => "/search",
            Endpoint::Recommend => "/recommend",
        }
    }

    /// Maps a request path onto its endpoint; `/recommend/u-42` is `/recommend`.
    pub fn from_path(path: &str) -> Option<Self> {
        if path.starts_with("/search") {
            Some(Endpoint::Search)
        } else if path.starts_with("/recommend") {
            Some(Endpoint::Recommend)
        } else {
            None
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which quota column applies to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Ip,
    ApiKey,
}

impl LimitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitType::Ip => "ip",
            LimitType::ApiKey => "api_key",
        }
    }
}

/// Who is calling. API keys take precedence over addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientIdentity {
    Ip(String),
    ApiKey(String),
}

impl ClientIdentity {
    pub fn identifier(&self) -> &str {
        match self {
            ClientIdentity::Ip(ip) => ip,
            ClientIdentity::ApiKey(key) => key,
        }
    }

    pub fn limit_type(&self) -> LimitType {
        match self {
            ClientIdentity::Ip(_) => LimitType::Ip,
            ClientIdentity::ApiKey(_) => LimitType::ApiKey,
        }
    }

    /// Log-safe form of the identifier.
    pub fn redacted(&self) -> String {
        redact_identifier(self.identifier())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.limit_type().as_str(), self.redacted())
    }
}

/// Keeps the first ten characters of long identifiers.
pub fn redact_identifier(identifier: &str) -> String {
    if identifier.chars().count() > 10 {
        let head: String = identifier.chars().take(10).collect();
        format!("{}...", head)
    } else {
        identifier.to_string()
    }
}
