use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbusePattern {
    /// The same normalized query repeated past the threshold.
    SameQuery,
    /// A dense run of consecutive resource IDs.
    SequentialEnumeration,
}

impl AbusePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbusePattern::SameQuery => "same_query",
            AbusePattern::SequentialEnumeration => "sequential_enumeration",
        }
    }
}

impl fmt::Display for AbusePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suspicious pattern observed for one identifier.
///
/// Created on the first flag, incremented on repeats, and dropped once
/// `last_seen` falls out of the abuse window unless it was escalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbuseSignal {
    pub identifier: String,
    pub pattern: AbusePattern,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub escalated: bool,
}

impl AbuseSignal {
    pub fn new(identifier: impl Into<String>, pattern: AbusePattern, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            pattern,
            count: 1,
            first_seen: now,
            last_seen: now,
            escalated: false,
        }
    }

    pub fn observe(&mut self, now: DateTime<Utc>) {
        self.count = self.count.saturating_add(1);
        self.last_seen = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        !self.escalated && now - self.last_seen >= window
    }
}
