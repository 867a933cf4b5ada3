//! Abuse detection layered on top of rate limiting.
//!
//! Two short-window histograms are kept per identifier: identical normalized
//! queries, and the sequence of numeric resource IDs requested. Flags are
//! advisory; the orchestrator decides whether to throttle. Repeated flags can
//! escalate an identifier to the rate limiter's blocklist.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use shopsearch_core::{
    query_hash, redact_identifier, AbusePattern, AbuseSignal, AbuseThresholds, Clock, SystemClock,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::observability::metrics::ResilienceMetrics;

/// A pattern flagged on the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbuseFlag {
    pub pattern: AbusePattern,
    /// Observations in the window that produced the flag.
    pub observed: u32,
    /// This flag pushed the identifier over `escalate_after`.
    pub escalate: bool,
}

#[derive(Debug)]
pub struct AbuseDetector {
    thresholds: AbuseThresholds,
    clock: Arc<dyn Clock>,
    /// `(identifier, query hash)` to request timestamps.
    queries: DashMap<(String, String), VecDeque<DateTime<Utc>>>,
    /// Identifier to `(timestamp, resource id)` in arrival order.
    resources: DashMap<String, VecDeque<(DateTime<Utc>, u64)>>,
    signals: DashMap<(String, AbusePattern), AbuseSignal>,
}

impl AbuseDetector {
    pub fn new(thresholds: AbuseThresholds) -> Self {
        Self::with_clock(thresholds, Arc::new(SystemClock))
    }

    pub fn with_clock(thresholds: AbuseThresholds, clock: Arc<dyn Clock>) -> Self {
        Self {
            thresholds,
            clock,
            queries: DashMap::new(),
            resources: DashMap::new(),
            signals: DashMap::new(),
        }
    }

    pub fn thresholds(&self) -> &AbuseThresholds {
        &self.thresholds
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.thresholds.window())
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    /// Counts one occurrence of `query`. Flags once the identical normalized
    /// query has been seen more than `same_query` times in the window.
    pub fn observe_query(&self, identifier: &str, query: &str) -> Option<AbuseFlag> {
        let now = self.clock.now();
        let cutoff = now - self.window();
        let key = (identifier.to_string(), query_hash(query));

        let count = {
            let mut log = self.queries.entry(key).or_default();
            while log.front().map(|ts| *ts <= cutoff).unwrap_or(false) {
                log.pop_front();
            }
            log.push_back(now);
            log.len() as u32
        };

        if count > self.thresholds.same_query {
            Some(self.flag(identifier, AbusePattern::SameQuery, count, now))
        } else {
            None
        }
    }

    /// Tracks a requested resource ID. Non-numeric IDs are ignored. Flags when
    /// the most recent requests form a run of consecutive IDs at least
    /// `sequential_run` long.
    pub fn observe_resource(&self, identifier: &str, resource_id: &str) -> Option<AbuseFlag> {
        let id = parse_resource_id(resource_id)?;
        let now = self.clock.now();
        let cutoff = now - self.window();

        let run = {
            let mut log = self.resources.entry(identifier.to_string()).or_default();
            while log.front().map(|(ts, _)| *ts <= cutoff).unwrap_or(false) {
                log.pop_front();
            }
            log.push_back((now, id));
            trailing_run(log.iter().map(|(_, id)| *id))
        };

        if run >= self.thresholds.sequential_run {
            Some(self.flag(identifier, AbusePattern::SequentialEnumeration, run, now))
        } else {
            None
        }
    }

    fn flag(&self, identifier: &str, pattern: AbusePattern, observed: u32, now: DateTime<Utc>) -> AbuseFlag {
        let window = self.window();
        let mut signal = self
            .signals
            .entry((identifier.to_string(), pattern))
            .or_insert_with(|| AbuseSignal {
                count: 0,
                ..AbuseSignal::new(identifier, pattern, now)
            });

        if signal.is_expired(now, window) {
            *signal = AbuseSignal {
                count: 0,
                ..AbuseSignal::new(identifier, pattern, now)
            };
        }
        signal.observe(now);

        let escalate = match self.thresholds.escalate_after {
            Some(after) if !signal.escalated && signal.count >= after => {
                signal.escalated = true;
                true
            }
            _ => false,
        };

        warn!(
            identifier = %redact_identifier(identifier),
            pattern = %pattern,
            observed,
            flags = signal.count,
            escalate,
            "abuse_detected"
        );
        ResilienceMetrics::abuse_detected(pattern.as_str());

        AbuseFlag {
            pattern,
            observed,
            escalate,
        }
    }

    /// Live signals, escalated ones included.
    pub fn signals(&self) -> Vec<AbuseSignal> {
        let now = self.clock.now();
        let window = self.window();
        let mut signals: Vec<AbuseSignal> = self
            .signals
            .iter()
            .filter(|entry| !entry.value().is_expired(now, window))
            .map(|entry| entry.value().clone())
            .collect();
        signals.sort_by(|a, b| a.identifier.cmp(&b.identifier).then(a.first_seen.cmp(&b.first_seen)));
        signals
    }

    /// Drops expired signals and histograms with nothing left in the window.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.window();
        let cutoff = now - window;
        let before = self.signals.len() + self.queries.len() + self.resources.len();

        self.signals.retain(|_, signal| !signal.is_expired(now, window));
        self.queries
            .retain(|_, log| log.back().map(|ts| *ts > cutoff).unwrap_or(false));
        self.resources
            .retain(|_, log| log.back().map(|(ts, _)| *ts > cutoff).unwrap_or(false));

        let after = self.signals.len() + self.queries.len() + self.resources.len();
        before.saturating_sub(after)
    }

    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let detector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = detector.purge_expired();
                debug!(purged, "abuse_detector_cleanup");
            }
        })
    }
}

fn parse_resource_id(resource_id: &str) -> Option<u64> {
    let digits = resource_id.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Length of the run of `+1` steps ending at the last ID.
fn trailing_run(ids: impl DoubleEndedIterator<Item = u64>) -> u32 {
    let mut ids = ids.rev();
    let Some(mut next) = ids.next() else {
        return 0;
    };
    let mut run = 1;
    for id in ids {
        if id.checked_add(1) != Some(next) {
            break;
        }
        run += 1;
        next = id;
    }
    run
}
