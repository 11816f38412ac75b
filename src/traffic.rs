//! In-memory ring-buffer of recent requests, exposed through the admin API
//! and `/metrics`. Purely an ops convenience: the durable record of record is
//! [`crate::access_log::AccessLogger`] (C11); this buffer just gives `/admin`
//! and `/metrics` a cheap recent-activity window without touching disk.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    ///
    /// `capacity` is the maximum number of entries retained. Older entries are
    /// silently dropped once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed request.
    ///
    /// This is a best-effort, non-blocking operation: if the mutex is contended
    /// the entry is dropped rather than blocking the request path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics over all buffered entries.
    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.success).count();
        let retry_count: u64 = entries.iter().map(|e| e.retry_count as u64).sum();

        let mut alias_counts: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        let mut decision_counts: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        for entry in entries.iter() {
            if let Some(alias) = &entry.routed_alias {
                *alias_counts.entry(alias.clone()).or_default() += 1;
            }
            if let Some(decision) = &entry.decision {
                *decision_counts.entry(decision.clone()).or_default() += 1;
            }
        }

        TrafficStats {
            total_requests: total,
            error_count,
            retry_count,
            avg_latency_ms,
            alias_counts,
            decision_counts,
        }
    }
}

/// A single request record, shaped around the routing pipeline's own
/// vocabulary (alias/target identity/decision tag) rather than any one
/// backend's wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// The `model` field as the client sent it, before C3 routing.
    pub requested_alias: Option<String>,
    /// The alias actually used to pick a target (post C3/C4/selector).
    pub routed_alias: Option<String>,
    /// Identity of the target that ultimately served the request, in the
    /// `{provider_instance}/{backend_url}/{upstream_model}` form (see
    /// [`crate::config::TargetIdentity`]'s `Display`).
    pub target: Option<String>,
    /// The routing decision tag (see [`crate::decision::RoutingDecision`]).
    pub decision: Option<String>,
    pub retry_count: u32,
    pub signature_recovered: bool,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TrafficEntry {
    pub fn new(latency_ms: u64, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            requested_alias: None,
            routed_alias: None,
            target: None,
            decision: None,
            retry_count: 0,
            signature_recovered: false,
            latency_ms,
            success,
            error: None,
        }
    }

    pub fn with_requested_alias(mut self, alias: &str) -> Self {
        self.requested_alias = Some(alias.to_string());
        self
    }

    pub fn with_routed_alias(mut self, alias: &str) -> Self {
        self.routed_alias = Some(alias.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_decision(mut self, decision: &str) -> Self {
        self.decision = Some(decision.to_string());
        self
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn mark_signature_recovered(mut self) -> Self {
        self.signature_recovered = true;
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub retry_count: u64,
    pub avg_latency_ms: f64,
    pub alias_counts: std::collections::HashMap<String, usize>,
    pub decision_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(alias: &str, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new(latency_ms, true).with_routed_alias(alias)
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("auto", 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].routed_alias.as_deref(), Some("auto"));
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("a", 1));
        log.push(make_entry("b", 2));
        log.push(make_entry("c", 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].routed_alias.as_deref(), Some("c"));
        assert_eq!(recent[1].routed_alias.as_deref(), Some("b"));
        assert_eq!(recent[2].routed_alias.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn recent_limits_result_count() {
        let log = TrafficLog::new(20);
        for i in 0..10u64 {
            log.push(make_entry("auto", i));
        }
        let recent = log.recent(3).await;
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("oldest", 1));
        log.push(make_entry("middle", 2));
        log.push(make_entry("newest", 3));
        log.push(make_entry("extra", 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.routed_alias.as_deref() == Some("oldest")));
        assert!(all.iter().any(|e| e.routed_alias.as_deref() == Some("extra")));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert!(stats.alias_counts.is_empty());
    }

    #[tokio::test]
    async fn stats_averages_latency_correctly() {
        let log = TrafficLog::new(10);
        log.push(make_entry("auto", 100));
        log.push(make_entry("auto", 200));
        log.push(make_entry("auto", 300));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stats_counts_requests_per_alias_and_decision() {
        let log = TrafficLog::new(10);
        log.push(make_entry("auto", 10).with_decision("weighted_random"));
        log.push(make_entry("auto", 20).with_decision("sticky_session_model"));
        log.push(make_entry("fast", 30).with_decision("weighted_random"));

        let stats = log.stats().await;
        assert_eq!(stats.alias_counts["auto"], 2);
        assert_eq!(stats.alias_counts["fast"], 1);
        assert_eq!(stats.decision_counts["weighted_random"], 2);
    }

    #[test]
    fn entry_has_unique_ids() {
        let a = make_entry("auto", 1);
        let b = make_entry("auto", 1);
        assert_ne!(a.id, b.id, "every entry must have a unique UUID");
    }

    #[test]
    fn entry_records_success_flag() {
        let ok = TrafficEntry::new(0, true);
        let err = TrafficEntry::new(0, false);
        assert!(ok.success);
        assert!(!err.success);
    }
}
