//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory ring-buffer window. Because the
//! buffer has a fixed capacity, values represent a **sliding window** of recent
//! requests rather than lifetime counters. Use `TYPE gauge` throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Metric families:
//! - `lmg_window_size`             — entries currently in the ring buffer
//! - `lmg_requests`                — per-alias/outcome request counts
//! - `lmg_latency_ms_sum`          — sum of latencies per alias (for avg)
//! - `lmg_latency_ms_count`        — denominator matching the sum above
//! - `lmg_retries_total`           — sum of retry counts across the window
//! - `lmg_signature_recoveries_total` — requests that used signature recovery (C10)
//! - `lmg_errors_total`            — requests that returned an error

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::router::RouterState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let entries = state.traffic.recent(usize::MAX).await;

    let window_size = entries.len();
    let mut retries: u64 = 0;
    let mut signature_recoveries: u64 = 0;
    let mut errors: u64 = 0;

    // (alias, success) → count
    let mut request_counts: HashMap<(String, bool), u64> = HashMap::new();
    // alias → (latency_sum_ms, count)
    let mut latency: HashMap<String, (u64, u64)> = HashMap::new();

    for e in &entries {
        let alias = e.routed_alias.clone().unwrap_or_else(|| "unresolved".to_string());

        retries += e.retry_count as u64;
        if e.signature_recovered {
            signature_recoveries += 1;
        }
        if !e.success {
            errors += 1;
        }

        *request_counts.entry((alias.clone(), e.success)).or_default() += 1;

        let lat = latency.entry(alias).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP lmg_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE lmg_window_size gauge\n");
    out.push_str(&format!("lmg_window_size {window_size}\n\n"));

    out.push_str("# HELP lmg_requests Request count in the current window, labelled by routed alias and outcome.\n");
    out.push_str("# TYPE lmg_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((alias, success), count) in req_rows {
        let success_str = if *success { "true" } else { "false" };
        out.push_str(&format!("lmg_requests{{alias=\"{alias}\",success=\"{success_str}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP lmg_latency_ms_sum Sum of request latency (ms) in the current window, grouped by alias.\n");
    out.push_str("# TYPE lmg_latency_ms_sum gauge\n");
    out.push_str("# HELP lmg_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE lmg_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (alias, (sum, count)) in lat_rows {
        out.push_str(&format!("lmg_latency_ms_sum{{alias=\"{alias}\"}} {sum}\n"));
        out.push_str(&format!("lmg_latency_ms_count{{alias=\"{alias}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP lmg_retries_total Sum of retry counts across requests in the current window.\n");
    out.push_str("# TYPE lmg_retries_total gauge\n");
    out.push_str(&format!("lmg_retries_total {retries}\n\n"));

    out.push_str("# HELP lmg_signature_recoveries_total Requests in the current window that used thinking-signature cross-model recovery.\n");
    out.push_str("# TYPE lmg_signature_recoveries_total gauge\n");
    out.push_str(&format!("lmg_signature_recoveries_total {signature_recoveries}\n\n"));

    out.push_str("# HELP lmg_errors_total Requests that returned an error in the current window.\n");
    out.push_str("# TYPE lmg_errors_total gauge\n");
    out.push_str(&format!("lmg_errors_total {errors}\n"));

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::traffic::{TrafficEntry, TrafficLog};

    fn mock_log() -> Arc<TrafficLog> {
        let log = Arc::new(TrafficLog::new(100));
        log.push(TrafficEntry::new(120, true).with_routed_alias("fast"));
        log.push(TrafficEntry::new(95, true).with_routed_alias("fast"));
        log.push(TrafficEntry::new(430, true).with_routed_alias("economy"));
        log.push(
            TrafficEntry::new(80, false)
                .with_routed_alias("fast")
                .with_error("upstream 500")
                .with_retry_count(1),
        );
        log
    }

    #[tokio::test]
    async fn window_size_equals_entry_count() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn error_count_is_accurate() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let errors = entries.iter().filter(|e| !e.success).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn latency_sum_is_accurate_for_an_alias() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let sum: u64 = entries
            .iter()
            .filter(|e| e.routed_alias.as_deref() == Some("fast"))
            .map(|e| e.latency_ms)
            .sum();
        assert_eq!(sum, 295);
    }

    #[tokio::test]
    async fn retry_count_sums_across_entries() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let retries: u64 = entries.iter().map(|e| e.retry_count as u64).sum();
        assert_eq!(retries, 1);
    }
}
