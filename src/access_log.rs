//! C11 Access Logger: appends one JSON line per completed request to
//! `logs/requests/YYYY-MM-DD.jsonl` (§6), with a daily retention sweep.
//!
//! This is distinct from [`crate::traffic::TrafficLog`], which is an
//! in-memory ring buffer feeding `/admin/traffic` and `/metrics`. This
//! logger is the durable record spec.md requires; the ring buffer is purely
//! an ambient ops convenience carried from the teacher.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::decision::RoutingDecision;

/// Masked view of a request's auth-bearing headers — never the raw secret.
/// Keeps the first 6 and last 4 characters (§4.10); shorter values collapse
/// to `***` entirely rather than risk exposing most of a short secret.
fn mask_auth_header(value: &str) -> String {
    if value.len() <= 10 {
        "***".to_string()
    } else {
        format!("{}...{}", &value[..6], &value[value.len() - 4..])
    }
}

/// Build a masked header summary for logging: every header is kept, but
/// `authorization`/`x-api-key`/`api-key` values are masked in place.
pub fn mask_headers(headers: &http::HeaderMap) -> serde_json::Map<String, Value> {
    const SENSITIVE: &[&str] = &["authorization", "x-api-key", "api-key", "anthropic-auth-token"];
    let mut out = serde_json::Map::new();
    for (name, value) in headers.iter() {
        let name_str = name.as_str().to_lowercase();
        let value_str = value.to_str().unwrap_or("<non-utf8>");
        let shown = if SENSITIVE.contains(&name_str.as_str()) {
            mask_auth_header(value_str)
        } else {
            value_str.to_string()
        };
        out.insert(name_str, Value::String(shown));
    }
    out
}

/// Scan SSE `data: {...}` lines for a trailing `usage` object, the way
/// streaming responses report token counts only on their final event.
pub fn extract_usage_from_sse(buffer: &str) -> Option<Value> {
    let mut last_usage = None;
    for line in buffer.lines() {
        let Some(payload) = line.strip_prefix("data:") else { continue };
        let payload = payload.trim();
        if payload == "[DONE]" {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(payload) {
            if let Some(usage) = value.get("usage") {
                last_usage = Some(usage.clone());
            }
        }
    }
    last_usage
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub method: String,
    pub path: String,
    pub requested_alias: Option<String>,
    pub routed_alias: Option<String>,
    pub decision: Option<String>,
    /// Category/rule name the model router matched, if any (§4.10).
    pub hit_rule: Option<String>,
    pub target_backend_url: Option<String>,
    pub target_upstream_model: Option<String>,
    pub provider_tag: Option<String>,
    /// Non-default per-target param overrides actually applied (§4.5/§4.10).
    pub param_summary: Option<Value>,
    pub status: u16,
    pub retry_count: u32,
    /// Target identities tried this request, in attempt order.
    pub tried_targets: Vec<String>,
    pub signature_recovered: bool,
    pub request_headers: serde_json::Map<String, Value>,
    /// Full body when `LOG_VERBOSE=1`, otherwise a bounded preview.
    pub request_summary: Option<String>,
    pub response_summary: Option<String>,
    pub usage: Option<Value>,
    pub error: Option<String>,
    /// C2 factor extraction output for this request, for offline analysis.
    pub factors: Option<Value>,
    /// Ordered trace of category/rule evaluation, when `log_factors` is on.
    pub eval_trace: Option<Value>,
    /// Auto-upgrade record: `{source, target, reasons, ...}` when triggered.
    pub auto_upgrade: Option<Value>,
    /// `(failure_streak, success_streak)` for the health key consulted.
    pub model_health: Option<Value>,
    /// What happened to the sticky binding this request: `hit`, `set`,
    /// `cleared`, or absent when stickiness wasn't in play.
    pub sticky_action: Option<String>,
    /// Upstream response kind from the classifier (`success|auth|...`).
    pub classified_kind: Option<String>,
    /// Cooldown duration tag applied as a result of this response, if any.
    pub cooldown_applied: Option<String>,
    /// Content-encoding the response body was decoded from, if compressed.
    pub decoded_encoding: Option<String>,
    pub decode_error: Option<String>,
}

impl AccessLogRecord {
    pub fn decision_tag(&self) -> Option<&str> {
        self.decision.as_deref()
    }
}

pub fn decision_to_string(decision: &RoutingDecision) -> String {
    decision.to_string()
}

/// Appends JSONL access-log records to `logs/requests/YYYY-MM-DD.jsonl`
/// under `base_dir`, and sweeps files older than `retention_days`.
pub struct AccessLogger {
    base_dir: PathBuf,
    retention_days: u64,
    write_lock: Mutex<()>,
}

impl AccessLogger {
    pub fn new(base_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self { base_dir: base_dir.into(), retention_days, write_lock: Mutex::new(()) }
    }

    fn file_path_for(&self, date: DateTime<Utc>) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub async fn append(&self, record: &AccessLogRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.file_path_for(record.timestamp);

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Delete dated log files older than `retention_days` (§6). Files not
    /// matching the `YYYY-MM-DD.jsonl` naming scheme are left untouched.
    pub async fn sweep_retention(&self) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);
        let mut removed = 0usize;

        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(date) = file_date(&path) {
                if date < cutoff.date_naive() {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn file_date(path: &Path) -> Option<chrono::NaiveDate> {
    let stem = path.file_stem()?.to_str()?;
    chrono::NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> AccessLogRecord {
        AccessLogRecord {
            request_id: "r1".to_string(),
            timestamp: Utc::now(),
            duration_ms: 120,
            method: "POST".to_string(),
            path: "/v1/chat/completions".to_string(),
            requested_alias: Some("auto".to_string()),
            routed_alias: Some("auto".to_string()),
            decision: Some("no_rule".to_string()),
            hit_rule: None,
            target_backend_url: Some("https://example.com".to_string()),
            target_upstream_model: Some("claude-sonnet-4-5".to_string()),
            provider_tag: None,
            param_summary: None,
            status: 200,
            retry_count: 0,
            tried_targets: vec![],
            signature_recovered: false,
            request_headers: Default::default(),
            request_summary: Some("hi".to_string()),
            response_summary: Some("ok".to_string()),
            usage: None,
            error: None,
            factors: None,
            eval_trace: None,
            auto_upgrade: None,
            model_health: None,
            sticky_action: None,
            classified_kind: Some("success".to_string()),
            cooldown_applied: None,
            decoded_encoding: None,
            decode_error: None,
        }
    }

    #[tokio::test]
    async fn append_creates_dated_file_with_jsonl_line() {
        let dir = std::env::temp_dir().join(format!("lmg-access-log-{}", std::process::id()));
        let logger = AccessLogger::new(&dir, 90);
        logger.append(&sample_record()).await.unwrap();

        let expected = dir.join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")));
        let content = tokio::fs::read_to_string(&expected).await.unwrap();
        assert!(content.contains("\"request_id\":\"r1\""));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn sweep_retention_removes_old_files_only() {
        let dir = std::env::temp_dir().join(format!("lmg-access-log-sweep-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("2000-01-01.jsonl"), "{}\n").await.unwrap();
        tokio::fs::write(dir.join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d"))), "{}\n")
            .await
            .unwrap();
        tokio::fs::write(dir.join("not-a-date.txt"), "irrelevant").await.unwrap();

        let logger = AccessLogger::new(&dir, 90);
        let removed = logger.sweep_retention().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.join("2000-01-01.jsonl").exists());
        assert!(dir.join("not-a-date.txt").exists());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[test]
    fn mask_auth_header_preserves_only_edges() {
        assert_eq!(mask_auth_header("sk-ant-abcdefgh1234"), "sk-ant...1234");
        assert_eq!(mask_auth_header("short"), "***");
    }

    #[test]
    fn extract_usage_from_sse_takes_last_usage_event() {
        let buffer = "data: {\"usage\": {\"total_tokens\": 1}}\n\
                       data: {\"usage\": {\"total_tokens\": 42}}\n\
                       data: [DONE]\n";
        let usage = extract_usage_from_sse(buffer).unwrap();
        assert_eq!(usage["total_tokens"], json!(42));
    }

    #[test]
    fn extract_usage_from_sse_returns_none_without_usage() {
        let buffer = "data: {\"choices\": []}\n";
        assert!(extract_usage_from_sse(buffer).is_none());
    }
}
