//! C6 Request Rewriter: deep-clones the incoming body and headers, then
//! applies the selected [`Target`]'s per-target overrides before the
//! request is forwarded (§4.5).
//!
//! Every rewrite here is a documented, narrow field mutation — this module
//! must never do open-ended content transformation (that's explicitly out
//! of scope, §1 Non-goals). Idempotence matters: running the rewriter twice
//! on its own output must be a no-op (§8 round-trip law), so every step
//! either replaces a field outright or is naturally stable on a second pass
//! (clamping an already-clamped value, merging an already-merged header).

use http::HeaderMap;
use serde_json::Value;

use crate::config::Target;

/// Rewrite the request body in place for the selected target: substitutes
/// the upstream model name, applies the target's thinking/token-limit
/// overrides, clamps `thinking.budget_tokens` against `max_tokens`, and
/// strips `metadata` for providers that reject it (minimax).
pub fn rewrite_body(body: &Value, target: &Target) -> Value {
    let mut body = body.clone();
    let Value::Object(ref mut map) = body else {
        return body;
    };

    map.insert(
        "model".to_string(),
        Value::String(model_name_with_thinking_level(&target.upstream_model, target.params.thinking_level.as_deref())),
    );

    if let Some(effort) = &target.params.reasoning_effort {
        if !effort.is_empty() {
            map.insert("reasoning_effort".to_string(), Value::String(effort.clone()));
        }
    }

    if let Some(max_default) = target.params.max_tokens_default {
        map.entry("max_tokens").or_insert_with(|| Value::from(max_default));
    }
    if let Some(max_cap) = target.params.max_tokens_max {
        if let Some(current) = map.get("max_tokens").and_then(Value::as_u64) {
            if current > max_cap {
                map.insert("max_tokens".to_string(), Value::from(max_cap));
            }
        }
    }
    if let Some(budget_cap) = target.params.thinking_budget_max {
        clamp_thinking_budget(map, budget_cap);
    }

    reconcile_thinking_budget_vs_max_tokens(map);

    if target.provider_tag.as_deref() == Some("minimax") {
        map.remove("metadata");
    }

    body
}

/// Appends `(<thinking_level>)` to the upstream model name, unless the name
/// already carries a parenthesized suffix (§4.5).
fn model_name_with_thinking_level(model: &str, thinking_level: Option<&str>) -> String {
    match thinking_level {
        Some(level) if !model.ends_with(')') => format!("{model}({level})"),
        _ => model.to_string(),
    }
}

fn clamp_thinking_budget(map: &mut serde_json::Map<String, Value>, cap: u64) {
    if let Some(Value::Object(thinking)) = map.get_mut("thinking") {
        if let Some(budget) = thinking.get("budget_tokens").and_then(Value::as_u64) {
            if budget > cap {
                thinking.insert("budget_tokens".to_string(), Value::from(cap));
            }
        }
    }
}

/// `thinking.budget_tokens` must stay strictly below `max_tokens`: when the
/// budget has caught up to (or exceeded) the final `max_tokens`, clamp it to
/// `max_tokens - 1`. Only when `max_tokens <= 1` — leaving no room for any
/// positive budget — is `budget_tokens` removed, and only that field; the
/// `thinking` object itself is left in place.
fn reconcile_thinking_budget_vs_max_tokens(map: &mut serde_json::Map<String, Value>) {
    let max_tokens = map.get("max_tokens").and_then(Value::as_u64);
    let Some(max_tokens) = max_tokens else { return };

    let budget = match map.get("thinking") {
        Some(Value::Object(thinking)) => thinking.get("budget_tokens").and_then(Value::as_u64),
        _ => None,
    };
    let Some(budget) = budget else { return };

    if budget >= max_tokens {
        let Some(Value::Object(thinking)) = map.get_mut("thinking") else { return };
        if max_tokens <= 1 {
            thinking.remove("budget_tokens");
        } else {
            thinking.insert("budget_tokens".to_string(), Value::from(max_tokens - 1));
        }
    }
}

/// Rewrite outbound headers for the selected target: merges
/// `anthropic-beta` feature lists (comma-separated, case-insensitive
/// dedup, insertion order preserved), applies `extra_headers`, and
/// recomputes `content-length` for the rewritten body.
pub fn rewrite_headers(headers: &mut HeaderMap, target: &Target, body_len: usize) {
    if let Some(beta) = &target.params.anthropic_beta {
        merge_comma_header(headers, "anthropic-beta", beta);
    }

    for (key, value) in &target.params.extra_headers {
        if let (Ok(name), Ok(val)) = (
            http::HeaderName::from_bytes(key.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            headers.insert(name, val);
        }
    }

    if let Ok(len) = http::HeaderValue::from_str(&body_len.to_string()) {
        headers.insert(http::header::CONTENT_LENGTH, len);
    }
}

fn merge_comma_header(headers: &mut HeaderMap, name: &str, addition: &str) {
    let existing = headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for part in existing.split(',').chain(addition.split(',')) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if seen.insert(part.to_lowercase()) {
            merged.push(part.to_string());
        }
    }

    if let Ok(header_name) = http::HeaderName::from_bytes(name.as_bytes()) {
        if let Ok(value) = http::HeaderValue::from_str(&merged.join(",")) {
            headers.insert(header_name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetParams;
    use serde_json::json;

    fn target_with_params(params: TargetParams) -> Target {
        Target {
            backend_url: "https://example.com".to_string(),
            upstream_model: "claude-sonnet-4-5".to_string(),
            weight: 1,
            provider_tag: None,
            provider_instance: "example".to_string(),
            params,
        }
    }

    #[test]
    fn substitutes_model_field() {
        let body = json!({"model": "auto", "messages": []});
        let rewritten = rewrite_body(&body, &target_with_params(TargetParams::default()));
        assert_eq!(rewritten["model"], "claude-sonnet-4-5");
    }

    #[test]
    fn thinking_level_appended_to_model_name() {
        let body = json!({"model": "auto"});
        let mut params = TargetParams::default();
        params.thinking_level = Some("high".to_string());
        let rewritten = rewrite_body(&body, &target_with_params(params));
        assert_eq!(rewritten["model"], "claude-sonnet-4-5(high)");
    }

    #[test]
    fn thinking_level_not_appended_when_model_already_has_parenthesized_suffix() {
        let body = json!({"model": "auto"});
        let mut params = TargetParams::default();
        params.thinking_level = Some("high".to_string());
        let mut target = target_with_params(params);
        target.upstream_model = "claude-sonnet-4-5(low)".to_string();
        let rewritten = rewrite_body(&body, &target);
        assert_eq!(rewritten["model"], "claude-sonnet-4-5(low)");
    }

    #[test]
    fn reasoning_effort_override_applied_when_non_empty() {
        let body = json!({"model": "auto"});
        let mut params = TargetParams::default();
        params.reasoning_effort = Some("high".to_string());
        let rewritten = rewrite_body(&body, &target_with_params(params));
        assert_eq!(rewritten["reasoning_effort"], "high");
    }

    #[test]
    fn empty_reasoning_effort_is_not_applied() {
        let body = json!({"model": "auto"});
        let mut params = TargetParams::default();
        params.reasoning_effort = Some(String::new());
        let rewritten = rewrite_body(&body, &target_with_params(params));
        assert!(rewritten.get("reasoning_effort").is_none());
    }

    #[test]
    fn clamps_max_tokens_to_cap() {
        let body = json!({"model": "auto", "max_tokens": 10000});
        let mut params = TargetParams::default();
        params.max_tokens_max = Some(4096);
        let rewritten = rewrite_body(&body, &target_with_params(params));
        assert_eq!(rewritten["max_tokens"], 4096);
    }

    #[test]
    fn inserts_default_max_tokens_when_absent() {
        let body = json!({"model": "auto"});
        let mut params = TargetParams::default();
        params.max_tokens_default = Some(2048);
        let rewritten = rewrite_body(&body, &target_with_params(params));
        assert_eq!(rewritten["max_tokens"], 2048);
    }

    #[test]
    fn thinking_budget_reduced_below_max_tokens() {
        let body = json!({
            "model": "auto",
            "max_tokens": 4096,
            "thinking": {"type": "enabled", "budget_tokens": 4096}
        });
        let rewritten = rewrite_body(&body, &target_with_params(TargetParams::default()));
        let budget = rewritten["thinking"]["budget_tokens"].as_u64().unwrap();
        assert!(budget < 4096);
    }

    #[test]
    fn thinking_budget_clamped_just_below_small_max_tokens() {
        let body = json!({
            "model": "auto",
            "max_tokens": 512,
            "thinking": {"type": "enabled", "budget_tokens": 512}
        });
        let rewritten = rewrite_body(&body, &target_with_params(TargetParams::default()));
        assert_eq!(rewritten["thinking"]["budget_tokens"], 511);
    }

    #[test]
    fn thinking_budget_field_removed_when_max_tokens_is_one() {
        let body = json!({
            "model": "auto",
            "max_tokens": 1,
            "thinking": {"type": "enabled", "budget_tokens": 4}
        });
        let rewritten = rewrite_body(&body, &target_with_params(TargetParams::default()));
        assert!(rewritten["thinking"].get("budget_tokens").is_none());
        assert!(rewritten.get("thinking").is_some());
    }

    #[test]
    fn minimax_provider_strips_metadata() {
        let body = json!({"model": "auto", "metadata": {"user_id": "u1"}});
        let mut target = target_with_params(TargetParams::default());
        target.provider_tag = Some("minimax".to_string());
        let rewritten = rewrite_body(&body, &target);
        assert!(rewritten.get("metadata").is_none());
    }

    #[test]
    fn rewrite_is_idempotent() {
        let body = json!({
            "model": "auto",
            "max_tokens": 8000,
            "thinking": {"type": "enabled", "budget_tokens": 7000}
        });
        let mut params = TargetParams::default();
        params.max_tokens_max = Some(4096);
        let target = target_with_params(params);
        let once = rewrite_body(&body, &target);
        let twice = rewrite_body(&once, &target);
        assert_eq!(once, twice);
    }

    #[test]
    fn anthropic_beta_merge_dedups_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("anthropic-beta", "tools-2024-04-04,Foo-Bar".parse().unwrap());
        let mut params = TargetParams::default();
        params.anthropic_beta = Some("foo-bar,extended-cache".to_string());
        let target = target_with_params(params);
        rewrite_headers(&mut headers, &target, 0);
        let value = headers.get("anthropic-beta").unwrap().to_str().unwrap();
        assert_eq!(value, "tools-2024-04-04,Foo-Bar,extended-cache");
    }

    #[test]
    fn content_length_recomputed() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, "5".parse().unwrap());
        let target = target_with_params(TargetParams::default());
        rewrite_headers(&mut headers, &target, 1234);
        assert_eq!(headers.get(http::header::CONTENT_LENGTH).unwrap(), "1234");
    }
}
