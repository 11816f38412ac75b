//! Request routing pipeline — wires C1–C11 together for a single request:
//! factor extraction (C2), model routing (C3), auto-upgrade (C4), target
//! selection (C5), body/header rewriting (C6), forwarding (C7), response
//! classification (C8), state updates (C9), transparent retry (C10), and
//! access logging (C11).
//!
//! Two kinds of request never enter the pipeline proper: non-`POST` methods
//! and bodies that don't parse as JSON. Both are forwarded straight to
//! `gateway.default_origin` untouched (§4.4) — there's no `model` field to
//! route on.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Instant,
};

use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use tracing::warn;

use crate::{
    access_log::{self, AccessLogRecord, AccessLogger},
    classify::{self, CooldownDuration, FailureKind},
    config::{Config, Target},
    decision::RoutingDecision,
    factors,
    forward::{self, ForwardBody, SseStream},
    model_router,
    retry::{self, RetryState},
    state::StateStore,
    traffic::{TrafficEntry, TrafficLog},
    upgrade,
};

/// Shared application state injected into every request handler via
/// [`axum::extract::State`].
pub struct RouterState {
    /// Atomically-swappable live config; the lock is held only for the
    /// duration of `Arc::clone`, so it never blocks request handling.
    config_lock: Arc<RwLock<Arc<Config>>>,
    /// Path to the config file on disk — used by the hot-reload background task.
    pub config_path: PathBuf,
    /// In-memory ring-buffer of recent requests, exposed through the admin API.
    pub traffic: Arc<TrafficLog>,
    /// Durable JSONL access log (C11).
    pub access_logger: Arc<AccessLogger>,
    /// Sticky/cooldown/health state (C9).
    pub state_store: Arc<StateStore>,
    /// Shared client used to forward requests upstream.
    pub http_client: reqwest::Client,
    /// Gateway start time — used to compute uptime for the status endpoint.
    pub started_at: Instant,
    /// Bearer token required for admin API access. `None` disables admin auth.
    pub admin_token: Option<String>,
}

impl RouterState {
    pub fn new(
        config: Arc<Config>,
        config_path: PathBuf,
        traffic: Arc<TrafficLog>,
        access_logger: Arc<AccessLogger>,
        state_store: Arc<StateStore>,
        http_client: reqwest::Client,
    ) -> Self {
        let admin_token = config
            .gateway
            .admin_token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        Self {
            config_lock: Arc::new(RwLock::new(config)),
            config_path,
            traffic,
            access_logger,
            state_store,
            http_client,
            started_at: Instant::now(),
            admin_token,
        }
    }

    /// Returns a snapshot of the current live config. The `RwLock` is held
    /// only for the duration of `Arc::clone`, so callers get a stable
    /// reference with no contention risk.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }

    /// Atomically replaces the live config. Called only from the hot-reload task.
    pub fn replace_config(&self, new: Arc<Config>) {
        *self.config_lock.write().expect("config lock poisoned") = new;
    }
}

/// The body the client ultimately receives: either a fully-buffered byte
/// string or an SSE passthrough stream.
pub enum RoutedBody {
    Full(Bytes),
    Streamed(SseStream),
}

pub struct RoutedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: RoutedBody,
}

/// Route, forward, and (if warranted) retry a single request.
pub async fn route_request(
    state: &RouterState,
    request_id: &str,
    method: Method,
    path: &str,
    headers: HeaderMap,
    raw_body: Bytes,
) -> anyhow::Result<RoutedResponse> {
    let start = Instant::now();
    let config = state.config();
    let method_str = method.as_str().to_string();

    let parsed_body = if method == Method::POST {
        serde_json::from_slice::<Value>(&raw_body).ok()
    } else {
        None
    };

    let Some(body) = parsed_body else {
        let masked_headers = access_log::mask_headers(&headers);
        let forwarded = forward::forward(
            &state.http_client,
            &config.gateway.default_origin,
            path,
            method,
            headers,
            raw_body,
            false,
        )
        .await?;
        let routed = into_routed_response(forwarded.status, forwarded.headers, forwarded.body);

        let record = AccessLogRecord {
            request_id: request_id.to_string(),
            timestamp: chrono::Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            method: method_str,
            path: path.to_string(),
            requested_alias: None,
            routed_alias: None,
            decision: None,
            hit_rule: None,
            target_backend_url: None,
            target_upstream_model: None,
            provider_tag: None,
            param_summary: None,
            status: routed.status.as_u16(),
            retry_count: 0,
            tried_targets: vec![],
            signature_recovered: false,
            request_headers: masked_headers,
            request_summary: None,
            response_summary: None,
            usage: None,
            error: None,
            factors: None,
            eval_trace: None,
            auto_upgrade: None,
            model_health: None,
            sticky_action: None,
            classified_kind: None,
            cooldown_applied: None,
            decoded_encoding: None,
            decode_error: None,
        };
        state.traffic.push(
            TrafficEntry::new(record.duration_ms, routed.status.is_success())
                .with_decision("passthrough_non_json"),
        );
        spawn_append(Arc::clone(&state.access_logger), record);

        return Ok(routed);
    };

    let factors = factors::extract(&body);
    let requested_alias = factors.requested_model.clone().unwrap_or_else(|| "auto".to_string());
    let raw_session_key = factors::session_key(&headers, &body);
    let health_key = raw_session_key
        .as_deref()
        .map(factors::hash_session_key)
        .unwrap_or_else(|| "anon".to_string());

    let route_result =
        model_router::route(&config.router, &config.route_table, &requested_alias, &factors);
    let (failure_streak, _) = state.state_store.health_status(&health_key, &route_result.alias);
    let upgraded = upgrade::apply(
        &config.router.auto_upgrade,
        &config.route_table,
        &route_result.alias,
        &factors,
        failure_streak,
    );

    let routed_alias = upgraded.clone().unwrap_or_else(|| route_result.alias.clone());

    let target_alias = if config.router.shadow_only { requested_alias.clone() } else { routed_alias.clone() };

    let eval_trace = if config.router.log_factors || config.router.shadow_only {
        Some(serde_json::json!({
            "requested_alias": requested_alias,
            "resolved_alias": route_result.alias,
            "decision": route_result.decision.to_string(),
            "upgraded_to": upgraded,
            "shadow_only": config.router.shadow_only,
        }))
    } else {
        None
    };
    let auto_upgrade_info = upgraded
        .as_ref()
        .map(|to| serde_json::json!({ "from": route_result.alias, "to": to }));

    let selection =
        selector_select(&config, &state.state_store, &target_alias, factors.thinking_requested, raw_session_key.as_deref());

    let Some(first_target) = selection.target else {
        let masked_headers = access_log::mask_headers(&headers);
        let forwarded = forward::forward(
            &state.http_client,
            &config.gateway.default_origin,
            path,
            method,
            headers,
            raw_body,
            factors.stream,
        )
        .await?;
        let routed = into_routed_response(forwarded.status, forwarded.headers, forwarded.body);

        log_and_record(
            state,
            request_id,
            &method_str,
            path,
            start,
            &routed,
            masked_headers,
            Some(&requested_alias),
            Some(&selection.chosen_alias),
            &selection.decision,
            None,
            0,
            &[],
            false,
            None,
            eval_trace,
            auto_upgrade_info,
            None,
            None,
            None,
            None,
        );
        return Ok(routed);
    };

    let mut effective_alias = selection.chosen_alias.clone();
    let mut current_decision = selection.decision.clone();
    let mut target = first_target;
    let mut retry_state = RetryState::default();
    let mut tried_targets: Vec<String> = Vec::new();
    let mut cooldown_applied: Option<String> = None;
    let mut classified_kind: Option<String> = None;
    let mut sticky_action: Option<String> = None;

    let tunables = &config.tunables;

    let final_forward = loop {
        let rewritten_body = crate::rewrite::rewrite_body(&body, &target);
        let body_bytes = Bytes::from(serde_json::to_vec(&rewritten_body)?);
        let mut fwd_headers = headers.clone();
        crate::rewrite::rewrite_headers(&mut fwd_headers, &target, body_bytes.len());

        let forwarded = forward::forward(
            &state.http_client,
            &target.backend_url,
            path,
            method.clone(),
            fwd_headers,
            body_bytes,
            factors.stream,
        )
        .await?;

        tried_targets.push(target.identity().to_string());
        let status = forwarded.status;

        let (classification, decoded_encoding, decode_error) = match &forwarded.body {
            ForwardBody::Streamed(_) => {
                (classify::classify(status.as_u16(), "", factors.has_thinking_signature), None, None)
            }
            ForwardBody::Buffered { bytes, decoded_text, normalized } => {
                if status.is_success() {
                    (
                        classify::Classification {
                            kind: FailureKind::Success,
                            cooldown: None,
                            clear_sticky: false,
                            retriable_kind: false,
                        },
                        None,
                        None,
                    )
                } else {
                    let text = decoded_text.clone().unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned());
                    let summary = match serde_json::from_str::<Value>(&text) {
                        Ok(value) => classify::summarize(&value),
                        Err(_) => text.to_lowercase(),
                    };
                    let decoded_encoding = forwarded
                        .headers
                        .get(http::header::CONTENT_ENCODING)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let decode_error =
                        if *normalized { Some("upstream body normalized before classification".to_string()) } else { None };
                    (classify::classify(status.as_u16(), &summary, factors.has_thinking_signature), decoded_encoding, decode_error)
                }
            }
        };
        classified_kind = Some(
            match classification.kind {
                FailureKind::Success => "success",
                FailureKind::Auth => "auth",
                FailureKind::Signature => "signature",
                FailureKind::Transient => "transient",
                FailureKind::Client => "client",
                FailureKind::Other => "other",
            }
            .to_string(),
        );

        if let Some((kind, duration_tag)) = classification.cooldown {
            let duration = cooldown_duration(duration_tag, tunables);
            state.state_store.set_cooldown(&effective_alias, target.identity(), kind, duration);
            cooldown_applied = Some(format!("{duration_tag:?}"));
        }

        if classification.kind == FailureKind::Success {
            state.state_store.record_success(&health_key, &route_result.alias, tunables.model_health_ttl);
            if let Some(key) = raw_session_key.as_deref() {
                let thinking_locked =
                    selection.sticky_update.as_ref().map(|u| u.thinking_locked).unwrap_or(factors.thinking_requested);
                state.state_store.set_sticky(
                    key.to_string(),
                    effective_alias.clone(),
                    target.identity(),
                    thinking_locked,
                    tunables.sticky_ttl,
                    tunables.max_sticky_keys,
                );
                sticky_action = Some("set".to_string());
            }
            break (forwarded, decoded_encoding, decode_error);
        }

        state.state_store.record_failure(&health_key, &route_result.alias, tunables.model_health_ttl);
        if classification.clear_sticky {
            if let Some(key) = raw_session_key.as_deref() {
                state.state_store.clear_sticky(key, &effective_alias);
                sticky_action = Some("cleared".to_string());
            }
        }

        let is_streaming = factors.stream;
        if retry::should_retry_ordinary(&classification, true, is_streaming, status.as_u16(), &retry_state, tunables, false) {
            if let Some(next) = retry::next_target(&config.route_table, &effective_alias, &retry_state) {
                retry_state.retry_count += 1;
                target = next;
                continue;
            }
        }

        if classification.kind == FailureKind::Signature && !is_streaming {
            if let Some(group) = factors::extract_thinking_signature_group(&body) {
                if let Some((new_alias, new_target, new_decision)) = retry::attempt_signature_recovery(
                    &config.route_table,
                    &state.state_store,
                    &group,
                    &effective_alias,
                    &retry_state,
                ) {
                    retry_state.signature_recovery_used = true;
                    retry_state.retry_count += 1;
                    effective_alias = new_alias;
                    current_decision = new_decision;
                    target = new_target;
                    continue;
                }
            }
        }

        break (forwarded, decoded_encoding, decode_error);
    };

    let (forwarded, decoded_encoding, decode_error) = final_forward;
    let routed = into_routed_response(forwarded.status, forwarded.headers, forwarded.body);
    let masked_headers = access_log::mask_headers(&headers);

    log_and_record(
        state,
        request_id,
        &method_str,
        path,
        start,
        &routed,
        masked_headers,
        Some(&requested_alias),
        Some(&effective_alias),
        &current_decision,
        Some(&target),
        retry_state.retry_count,
        &tried_targets,
        retry_state.signature_recovery_used,
        classified_kind.as_deref(),
        eval_trace,
        auto_upgrade_info,
        sticky_action,
        cooldown_applied,
        decoded_encoding,
        decode_error,
    );

    Ok(routed)
}

/// Thin wrapper so the pipeline reads `RouteTable` through `Config` without
/// re-threading a separate borrow everywhere.
fn selector_select(
    config: &Config,
    state_store: &StateStore,
    alias: &str,
    thinking_requested: bool,
    session_key: Option<&str>,
) -> crate::selector::SelectionResult {
    crate::selector::select(&config.route_table, state_store, alias, thinking_requested, session_key)
}

fn cooldown_duration(tag: CooldownDuration, tunables: &crate::config::Tunables) -> std::time::Duration {
    match tag {
        CooldownDuration::Auth => tunables.auth_cooldown,
        CooldownDuration::Validation => tunables.validation_cooldown,
        CooldownDuration::Quota => tunables.quota_cooldown,
        CooldownDuration::TransientLight => tunables.transient_cooldown,
        CooldownDuration::TransientHeavy => tunables.transient_heavy_cooldown,
        CooldownDuration::Signature => tunables.signature_cooldown,
    }
}

fn into_routed_response(status: StatusCode, headers: HeaderMap, body: ForwardBody) -> RoutedResponse {
    match body {
        ForwardBody::Streamed(stream) => RoutedResponse { status, headers, body: RoutedBody::Streamed(stream) },
        ForwardBody::Buffered { bytes, decoded_text, normalized } => {
            if normalized {
                let text = decoded_text.unwrap_or_default();
                let mut headers = headers;
                headers.remove(http::header::CONTENT_ENCODING);
                if let Ok(len) = http::HeaderValue::from_str(&text.len().to_string()) {
                    headers.insert(http::header::CONTENT_LENGTH, len);
                }
                RoutedResponse { status, headers, body: RoutedBody::Full(Bytes::from(text)) }
            } else {
                RoutedResponse { status, headers, body: RoutedBody::Full(bytes) }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn log_and_record(
    state: &RouterState,
    request_id: &str,
    method: &str,
    path: &str,
    start: Instant,
    routed: &RoutedResponse,
    masked_headers: serde_json::Map<String, Value>,
    requested_alias: Option<&str>,
    routed_alias: Option<&str>,
    decision: &RoutingDecision,
    target: Option<&Target>,
    retry_count: u32,
    tried_targets: &[String],
    signature_recovered: bool,
    classified_kind: Option<&str>,
    eval_trace: Option<Value>,
    auto_upgrade: Option<Value>,
    sticky_action: Option<String>,
    cooldown_applied: Option<String>,
    decoded_encoding: Option<String>,
    decode_error: Option<String>,
) {
    let duration_ms = start.elapsed().as_millis() as u64;
    let success = routed.status.is_success();

    let mut entry =
        TrafficEntry::new(duration_ms, success).with_retry_count(retry_count).with_decision(&decision.to_string());
    if let Some(alias) = requested_alias {
        entry = entry.with_requested_alias(alias);
    }
    if let Some(alias) = routed_alias {
        entry = entry.with_routed_alias(alias);
    }
    if let Some(target) = target {
        entry = entry.with_target(&target.identity().to_string());
    }
    if signature_recovered {
        entry = entry.mark_signature_recovered();
    }
    state.traffic.push(entry);

    let record = AccessLogRecord {
        request_id: request_id.to_string(),
        timestamp: chrono::Utc::now(),
        duration_ms,
        method: method.to_string(),
        path: path.to_string(),
        requested_alias: requested_alias.map(str::to_string),
        routed_alias: routed_alias.map(str::to_string),
        decision: Some(decision.to_string()),
        hit_rule: match decision {
            RoutingDecision::CategoryHit(name) | RoutingDecision::RuleHit(name) => Some(name.clone()),
            _ => None,
        },
        target_backend_url: target.map(|t| t.backend_url.clone()),
        target_upstream_model: target.map(|t| t.upstream_model.clone()),
        provider_tag: target.and_then(|t| t.provider_tag.clone()),
        param_summary: None,
        status: routed.status.as_u16(),
        retry_count,
        tried_targets: tried_targets.to_vec(),
        signature_recovered,
        request_headers: masked_headers,
        request_summary: None,
        response_summary: None,
        usage: None,
        error: None,
        factors: None,
        eval_trace,
        auto_upgrade,
        model_health: None,
        sticky_action,
        classified_kind: classified_kind.map(str::to_string),
        cooldown_applied,
        decoded_encoding,
        decode_error,
    };
    spawn_append(Arc::clone(&state.access_logger), record);
}

fn spawn_append(logger: Arc<AccessLogger>, record: AccessLogRecord) {
    tokio::spawn(async move {
        if let Err(err) = logger.append(&record).await {
            warn!(%err, "failed to append access log record");
        }
    });
}

/// Tee a response stream to the client while accumulating it for post-hoc
/// usage extraction, so SSE requests still get an access-log `usage` field
/// without the pipeline buffering (and thus delaying) the stream itself.
///
/// Not yet wired into `route_request` — streaming requests currently log
/// without `usage`. TODO: call this from the streaming branch once the
/// access-log record can be built before the stream starts.
#[allow(dead_code)]
fn tee_for_usage_logging(mut upstream: SseStream, logger: Arc<AccessLogger>, mut record: AccessLogRecord) -> SseStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<anyhow::Result<Bytes>>(16);
    tokio::spawn(async move {
        let mut buffer = String::new();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        buffer.push_str(text);
                    }
                    if tx.send(Ok(bytes)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        record.usage = access_log::extract_usage_from_sse(&buffer);
        if let Err(err) = logger.append(&record).await {
            warn!(%err, "failed to append SSE access log record");
        }
    });
    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::access_log::AccessLogger;
    use crate::config::{Config, GatewayConfig, RouteTable, RouterConfig, TargetConfig, TargetParams, TunablesConfig};

    fn test_config(default_origin: &str, targets: HashMap<String, Vec<TargetConfig>>) -> Config {
        Config {
            gateway: GatewayConfig { default_origin: default_origin.to_string(), ..GatewayConfig::default() },
            route_table: RouteTable::build(targets).unwrap(),
            router: RouterConfig {
                enabled: false,
                shadow_only: false,
                log_factors: false,
                activation_models: Default::default(),
                default_model: None,
                categories: vec![],
                rules: vec![],
                auto_upgrade: crate::config::AutoUpgradeConfig {
                    enabled: false,
                    mappings: Default::default(),
                    messages_threshold: None,
                    tools_threshold: None,
                    failure_streak_threshold: None,
                    signature_upgrade: false,
                },
            },
            tunables: TunablesConfig::default().resolve(),
        }
    }

    fn target_cfg(url: &str) -> TargetConfig {
        TargetConfig {
            backend_url: url.to_string(),
            upstream_model: "claude-sonnet-4-5".to_string(),
            weight: 1,
            provider_tag: None,
            provider_instance: None,
            params: TargetParams::default(),
        }
    }

    async fn make_state(config: Config) -> RouterState {
        let dir = std::env::temp_dir().join(format!("lmg-router-test-{}-{}", std::process::id(), rand::random::<u64>()));
        RouterState::new(
            Arc::new(config),
            PathBuf::from("test-config.toml"),
            Arc::new(TrafficLog::new(50)),
            Arc::new(AccessLogger::new(dir, 90)),
            Arc::new(StateStore::new()),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn routes_to_the_only_configured_target() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let mut targets = HashMap::new();
        targets.insert("auto".to_string(), vec![target_cfg(&server.uri())]);
        let state = make_state(test_config("http://unused.invalid", targets)).await;

        let body = Bytes::from(serde_json::to_vec(&serde_json::json!({"model": "auto", "messages": []})).unwrap());
        let response = route_request(&state, "req-1", Method::POST, "/v1/chat/completions", HeaderMap::new(), body)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn retries_once_on_transient_failure_then_succeeds() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({"error": {"message": "overloaded"}})))
            .mount(&failing)
            .await;
        let healthy = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&healthy)
            .await;

        let mut targets = HashMap::new();
        targets.insert("auto".to_string(), vec![target_cfg(&failing.uri()), target_cfg(&healthy.uri())]);
        let state = make_state(test_config("http://unused.invalid", targets)).await;

        let body = Bytes::from(serde_json::to_vec(&serde_json::json!({"model": "auto", "messages": []})).unwrap());
        let response = route_request(&state, "req-2", Method::POST, "/v1/chat/completions", HeaderMap::new(), body)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn non_json_body_passes_through_to_default_origin() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(204)).mount(&server).await;

        let state = make_state(test_config(&server.uri(), HashMap::new())).await;
        let response =
            route_request(&state, "req-3", Method::GET, "/health", HeaderMap::new(), Bytes::new()).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_alias_falls_back_to_default_origin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let state = make_state(test_config(&server.uri(), HashMap::new())).await;
        let body = Bytes::from(serde_json::to_vec(&serde_json::json!({"model": "nonexistent", "messages": []})).unwrap());
        let response = route_request(&state, "req-4", Method::POST, "/v1/chat/completions", HeaderMap::new(), body)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
}
