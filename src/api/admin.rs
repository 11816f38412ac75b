//! Admin API (port 8081) — operator-facing introspection endpoints.
//!
//! These endpoints are separated onto a different port so they can be
//! network-restricted independently of the client API (e.g. accessible only
//! from the internal Docker network, never exposed to the internet).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::router::RouterState;

/// Build the admin-facing axum router (port 8081).
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/state", get(state_summary))
        .route("/metrics", get(crate::api::metrics::metrics))
        .with_state(state)
}

/// GET /admin/health — liveness plus a coarse view of the live route table.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    Json(json!({
        "status": "ok",
        "aliases": config.route_table.alias_count(),
        "router_enabled": config.router.enabled,
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N traffic entries (default 100)
pub async fn traffic(
    State(state): State<Arc<RouterState>>,
    Query(q): Query<TrafficQuery>,
) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    let stats = state.traffic.stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// GET /admin/config — current config, with any statically-configured
/// header values redacted (provider tokens are never logged verbatim).
pub async fn config(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let cfg = state.config();

    let aliases: Vec<Value> = cfg
        .route_table
        .aliases()
        .map(|(alias, targets)| {
            let targets: Vec<Value> = targets
                .iter()
                .map(|t| {
                    json!({
                        "backend_url": t.backend_url,
                        "upstream_model": t.upstream_model,
                        "weight": t.weight,
                        "provider_tag": t.provider_tag,
                        "provider_instance": t.provider_instance,
                        "extra_headers": redact_header_values(&t.params.extra_headers),
                    })
                })
                .collect();
            json!({ "alias": alias, "targets": targets })
        })
        .collect();

    Json(json!({
        "gateway": {
            "client_port": cfg.gateway.client_port,
            "admin_port": cfg.gateway.admin_port,
            "default_origin": cfg.gateway.default_origin,
            "traffic_log_capacity": cfg.gateway.traffic_log_capacity,
            "log_dir": cfg.gateway.log_dir,
        },
        "route_table": aliases,
        "router": {
            "enabled": cfg.router.enabled,
            "shadow_only": cfg.router.shadow_only,
            "log_factors": cfg.router.log_factors,
            "activation_models": cfg.router.activation_models,
            "default_model": cfg.router.default_model,
            "category_count": cfg.router.categories.len(),
            "rule_count": cfg.router.rules.len(),
            "auto_upgrade_enabled": cfg.router.auto_upgrade.enabled,
        },
        "tunables": cfg.tunables,
    }))
}

fn redact_header_values(headers: &std::collections::HashMap<String, String>) -> Value {
    headers
        .keys()
        .map(|name| (name.clone(), Value::String("***".to_string())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// GET /admin/state — size of each in-memory state map (C9). No session
/// keys, target identities, or cooldown reasons are exposed — counts only.
pub async fn state_summary(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({
        "sticky_sessions": state.state_store.sticky_len(),
        "cooldowns": state.state_store.cooldown_len(),
        "health_entries": state.state_store.health_len(),
    }))
}
