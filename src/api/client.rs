//! Client-facing API (port 8080) — the endpoint agents talk to.
//!
//! This is intentionally a thin layer: all routing logic lives in
//! [`crate::router`]. Handlers translate HTTP concerns (method, headers,
//! raw body bytes) into a single [`crate::router::route_request`] call and
//! translate the result back into an axum response.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Extension, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::{
    api::request_id::RequestId,
    router::{RoutedBody, RouterState},
};

/// Build the client-facing axum router (port 8080).
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/v1/models", get(list_models))
        .route("/status", get(crate::api::status::status))
        .with_state(state)
}

/// POST /v1/chat/completions — OpenAI-shaped chat completions.
pub async fn chat_completions(
    State(state): State<Arc<RouterState>>,
    Extension(request_id): Extension<RequestId>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_through_pipeline(&state, &request_id.0, method, "/v1/chat/completions", headers, body).await
}

/// POST /v1/messages — Anthropic-shaped messages endpoint. Same pipeline;
/// `crate::factors::extract` reads whichever shape the body is in.
pub async fn messages(
    State(state): State<Arc<RouterState>>,
    Extension(request_id): Extension<RequestId>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_through_pipeline(&state, &request_id.0, method, "/v1/messages", headers, body).await
}

async fn forward_through_pipeline(
    state: &Arc<RouterState>,
    request_id: &str,
    method: Method,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match crate::router::route_request(state, request_id, method, path, headers, body).await {
        Ok(routed) => into_axum_response(routed),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

fn into_axum_response(routed: crate::router::RoutedResponse) -> Response {
    let body = match routed.body {
        RoutedBody::Full(bytes) => Body::from(bytes),
        RoutedBody::Streamed(stream) => Body::from_stream(
            stream.map(|item| item.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))),
        ),
    };
    let mut response = Response::new(body);
    *response.status_mut() = routed.status;
    *response.headers_mut() = routed.headers;
    response
}

/// GET /v1/models — lists every configured alias as a model entry.
pub async fn list_models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let config = state.config();
    let models: Vec<Value> = config
        .route_table
        .aliases()
        .map(|(alias, targets)| {
            json!({
                "id": alias,
                "object": "model",
                "target_count": targets.len(),
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": models }))
}
