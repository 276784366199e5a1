//! Inbound API-key authentication.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::state::GatewayState;

/// Middleware protecting the model and admin surfaces.
///
/// An empty key list disables authentication entirely. Keys are accepted
/// from `Authorization: Bearer`, `x-api-key` (Anthropic clients), or
/// `x-goog-api-key` / `?key=` (Gemini clients).
pub async fn require_api_key(
    State(state): State<Arc<GatewayState>>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let keys = &state.config.server.api_keys;
    if keys.is_empty() {
        return next.run(request).await;
    }

    if let Some(candidate) = extract_key(&request) {
        if keys.iter().any(|k| k == &candidate) {
            return next.run(request).await;
        }
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": { "code": "UNAUTHORIZED", "message": "missing or invalid API key" }
        })),
    )
        .into_response()
}

fn extract_key(request: &axum::http::Request<axum::body::Body>) -> Option<String> {
    let headers = request.headers();

    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    for header in ["x-api-key", "x-goog-api-key"] {
        if let Some(key) = headers.get(header).and_then(|v| v.to_str().ok()) {
            return Some(key.to_string());
        }
    }

    // Gemini SDKs pass `?key=`.
    request.uri().query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("key=").map(str::to_string)
        })
    })
}
