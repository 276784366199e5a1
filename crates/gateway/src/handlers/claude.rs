//! Anthropic messages surface.

use std::sync::Arc;

use axum::{Json, extract::State, response::Response};

use atelier_translate::{Dialect, request::claude};

use crate::{error::ApiError, handlers::dispatch, state::GatewayState};

/// `POST /v1/messages`
pub async fn messages(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let opts = state.translate_options().await;
    let translated = claude::translate_request(&body, &opts).await?;
    dispatch(state, translated, Dialect::Claude).await
}
