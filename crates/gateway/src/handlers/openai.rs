//! OpenAI chat-completions surface.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};

use atelier_translate::{Dialect, request::openai};

use crate::{error::ApiError, handlers::dispatch, models, state::GatewayState};

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let opts = state.translate_options().await;
    let translated = openai::translate_request(&body, &opts).await?;
    dispatch(state, translated, Dialect::OpenAi).await
}

/// `GET /v1/models`
pub async fn list_models() -> Response {
    Json(models::openai_listing()).into_response()
}
