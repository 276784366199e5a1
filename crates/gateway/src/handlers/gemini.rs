//! Gemini generate-content surface.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use atelier_translate::{Dialect, request::gemini};

use crate::{error::ApiError, handlers::dispatch, models, state::GatewayState};

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub alt: Option<String>,
}

/// `POST /v1beta/models/{model}:{action}`
///
/// The whole `model:action` pair arrives as one path segment.
pub async fn generate(
    State(state): State<Arc<GatewayState>>,
    Path(model_action): Path<String>,
    Query(params): Query<StreamParams>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let (model, action) = model_action
        .split_once(':')
        .ok_or_else(|| ApiError::invalid("expected `model:action` in path"))?;

    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => {
            if params.alt.as_deref() != Some("sse") {
                return Err(ApiError::invalid("only `alt=sse` streaming is supported"));
            }
            true
        },
        other => return Err(ApiError::not_found(format!("unknown action `{other}`"))),
    };

    let opts = state.translate_options().await;
    let translated = gemini::translate_request(model, &body, stream, &opts)?;
    dispatch(state, translated, Dialect::Gemini).await
}

/// `GET /v1beta/models`
pub async fn list_models() -> Response {
    Json(models::gemini_listing()).into_response()
}
