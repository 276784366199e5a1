//! Account administration and status surface.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    serde_json::Value,
    tracing::{info, warn},
};

use {
    atelier_protocol::{ControlFrame, close_reasons},
    atelier_rotation::SwitchOutcome,
};

use crate::{error::ApiError, state::GatewayState};

// ── Switching ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBody {
    pub target_index: Option<usize>,
}

/// `PUT /api/accounts/current` — switch to a specific account, or to the
/// next one in rotation when no target is named.
pub async fn switch_current(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<SwitchBody>,
) -> Result<Response, ApiError> {
    let outcome = match body.target_index {
        Some(target) => {
            state.rotation.switch_to_specific(target).await?;
            SwitchOutcome::Switched(target)
        },
        // The admin explicitly asked to move on, so expired fallbacks are
        // accepted.
        None => state.rotation.rotate().await?,
    };

    Ok(Json(serde_json::json!({
        "currentAuthIndex": state.active.get(),
        "outcome": format!("{outcome:?}"),
    }))
    .into_response())
}

// ── Removal ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RemoveParams {
    #[serde(default)]
    pub force: bool,
}

/// `DELETE /api/accounts/{index}` — remove the credential file, close the
/// context, then close the channel endpoint.
pub async fn remove_account(
    State(state): State<Arc<GatewayState>>,
    Path(index): Path<usize>,
    Query(params): Query<RemoveParams>,
) -> Result<Response, ApiError> {
    if state.active.is(index) && !params.force {
        return Err(ApiError::invalid(
            "account is currently active; pass force=true to remove it anyway",
        ));
    }

    state.store.remove_auth(index).await?;
    state.pool.close_context(index).await;
    state
        .registry
        .close_endpoint(index, close_reasons::ACCOUNT_REMOVED)
        .await;
    state.store.reload().await?;
    info!(auth_index = index, "account removed");

    if state.active.is(index) {
        state.active.set(None);
        if let Err(e) = state.rotation.rotate().await {
            warn!(error = %e, "could not rotate off removed account");
        }
    }
    state.pool.rebalance().await;

    Ok(Json(serde_json::json!({ "removed": index })).into_response())
}

// ── Dedup / file management ──────────────────────────────────────────────────

/// `POST /api/accounts/deduplicate`
pub async fn deduplicate(
    State(state): State<Arc<GatewayState>>,
) -> Result<Response, ApiError> {
    let groups = state.store.deduplicate().await?;
    state.pool.rebalance().await;
    Ok(Json(serde_json::json!({ "consolidated": groups })).into_response())
}

/// `POST /api/files` — add one credential blob.
pub async fn add_file(
    State(state): State<Arc<GatewayState>>,
    Json(blob): Json<Value>,
) -> Result<Response, ApiError> {
    let index = state.store.add_auth(&blob).await?;
    state.store.reload().await?;
    state.pool.rebalance().await;
    Ok(Json(serde_json::json!({ "index": index })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub files: Vec<Value>,
}

/// `POST /api/files/batch`
pub async fn add_files_batch(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<BatchBody>,
) -> Result<Response, ApiError> {
    let mut indices = Vec::with_capacity(body.files.len());
    for blob in &body.files {
        indices.push(state.store.add_auth(blob).await?);
    }
    state.store.reload().await?;
    state.pool.rebalance().await;
    Ok(Json(serde_json::json!({ "indices": indices })).into_response())
}

// ── Status ───────────────────────────────────────────────────────────────────

/// `GET /api/status`
///
/// While a switch is in flight the snapshot reports `systemBusy` and skips
/// availability probing entirely, so status polls never race the switch.
pub async fn status(State(state): State<Arc<GatewayState>>) -> Response {
    let busy = state.rotation.is_busy();
    let mut details = Vec::new();
    if !busy {
        for detail in state.store.account_details().await {
            let has_context = state.pool.has_context(detail.index).await;
            let mut value = serde_json::to_value(&detail).unwrap_or_else(|_| serde_json::json!({}));
            value["hasContext"] = serde_json::json!(has_context);
            details.push(value);
        }
    }

    let settings = state.settings.read().await;
    Json(serde_json::json!({
        "currentAuthIndex": state.active.get(),
        "systemBusy": busy,
        "accountDetails": details,
        "usageCount": state.rotation.usage_count(),
        "consecutiveFailures": state.rotation.consecutive_failures(),
        "pendingRequests": state.registry.pending_requests(),
        "connectedChannels": state.registry.endpoint_count().await,
        "settings": {
            "streamingMode": format!("{:?}", settings.streaming_mode).to_lowercase(),
            "forceThinking": settings.force_thinking,
            "forceWebSearch": settings.force_web_search,
            "forceUrlContext": settings.force_url_context,
            "debugMode": settings.debug_mode,
            "logMaxCount": settings.log_max_count,
        },
        "version": state.version,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

// ── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SettingBody {
    pub value: Value,
}

/// `PUT /api/settings/{setting}`
pub async fn update_setting(
    State(state): State<Arc<GatewayState>>,
    Path(setting): Path<String>,
    Json(body): Json<SettingBody>,
) -> Result<Response, ApiError> {
    let mut settings = state.settings.write().await;
    match setting.as_str() {
        "streaming-mode" => {
            settings.streaming_mode = match body.value.as_str() {
                Some("real") => atelier_config::StreamingMode::Real,
                Some("fake") => atelier_config::StreamingMode::Fake,
                _ => return Err(ApiError::invalid("expected \"real\" or \"fake\"")),
            };
        },
        "force-thinking" => settings.force_thinking = bool_value(&body.value)?,
        "force-web-search" => settings.force_web_search = bool_value(&body.value)?,
        "force-url-context" => settings.force_url_context = bool_value(&body.value)?,
        "debug-mode" => {
            settings.debug_mode = bool_value(&body.value)?;
            let level = if settings.debug_mode { "debug" } else { "info" };
            let frame = ControlFrame::SetLogLevel {
                level: level.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&frame) {
                state.registry.broadcast(&text).await;
            }
        },
        "log-max-count" => {
            settings.log_max_count = body
                .value
                .as_u64()
                .ok_or_else(|| ApiError::invalid("expected a number"))?
                as usize;
        },
        other => return Err(ApiError::not_found(format!("unknown setting `{other}`"))),
    }
    info!(setting, "runtime setting updated");
    Ok(Json(serde_json::json!({ "ok": true })).into_response())
}

fn bool_value(value: &Value) -> Result<bool, ApiError> {
    value
        .as_bool()
        .ok_or_else(|| ApiError::invalid("expected a boolean"))
}

// ── Health ───────────────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "poolReady": state.active.get().is_some(),
    }))
    .into_response()
}
