//! Router assembly and serving.

use std::sync::Arc;

use {
    axum::{
        Router,
        routing::{delete, get, post, put},
    },
    tower_http::trace::TraceLayer,
    tracing::info,
};

use crate::{admin, auth, handlers, state::GatewayState, ws};

pub fn build_router(state: Arc<GatewayState>) -> Router {
    let model_api = Router::new()
        .route("/v1/chat/completions", post(handlers::openai::chat_completions))
        .route("/v1/models", get(handlers::openai::list_models))
        .route("/v1/messages", post(handlers::claude::messages))
        .route("/v1beta/models", get(handlers::gemini::list_models))
        .route("/v1beta/models/{model_action}", post(handlers::gemini::generate));

    let admin_api = Router::new()
        .route("/api/accounts/current", put(admin::switch_current))
        .route("/api/accounts/{index}", delete(admin::remove_account))
        .route("/api/accounts/deduplicate", post(admin::deduplicate))
        .route("/api/files", post(admin::add_file))
        .route("/api/files/batch", post(admin::add_files_batch))
        .route("/api/status", get(admin::status))
        .route("/api/settings/{setting}", put(admin::update_setting));

    let protected = model_api.merge(admin_api).layer(
        axum::middleware::from_fn_with_state(Arc::clone(&state), auth::require_api_key),
    );

    Router::new()
        .route("/health", get(admin::health))
        .route("/ws", get(ws::channel_upgrade_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown. A failed bind is a fatal startup error.
pub async fn run(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let router = build_router(Arc::clone(&state));
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!(addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    state.pool.shutdown().await;
    Ok(())
}
