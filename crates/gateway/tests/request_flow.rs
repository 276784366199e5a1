//! End-to-end request flow against a fake in-page channel.
//!
//! The browser is replaced by the pool's mock driver; the websocket is
//! replaced by binding a channel endpoint directly and running a task that
//! answers dispatch frames with canned fragments.

use std::sync::Arc;

use {
    axum::{
        body::Body,
        http::{Request, StatusCode},
    },
    tokio::sync::mpsc,
    tower::ServiceExt,
};

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_config::AtelierConfig,
    atelier_gateway::{GatewayState, build_router, ws::PoolProbe},
    atelier_pool::{
        ContextPoolManager,
        testutil::{MockBehavior, MockDriver, policy, seed_store},
    },
    atelier_protocol::{DispatchFrame, PageEvent},
    atelier_registry::{ChannelEndpoint, ConnectionRegistry},
    atelier_rotation::RotationController,
};

async fn gateway_state() -> (Arc<GatewayState>, Arc<AuthStore>) {
    let (store, dir) = seed_store(&[(0, MockBehavior::Ok)]).await;
    std::mem::forget(dir);
    let driver = MockDriver::new();
    let active = Arc::new(ActiveAccount::new());
    let registry = ConnectionRegistry::new(Arc::clone(&active));
    let pool = ContextPoolManager::new(
        driver,
        Arc::clone(&store),
        Arc::clone(&active),
        policy(1),
    );
    registry
        .set_probe(Arc::new(PoolProbe(Arc::clone(&pool))))
        .await;
    pool.preload(&[0]).await.unwrap();
    pool.abort_background_preload().await;
    let rotation = RotationController::new(Arc::clone(&store), Arc::clone(&pool), Arc::clone(&active));

    let state = GatewayState::new(
        AtelierConfig::default(),
        Arc::clone(&store),
        active,
        pool,
        registry,
        rotation,
    );
    (state, store)
}

/// Bind a channel endpoint for account 0 and answer every dispatch frame
/// with one text chunk and a stream close.
async fn spawn_fake_page(state: &Arc<GatewayState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state
        .registry
        .accept(ChannelEndpoint::new(0, tx))
        .await;

    let registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(dispatch) = serde_json::from_str::<DispatchFrame>(&frame) else {
                continue;
            };
            let id = dispatch.request_id;
            registry
                .handle_event(PageEvent::ResponseHeaders {
                    request_id: id.clone(),
                    status: 200,
                    headers: serde_json::Map::new(),
                })
                .await;
            registry
                .handle_event(PageEvent::Chunk {
                    request_id: id.clone(),
                    data: serde_json::json!({
                        "candidates": [{ "content": { "role": "model",
                            "parts": [{ "text": "pong" }] }, "index": 0 }]
                    }),
                })
                .await;
            registry
                .handle_event(PageEvent::Chunk {
                    request_id: id.clone(),
                    data: serde_json::json!({
                        "candidates": [{ "finishReason": "STOP",
                            "content": { "parts": [] }, "index": 0 }],
                        "usageMetadata": { "promptTokenCount": 2, "candidatesTokenCount": 1 }
                    }),
                })
                .await;
            registry
                .handle_event(PageEvent::StreamClose { request_id: id })
                .await;
        }
    });
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_reports_pool_ready() {
    let (state, _store) = gateway_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["poolReady"], true);
}

#[tokio::test]
async fn openai_non_streaming_round_trip() {
    let (state, _store) = gateway_state().await;
    spawn_fake_page(&state).await;
    let router = build_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "model": "gemini-2.5-pro",
                "messages": [{ "role": "user", "content": "ping" }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["prompt_tokens"], 2);
    assert_eq!(state.rotation.usage_count(), 1);
}

#[tokio::test]
async fn openai_streaming_emits_done_terminal() {
    let (state, _store) = gateway_state().await;
    spawn_fake_page(&state).await;
    let router = build_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "model": "gemini-2.5-pro",
                "stream": true,
                "messages": [{ "role": "user", "content": "ping" }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("\"pong\""));
    // Exactly one terminal with a finish_reason, then [DONE].
    assert_eq!(body.matches("finish_reason\":\"stop\"").count(), 1);
    assert_eq!(body.matches("[DONE]").count(), 1);
    assert_eq!(state.registry.pending_requests(), 0);
}

#[tokio::test]
async fn claude_messages_round_trip() {
    let (state, _store) = gateway_state().await;
    spawn_fake_page(&state).await;
    let router = build_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "model": "gemini-2.5-pro",
                "max_tokens": 128,
                "messages": [{ "role": "user", "content": "ping" }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "pong");
    assert_eq!(body["stop_reason"], "end_turn");
}

#[tokio::test]
async fn gemini_generate_content_round_trip() {
    let (state, _store) = gateway_state().await;
    spawn_fake_page(&state).await;
    let router = build_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/v1beta/models/gemini-2.5-pro:generateContent")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(
        body["candidates"][0]["content"]["parts"][0]["text"],
        "pong"
    );
}

#[tokio::test]
async fn missing_channel_is_upstream_unavailable() {
    let (state, _store) = gateway_state().await;
    // No fake page bound.
    let router = build_router(Arc::clone(&state));

    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "model": "gemini-2.5-pro",
                "messages": [{ "role": "user", "content": "ping" }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["code"], "UPSTREAM_UNAVAILABLE");
    assert_eq!(state.rotation.consecutive_failures(), 1);
}

#[tokio::test]
async fn unknown_gemini_action_is_404() {
    let (state, _store) = gateway_state().await;
    let router = build_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/v1beta/models/gemini-2.5-pro:countTokens")
        .header("content-type", "application/json")
        .body(Body::from("{\"contents\":[]}"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_snapshot_reports_accounts() {
    let (state, _store) = gateway_state().await;
    spawn_fake_page(&state).await;
    let router = build_router(Arc::clone(&state));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["currentAuthIndex"], 0);
    assert_eq!(body["systemBusy"], false);
    assert_eq!(body["accountDetails"][0]["hasContext"], true);
    assert_eq!(body["connectedChannels"], 1);
}
