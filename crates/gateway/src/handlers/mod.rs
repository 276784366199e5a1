//! One inbound model request, end to end.
//!
//! `Dispatched → HeadersSeen → Streaming → Complete | Errored | ClientGone`;
//! terminal transitions happen at most once. A dropped client cancels the
//! queue without touching the rotation counters unless a terminal fragment
//! already arrived.

pub mod claude;
pub mod gemini;
pub mod openai;

use std::{convert::Infallible, sync::Arc, time::Duration};

use {
    axum::response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    serde_json::Value,
    tracing::{debug, warn},
};

use {
    atelier_config::StreamingMode,
    atelier_protocol::{
        BUSY_RETRY_ATTEMPTS, BUSY_RETRY_MS, DispatchFrame, FIRST_FRAGMENT_TIMEOUT_MS,
    },
    atelier_registry::{ConnectionRegistry, QueueEvent, QueueReceiver},
    atelier_translate::{Dialect, SseFrame, StreamState, TranslatedRequest},
};

use crate::{error::ApiError, state::GatewayState};

/// Removes the id → queue mapping exactly once, whether the request ends in
/// a terminal fragment or the client going away.
struct QueueGuard {
    registry: Arc<ConnectionRegistry>,
    request_id: String,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.registry.remove_queue(&self.request_id);
    }
}

/// Dispatch a translated request over the active account's channel and
/// render the response in `dialect`.
pub(crate) async fn dispatch(
    state: Arc<GatewayState>,
    translated: TranslatedRequest,
    dialect: Dialect,
) -> Result<Response, ApiError> {
    wait_until_idle(&state).await?;
    let active = acquire_active_context(&state).await?;

    let fake_stream = {
        let settings = state.settings.read().await;
        translated.stream && settings.streaming_mode == StreamingMode::Fake
    };
    let upstream_stream = translated.stream && !fake_stream;

    let (request_id, mut queue) = state.registry.create_queue();
    let guard = QueueGuard {
        registry: Arc::clone(&state.registry),
        request_id: request_id.clone(),
    };

    let frame = DispatchFrame {
        request_id: request_id.clone(),
        body: serde_json::json!({
            "model": translated.model,
            "request": translated.request,
        }),
        stream: upstream_stream,
    };
    let frame_text =
        serde_json::to_string(&frame).map_err(|e| ApiError::internal(e.to_string()))?;
    if let Err(e) = state.registry.send_to(active, &frame_text).await {
        state.rotation.note_request_result(None, false);
        return Err(ApiError::upstream_unavailable(e.to_string()));
    }
    debug!(request_id, auth_index = active, stream = upstream_stream, "request dispatched");

    // The first fragment fixes the outbound status.
    let first = tokio::time::timeout(
        Duration::from_millis(FIRST_FRAGMENT_TIMEOUT_MS),
        queue.recv(),
    )
    .await;
    let (status, first_chunk) = match first {
        Err(_) => {
            state.rotation.note_request_result(None, false);
            return Err(ApiError::upstream_unavailable(
                "timed out waiting for the first upstream fragment",
            ));
        },
        Ok(QueueEvent::Headers { status, .. }) => (status, None),
        // Headers can be skipped when the page fails over to a cached reply.
        Ok(QueueEvent::Chunk(data)) => (200, Some(data)),
        Ok(QueueEvent::Error { status, message }) => {
            state.rotation.note_request_result(status, false);
            return Err(ApiError::upstream(status, message));
        },
        Ok(QueueEvent::StreamEnd) => {
            state.rotation.note_request_result(None, false);
            return Err(ApiError::upstream_unavailable(
                "upstream closed before any response fragment",
            ));
        },
    };

    if upstream_stream {
        Ok(live_stream_response(
            state,
            translated.model,
            dialect,
            status,
            first_chunk,
            queue,
            guard,
        ))
    } else {
        buffered_response(
            state,
            translated,
            dialect,
            status,
            first_chunk,
            queue,
            guard,
            fake_stream,
        )
        .await
    }
}

/// Relay fragments as they arrive.
fn live_stream_response(
    state: Arc<GatewayState>,
    model: String,
    dialect: Dialect,
    status: u16,
    first_chunk: Option<Value>,
    mut queue: QueueReceiver,
    guard: QueueGuard,
) -> Response {
    let rotation = Arc::clone(&state.rotation);
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut translator = StreamState::new(dialect, model);

        if let Some(chunk) = &first_chunk {
            for frame in translator.on_chunk(chunk) {
                yield Ok::<_, Infallible>(to_event(frame));
            }
        }

        let mut failed = false;
        loop {
            match queue.recv().await {
                QueueEvent::Headers { .. } => continue,
                QueueEvent::Chunk(data) => {
                    for frame in translator.on_chunk(&data) {
                        yield Ok(to_event(frame));
                    }
                },
                QueueEvent::Error { status: err_status, message } => {
                    warn!(?err_status, message, "upstream error mid-stream");
                    failed = true;
                    for frame in translator.finalize() {
                        yield Ok(to_event(frame));
                    }
                    break;
                },
                QueueEvent::StreamEnd => {
                    for frame in translator.finalize() {
                        yield Ok(to_event(frame));
                    }
                    break;
                },
            }
        }
        rotation.note_request_result(Some(status), !failed);
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Buffer to the terminal, then answer as JSON or re-chunked SSE.
#[allow(clippy::too_many_arguments)]
async fn buffered_response(
    state: Arc<GatewayState>,
    translated: TranslatedRequest,
    dialect: Dialect,
    status: u16,
    first_chunk: Option<Value>,
    mut queue: QueueReceiver,
    guard: QueueGuard,
    fake_stream: bool,
) -> Result<Response, ApiError> {
    let mut chunks: Vec<Value> = first_chunk.into_iter().collect();
    let mut upstream_error: Option<(Option<u16>, String)> = None;
    loop {
        match queue.recv().await {
            QueueEvent::Headers { .. } => continue,
            QueueEvent::Chunk(data) => chunks.push(data),
            QueueEvent::Error { status, message } => {
                upstream_error = Some((status, message));
                break;
            },
            QueueEvent::StreamEnd => break,
        }
    }
    drop(guard);

    if let Some((err_status, message)) = &upstream_error {
        if chunks.is_empty() {
            state.rotation.note_request_result(*err_status, false);
            return Err(ApiError::upstream(*err_status, message.clone()));
        }
        warn!(?err_status, message, "upstream error after partial response");
    }

    let mut translator = StreamState::new(dialect, translated.model);
    let mut frames: Vec<SseFrame> = Vec::new();
    for chunk in &chunks {
        frames.extend(translator.on_chunk(chunk));
    }
    frames.extend(translator.finalize());

    state
        .rotation
        .note_request_result(Some(status), upstream_error.is_none());

    if fake_stream {
        let stream = futures::stream::iter(
            frames
                .into_iter()
                .map(|frame| Ok::<_, Infallible>(to_event(frame))),
        );
        return Ok(Sse::new(stream).into_response());
    }

    let body = translator.non_streaming_body();
    let status_code = axum::http::StatusCode::from_u16(status)
        .unwrap_or(axum::http::StatusCode::OK);
    Ok((status_code, Json(body)).into_response())
}

fn to_event(frame: SseFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Brief retry while an account switch is in flight.
async fn wait_until_idle(state: &Arc<GatewayState>) -> Result<(), ApiError> {
    for _ in 0..BUSY_RETRY_ATTEMPTS {
        if !state.rotation.is_busy() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(BUSY_RETRY_MS)).await;
    }
    Err(ApiError::busy())
}

/// Make sure the active account has a live context, fast-switching (or
/// rotating off an expired account) when it does not.
async fn acquire_active_context(state: &Arc<GatewayState>) -> Result<usize, ApiError> {
    let active = state
        .active
        .get()
        .ok_or_else(|| ApiError::upstream_unavailable("no active account"))?;

    if state.pool.has_live_page(active).await {
        return Ok(active);
    }

    match state.pool.fast_switch(active).await {
        Ok(()) => Ok(active),
        Err(e) if matches!(e, atelier_pool::Error::AuthExpired(_)) => {
            warn!(auth_index = active, "active account expired, rotating");
            state.rotation.rotate().await.map_err(ApiError::from)?;
            state
                .active
                .get()
                .ok_or_else(|| ApiError::upstream_unavailable("no usable account"))
        },
        Err(e) => Err(e.into()),
    }
}
