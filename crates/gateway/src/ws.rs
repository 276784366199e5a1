//! The duplex control channel endpoint.
//!
//! Each studio page opens one websocket back to the server and declares its
//! account index; response fragments flow page → server as JSON text frames
//! and get demultiplexed into per-request queues.

use std::sync::Arc;

use {
    axum::{
        extract::{
            Query, State, WebSocketUpgrade,
            ws::{CloseFrame, Message, WebSocket},
        },
        response::Response,
    },
    futures::{SinkExt, stream::StreamExt},
    serde::Deserialize,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    atelier_pool::ContextPoolManager,
    atelier_protocol::{MAX_PAYLOAD_BYTES, PageEvent, close_reasons},
    atelier_registry::{ChannelEndpoint, ContextProbe, ReconnectOutcome},
};

use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    /// Declared account index. Missing or negative is a policy violation.
    pub auth_index: Option<i64>,
}

pub async fn channel_upgrade_handler(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ChannelParams>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_channel(socket, state, params.auth_index))
}

async fn handle_channel(mut socket: WebSocket, state: Arc<GatewayState>, declared: Option<i64>) {
    let index = match declared {
        Some(index) if index >= 0 => index as usize,
        _ => {
            warn!(?declared, "channel rejected: invalid account index");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: axum::extract::ws::close_code::POLICY,
                    reason: close_reasons::INVALID_INDEX.into(),
                })))
                .await;
            return;
        },
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    let endpoint = state
        .registry
        .accept(ChannelEndpoint::new(index, frame_tx))
        .await;
    let conn_id = endpoint.conn_id.clone();
    let closed = endpoint.closed();

    // Write loop: forwards serialized frames; a server-side close sends the
    // close frame with its reason.
    let write_endpoint = Arc::clone(&endpoint);
    let write_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = closed.cancelled() => {
                    let reason = write_endpoint.close_reason().unwrap_or("closed").to_string();
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: axum::extract::ws::close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                },
                frame = frame_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        },
                        None => break,
                    }
                },
            }
        }
    });

    // Read loop: demux page events into request queues.
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(auth_index = index, error = %e, "channel read error");
                break;
            },
        };
        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(auth_index = index, size = text.len(), "channel frame too large, dropping");
            continue;
        }
        match serde_json::from_str::<PageEvent>(&text) {
            Ok(event) => state.registry.handle_event(event).await,
            Err(e) => {
                // Unknown event types and malformed frames are logged and
                // dropped, never fatal for the channel.
                debug!(auth_index = index, error = %e, "dropping unparseable channel frame");
            },
        }
    }

    info!(auth_index = index, conn_id = %conn_id, "channel disconnected");
    state.registry.channel_disconnected(index, &conn_id).await;
    write_handle.abort();
}

// ── Context liveness probe ───────────────────────────────────────────────────

/// Adapter giving the registry its view of the pool without a direct
/// dependency edge.
pub struct PoolProbe(pub Arc<ContextPoolManager>);

#[async_trait::async_trait]
impl ContextProbe for PoolProbe {
    async fn has_live_page(&self, index: usize) -> bool {
        self.0.has_live_page(index).await
    }

    async fn lightweight_reconnect(
        &self,
        index: usize,
        cancel: CancellationToken,
    ) -> ReconnectOutcome {
        match self.0.lightweight_reconnect(index, cancel).await {
            Ok(()) => ReconnectOutcome::Reconnected,
            Err(e) if e.is_cancellation() => ReconnectOutcome::Cancelled,
            Err(e) => {
                warn!(auth_index = index, error = %e, "lightweight reconnect error");
                ReconnectOutcome::Failed
            },
        }
    }
}
