//! Per-request message queue.
//!
//! A bounded, closable, strictly FIFO channel of response fragments. The
//! registry holds the producer half and routes page events into it; the
//! request handler holds the consumer half.

use std::sync::Arc;

use {tokio::sync::mpsc, tokio_util::sync::CancellationToken};

/// Fragments travelling from the page channel to a waiting request handler.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Headers {
        status: u16,
        headers: serde_json::Map<String, serde_json::Value>,
    },
    Chunk(serde_json::Value),
    Error {
        status: Option<u16>,
        message: String,
    },
    /// Terminal. Emitted for upstream `stream_close` and synthesized when the
    /// queue is force-closed.
    StreamEnd,
}

impl QueueEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::StreamEnd)
    }
}

const QUEUE_CAPACITY: usize = 256;

/// Producer half, held by the registry.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: mpsc::Sender<QueueEvent>,
    closed: Arc<CancellationToken>,
}

/// Consumer half, held by the request handler.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueEvent>,
    closed: Arc<CancellationToken>,
}

/// Create a bounded queue pair.
pub fn message_queue() -> (MessageQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let closed = Arc::new(CancellationToken::new());
    (
        MessageQueue {
            tx,
            closed: Arc::clone(&closed),
        },
        QueueReceiver { rx, closed },
    )
}

impl MessageQueue {
    /// Enqueue an event, applying back-pressure when the consumer lags.
    ///
    /// Enqueue after close is a no-op; so is enqueue after the consumer went
    /// away.
    pub async fn push(&self, event: QueueEvent) {
        if self.closed.is_cancelled() {
            return;
        }
        tokio::select! {
            () = self.closed.cancelled() => {},
            _ = self.tx.send(event) => {},
        }
    }

    /// Close the queue, unblocking any pending consumer with a synthetic
    /// terminal.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl QueueReceiver {
    /// Await the next event. Buffered events are drained before a close is
    /// honored; end-of-stream and force-close both surface as `StreamEnd`.
    pub async fn recv(&mut self) -> QueueEvent {
        if let Ok(event) = self.rx.try_recv() {
            return event;
        }
        tokio::select! {
            biased;
            event = self.rx.recv() => event.unwrap_or(QueueEvent::StreamEnd),
            () = self.closed.cancelled() => QueueEvent::StreamEnd,
        }
    }

    /// Cancel consumption (client went away). Further producer pushes become
    /// no-ops.
    pub fn cancel(&self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (tx, mut rx) = message_queue();
        tx.push(QueueEvent::Headers {
            status: 200,
            headers: serde_json::Map::new(),
        })
        .await;
        tx.push(QueueEvent::Chunk(serde_json::json!(1))).await;
        tx.push(QueueEvent::StreamEnd).await;

        assert!(matches!(rx.recv().await, QueueEvent::Headers { status: 200, .. }));
        assert_eq!(rx.recv().await, QueueEvent::Chunk(serde_json::json!(1)));
        assert_eq!(rx.recv().await, QueueEvent::StreamEnd);
    }

    #[tokio::test]
    async fn close_unblocks_pending_consumer() {
        let (tx, mut rx) = message_queue();
        let consumer = tokio::spawn(async move { rx.recv().await });
        tx.close();
        assert_eq!(consumer.await.unwrap(), QueueEvent::StreamEnd);
    }

    #[tokio::test]
    async fn push_after_close_is_noop() {
        let (tx, mut rx) = message_queue();
        tx.push(QueueEvent::Chunk(serde_json::json!("early"))).await;
        tx.close();
        tx.push(QueueEvent::Chunk(serde_json::json!("late"))).await;

        // Buffered event survives, then the synthetic terminal.
        assert_eq!(rx.recv().await, QueueEvent::Chunk(serde_json::json!("early")));
        assert_eq!(rx.recv().await, QueueEvent::StreamEnd);
        assert_eq!(rx.recv().await, QueueEvent::StreamEnd);
    }

    #[tokio::test]
    async fn dropped_producer_surfaces_stream_end() {
        let (tx, mut rx) = message_queue();
        drop(tx);
        assert_eq!(rx.recv().await, QueueEvent::StreamEnd);
    }
}
