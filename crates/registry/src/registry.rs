//! Account → channel bindings and per-request routing.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    dashmap::DashMap,
    tokio::sync::{Mutex, RwLock, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    atelier_accounts::ActiveAccount,
    atelier_protocol::{
        LIGHTWEIGHT_RECONNECT_TIMEOUT_MS, PageEvent, RECONNECT_GRACE_MS, close_reasons,
    },
};

use crate::{
    error::{Error, Result},
    probe::{ContextProbe, ReconnectOutcome},
    queue::{MessageQueue, QueueEvent, QueueReceiver, message_queue},
};

// ── Channel endpoint ─────────────────────────────────────────────────────────

/// One end of the duplex control channel a running page opened back to the
/// server. Carries its bound account index for cleanup.
#[derive(Debug)]
pub struct ChannelEndpoint {
    pub auth_index: usize,
    pub conn_id: String,
    /// Serialized frames destined for this channel's write loop.
    sender: mpsc::UnboundedSender<String>,
    close: CancellationToken,
    close_reason: OnceLock<String>,
}

impl ChannelEndpoint {
    pub fn new(auth_index: usize, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            auth_index,
            conn_id: uuid::Uuid::new_v4().to_string(),
            sender,
            close: CancellationToken::new(),
            close_reason: OnceLock::new(),
        }
    }

    /// Queue a frame for the write loop. Returns `false` when the channel is
    /// closed or the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        !self.close.is_cancelled() && self.sender.send(frame.to_string()).is_ok()
    }

    pub fn is_open(&self) -> bool {
        !self.close.is_cancelled() && !self.sender.is_closed()
    }

    /// Ask the channel's socket loop to shut down with `reason`.
    pub fn close(&self, reason: &str) {
        let _ = self.close_reason.set(reason.to_string());
        self.close.cancel();
    }

    /// Token the socket loop watches to learn about server-side closes.
    pub fn closed(&self) -> CancellationToken {
        self.close.clone()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.get().map(String::as_str)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Maps account index → live channel endpoint and request id → message queue.
///
/// Invariants: at most one endpoint per index, at most one grace timer per
/// index, at most one lightweight reconnect in flight per index.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<usize, Arc<ChannelEndpoint>>>,
    queues: DashMap<String, MessageQueue>,
    grace_timers: Mutex<HashMap<usize, CancellationToken>>,
    reconnecting: Mutex<HashSet<usize>>,
    reconnect_cancels: Mutex<HashMap<usize, CancellationToken>>,
    active: Arc<ActiveAccount>,
    probe: RwLock<Option<Arc<dyn ContextProbe>>>,
}

impl ConnectionRegistry {
    pub fn new(active: Arc<ActiveAccount>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
            queues: DashMap::new(),
            grace_timers: Mutex::new(HashMap::new()),
            reconnecting: Mutex::new(HashSet::new()),
            reconnect_cancels: Mutex::new(HashMap::new()),
            active,
            probe: RwLock::new(None),
        })
    }

    /// Inject the context liveness probe (late-bound: the pool manager is
    /// constructed after the registry).
    pub async fn set_probe(&self, probe: Arc<dyn ContextProbe>) {
        *self.probe.write().await = Some(probe);
    }

    /// Bind a new endpoint for its declared account index.
    ///
    /// An existing endpoint for the same index is closed first ("replaced");
    /// any pending grace timer or lightweight reconnect for the index is
    /// cancelled. Replacing a live endpoint for the active account also
    /// force-closes every pending message queue: a page only opens a second
    /// channel after reloading, which aborted its in-flight requests. A
    /// reopen after a plain socket drop keeps the queues — the page-side
    /// requests are still running and their fragments resume on the new
    /// channel.
    pub async fn accept(&self, endpoint: ChannelEndpoint) -> Arc<ChannelEndpoint> {
        let index = endpoint.auth_index;

        self.cancel_timers(index).await;

        let endpoint = Arc::new(endpoint);
        let replaced = {
            let mut connections = self.connections.lock().await;
            connections.insert(index, Arc::clone(&endpoint))
        };
        let replaced_live = replaced.is_some();
        if let Some(old) = replaced {
            debug!(auth_index = index, old_conn = %old.conn_id, "replacing channel");
            old.close(close_reasons::REPLACED);
        }

        if replaced_live && self.active.is(index) {
            self.close_all_queues();
        }

        info!(auth_index = index, conn_id = %endpoint.conn_id, "channel bound");
        endpoint
    }

    /// Route one page event into its request queue.
    ///
    /// `response_headers`, `chunk`, and `error` are enqueued verbatim;
    /// `stream_close` becomes the `StreamEnd` terminal. Events for unknown
    /// request ids are logged and dropped.
    pub async fn handle_event(&self, event: PageEvent) {
        let request_id = event.request_id().to_string();
        let Some(queue) = self.queues.get(&request_id).map(|q| q.value().clone()) else {
            debug!(request_id, "dropping event for unknown request");
            return;
        };

        match event {
            PageEvent::ResponseHeaders { status, headers, .. } => {
                queue.push(QueueEvent::Headers { status, headers }).await;
            },
            PageEvent::Chunk { data, .. } => {
                queue.push(QueueEvent::Chunk(data)).await;
            },
            PageEvent::Error { status, message, .. } => {
                queue.push(QueueEvent::Error { status, message }).await;
                self.queues.remove(&request_id);
            },
            PageEvent::StreamClose { .. } => {
                queue.push(QueueEvent::StreamEnd).await;
                self.queues.remove(&request_id);
            },
        }
    }

    /// Allocate a request id and its message queue.
    pub fn create_queue(&self) -> (String, QueueReceiver) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = message_queue();
        self.queues.insert(request_id.clone(), tx);
        (request_id, rx)
    }

    /// Drop the id → queue mapping and close the queue. Safe to call more
    /// than once; only the first call observes the queue.
    pub fn remove_queue(&self, request_id: &str) {
        if let Some((_, queue)) = self.queues.remove(request_id) {
            queue.close();
        }
    }

    /// Force-close every pending queue (account switch, channel takeover).
    pub fn close_all_queues(&self) {
        let count = self.queues.len();
        if count > 0 {
            warn!(count, "force-closing pending request queues");
        }
        for entry in self.queues.iter() {
            entry.value().close();
        }
        self.queues.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.queues.len()
    }

    /// Send a frame to the channel bound to `index`.
    pub async fn send_to(&self, index: usize, frame: &str) -> Result<()> {
        let connections = self.connections.lock().await;
        let endpoint = connections.get(&index).ok_or(Error::NoChannel(index))?;
        if endpoint.send(frame) {
            Ok(())
        } else {
            Err(Error::ChannelClosed(index))
        }
    }

    /// Send a frame to every OPEN channel. Failures are logged and do not
    /// abort the broadcast.
    pub async fn broadcast(&self, frame: &str) {
        let connections = self.connections.lock().await;
        for (index, endpoint) in connections.iter() {
            if !endpoint.is_open() {
                continue;
            }
            if !endpoint.send(frame) {
                warn!(auth_index = index, "broadcast send failed");
            }
        }
    }

    pub async fn has_endpoint(&self, index: usize) -> bool {
        self.connections.lock().await.contains_key(&index)
    }

    pub async fn endpoint_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Close and unbind the endpoint for `index`.
    ///
    /// Callers tearing down an account must close the endpoint *before* the
    /// pool closes the underlying context, so the disconnect handler observes
    /// the missing page and skips reconnect logic.
    pub async fn close_endpoint(&self, index: usize, reason: &str) -> bool {
        let removed = self.connections.lock().await.remove(&index);
        match removed {
            Some(endpoint) => {
                endpoint.close(reason);
                true
            },
            None => false,
        }
    }

    /// Handle a dropped channel.
    ///
    /// No-op when the endpoint was already replaced. When the page is gone
    /// the registry only cleans up; otherwise a grace timer runs, after which
    /// pending queues are closed (if this was the active account) and a
    /// single lightweight reconnect is attempted.
    pub async fn channel_disconnected(self: &Arc<Self>, index: usize, conn_id: &str) {
        {
            let mut connections = self.connections.lock().await;
            match connections.get(&index) {
                Some(current) if current.conn_id == conn_id => {
                    connections.remove(&index);
                },
                // A newer channel already took the slot, or the endpoint was
                // explicitly closed; nothing to clean up.
                _ => return,
            }
        }

        let probe = self.probe.read().await.clone();
        let page_alive = match &probe {
            Some(probe) => probe.has_live_page(index).await,
            None => false,
        };
        if !page_alive {
            debug!(auth_index = index, "channel dropped with no live page, skipping reconnect");
            if self.active.is(index) {
                self.close_all_queues();
            }
            return;
        }

        let grace = CancellationToken::new();
        self.grace_timers
            .lock()
            .await
            .insert(index, grace.clone());

        info!(auth_index = index, "channel dropped, starting grace timer");
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = grace.cancelled() => {
                    debug!(auth_index = index, "grace timer cancelled by new channel");
                    return;
                },
                () = tokio::time::sleep(Duration::from_millis(RECONNECT_GRACE_MS)) => {},
            }
            registry.grace_timers.lock().await.remove(&index);

            if registry.active.is(index) {
                registry.close_all_queues();
            }
            registry.attempt_lightweight_reconnect(index).await;
        });
    }

    /// Single-flight lightweight reconnect, bounded by the reconnect timeout.
    async fn attempt_lightweight_reconnect(self: &Arc<Self>, index: usize) {
        {
            let mut reconnecting = self.reconnecting.lock().await;
            if !reconnecting.insert(index) {
                debug!(auth_index = index, "lightweight reconnect already in flight");
                return;
            }
        }

        let cancel = CancellationToken::new();
        self.reconnect_cancels
            .lock()
            .await
            .insert(index, cancel.clone());

        let probe = self.probe.read().await.clone();
        if let Some(probe) = probe {
            let attempt = tokio::time::timeout(
                Duration::from_millis(LIGHTWEIGHT_RECONNECT_TIMEOUT_MS),
                probe.lightweight_reconnect(index, cancel.clone()),
            );
            match attempt.await {
                Ok(ReconnectOutcome::Reconnected) => {
                    info!(auth_index = index, "lightweight reconnect succeeded");
                },
                Ok(ReconnectOutcome::Cancelled) => {
                    debug!(auth_index = index, "lightweight reconnect superseded");
                },
                Ok(ReconnectOutcome::Failed) => {
                    warn!(auth_index = index, "lightweight reconnect failed");
                },
                Err(_) => {
                    cancel.cancel();
                    warn!(auth_index = index, "lightweight reconnect timed out");
                },
            }
        }

        self.reconnect_cancels.lock().await.remove(&index);
        self.reconnecting.lock().await.remove(&index);
    }

    /// Cancel any grace timer and pending lightweight reconnect for `index`.
    async fn cancel_timers(&self, index: usize) {
        if let Some(timer) = self.grace_timers.lock().await.remove(&index) {
            timer.cancel();
        }
        if let Some(cancel) = self.reconnect_cancels.lock().await.remove(&index) {
            cancel.cancel();
        }
    }
}
