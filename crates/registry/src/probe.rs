//! Context liveness probe.
//!
//! The registry never holds a reference to the pool manager; it asks these
//! two questions through an injected trait object instead, which keeps the
//! dependency edge one-directional.

use {async_trait::async_trait, tokio_util::sync::CancellationToken};

/// Result of a lightweight reconnect attempt.
///
/// `Cancelled` is expected control flow (a fresh channel arrived while the
/// reconnect was in flight) and must never be treated as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected,
    Failed,
    Cancelled,
}

#[async_trait]
pub trait ContextProbe: Send + Sync {
    /// Does account `index` still have a live page?
    async fn has_live_page(&self, index: usize) -> bool;

    /// Re-establish the channel on the existing page without recreating the
    /// browser context. Honors `cancel` at every suspension point.
    async fn lightweight_reconnect(
        &self,
        index: usize,
        cancel: CancellationToken,
    ) -> ReconnectOutcome;
}
