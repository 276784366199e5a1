//! The black-box browser driver interface.
//!
//! The pool manager is written against these traits; the CDP adapter in
//! [`crate::cdp`] is the production implementation. Tests substitute an
//! in-memory driver.

use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::broadcast, tokio_util::sync::CancellationToken};

use crate::error::Result;

/// Page viewport, jittered per context so fingerprints differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One console line emitted by a page.
#[derive(Debug, Clone)]
pub struct ConsoleLine {
    pub level: ConsoleLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warning,
    Error,
}

/// The single browser process.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Launch the browser. Idempotent; later calls are no-ops.
    async fn launch(&self) -> Result<()>;

    /// Create an isolated context primed with an account's stored
    /// credentials (cookies and per-origin storage).
    async fn new_context(
        &self,
        storage_state: &serde_json::Value,
        viewport: Viewport,
    ) -> Result<Arc<dyn DriverContext>>;

    /// Tear down the browser process and everything in it.
    async fn shutdown(&self);
}

/// One account's isolated browsing context.
#[async_trait]
pub trait DriverContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn DriverPage>>;

    /// Current cookies and per-origin storage, for credential refresh.
    async fn storage_state(&self) -> Result<serde_json::Value>;

    async fn close(&self);
}

/// A live page inside a context.
#[async_trait]
pub trait DriverPage: Send + Sync {
    /// Install a script evaluated before every document in this page.
    async fn add_init_script(&self, script: &str) -> Result<()>;

    /// Navigate and wait for the load to settle. Honors `cancel`.
    async fn navigate(&self, url: &str, cancel: &CancellationToken) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    fn is_closed(&self) -> bool;

    /// Console stream; each subscription sees lines from subscription time.
    fn console(&self) -> broadcast::Receiver<ConsoleLine>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<()>;

    async fn click(&self, x: f64, y: f64) -> Result<()>;

    async fn scroll(&self, dx: f64, dy: f64) -> Result<()>;

    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;
}
