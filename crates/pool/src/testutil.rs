//! In-memory driver for pool tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {async_trait::async_trait, tokio::sync::broadcast, tokio_util::sync::CancellationToken};

use atelier_accounts::AuthStore;

use crate::{
    driver::{ConsoleLevel, ConsoleLine, Driver, DriverContext, DriverPage, Viewport},
    error::{Error, Result},
    scripts,
    types::PoolPolicy,
};

pub const MOCK_STUDIO_URL: &str = "https://studio.example.com/prompts/new";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Page loads, channel comes up.
    Ok,
    /// Page lands on the login flow.
    LoginRedirect,
    /// Page lands on the region-block interstitial.
    RegionBlocked,
    /// Navigation never settles; only cancellation ends it.
    Hang,
    /// Page loads but the channel bring-up fails.
    ChannelFail,
}

#[derive(Default)]
struct MockState {
    behaviors: Mutex<HashMap<usize, MockBehavior>>,
    init_counts: Mutex<HashMap<usize, usize>>,
    nav_counts: Mutex<HashMap<usize, usize>>,
}

impl MockState {
    fn behavior(&self, index: usize) -> MockBehavior {
        self.behaviors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&index)
            .copied()
            .unwrap_or(MockBehavior::Ok)
    }

    fn bump(map: &Mutex<HashMap<usize, usize>>, index: usize) {
        *map.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(index)
            .or_insert(0) += 1;
    }

    fn count(map: &Mutex<HashMap<usize, usize>>, index: usize) -> usize {
        map.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&index)
            .copied()
            .unwrap_or(0)
    }
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(MockState::default()),
        })
    }

    pub fn set_behavior(&self, index: usize, behavior: MockBehavior) {
        self.state
            .behaviors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(index, behavior);
    }

    pub fn init_count(&self, index: usize) -> usize {
        MockState::count(&self.state.init_counts, index)
    }

    pub fn navigation_count(&self, index: usize) -> usize {
        MockState::count(&self.state.nav_counts, index)
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn launch(&self) -> Result<()> {
        Ok(())
    }

    async fn new_context(
        &self,
        storage_state: &serde_json::Value,
        _viewport: Viewport,
    ) -> Result<Arc<dyn DriverContext>> {
        let index = storage_state
            .get("mockIndex")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        MockState::bump(&self.state.init_counts, index);
        Ok(Arc::new(MockContext {
            index,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) {}
}

struct MockContext {
    index: usize,
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl DriverContext for MockContext {
    async fn new_page(&self) -> Result<Arc<dyn DriverPage>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Driver("context closed".into()));
        }
        let (console_tx, _) = broadcast::channel(64);
        Ok(Arc::new(MockPage {
            index: self.index,
            state: Arc::clone(&self.state),
            console_tx,
            closed: AtomicBool::new(false),
        }))
    }

    async fn storage_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "cookies": [], "origins": [] }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MockPage {
    index: usize,
    state: Arc<MockState>,
    console_tx: broadcast::Sender<ConsoleLine>,
    closed: AtomicBool,
}

#[async_trait]
impl DriverPage for MockPage {
    async fn add_init_script(&self, _script: &str) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str, cancel: &CancellationToken) -> Result<()> {
        MockState::bump(&self.state.nav_counts, self.index);
        match self.state.behavior(self.index) {
            MockBehavior::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            },
            MockBehavior::Ok => {
                let _ = self.console_tx.send(ConsoleLine {
                    level: ConsoleLevel::Log,
                    text: scripts::CHANNEL_READY_MARKER.to_string(),
                });
                Ok(())
            },
            MockBehavior::ChannelFail => {
                let _ = self.console_tx.send(ConsoleLine {
                    level: ConsoleLevel::Error,
                    text: scripts::CHANNEL_FAILED_MARKER.to_string(),
                });
                Ok(())
            },
            _ => Ok(()),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        if script.contains("scrollBy") || script.contains("fetch(") {
            return Ok(serde_json::json!(true));
        }
        if script == scripts::DISMISS_POPUPS_JS {
            return Ok(serde_json::json!(0));
        }
        if script == scripts::CLICK_LAUNCH_JS {
            return Ok(serde_json::json!(false));
        }
        Ok(serde_json::Value::Null)
    }

    async fn url(&self) -> Result<String> {
        Ok(match self.state.behavior(self.index) {
            MockBehavior::LoginRedirect => {
                "https://accounts.google.com/v3/signin/identifier".to_string()
            },
            _ => MOCK_STUDIO_URL.to_string(),
        })
    }

    async fn title(&self) -> Result<String> {
        Ok(match self.state.behavior(self.index) {
            MockBehavior::LoginRedirect => "Sign in".to_string(),
            MockBehavior::RegionBlocked => "Not available in your country".to_string(),
            _ => "Studio".to_string(),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn console(&self) -> broadcast::Receiver<ConsoleLine> {
        self.console_tx.subscribe()
    }

    async fn mouse_move(&self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    async fn click(&self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    async fn scroll(&self, _dx: f64, _dy: f64) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(vec![0u8; 8])
    }

    async fn content(&self) -> Result<String> {
        Ok("<html></html>".to_string())
    }
}

/// Write `auth-<i>.json` fixtures carrying a `mockIndex` marker so the mock
/// driver can attribute contexts back to accounts.
pub async fn seed_store(
    behaviors: &[(usize, MockBehavior)],
) -> (Arc<AuthStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (index, _) in behaviors {
        let blob = serde_json::json!({
            "cookies": [],
            "origins": [],
            "mockIndex": index,
        });
        std::fs::write(
            dir.path().join(format!("auth-{index}.json")),
            serde_json::to_string(&blob).unwrap(),
        )
        .unwrap();
    }
    let store = Arc::new(AuthStore::new(dir.path()));
    store.reload().await.unwrap();
    (store, dir)
}

pub fn policy(max_contexts: usize) -> PoolPolicy {
    PoolPolicy {
        max_contexts,
        switch_on_uses: 0,
        failure_threshold: 3,
        immediate_switch_status_codes: [429, 503].into_iter().collect(),
        studio_url: MOCK_STUDIO_URL.to_string(),
        trigger_url: None,
        save_credentials: false,
        browser_path: None,
        debug_dir: std::env::temp_dir().join("atelier-pool-test-debug"),
    }
}
