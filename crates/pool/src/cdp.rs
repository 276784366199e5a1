//! CDP-backed driver implementation over chromiumoxide.
//!
//! One browser process, one CDP browser context per account. Stored
//! credentials are applied as cookies plus a localStorage seed script before
//! the first navigation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, BrowserConfig, Page,
        cdp::{
            browser_protocol::{
                browser::BrowserContextId,
                emulation::SetDeviceMetricsOverrideParams,
                input::{DispatchMouseEventParams, DispatchMouseEventType, MouseButton},
                network::CookieParam,
                page::{AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat},
                target::CreateTargetParams,
            },
            js_protocol::runtime::{ConsoleApiCalledType, EventConsoleApiCalled},
        },
    },
    futures::StreamExt,
    tokio::sync::{Mutex, broadcast},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{
    detect,
    driver::{ConsoleLevel, ConsoleLine, Driver, DriverContext, DriverPage, Viewport},
    error::{Error, Result},
    scripts,
};

const CONSOLE_BUFFER: usize = 256;

struct BrowserHandle {
    browser: Browser,
    event_loop: tokio::task::JoinHandle<()>,
}

type SharedBrowser = Arc<Mutex<Option<BrowserHandle>>>;

fn no_browser() -> Error {
    Error::LaunchFailed("browser not launched".into())
}

/// The production driver: a single Chromium process driven over CDP.
pub struct CdpDriver {
    browser_path: Option<std::path::PathBuf>,
    handle: SharedBrowser,
}

impl CdpDriver {
    pub fn new(browser_path: Option<std::path::PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            browser_path,
            handle: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn launch(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let detection = detect::detect_browser(self.browser_path.as_deref());
        let Some(path) = detection.path else {
            return Err(Error::LaunchFailed(detection.install_hint));
        };

        let config = BrowserConfig::builder()
            .chrome_executable(&path)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(Error::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        let event_loop = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
            debug!("browser event loop exited");
        });

        debug!(path = %path.display(), "browser launched");
        *guard = Some(BrowserHandle {
            browser,
            event_loop,
        });
        Ok(())
    }

    async fn new_context(
        &self,
        storage_state: &serde_json::Value,
        viewport: Viewport,
    ) -> Result<Arc<dyn DriverContext>> {
        let context_id = {
            let mut guard = self.handle.lock().await;
            let handle = guard.as_mut().ok_or_else(no_browser)?;
            handle
                .browser
                .create_browser_context(Default::default())
                .await
                .map_err(|e| Error::Driver(e.to_string()))?
        };

        Ok(Arc::new(CdpContext {
            handle: Arc::clone(&self.handle),
            context_id,
            cookies: sanitize_cookies(storage_state.get("cookies")),
            origins: storage_state
                .get("origins")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
            viewport,
            main_page: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(mut handle) = guard.take() {
            if let Err(e) = handle.browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            handle.event_loop.abort();
        }
    }
}

/// One account's isolated CDP browser context.
struct CdpContext {
    handle: SharedBrowser,
    context_id: BrowserContextId,
    cookies: Vec<CookieParam>,
    origins: serde_json::Value,
    viewport: Viewport,
    main_page: Mutex<Option<Arc<CdpPage>>>,
    closed: AtomicBool,
}

#[async_trait]
impl DriverContext for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn DriverPage>> {
        let page = {
            let guard = self.handle.lock().await;
            let handle = guard.as_ref().ok_or_else(no_browser)?;
            let mut params = CreateTargetParams::new("about:blank");
            params.browser_context_id = Some(self.context_id.clone());
            handle
                .browser
                .new_page(params)
                .await
                .map_err(|e| Error::Driver(e.to_string()))?
        };

        let viewport_cmd = SetDeviceMetricsOverrideParams::builder()
            .width(self.viewport.width as i64)
            .height(self.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(Error::Driver)?;
        page.execute(viewport_cmd)
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;

        if !self.cookies.is_empty() {
            page.set_cookies(self.cookies.clone())
                .await
                .map_err(|e| Error::Driver(e.to_string()))?;
        }

        let cdp_page = CdpPage::wire(page).await?;
        cdp_page
            .add_init_script(&scripts::storage_seed_script(&self.origins))
            .await?;

        *self.main_page.lock().await = Some(Arc::clone(&cdp_page));
        Ok(cdp_page)
    }

    async fn storage_state(&self) -> Result<serde_json::Value> {
        let page = self
            .main_page
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Driver("context has no page".into()))?;

        let cookies = page
            .page
            .get_cookies()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        let origins = page
            .evaluate(
                r#"[{
                    origin: location.origin,
                    localStorage: Object.entries(localStorage)
                        .map(([name, value]) => ({ name, value }))
                }]"#,
            )
            .await?;

        Ok(serde_json::json!({
            "cookies": serde_json::to_value(cookies)
                .map_err(|e| Error::Driver(e.to_string()))?,
            "origins": origins,
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(page) = self.main_page.lock().await.take() {
            page.closed.store(true, Ordering::SeqCst);
            page.listener.abort();
        }
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.as_mut() {
            if let Err(e) = handle
                .browser
                .dispose_browser_context(self.context_id.clone())
                .await
            {
                warn!(error = %e, "browser context dispose failed");
            }
        }
    }
}

/// A live page plus its console fan-out.
struct CdpPage {
    page: Page,
    console_tx: broadcast::Sender<ConsoleLine>,
    closed: Arc<AtomicBool>,
    listener: tokio::task::JoinHandle<()>,
}

impl CdpPage {
    async fn wire(page: Page) -> Result<Arc<Self>> {
        let (console_tx, _) = broadcast::channel(CONSOLE_BUFFER);
        let closed = Arc::new(AtomicBool::new(false));

        let mut events = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;

        let tx = console_tx.clone();
        let closed_flag = Arc::clone(&closed);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let _ = tx.send(console_line(&event));
            }
            // Stream end means the target is gone.
            closed_flag.store(true, Ordering::SeqCst);
        });

        Ok(Arc::new(Self {
            page,
            console_tx,
            closed,
            listener,
        }))
    }

    async fn dispatch_mouse(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        button: Option<MouseButton>,
    ) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
        if let Some(button) = button {
            builder = builder.button(button).click_count(1);
        }
        let cmd = builder.build().map_err(Error::Driver)?;
        self.page
            .execute(cmd)
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DriverPage for CdpPage {
    async fn add_init_script(&self, script: &str) -> Result<()> {
        let cmd = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script)
            .build()
            .map_err(Error::Driver)?;
        self.page
            .execute(cmd)
            .await
            .map_err(|e| Error::Driver(e.to_string()))?;
        Ok(())
    }

    async fn navigate(&self, url: &str, cancel: &CancellationToken) -> Result<()> {
        let load = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| Error::NavigationFailed(e.to_string()))?;
            // Wait for network idle; a failed settle is not fatal.
            let _ = self.page.wait_for_navigation().await;
            Ok(())
        };
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = load => result,
        }
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| Error::JsEvalFailed(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?
            .unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(|e| Error::Driver(e.to_string()))?
            .unwrap_or_default())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn console(&self) -> broadcast::Receiver<ConsoleLine> {
        self.console_tx.subscribe()
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<()> {
        self.dispatch_mouse(DispatchMouseEventType::MouseMoved, x, y, None)
            .await
    }

    async fn click(&self, x: f64, y: f64) -> Result<()> {
        self.dispatch_mouse(DispatchMouseEventType::MousePressed, x, y, Some(MouseButton::Left))
            .await?;
        self.dispatch_mouse(DispatchMouseEventType::MouseReleased, x, y, Some(MouseButton::Left))
            .await
    }

    async fn scroll(&self, dx: f64, dy: f64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy({dx}, {dy}); true"))
            .await
            .map(|_| ())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(false)
                    .build(),
            )
            .await
            .map_err(|e| Error::Driver(e.to_string()))
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| Error::Driver(e.to_string()))
    }
}

fn console_line(event: &EventConsoleApiCalled) -> ConsoleLine {
    let level = match event.r#type {
        ConsoleApiCalledType::Error => ConsoleLevel::Error,
        ConsoleApiCalledType::Warning => ConsoleLevel::Warning,
        _ => ConsoleLevel::Log,
    };
    let text = event
        .args
        .iter()
        .filter_map(|arg| arg.value.as_ref())
        .map(|value| match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    ConsoleLine { level, text }
}

/// Map stored cookies into CDP cookie params, dropping anything the protocol
/// rejects (negative expiry means a session cookie).
fn sanitize_cookies(cookies: Option<&serde_json::Value>) -> Vec<CookieParam> {
    let Some(list) = cookies.and_then(|c| c.as_array()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|cookie| {
            let mut cookie = cookie.clone();
            if let Some(obj) = cookie.as_object_mut() {
                if obj.get("expires").and_then(|e| e.as_f64()).is_some_and(|e| e < 0.0) {
                    obj.remove("expires");
                }
            }
            match serde_json::from_value::<CookieParam>(cookie) {
                Ok(param) => Some(param),
                Err(e) => {
                    warn!(error = %e, "skipping unparseable stored cookie");
                    None
                },
            }
        })
        .collect()
}
