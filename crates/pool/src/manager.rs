//! Context pool manager.
//!
//! Owns the single browser process and one pre-warmed context per account.
//! Contexts are created in priority order at startup, rebalanced as the
//! account set changes, and replaced through fast-switch / lightweight
//! reconnect rather than full re-initialization wherever possible.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use {
    rand::Rng,
    tokio::sync::{Notify, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_protocol::{CHANNEL_INIT_TIMEOUT_MS, NAVIGATION_TIMEOUT_MS, SESSION_CLEANUP_PAUSE_MS},
};

use crate::{
    driver::{Driver, DriverContext, DriverPage, Viewport},
    error::{Error, Result},
    health,
    scripts,
    types::{LandingFailure, PoolPolicy, classify_landing},
};

const PAGE_ERROR_POLL_MS: u64 = 2_000;
const POPUP_SWEEP_MS: u64 = 500;
const POPUP_SWEEP_MAX_ROUNDS: u32 = 8;
const POPUP_SWEEP_IDLE_ROUNDS: u32 = 2;

/// In-page channel bring-up state, derived from console markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInit {
    Pending,
    Ready,
    Failed(String),
}

/// One live context: browser context, active page, channel state, health
/// timer. Exactly one record exists per account index.
struct ContextRecord {
    context: Arc<dyn DriverContext>,
    page: Arc<dyn DriverPage>,
    init_tx: watch::Sender<ChannelInit>,
    health: CancellationToken,
}

struct PreloadWorker {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Guard for the per-index init mutex set.
struct InitGuard<'a> {
    manager: &'a ContextPoolManager,
    index: usize,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        let mut set = self
            .manager
            .initializing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        set.remove(&self.index);
        drop(set);
        self.manager.init_done.notify_waiters();
    }
}

pub struct ContextPoolManager {
    driver: Arc<dyn Driver>,
    store: Arc<AuthStore>,
    active: Arc<ActiveAccount>,
    policy: PoolPolicy,
    contexts: tokio::sync::Mutex<HashMap<usize, ContextRecord>>,
    /// Per-index init mutex set: one initializer per account, additional
    /// callers wait and re-enter through the fast path.
    initializing: std::sync::Mutex<HashSet<usize>>,
    init_done: Notify,
    preload: tokio::sync::Mutex<Option<PreloadWorker>>,
    /// Snapshot of the active page for the background wakeup task.
    active_page: watch::Sender<Option<(usize, Arc<dyn DriverPage>)>>,
}

impl ContextPoolManager {
    pub fn new(
        driver: Arc<dyn Driver>,
        store: Arc<AuthStore>,
        active: Arc<ActiveAccount>,
        policy: PoolPolicy,
    ) -> Arc<Self> {
        let (active_page, wakeup_rx) = watch::channel(None);
        let manager = Arc::new(Self {
            driver,
            store,
            active,
            policy,
            contexts: tokio::sync::Mutex::new(HashMap::new()),
            initializing: std::sync::Mutex::new(HashSet::new()),
            init_done: Notify::new(),
            preload: tokio::sync::Mutex::new(None),
            active_page,
        });
        health::spawn_wakeup(wakeup_rx);
        manager
    }

    pub fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    /// Launch the browser process.
    pub async fn launch(&self) -> Result<()> {
        self.driver.launch().await
    }

    // ── Startup preload ──────────────────────────────────────────────────

    /// Try `order` synchronously until one context comes up; that account
    /// becomes active. The rest of the rotation is filled in the background.
    pub async fn preload(self: &Arc<Self>, order: &[usize]) -> Result<usize> {
        for &index in order {
            match self.initialize_context(index, CancellationToken::new()).await {
                Ok(()) => {
                    self.activate(index).await;
                    self.schedule_background_preload().await;
                    return Ok(index);
                },
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    warn!(auth_index = index, error = %e, "startup init failed, trying next");
                },
            }
        }
        Err(Error::NoUsableAccount)
    }

    /// Replace any running background preloader with a fresh one covering the
    /// rotation from the active account forward, up to `max_contexts`.
    pub async fn schedule_background_preload(self: &Arc<Self>) {
        self.abort_background_preload().await;

        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            manager.run_preload(token).await;
        });
        *self.preload.lock().await = Some(PreloadWorker { cancel, handle });
    }

    /// Abort the background preloader and wait for it to finish.
    ///
    /// Post-condition: no initializer spawned by the preloader is running.
    pub async fn abort_background_preload(&self) {
        let worker = self.preload.lock().await.take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "background preload task panicked");
                }
            }
        }
    }

    async fn run_preload(self: Arc<Self>, cancel: CancellationToken) {
        let rotation = self.store.rotation_indices().await;
        if rotation.is_empty() {
            return;
        }
        let limit = if self.policy.is_bounded() {
            self.policy.max_contexts
        } else {
            rotation.len()
        };
        let start = match self.active.get() {
            Some(active) => {
                let canonical = self.store.canonical(active).await;
                rotation.iter().position(|&i| i == canonical).unwrap_or(0)
            },
            None => 0,
        };

        for offset in 0..rotation.len() {
            if cancel.is_cancelled() {
                debug!("background preload aborted");
                return;
            }
            if self.context_count().await >= limit {
                break;
            }
            let index = rotation[(start + offset) % rotation.len()];
            if self.has_context(index).await {
                continue;
            }
            match self.initialize_context(index, cancel.child_token()).await {
                Ok(()) => info!(auth_index = index, "preloaded context"),
                Err(e) if e.is_cancellation() => {
                    debug!(auth_index = index, "background preload aborted mid-init");
                    return;
                },
                Err(e) => warn!(auth_index = index, error = %e, "preload init failed"),
            }
        }
    }

    // ── Switching ────────────────────────────────────────────────────────

    /// Activate `index`, reusing its pre-warmed context when it is still
    /// healthy, falling back to full initialization otherwise.
    ///
    /// A cheap URL/title read validates the stored page. A login redirect
    /// marks the account expired and raises without re-initializing: expired
    /// accounts do not retry on the fast path.
    pub async fn fast_switch(self: &Arc<Self>, index: usize) -> Result<()> {
        enum Check {
            Valid,
            Expired,
            Dead,
            Missing,
        }

        let page = {
            let contexts = self.contexts.lock().await;
            contexts.get(&index).map(|r| Arc::clone(&r.page))
        };

        let check = match page {
            None => Check::Missing,
            Some(page) if page.is_closed() => Check::Dead,
            Some(page) => {
                let landed = async {
                    let url = page.url().await?;
                    let title = page.title().await?;
                    Ok::<_, Error>(classify_landing(&url, &title))
                };
                match landed.await {
                    Ok(None) => Check::Valid,
                    Ok(Some(LandingFailure::LoginRedirect)) => Check::Expired,
                    Ok(Some(_)) | Err(_) => Check::Dead,
                }
            },
        };

        match check {
            Check::Valid => {
                self.activate(index).await;
                return Ok(());
            },
            Check::Expired => {
                self.store.mark_expired(index).await;
                self.close_context(index).await;
                return Err(Error::AuthExpired(index));
            },
            Check::Dead => {
                debug!(auth_index = index, "stored context failed liveness check");
                self.close_context(index).await;
            },
            Check::Missing => {},
        }

        // Slow path: full initialization, after which a prior expired mark is
        // stale by definition.
        self.initialize_context(index, CancellationToken::new())
            .await?;
        self.store.clear_expired(index).await;
        self.activate(index).await;
        Ok(())
    }

    /// Make room before switching to a yet-uninitialized `target`.
    ///
    /// Eviction priority: stale duplicates, then expired accounts (never the
    /// target), then contexts farthest ahead of the target in rotation order.
    pub async fn pre_cleanup(self: &Arc<Self>, target: usize) -> Result<()> {
        self.abort_background_preload().await;

        if !self.policy.is_bounded() || self.has_context(target).await {
            return Ok(());
        }
        let resident = self.context_indices().await;
        let over = (resident.len() + 1).saturating_sub(self.policy.max_contexts);
        if over == 0 {
            return Ok(());
        }

        let rotation = self.store.rotation_indices().await;
        let mut ranked: Vec<(u8, usize, usize)> = Vec::with_capacity(resident.len());
        for &index in &resident {
            let canonical = self.store.canonical(index).await;
            let expired = self.store.is_expired(index).await;
            let class = if canonical != index {
                0 // stale duplicate
            } else if expired && index != target {
                1
            } else {
                2
            };
            ranked.push((class, rotation_distance(&rotation, target, index), index));
        }
        // Lowest class first; within a class, farthest from the target first.
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        for &(_, _, victim) in ranked.iter().take(over) {
            info!(auth_index = victim, "evicting context to make room");
            self.close_context(victim).await;
        }
        Ok(())
    }

    /// Close every context outside the desired window around the active
    /// account, then refill in the background.
    pub async fn rebalance(self: &Arc<Self>) {
        let rotation = self.store.rotation_indices().await;
        let active = self.active.get();

        let mut desired: HashSet<usize> = if self.policy.is_bounded() {
            match active {
                Some(active) => {
                    let canonical = self.store.canonical(active).await;
                    let start = rotation.iter().position(|&i| i == canonical).unwrap_or(0);
                    (0..rotation.len().min(self.policy.max_contexts))
                        .map(|offset| rotation[(start + offset) % rotation.len()])
                        .collect()
                },
                None => rotation.iter().take(self.policy.max_contexts).copied().collect(),
            }
        } else {
            rotation.iter().copied().collect()
        };

        // When the active account is a stale duplicate its canonical twin
        // must not occupy a second slot.
        if let Some(active) = active {
            let canonical = self.store.canonical(active).await;
            if self.policy.is_bounded() && canonical != active {
                desired.remove(&canonical);
            }
            desired.insert(active);
        }

        let to_close: Vec<usize> = self
            .context_indices()
            .await
            .into_iter()
            .filter(|i| !desired.contains(i))
            .collect();
        for index in to_close {
            info!(auth_index = index, "closing context outside rotation window");
            self.close_context(index).await;
        }

        self.schedule_background_preload().await;
    }

    // ── Initialization ───────────────────────────────────────────────────

    async fn initialize_context(
        self: &Arc<Self>,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        let _guard = self.acquire_init(index).await;
        if self.has_context(index).await {
            // Another initializer won while we waited.
            return Ok(());
        }
        check_abort(&cancel, index)?;

        let credentials = self
            .store
            .credentials(index)
            .await
            .ok_or(Error::MissingCredentials(index))?;
        let seed = self
            .store
            .email(index)
            .await
            .unwrap_or_else(|| index.to_string());

        let context = self
            .driver
            .new_context(&credentials, jittered_viewport())
            .await?;

        match self.bring_up(index, &seed, Arc::clone(&context), &cancel).await {
            Ok((page, init_tx)) => {
                let health = health::spawn_health_timer(
                    index,
                    Arc::clone(&page),
                    Arc::clone(&context),
                    Arc::clone(&self.store),
                    Arc::clone(&self.active),
                    self.policy.save_credentials,
                );
                let mut contexts = self.contexts.lock().await;
                contexts.insert(index, ContextRecord {
                    context,
                    page,
                    init_tx,
                    health,
                });
                info!(auth_index = index, "context initialized");
                Ok(())
            },
            Err(e) => {
                if !e.is_cancellation() {
                    self.persist_debug_artifacts(index, &context).await;
                }
                context.close().await;
                tokio::time::sleep(Duration::from_millis(SESSION_CLEANUP_PAUSE_MS)).await;
                Err(normalize_cancel(e, index))
            },
        }
    }

    /// Page bring-up: stealth script, console wiring, navigation, landing
    /// checks, popup sweep, launch click, channel-ready wait.
    async fn bring_up(
        &self,
        index: usize,
        seed: &str,
        context: Arc<dyn DriverContext>,
        cancel: &CancellationToken,
    ) -> Result<(Arc<dyn DriverPage>, watch::Sender<ChannelInit>)> {
        check_abort(cancel, index)?;
        let page = context.new_page().await?;
        page.add_init_script(&scripts::stealth_script(seed, index))
            .await?;

        let (init_tx, init_rx) = watch::channel(ChannelInit::Pending);
        spawn_console_watcher(index, page.console(), init_tx.clone());

        check_abort(cancel, index)?;
        let navigation = tokio::time::timeout(
            Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            page.navigate(&self.policy.studio_url, cancel),
        );
        match navigation.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::Timeout("studio navigation".into())),
        }

        check_abort(cancel, index)?;
        self.check_landing(index, &page).await?;
        self.sweep_popups(index, &page, cancel).await?;

        check_abort(cancel, index)?;
        if let Ok(serde_json::Value::Bool(true)) = page.evaluate(scripts::CLICK_LAUNCH_JS).await {
            debug!(auth_index = index, "clicked launch button");
        }

        self.wait_channel_ready(index, &page, init_rx, cancel).await?;
        Ok((page, init_tx))
    }

    async fn check_landing(&self, index: usize, page: &Arc<dyn DriverPage>) -> Result<()> {
        let url = page.url().await?;
        let title = page.title().await?;
        match classify_landing(&url, &title) {
            None => Ok(()),
            Some(LandingFailure::LoginRedirect) => {
                self.store.mark_expired(index).await;
                Err(Error::AuthExpired(index))
            },
            Some(LandingFailure::RegionBlocked) => Err(Error::RegionBlocked(index)),
            Some(LandingFailure::Unreachable) => Err(Error::Unreachable {
                index,
                reason: format!("landed on {url:?} ({title:?})"),
            }),
        }
    }

    /// Short-poll popup dismissal with a bounded idle exit.
    async fn sweep_popups(
        &self,
        index: usize,
        page: &Arc<dyn DriverPage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut idle_rounds = 0;
        for _ in 0..POPUP_SWEEP_MAX_ROUNDS {
            check_abort(cancel, index)?;
            let clicked = page
                .evaluate(scripts::DISMISS_POPUPS_JS)
                .await?
                .as_u64()
                .unwrap_or(0);
            if clicked == 0 {
                idle_rounds += 1;
                if idle_rounds >= POPUP_SWEEP_IDLE_ROUNDS {
                    break;
                }
            } else {
                debug!(auth_index = index, clicked, "dismissed popups");
                idle_rounds = 0;
            }
            tokio::time::sleep(Duration::from_millis(POPUP_SWEEP_MS)).await;
        }
        Ok(())
    }

    /// Wait for the in-page client's ready marker, polling for page-level
    /// error banners along the way.
    async fn wait_channel_ready(
        &self,
        index: usize,
        page: &Arc<dyn DriverPage>,
        mut init_rx: watch::Receiver<ChannelInit>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let error_probe = scripts::page_error_script();
        let wait = async {
            loop {
                match init_rx.borrow().clone() {
                    ChannelInit::Ready => return Ok(()),
                    ChannelInit::Failed(reason) => {
                        return Err(Error::Unreachable { index, reason });
                    },
                    ChannelInit::Pending => {},
                }
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::ContextAborted(index)),
                    changed = init_rx.changed() => {
                        if changed.is_err() {
                            return Err(Error::Driver("console watcher gone".into()));
                        }
                    },
                    () = tokio::time::sleep(Duration::from_millis(PAGE_ERROR_POLL_MS)) => {
                        if let Some(marker) = page
                            .evaluate(&error_probe)
                            .await?
                            .as_str()
                            .map(str::to_string)
                        {
                            return Err(Error::Unreachable { index, reason: marker });
                        }
                    },
                }
            }
        };
        match tokio::time::timeout(Duration::from_millis(CHANNEL_INIT_TIMEOUT_MS), wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("channel init marker".into())),
        }
    }

    // ── Lightweight reconnect ────────────────────────────────────────────

    /// Restore the control channel by re-navigating the existing page,
    /// without recreating the browser context.
    pub async fn lightweight_reconnect(
        self: &Arc<Self>,
        index: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (page, init_tx) = {
            let contexts = self.contexts.lock().await;
            let record = contexts
                .get(&index)
                .ok_or(Error::NoContext(index))?;
            (Arc::clone(&record.page), record.init_tx.clone())
        };

        init_tx.send_replace(ChannelInit::Pending);
        let init_rx = init_tx.subscribe();

        let navigation = tokio::time::timeout(
            Duration::from_millis(NAVIGATION_TIMEOUT_MS),
            page.navigate(&self.policy.studio_url, &cancel),
        );
        match navigation.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(normalize_cancel(e, index)),
            Err(_) => return Err(Error::Timeout("reconnect navigation".into())),
        }

        if let Err(e) = self.check_landing(index, &page).await {
            if matches!(e, Error::AuthExpired(_)) {
                self.close_context(index).await;
            }
            return Err(e);
        }
        self.sweep_popups(index, &page, &cancel).await?;
        let _ = page.evaluate(scripts::CLICK_LAUNCH_JS).await;
        self.wait_channel_ready(index, &page, init_rx, &cancel)
            .await?;

        // Best-effort backend wake-up; absence never fails the reconnect.
        if let Some(trigger_url) = &self.policy.trigger_url {
            match page.evaluate(&scripts::active_trigger_script(trigger_url)).await {
                Ok(serde_json::Value::Bool(true)) => {
                    debug!(auth_index = index, "active trigger sent");
                },
                other => {
                    warn!(auth_index = index, ?other, "active trigger failed");
                },
            }
        }

        // Restart the health timer only while this account is still active.
        if self.active.is(index) {
            let mut contexts = self.contexts.lock().await;
            if let Some(record) = contexts.get_mut(&index) {
                record.health.cancel();
                record.health = health::spawn_health_timer(
                    index,
                    Arc::clone(&record.page),
                    Arc::clone(&record.context),
                    Arc::clone(&self.store),
                    Arc::clone(&self.active),
                    self.policy.save_credentials,
                );
            }
        }

        info!(auth_index = index, "lightweight reconnect complete");
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Close the context for `index`. After this returns, a later channel
    /// disconnect for the index observes no live page and skips reconnects.
    pub async fn close_context(&self, index: usize) -> bool {
        let record = self.contexts.lock().await.remove(&index);
        let Some(record) = record else {
            return false;
        };

        record.health.cancel();
        record.context.close().await;
        if self
            .active_page
            .borrow()
            .as_ref()
            .is_some_and(|(i, _)| *i == index)
        {
            let _ = self.active_page.send(None);
        }
        // Give the OS a moment to release the context's ports.
        tokio::time::sleep(Duration::from_millis(SESSION_CLEANUP_PAUSE_MS)).await;
        info!(auth_index = index, "context closed");
        true
    }

    pub async fn shutdown(&self) {
        self.abort_background_preload().await;
        let indices = self.context_indices().await;
        for index in indices {
            self.close_context(index).await;
        }
        self.driver.shutdown().await;
        info!("context pool shut down");
    }

    /// Does `index` currently have a context with a live page?
    pub async fn has_live_page(&self, index: usize) -> bool {
        let contexts = self.contexts.lock().await;
        contexts
            .get(&index)
            .is_some_and(|record| !record.page.is_closed())
    }

    pub async fn has_context(&self, index: usize) -> bool {
        self.contexts.lock().await.contains_key(&index)
    }

    pub async fn context_count(&self) -> usize {
        self.contexts.lock().await.len()
    }

    pub async fn context_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.contexts.lock().await.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// True while any initializer is running (used by tests and the status
    /// surface).
    pub fn is_initializing(&self) -> bool {
        !self
            .initializing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty()
    }

    async fn activate(&self, index: usize) {
        self.active.set(Some(index));
        let page = {
            let contexts = self.contexts.lock().await;
            contexts.get(&index).map(|r| Arc::clone(&r.page))
        };
        if let Some(page) = page {
            let _ = self.active_page.send(Some((index, page)));
        }
        info!(auth_index = index, "account activated");
    }

    async fn acquire_init(&self, index: usize) -> InitGuard<'_> {
        loop {
            let notified = self.init_done.notified();
            {
                let mut set = self
                    .initializing
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if set.insert(index) {
                    return InitGuard {
                        manager: self,
                        index,
                    };
                }
            }
            notified.await;
        }
    }

    async fn persist_debug_artifacts(&self, index: usize, context: &Arc<dyn DriverContext>) {
        let Ok(()) = std::fs::create_dir_all(&self.policy.debug_dir) else {
            return;
        };
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(_) => return,
        };
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        if let Ok(bytes) = page.screenshot().await {
            let path = self.policy.debug_dir.join(format!("ctx-{index}-{stamp}.png"));
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(error = %e, "failed to write debug screenshot");
            }
        }
        if let Ok(dom) = page.content().await {
            let path = self.policy.debug_dir.join(format!("ctx-{index}-{stamp}.html"));
            if let Err(e) = std::fs::write(&path, dom) {
                warn!(error = %e, "failed to write debug DOM dump");
            }
        }
    }
}

fn check_abort(cancel: &CancellationToken, index: usize) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::ContextAborted(index))
    } else {
        Ok(())
    }
}

fn normalize_cancel(error: Error, index: usize) -> Error {
    match error {
        Error::Cancelled => Error::ContextAborted(index),
        other => other,
    }
}

/// Distance from `from` forward to `to` along the rotation; residents that
/// are not in the rotation at all sort as farthest.
fn rotation_distance(rotation: &[usize], from: usize, to: usize) -> usize {
    let Some(from_pos) = rotation.iter().position(|&i| i == from) else {
        return usize::MAX;
    };
    match rotation.iter().position(|&i| i == to) {
        Some(to_pos) => (to_pos + rotation.len() - from_pos) % rotation.len(),
        None => usize::MAX,
    }
}

fn jittered_viewport() -> Viewport {
    let mut rng = rand::rng();
    Viewport {
        width: 1280 + rng.random_range(0..160),
        height: 720 + rng.random_range(0..120),
    }
}

fn spawn_console_watcher(
    index: usize,
    mut console: tokio::sync::broadcast::Receiver<crate::driver::ConsoleLine>,
    init_tx: watch::Sender<ChannelInit>,
) {
    use crate::driver::ConsoleLevel;
    tokio::spawn(async move {
        loop {
            let line = match console.recv().await {
                Ok(line) => line,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(auth_index = index, skipped, "console stream lagged");
                    continue;
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            match line.level {
                ConsoleLevel::Error => warn!(auth_index = index, text = %line.text, "page console"),
                ConsoleLevel::Warning => {
                    debug!(auth_index = index, text = %line.text, "page console");
                },
                ConsoleLevel::Log => debug!(auth_index = index, text = %line.text, "page console"),
            }

            if line.text.contains(scripts::CHANNEL_READY_MARKER) {
                let _ = init_tx.send(ChannelInit::Ready);
            } else if line.text.contains(scripts::CHANNEL_FAILED_MARKER) {
                let _ = init_tx.send(ChannelInit::Failed(line.text.clone()));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockBehavior, MockDriver, policy, seed_store};

    async fn manager_with(
        behaviors: &[(usize, MockBehavior)],
        max_contexts: usize,
    ) -> (Arc<ContextPoolManager>, Arc<MockDriver>, Arc<AuthStore>) {
        let (store, _dir) = seed_store(behaviors).await;
        let driver = MockDriver::new();
        for &(index, behavior) in behaviors {
            driver.set_behavior(index, behavior);
        }
        let active = Arc::new(ActiveAccount::new());
        let manager = ContextPoolManager::new(
            driver.clone(),
            Arc::clone(&store),
            active,
            policy(max_contexts),
        );
        // Keep the credential dir alive for the whole test.
        std::mem::forget(_dir);
        (manager, driver, store)
    }

    #[tokio::test]
    async fn preload_activates_first_working_account() {
        let (manager, driver, _store) = manager_with(
            &[
                (0, MockBehavior::LoginRedirect),
                (1, MockBehavior::Ok),
                (2, MockBehavior::Ok),
            ],
            2,
        )
        .await;

        let active = manager.preload(&[0, 1, 2]).await.unwrap();
        assert_eq!(active, 1);
        assert!(manager.has_context(1).await);

        // Background preload fills the second slot.
        for _ in 0..50 {
            if manager.context_count().await >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.context_indices().await, vec![1, 2]);
        assert_eq!(driver.init_count(0), 1);
        assert_eq!(driver.init_count(1), 1);
    }

    #[tokio::test]
    async fn fast_switch_reuses_live_context() {
        let (manager, driver, _store) = manager_with(&[(0, MockBehavior::Ok)], 1).await;
        manager.preload(&[0]).await.unwrap();
        manager.abort_background_preload().await;

        manager.fast_switch(0).await.unwrap();
        assert_eq!(driver.init_count(0), 1, "fast path must not re-initialize");
    }

    #[tokio::test]
    async fn fast_switch_expired_marks_and_closes() {
        let (manager, driver, store) = manager_with(&[(5, MockBehavior::Ok)], 1).await;
        manager.preload(&[5]).await.unwrap();
        manager.abort_background_preload().await;

        // The page now lands on the login flow.
        driver.set_behavior(5, MockBehavior::LoginRedirect);

        let err = manager.fast_switch(5).await.unwrap_err();
        assert!(matches!(err, Error::AuthExpired(5)));
        assert!(store.is_expired(5).await);
        assert!(!manager.has_context(5).await);
        assert!(!store.rotation_indices().await.contains(&5));
    }

    #[tokio::test]
    async fn pre_cleanup_evicts_farthest_resident() {
        let behaviors: Vec<_> = (1..=5).map(|i| (i, MockBehavior::Ok)).collect();
        let (manager, _driver, _store) = manager_with(&behaviors, 3).await;

        let active = manager.preload(&[1]).await.unwrap();
        assert_eq!(active, 1);
        for _ in 0..100 {
            if manager.context_count().await >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.context_indices().await, vec![1, 2, 3]);

        manager.pre_cleanup(4).await.unwrap();
        assert!(!manager.is_initializing());
        assert_eq!(manager.context_indices().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn abort_background_preload_leaves_no_initializer() {
        let (manager, _driver, _store) = manager_with(
            &[(0, MockBehavior::Ok), (1, MockBehavior::Hang)],
            3,
        )
        .await;

        manager.preload(&[0]).await.unwrap();
        // Let the background preloader reach the hanging account.
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.abort_background_preload().await;

        assert!(!manager.is_initializing());
        assert!(!manager.has_context(1).await);
    }

    #[tokio::test]
    async fn rebalance_closes_contexts_outside_window() {
        let behaviors: Vec<_> = (1..=5).map(|i| (i, MockBehavior::Ok)).collect();
        let (manager, _driver, _store) = manager_with(&behaviors, 2).await;

        manager.preload(&[1]).await.unwrap();
        manager.abort_background_preload().await;
        // Force an extra out-of-window context.
        manager
            .initialize_context(4, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manager.context_indices().await, vec![1, 4]);

        manager.fast_switch(1).await.unwrap();
        manager.rebalance().await;
        manager.abort_background_preload().await;
        assert!(!manager.has_context(4).await);
    }

    #[tokio::test]
    async fn lightweight_reconnect_restores_channel() {
        let (manager, driver, _store) = manager_with(&[(0, MockBehavior::Ok)], 1).await;
        manager.preload(&[0]).await.unwrap();
        manager.abort_background_preload().await;

        manager
            .lightweight_reconnect(0, CancellationToken::new())
            .await
            .unwrap();
        // Reconnect re-navigates the existing page instead of re-initializing.
        assert_eq!(driver.init_count(0), 1);
        assert!(driver.navigation_count(0) >= 2);
    }

    #[test]
    fn rotation_distance_wraps() {
        let rotation = [1, 2, 3, 4, 5];
        assert_eq!(rotation_distance(&rotation, 4, 5), 1);
        assert_eq!(rotation_distance(&rotation, 4, 1), 2);
        assert_eq!(rotation_distance(&rotation, 4, 3), 4);
        assert_eq!(rotation_distance(&rotation, 4, 9), usize::MAX);
    }
}
