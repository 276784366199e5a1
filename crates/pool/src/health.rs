//! Per-context health timer and the background wakeup task.

use std::{sync::Arc, time::Duration};

use {
    rand::Rng,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_protocol::{CREDENTIAL_SAVE_INTERVAL_TICKS, CURSOR_PARK_INTERVAL_TICKS, HEALTH_TICK_MS},
};

use crate::{
    driver::{DriverContext, DriverPage},
    scripts,
};

const WAKEUP_SCAN_MS: u64 = 5_000;
const WAKEUP_REST_MS: u64 = 300_000;

/// Keep one context's session warm.
///
/// Ticks every few seconds but only does work while its account is active:
/// micro mouse movement and scroll, periodic cursor parking, modal cleanup,
/// and a daily credential refresh back to disk.
pub fn spawn_health_timer(
    index: usize,
    page: Arc<dyn DriverPage>,
    context: Arc<dyn DriverContext>,
    store: Arc<AuthStore>,
    active: Arc<ActiveAccount>,
    save_credentials: bool,
) -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut ticks: u64 = 0;
        let mut interval = tokio::time::interval(Duration::from_millis(HEALTH_TICK_MS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {},
            }
            if page.is_closed() {
                debug!(auth_index = index, "health timer: page gone, exiting");
                break;
            }
            if !active.is(index) {
                continue;
            }
            ticks += 1;

            let (x, y, dy) = {
                let mut rng = rand::rng();
                (
                    rng.random_range(120.0..1100.0),
                    rng.random_range(120.0..620.0),
                    rng.random_range(-40.0..40.0),
                )
            };
            let _ = page.mouse_move(x, y).await;
            let _ = page.scroll(0.0, dy).await;
            if ticks % CURSOR_PARK_INTERVAL_TICKS == 0 {
                let _ = page.mouse_move(1.0, 1.0).await;
            }
            let _ = page.evaluate(scripts::CLEAN_OVERLAYS_JS).await;

            if save_credentials && ticks % CREDENTIAL_SAVE_INTERVAL_TICKS == 0 {
                match context.storage_state().await {
                    Ok(state) => {
                        if let Err(e) = store.save_credentials(index, &state).await {
                            warn!(auth_index = index, error = %e, "credential refresh failed");
                        } else {
                            debug!(auth_index = index, "credentials refreshed to disk");
                        }
                    },
                    Err(e) => {
                        warn!(auth_index = index, error = %e, "storage state read failed");
                    },
                }
            }
        }
    });

    token
}

/// Single background wakeup task.
///
/// Holds a snapshot of the active page; when the snapshot goes stale (a
/// switch happened or the page closed) the scan loop exits and resumes on
/// the next snapshot. Clicks the launch button with a physical mouse click
/// first and a JS click as fallback, then rests until activity.
pub fn spawn_wakeup(mut rx: watch::Receiver<Option<(usize, Arc<dyn DriverPage>)>>) {
    tokio::spawn(async move {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            let Some((index, page)) = snapshot else {
                if rx.changed().await.is_err() {
                    return;
                }
                continue;
            };

            loop {
                if page.is_closed() || rx.has_changed().unwrap_or(true) {
                    break;
                }

                let clicked = try_click_launch(index, &page).await;
                let rest = if clicked {
                    Duration::from_millis(WAKEUP_REST_MS)
                } else {
                    Duration::from_millis(WAKEUP_SCAN_MS)
                };
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    },
                    () = tokio::time::sleep(rest) => {},
                }
            }
        }
    });
}

/// Two-stage launch click: physical mouse first, JS click fallback.
async fn try_click_launch(index: usize, page: &Arc<dyn DriverPage>) -> bool {
    let bounds = match page.evaluate(scripts::LAUNCH_BUTTON_BOUNDS_JS).await {
        Ok(value) if value.is_object() => value,
        _ => return false,
    };
    let (Some(x), Some(y)) = (
        bounds.get("x").and_then(|v| v.as_f64()),
        bounds.get("y").and_then(|v| v.as_f64()),
    ) else {
        return false;
    };

    if page.click(x, y).await.is_ok() {
        // Did the physical click land?
        if let Ok(after) = page.evaluate(scripts::LAUNCH_BUTTON_BOUNDS_JS).await {
            if after.is_null() {
                debug!(auth_index = index, "launch button clicked (mouse)");
                return true;
            }
        }
    }

    match page.evaluate(scripts::CLICK_LAUNCH_JS).await {
        Ok(serde_json::Value::Bool(true)) => {
            debug!(auth_index = index, "launch button clicked (js fallback)");
            true
        },
        _ => false,
    }
}
