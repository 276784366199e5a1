//! Switch-to-next / switch-to-specific and the usage/failure policy.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use {
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_pool::ContextPoolManager,
};

use crate::error::{Error, Result};

/// Outcome of a switch-to-next decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched(usize),
    /// The rotation view has at most one entry; callers treat this as a
    /// no-op, not an error.
    SingleAccount,
    /// Every other candidate is expired. Names the next reachable candidate;
    /// the caller decides whether to try it anyway.
    Fallback(usize),
}

/// RAII guard for the system-busy flag around a switch transition.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Selects which account serves the next request and reacts to usage and
/// failure signals after each completed response.
pub struct RotationController {
    store: Arc<AuthStore>,
    pool: Arc<ContextPoolManager>,
    active: Arc<ActiveAccount>,
    usage_count: AtomicU32,
    consecutive_failures: AtomicU32,
    system_busy: AtomicBool,
    /// Serializes whole switch transitions.
    switch_lock: Mutex<()>,
}

impl RotationController {
    pub fn new(
        store: Arc<AuthStore>,
        pool: Arc<ContextPoolManager>,
        active: Arc<ActiveAccount>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pool,
            active,
            usage_count: AtomicU32::new(0),
            consecutive_failures: AtomicU32::new(0),
            system_busy: AtomicBool::new(false),
            switch_lock: Mutex::new(()),
        })
    }

    /// Whether a switch transition is in flight. Status queries observe this
    /// and skip their own availability checks to avoid racing the switch.
    pub fn is_busy(&self) -> bool {
        self.system_busy.load(Ordering::SeqCst)
    }

    pub fn usage_count(&self) -> u32 {
        self.usage_count.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.usage_count.store(0, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Switch to a specific account.
    ///
    /// Rejects unknown indices, makes room in the pool, fast-switches (the
    /// pool falls back to full init when needed), resets the counters, and
    /// kicks a rebalance.
    pub async fn switch_to_specific(self: &Arc<Self>, index: usize) -> Result<()> {
        if !self.store.is_available(index).await {
            return Err(Error::UnknownAccount(index));
        }

        let _transition = self.switch_lock.lock().await;
        let _busy = BusyGuard::raise(&self.system_busy);

        self.pool.pre_cleanup(index).await?;
        self.pool.fast_switch(index).await?;
        self.reset_counters();
        info!(auth_index = index, "switched active account");

        self.pool.rebalance().await;
        Ok(())
    }

    /// Switch to the successor of the current account in the rotation view.
    ///
    /// Healthy candidates are switched to directly. A `Fallback` (only
    /// expired candidates remain) is reported without acting so the caller
    /// can decide; `SingleAccount` is a no-op.
    pub async fn switch_to_next(self: &Arc<Self>) -> Result<SwitchOutcome> {
        match self.next_candidate().await {
            SwitchOutcome::Switched(next) => {
                self.switch_to_specific(next).await?;
                Ok(SwitchOutcome::Switched(next))
            },
            other => Ok(other),
        }
    }

    /// Compute the next-switch decision without performing it.
    async fn next_candidate(&self) -> SwitchOutcome {
        let rotation = self.store.rotation_indices().await;
        let current = match self.active.get() {
            Some(active) => self.store.canonical(active).await,
            // No active account: any rotation entry will do.
            None => {
                return match rotation.first() {
                    Some(&first) => SwitchOutcome::Switched(first),
                    None => SwitchOutcome::SingleAccount,
                };
            },
        };

        if let Some(next) = successor(&rotation, current).copied() {
            if next != current {
                return SwitchOutcome::Switched(next);
            }
        }

        // Nothing healthy left. Offer the next expired candidate, if any.
        let expired: Vec<usize> = self.store.expired_indices().await;
        let expired_canonical: Vec<usize> = {
            let mut list = Vec::new();
            for index in expired {
                if self.store.canonical(index).await == index && index != current {
                    list.push(index);
                }
            }
            list.sort_unstable();
            list
        };
        match expired_canonical
            .iter()
            .find(|&&i| i > current)
            .or_else(|| expired_canonical.first())
        {
            Some(&candidate) => SwitchOutcome::Fallback(candidate),
            None => SwitchOutcome::SingleAccount,
        }
    }

    /// Perform a switch-to-next, accepting fallback candidates.
    ///
    /// This is the automatic path used after usage/failure triggers; the
    /// admin surface calls [`Self::switch_to_next`] first and decides about
    /// fallbacks itself.
    pub async fn rotate(self: &Arc<Self>) -> Result<SwitchOutcome> {
        match self.next_candidate().await {
            SwitchOutcome::SingleAccount => {
                debug!("rotation requested with a single account, ignoring");
                Ok(SwitchOutcome::SingleAccount)
            },
            SwitchOutcome::Fallback(candidate) => {
                warn!(
                    auth_index = candidate,
                    "all other accounts expired, trying expired candidate"
                );
                self.switch_to_specific(candidate).await?;
                Ok(SwitchOutcome::Fallback(candidate))
            },
            SwitchOutcome::Switched(next) => {
                self.switch_to_specific(next).await?;
                Ok(SwitchOutcome::Switched(next))
            },
        }
    }

    /// Update counters after a completed response and schedule switches
    /// according to policy.
    ///
    /// An upstream status in the immediate-switch set counts as a failure
    /// and schedules a switch right away. Otherwise success bumps usage
    /// (switching once `switch_on_uses` is reached) and failure bumps the
    /// consecutive-failure counter (switching once `failure_threshold` is
    /// reached).
    pub fn note_request_result(self: &Arc<Self>, status: Option<u16>, success: bool) {
        let policy = self.pool.policy();

        if let Some(status) = status {
            if policy.immediate_switch_status_codes.contains(&status) {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                warn!(status, "immediate-switch status, scheduling rotation");
                self.spawn_rotate();
                return;
            }
        }

        if success {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            let uses = self.usage_count.fetch_add(1, Ordering::SeqCst) + 1;
            if policy.switch_on_uses > 0 && uses >= policy.switch_on_uses {
                debug!(uses, "usage limit reached, scheduling rotation");
                self.spawn_rotate();
            }
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if policy.failure_threshold > 0 && failures >= policy.failure_threshold {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                warn!(failures, "failure threshold reached, scheduling rotation");
                self.spawn_rotate();
            }
        }
    }

    fn spawn_rotate(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            match controller.rotate().await {
                Ok(outcome) => debug!(?outcome, "scheduled rotation finished"),
                Err(e) if e.is_cancellation() => {},
                Err(e) => warn!(error = %e, "scheduled rotation failed"),
            }
        });
    }
}

/// Successor of `current` in the sorted rotation view, wrapping.
fn successor(rotation: &[usize], current: usize) -> Option<&usize> {
    if rotation.is_empty() {
        return None;
    }
    rotation
        .iter()
        .find(|&&i| i > current)
        .or_else(|| rotation.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_pool::testutil::{MockBehavior, MockDriver, policy, seed_store};

    async fn controller_with(
        behaviors: &[(usize, MockBehavior)],
        max_contexts: usize,
    ) -> (Arc<RotationController>, Arc<ContextPoolManager>, Arc<AuthStore>) {
        let (store, dir) = seed_store(behaviors).await;
        std::mem::forget(dir);
        let driver = MockDriver::new();
        for &(index, behavior) in behaviors {
            driver.set_behavior(index, behavior);
        }
        let active = Arc::new(ActiveAccount::new());
        let pool = ContextPoolManager::new(
            driver,
            Arc::clone(&store),
            Arc::clone(&active),
            policy(max_contexts),
        );
        let controller = RotationController::new(Arc::clone(&store), Arc::clone(&pool), active);
        (controller, pool, store)
    }

    #[tokio::test]
    async fn switch_to_specific_rejects_unknown() {
        let (controller, _pool, _store) =
            controller_with(&[(0, MockBehavior::Ok)], 1).await;
        assert!(matches!(
            controller.switch_to_specific(9).await,
            Err(Error::UnknownAccount(9))
        ));
    }

    #[tokio::test]
    async fn switch_to_specific_activates_and_resets_counters() {
        let (controller, pool, _store) =
            controller_with(&[(0, MockBehavior::Ok), (1, MockBehavior::Ok)], 2).await;
        pool.preload(&[0]).await.unwrap();
        pool.abort_background_preload().await;

        controller.usage_count.store(7, Ordering::SeqCst);
        controller.switch_to_specific(1).await.unwrap();
        pool.abort_background_preload().await;

        assert_eq!(controller.usage_count(), 0);
        assert!(pool.has_context(1).await);
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn rotate_moves_to_successor_and_wraps() {
        let (controller, pool, _store) = controller_with(
            &[(1, MockBehavior::Ok), (3, MockBehavior::Ok), (5, MockBehavior::Ok)],
            3,
        )
        .await;
        pool.preload(&[5]).await.unwrap();
        pool.abort_background_preload().await;

        assert_eq!(
            controller.rotate().await.unwrap(),
            SwitchOutcome::Switched(1)
        );
        pool.abort_background_preload().await;
        assert_eq!(
            controller.rotate().await.unwrap(),
            SwitchOutcome::Switched(3)
        );
    }

    #[tokio::test]
    async fn single_account_is_a_noop() {
        let (controller, pool, _store) = controller_with(&[(0, MockBehavior::Ok)], 1).await;
        pool.preload(&[0]).await.unwrap();
        pool.abort_background_preload().await;

        assert_eq!(
            controller.rotate().await.unwrap(),
            SwitchOutcome::SingleAccount
        );
    }

    #[tokio::test]
    async fn all_others_expired_offers_fallback() {
        let (controller, pool, store) =
            controller_with(&[(0, MockBehavior::Ok), (1, MockBehavior::Ok)], 2).await;
        pool.preload(&[0]).await.unwrap();
        pool.abort_background_preload().await;
        store.mark_expired(1).await;

        assert_eq!(
            controller.switch_to_next().await.unwrap(),
            SwitchOutcome::Fallback(1)
        );
    }

    #[tokio::test]
    async fn failure_threshold_forces_rotation() {
        let (controller, pool, _store) =
            controller_with(&[(0, MockBehavior::Ok), (1, MockBehavior::Ok)], 2).await;
        pool.preload(&[0]).await.unwrap();
        pool.abort_background_preload().await;

        // policy.failure_threshold is 3
        controller.note_request_result(Some(500), false);
        controller.note_request_result(Some(500), false);
        assert_eq!(controller.consecutive_failures(), 2);
        controller.note_request_result(Some(500), false);
        assert_eq!(controller.consecutive_failures(), 0);

        // The scheduled rotation runs in the background.
        for _ in 0..100 {
            if pool_active(&controller) == Some(1) && !controller.is_busy() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(pool_active(&controller), Some(1));
    }

    #[tokio::test]
    async fn immediate_switch_status_schedules_rotation() {
        let (controller, pool, _store) =
            controller_with(&[(0, MockBehavior::Ok), (1, MockBehavior::Ok)], 2).await;
        pool.preload(&[0]).await.unwrap();
        pool.abort_background_preload().await;

        controller.note_request_result(Some(429), true);
        for _ in 0..100 {
            if pool_active(&controller) == Some(1) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(pool_active(&controller), Some(1));
        // Relayed as a failure, not a success: usage did not advance.
        assert_eq!(controller.usage_count(), 0);
    }

    fn pool_active(controller: &Arc<RotationController>) -> Option<usize> {
        controller.active.get()
    }

    #[test]
    fn successor_wraps() {
        assert_eq!(successor(&[1, 3, 5], 3), Some(&5));
        assert_eq!(successor(&[1, 3, 5], 5), Some(&1));
        assert_eq!(successor(&[], 5), None);
    }
}
