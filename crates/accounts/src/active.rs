use std::sync::atomic::{AtomicI64, Ordering};

/// Lock-free cell holding the currently active account index.
///
/// Shared between the rotation controller (writer) and the connection
/// registry (reader, for deciding whether a dropped channel belonged to the
/// account currently serving requests).
#[derive(Debug)]
pub struct ActiveAccount(AtomicI64);

impl Default for ActiveAccount {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveAccount {
    pub fn new() -> Self {
        Self(AtomicI64::new(-1))
    }

    pub fn get(&self) -> Option<usize> {
        let v = self.0.load(Ordering::Acquire);
        usize::try_from(v).ok()
    }

    pub fn set(&self, index: Option<usize>) {
        let v = index.map_or(-1, |i| i as i64);
        self.0.store(v, Ordering::Release);
    }

    pub fn is(&self, index: usize) -> bool {
        self.get() == Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        assert_eq!(ActiveAccount::new().get(), None);
    }

    #[test]
    fn set_and_clear() {
        let active = ActiveAccount::new();
        active.set(Some(7));
        assert!(active.is(7));
        active.set(None);
        assert_eq!(active.get(), None);
    }
}
