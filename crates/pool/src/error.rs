//! Pool error types.

use thiserror::Error;

/// Errors raised by context initialization and pool management.
#[derive(Debug, Error)]
pub enum Error {
    #[error("account {0} credentials expired (login redirect)")]
    AuthExpired(usize),

    #[error("studio is region-blocked for account {0}")]
    RegionBlocked(usize),

    #[error("studio unreachable for account {index}: {reason}")]
    Unreachable { index: usize, reason: String },

    #[error("context initialization for account {0} was aborted")]
    ContextAborted(usize),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no account could be initialized")]
    NoUsableAccount,

    #[error("account {0} has no stored credentials")]
    MissingCredentials(usize),

    #[error("account {0} has no context")]
    NoContext(usize),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Cancellation is expected control flow: it never counts as a failure
    /// and never switches accounts.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::ContextAborted(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguished() {
        assert!(Error::ContextAborted(3).is_cancellation());
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::AuthExpired(3).is_cancellation());
        assert!(!Error::Timeout("init marker".into()).is_cancellation());
    }
}
