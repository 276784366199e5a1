use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("account {0} is not in the available set")]
    UnknownAccount(usize),

    #[error(transparent)]
    Pool(#[from] atelier_pool::Error),
}

impl Error {
    /// Cancellation bubbling up from the pool never counts as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Pool(e) if e.is_cancellation())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
