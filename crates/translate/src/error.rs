use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("internal translation error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
