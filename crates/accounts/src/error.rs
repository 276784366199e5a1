use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("account {0} not found")]
    NotFound(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("credential file malformed: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
