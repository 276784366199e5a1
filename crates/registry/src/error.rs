use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no channel bound for account {0}")]
    NoChannel(usize),

    #[error("channel for account {0} is closed")]
    ChannelClosed(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
