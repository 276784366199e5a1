//! Browser context pool: one pre-warmed session per account, driven over a
//! black-box driver interface with a CDP production implementation.

pub mod cdp;
pub mod detect;
pub mod driver;
pub mod error;
pub mod health;
pub mod manager;
pub mod scripts;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testutil;

pub use {
    cdp::CdpDriver,
    driver::{ConsoleLevel, ConsoleLine, Driver, DriverContext, DriverPage, Viewport},
    error::{Error, Result},
    manager::{ChannelInit, ContextPoolManager},
    types::{LandingFailure, PoolPolicy, classify_landing},
};
