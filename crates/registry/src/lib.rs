//! Channel registry: binds each live browser context to its duplex control
//! channel, routes per-request response fragments, and drives grace-period
//! reconnection when a channel drops.

pub mod error;
pub mod probe;
pub mod queue;
pub mod registry;

pub use {
    error::{Error, Result},
    probe::{ContextProbe, ReconnectOutcome},
    queue::{MessageQueue, QueueEvent, QueueReceiver},
    registry::{ChannelEndpoint, ConnectionRegistry},
};
