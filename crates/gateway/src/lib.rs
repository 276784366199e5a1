//! HTTP gateway: the public model APIs, the admin surface, and the
//! websocket endpoint the in-page client connects back to.

pub mod admin;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod models;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{build_router, run},
    state::{GatewayState, RuntimeSettings},
};
