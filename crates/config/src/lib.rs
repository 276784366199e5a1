//! Configuration schema, discovery, and loading for atelier.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config, save_config},
    schema::{
        AtelierConfig, DefaultsConfig, PoolConfig, ServerConfig, StreamingMode, StudioConfig,
    },
};
