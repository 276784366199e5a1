//! Shared gateway runtime state.

use std::{sync::Arc, time::Instant};

use tokio::sync::RwLock;

use {
    atelier_accounts::{ActiveAccount, AuthStore},
    atelier_config::{AtelierConfig, DefaultsConfig, StreamingMode},
    atelier_pool::ContextPoolManager,
    atelier_registry::ConnectionRegistry,
    atelier_rotation::RotationController,
    atelier_translate::TranslateOptions,
};

/// Settings adjustable at runtime through the admin surface.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub streaming_mode: StreamingMode,
    pub force_thinking: bool,
    pub force_web_search: bool,
    pub force_url_context: bool,
    pub debug_mode: bool,
    pub log_max_count: usize,
}

impl RuntimeSettings {
    pub fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            streaming_mode: defaults.streaming_mode,
            force_thinking: defaults.force_thinking,
            force_web_search: defaults.force_web_search,
            force_url_context: defaults.force_url_context,
            debug_mode: defaults.debug_mode,
            log_max_count: defaults.log_max_count,
        }
    }
}

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    pub config: AtelierConfig,
    pub settings: RwLock<RuntimeSettings>,
    pub store: Arc<AuthStore>,
    pub active: Arc<ActiveAccount>,
    pub pool: Arc<ContextPoolManager>,
    pub registry: Arc<ConnectionRegistry>,
    pub rotation: Arc<RotationController>,
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AtelierConfig,
        store: Arc<AuthStore>,
        active: Arc<ActiveAccount>,
        pool: Arc<ContextPoolManager>,
        registry: Arc<ConnectionRegistry>,
        rotation: Arc<RotationController>,
    ) -> Arc<Self> {
        let settings = RuntimeSettings::from_defaults(&config.defaults);
        Arc::new(Self {
            config,
            settings: RwLock::new(settings),
            store,
            active,
            pool,
            registry,
            rotation,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    /// Snapshot the translator toggles.
    pub async fn translate_options(&self) -> TranslateOptions {
        let settings = self.settings.read().await;
        TranslateOptions {
            force_thinking: settings.force_thinking,
            force_web_search: settings.force_web_search,
            force_url_context: settings.force_url_context,
        }
    }
}
