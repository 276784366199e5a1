//! Config schema types (server, pool, studio target, runtime-toggle seeds).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtelierConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub studio: StudioConfig,
    pub defaults: DefaultsConfig,
}

/// Inbound HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Accepted inbound API keys. Empty list disables authentication.
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 2048,
            api_keys: Vec::new(),
        }
    }
}

/// Context pool sizing and rotation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum pre-warmed browser contexts. 0 = unbounded.
    pub max_contexts: usize,
    /// Switch account after this many served requests. 0 = disabled.
    pub switch_on_uses: u32,
    /// Switch account after this many consecutive failures. 0 = disabled.
    pub failure_threshold: u32,
    /// Upstream status codes that trigger an immediate rotation switch.
    pub immediate_switch_status_codes: Vec<u16>,
    /// Directory holding `auth-<N>.json` credential files.
    pub auth_dir: std::path::PathBuf,
    /// Whether the health timer writes refreshed credentials back to disk.
    pub save_credentials: bool,
    /// Explicit browser binary path; autodetected when unset.
    pub browser_path: Option<std::path::PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 1,
            switch_on_uses: 0,
            failure_threshold: 3,
            immediate_switch_status_codes: vec![429, 503],
            auth_dir: "configs/auth".into(),
            save_credentials: true,
            browser_path: None,
        }
    }
}

/// The target studio application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// URL every context navigates to.
    pub url: String,
    /// Best-effort no-op endpoint the page calls after lightweight reconnect
    /// to wake the backend. Skipped when unset.
    pub trigger_url: Option<String>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            url: "https://aistudio.google.com/prompts/new_chat".into(),
            trigger_url: None,
        }
    }
}

/// Streaming relay mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Relay upstream chunks as they arrive.
    #[default]
    Real,
    /// Execute non-streaming internally and emit one synthetic chunk.
    Fake,
}

/// Seeds for the runtime-adjustable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub streaming_mode: StreamingMode,
    pub force_thinking: bool,
    pub force_web_search: bool,
    pub force_url_context: bool,
    pub debug_mode: bool,
    /// In-memory log ring size exposed on the status surface.
    pub log_max_count: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            streaming_mode: StreamingMode::Real,
            force_thinking: false,
            force_web_search: false,
            force_url_context: false,
            debug_mode: false,
            log_max_count: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AtelierConfig::default();
        assert_eq!(cfg.server.port, 2048);
        assert_eq!(cfg.pool.max_contexts, 1);
        assert_eq!(cfg.pool.immediate_switch_status_codes, vec![429, 503]);
        assert_eq!(cfg.defaults.streaming_mode, StreamingMode::Real);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AtelierConfig = toml::from_str(
            r#"
            [pool]
            max_contexts = 3
            switch_on_uses = 40
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pool.max_contexts, 3);
        assert_eq!(cfg.pool.switch_on_uses, 40);
        assert_eq!(cfg.pool.failure_threshold, 3);
        assert_eq!(cfg.server.bind, "0.0.0.0");
    }

    #[test]
    fn streaming_mode_parses_lowercase() {
        let cfg: AtelierConfig = toml::from_str(
            r#"
            [defaults]
            streaming_mode = "fake"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.defaults.streaming_mode, StreamingMode::Fake);
    }
}
