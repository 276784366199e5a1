//! Pool policy and landing-page classification.

use std::collections::HashSet;

use atelier_config::{AtelierConfig, PoolConfig};

/// Everything the pool and rotation controller need to know about limits.
#[derive(Debug, Clone)]
pub struct PoolPolicy {
    /// Maximum pre-warmed contexts. 0 = unbounded.
    pub max_contexts: usize,
    /// Switch account after this many served requests. 0 = disabled.
    pub switch_on_uses: u32,
    /// Switch account after this many consecutive failures. 0 = disabled.
    pub failure_threshold: u32,
    /// Upstream status codes that schedule an immediate switch.
    pub immediate_switch_status_codes: HashSet<u16>,
    /// URL every context navigates to.
    pub studio_url: String,
    /// Best-effort wake-up endpoint called inside the page after reconnect.
    pub trigger_url: Option<String>,
    /// Whether the health timer persists refreshed credentials.
    pub save_credentials: bool,
    /// Explicit browser binary, when configured.
    pub browser_path: Option<std::path::PathBuf>,
    /// Where init-failure screenshots and DOM dumps land.
    pub debug_dir: std::path::PathBuf,
}

impl PoolPolicy {
    pub fn from_config(config: &AtelierConfig) -> Self {
        let PoolConfig {
            max_contexts,
            switch_on_uses,
            failure_threshold,
            ref immediate_switch_status_codes,
            ref browser_path,
            save_credentials,
            ..
        } = config.pool;
        Self {
            max_contexts,
            switch_on_uses,
            failure_threshold,
            immediate_switch_status_codes: immediate_switch_status_codes.iter().copied().collect(),
            studio_url: config.studio.url.clone(),
            trigger_url: config.studio.trigger_url.clone(),
            save_credentials,
            browser_path: browser_path.clone(),
            debug_dir: "logs/debug".into(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_contexts > 0
    }
}

/// What a freshly landed page turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandingFailure {
    /// Redirected to the login flow: credentials are expired.
    LoginRedirect,
    /// The studio refuses service in this region.
    RegionBlocked,
    /// 403 page or a blank tab; the studio never loaded.
    Unreachable,
}

/// Match the landed URL and title against the catalog of failure signatures.
pub fn classify_landing(url: &str, title: &str) -> Option<LandingFailure> {
    if url.contains("accounts.google.com") || url.contains("/signin") {
        return Some(LandingFailure::LoginRedirect);
    }
    let title_lower = title.to_ascii_lowercase();
    if title_lower.contains("not available in your country")
        || title_lower.contains("unsupported region")
    {
        return Some(LandingFailure::RegionBlocked);
    }
    if title_lower.contains("403") || url == "about:blank" || url.is_empty() {
        return Some(LandingFailure::Unreachable);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_detected() {
        assert_eq!(
            classify_landing("https://accounts.google.com/v3/signin/identifier?x=1", "Sign in"),
            Some(LandingFailure::LoginRedirect)
        );
    }

    #[test]
    fn region_block_detected() {
        assert_eq!(
            classify_landing(
                "https://studio.example.com/",
                "Service not available in your country"
            ),
            Some(LandingFailure::RegionBlocked)
        );
    }

    #[test]
    fn unreachable_detected() {
        assert_eq!(
            classify_landing("about:blank", ""),
            Some(LandingFailure::Unreachable)
        );
        assert_eq!(
            classify_landing("https://studio.example.com/", "403 Forbidden"),
            Some(LandingFailure::Unreachable)
        );
    }

    #[test]
    fn healthy_landing_passes() {
        assert_eq!(
            classify_landing("https://studio.example.com/prompts/new", "Studio"),
            None
        );
    }
}
