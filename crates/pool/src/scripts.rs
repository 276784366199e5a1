//! JavaScript snippets injected into studio pages.
//!
//! The stealth script runs before every document and presents a stable but
//! deterministic fingerprint seeded by the account, so the same account
//! always looks like the same machine.

/// Console marker the in-page client prints once its channel is up.
pub const CHANNEL_READY_MARKER: &str = "Connection successful";
/// Console marker for a failed channel bring-up.
pub const CHANNEL_FAILED_MARKER: &str = "WebSocket initialization failed";

/// Page-level error strings polled for while waiting on the ready marker.
pub const PAGE_ERROR_MARKERS: &[&str] = &[
    "Failed to initialize applet",
    "concurrent updates",
    "Failed to create snapshot",
];

const WEBGL_RENDERERS: &[&str] = &[
    "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    "ANGLE (AMD, AMD Radeon RX 580 Direct3D11 vs_5_0 ps_5_0, D3D11)",
    "ANGLE (Intel, Intel(R) Iris(R) Xe Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)",
    "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)",
];

fn seed_hash(seed: &str) -> u64 {
    // FNV-1a; only needs to be stable across runs.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in seed.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

/// Build the pre-navigation stealth script for one account.
///
/// `seed` is the account email when known, otherwise the stringified index;
/// `auth_index` is echoed to iframes that ask which account owns the page.
pub fn stealth_script(seed: &str, auth_index: usize) -> String {
    let hash = seed_hash(seed);
    let renderer = WEBGL_RENDERERS[(hash % WEBGL_RENDERERS.len() as u64) as usize];
    let plugin_count = 3 + (hash >> 8) % 3;
    let device_memory = [4u64, 8, 16][((hash >> 16) % 3) as usize];

    format!(
        r#"(() => {{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => false }});
  Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {device_memory} }});
  Object.defineProperty(navigator, 'plugins', {{
    get: () => Array.from({{ length: {plugin_count} }}, (_, i) => ({{ name: 'Plugin ' + i }}))
  }});
  const getParameter = WebGLRenderingContext.prototype.getParameter;
  WebGLRenderingContext.prototype.getParameter = function(parameter) {{
    if (parameter === 37446) return '{renderer}';
    if (parameter === 37445) return 'Google Inc.';
    return getParameter.apply(this, arguments);
  }};
  window.addEventListener('message', (event) => {{
    if (event.data && event.data.type === 'atelier-auth-query' && event.source) {{
      event.source.postMessage({{ type: 'atelier-auth-reply', authIndex: {auth_index} }}, '*');
    }}
  }});
}})();"#
    )
}

/// Seed per-origin localStorage entries before the first document runs.
pub fn storage_seed_script(origins: &serde_json::Value) -> String {
    let payload = serde_json::to_string(origins).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
  const origins = {payload};
  for (const entry of origins) {{
    if (!entry || entry.origin !== location.origin) continue;
    for (const item of entry.localStorage || []) {{
      try {{ localStorage.setItem(item.name, item.value); }} catch (e) {{}}
    }}
  }}
}})();"#
    )
}

/// Dismiss known onboarding popups. Returns the number of buttons clicked.
pub const DISMISS_POPUPS_JS: &str = r#"(() => {
  const labels = ['Got it', 'Dismiss', 'Continue', 'Accept all', 'No thanks'];
  let clicked = 0;
  for (const button of document.querySelectorAll('button, [role="button"]')) {
    const text = (button.textContent || '').trim();
    if (labels.some((label) => text === label)) {
      button.click();
      clicked += 1;
    }
  }
  return clicked;
})()"#;

/// Click the "Launch" button when present. Returns whether a click happened.
pub const CLICK_LAUNCH_JS: &str = r#"(() => {
  for (const button of document.querySelectorAll('button, [role="button"]')) {
    const text = (button.textContent || '').trim();
    if (text === 'Launch' || text.startsWith('Launch ') || button.querySelector('.rocket-icon')) {
      const rect = button.getBoundingClientRect();
      if (rect.top >= 0 && rect.top < window.innerHeight) {
        button.click();
        return true;
      }
    }
  }
  return false;
})()"#;

/// Bounding box of the launch button, for the physical-click first stage.
pub const LAUNCH_BUTTON_BOUNDS_JS: &str = r#"(() => {
  for (const button of document.querySelectorAll('button, [role="button"]')) {
    const text = (button.textContent || '').trim();
    if (text === 'Launch' || text.startsWith('Launch ') || button.querySelector('.rocket-icon')) {
      const rect = button.getBoundingClientRect();
      if (rect.top >= 64 && rect.top < window.innerHeight - 64) {
        return { x: rect.x + rect.width / 2, y: rect.y + rect.height / 2 };
      }
    }
  }
  return null;
})()"#;

/// Remove modal overlays and click recovery buttons. Runs every health tick.
pub const CLEAN_OVERLAYS_JS: &str = r#"(() => {
  for (const overlay of document.querySelectorAll('.cdk-overlay-backdrop, .modal-backdrop')) {
    overlay.remove();
  }
  const labels = ['Reload', 'Retry', 'Got it', 'Dismiss', 'Continue'];
  for (const button of document.querySelectorAll('button, [role="button"]')) {
    const text = (button.textContent || '').trim();
    if (labels.includes(text)) button.click();
  }
})()"#;

/// Returns the first page-level error marker found in the document, or null.
pub fn page_error_script() -> String {
    let markers = serde_json::to_string(PAGE_ERROR_MARKERS).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
  const markers = {markers};
  const text = document.body ? document.body.innerText : '';
  for (const marker of markers) {{
    if (text.includes(marker)) return marker;
  }}
  return null;
}})()"#
    )
}

/// Best-effort no-op call that wakes the studio backend after a reconnect.
pub fn active_trigger_script(trigger_url: &str) -> String {
    format!(
        r#"fetch('{trigger_url}', {{ method: 'GET', credentials: 'include' }})
  .then(() => true)
  .catch(() => false)"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_script_is_deterministic_per_seed() {
        let a1 = stealth_script("a@x.com", 0);
        let a2 = stealth_script("a@x.com", 0);
        let b = stealth_script("b@y.com", 1);
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!(a1.contains("authIndex: 0"));
        assert!(b.contains("authIndex: 1"));
    }

    #[test]
    fn stealth_script_picks_catalogued_renderer() {
        let script = stealth_script("42", 42);
        assert!(WEBGL_RENDERERS.iter().any(|r| script.contains(r)));
    }

    #[test]
    fn storage_seed_script_embeds_origins() {
        let origins = serde_json::json!([
            { "origin": "https://studio.example.com",
              "localStorage": [{ "name": "k", "value": "v" }] }
        ]);
        let script = storage_seed_script(&origins);
        assert!(script.contains("studio.example.com"));
        assert!(script.contains("localStorage.setItem"));
    }

    #[test]
    fn page_error_script_lists_markers() {
        let script = page_error_script();
        for marker in PAGE_ERROR_MARKERS {
            assert!(script.contains(marker));
        }
    }
}
