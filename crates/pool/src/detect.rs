//! Browser binary detection and install guidance.

use std::path::PathBuf;

/// Chromium-based executables to search for on PATH. Any of these speaks CDP.
const CHROMIUM_EXECUTABLES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "chrome",
    "google-chrome",
    "google-chrome-stable",
    "msedge",
    "microsoft-edge-stable",
    "brave-browser",
];

/// macOS app bundle paths, checked before PATH (PATH can carry broken
/// wrapper scripts).
#[cfg(target_os = "macos")]
const MACOS_APP_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const WINDOWS_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

/// Result of browser detection.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub found: bool,
    pub path: Option<PathBuf>,
    pub install_hint: String,
}

/// Detect a usable Chromium-based browser.
///
/// Checks, in order: explicit config path, the `CHROME` environment
/// variable, platform install paths, then PATH.
pub fn detect_browser(custom_path: Option<&std::path::Path>) -> DetectionResult {
    if let Some(path) = custom_path {
        if path.exists() {
            return found(path.to_path_buf());
        }
    }

    if let Ok(path) = std::env::var("CHROME") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return found(p);
        }
    }

    #[cfg(target_os = "macos")]
    for path in MACOS_APP_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return found(p);
        }
    }

    #[cfg(target_os = "windows")]
    for path in WINDOWS_PATHS {
        let p = PathBuf::from(path);
        if p.exists() {
            return found(p);
        }
    }

    for name in CHROMIUM_EXECUTABLES {
        if let Ok(path) = which::which(name) {
            return found(path);
        }
    }

    DetectionResult {
        found: false,
        path: None,
        install_hint: install_instructions(),
    }
}

fn found(path: PathBuf) -> DetectionResult {
    DetectionResult {
        found: true,
        path: Some(path),
        install_hint: String::new(),
    }
}

/// Platform-specific install instructions for the startup error path.
pub fn install_instructions() -> String {
    let instructions = if cfg!(target_os = "macos") {
        "  brew install --cask google-chrome"
    } else if cfg!(target_os = "linux") {
        "  Debian/Ubuntu: sudo apt install chromium-browser\n  \
         Fedora:         sudo dnf install chromium\n  \
         Arch:           sudo pacman -S chromium"
    } else if cfg!(target_os = "windows") {
        "  winget install Google.Chrome"
    } else {
        "  Download from https://www.google.com/chrome/"
    };

    format!(
        "No Chromium-based browser found. Install one:\n\n\
         {instructions}\n\n\
         Or point atelier at a binary:\n  \
         [pool]\n  \
         browser_path = \"/path/to/browser\"\n\n\
         Or set the CHROME environment variable."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_instructions_not_empty() {
        let hint = install_instructions();
        assert!(!hint.is_empty());
        assert!(hint.contains("browser_path"));
    }

    #[test]
    fn custom_path_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-chrome");
        std::fs::write(&fake, "fake").unwrap();

        let result = detect_browser(Some(&fake));
        assert!(result.found);
        assert_eq!(result.path.as_deref(), Some(fake.as_path()));
    }

    #[test]
    fn missing_custom_path_falls_through() {
        let result = detect_browser(Some(std::path::Path::new("/nonexistent/chrome")));
        assert!(result.found || !result.install_hint.is_empty());
    }
}
