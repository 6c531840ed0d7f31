use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Config file name inside [`config_dir`].
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding [`RuntimeConfig::api_url`].
pub const ENV_API_URL: &str = "PANELHOST_API_URL";

/// Environment variable overriding [`RuntimeConfig::bundle_url`].
pub const ENV_BUNDLE_URL: &str = "PANELHOST_BUNDLE_URL";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/panelhost/`
/// - Linux: `~/.config/panelhost/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/panelhost/`
///
/// Falls back to `./.panelhost/` if no platform dir is available.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("panelhost"))
        .unwrap_or_else(|| PathBuf::from(".panelhost"))
}

/// Load a JSON config file, returning Default if missing or corrupt.
/// Logs when the file exists but cannot be read or parsed, so a corrupt file
/// is visible instead of silently resetting state.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %path.display(), "could not read config: {e}");
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(path = %path.display(), "corrupt config, using defaults: {e}");
            T::default()
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Base URL of the backend serving `/api/plugins` and `/api/dashboards`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Base URL serving plugin bundles. Falls back to `api_url` when unset.
    #[serde(default)]
    pub bundle_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub debug_logging: bool,
    /// Packages the host shares with module containers (name -> version).
    #[serde(default)]
    pub shared_scope: HashMap<String, String>,
}

fn default_api_url() -> String {
    "http://localhost:15220".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            bundle_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            debug_logging: false,
            shared_scope: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `path` (or the default location) and apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Self {
        let default_path = config_dir().join(CONFIG_FILE);
        let mut config: Self = load_json_config(path.unwrap_or(&default_path));
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(url) = lookup(ENV_BUNDLE_URL).filter(|v| !v.trim().is_empty()) {
            self.bundle_url = Some(url.trim().to_string());
        }
    }

    /// Effective base URL for plugin bundles.
    pub fn bundle_base(&self) -> &str {
        self.bundle_url.as_deref().unwrap_or(&self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config: RuntimeConfig = load_json_config(&dir.path().join("nope.json"));
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let config: RuntimeConfig = load_json_config(file.path());
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"apiUrl":"https://kobs.example.com","sharedScope":{"react":"18.2.0"}}"#)
            .unwrap();
        let config: RuntimeConfig = load_json_config(file.path());
        assert_eq!(config.api_url, "https://kobs.example.com");
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.shared_scope.get("react").map(String::as_str), Some("18.2.0"));
        assert_eq!(config.bundle_base(), "https://kobs.example.com");
    }

    #[test]
    fn overrides_replace_urls() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|key| match key {
            ENV_API_URL => Some("https://api.internal".to_string()),
            ENV_BUNDLE_URL => Some("https://cdn.internal".to_string()),
            _ => None,
        });
        assert_eq!(config.api_url, "https://api.internal");
        assert_eq!(config.bundle_base(), "https://cdn.internal");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = RuntimeConfig::default();
        config.apply_overrides(|_| Some("  ".to_string()));
        assert_eq!(config, RuntimeConfig::default());
    }
}
