//! Plugin runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{PluginError, Result};

/// Plugin runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Backend API root, e.g. `https://panel.example.com/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every backend request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Request timeout (in milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connect timeout (in milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Fuel budget for a single call into a plugin bundle
    #[serde(default = "default_fuel_limit")]
    pub fuel_limit: u64,

    /// Maximum linear memory for a plugin instance (in bytes)
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    /// Plugins that are explicitly disabled
    #[serde(default)]
    pub disabled_plugins: Vec<String>,

    /// Plugins that are explicitly enabled (if empty, all are enabled)
    #[serde(default)]
    pub enabled_plugins: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            fuel_limit: default_fuel_limit(),
            max_memory_bytes: default_max_memory_bytes(),
            disabled_plugins: Vec::new(),
            enabled_plugins: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration pointing at a backend.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PluginError::ConfigError(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("panel").join("plugins.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(PluginError::ConfigError(format!(
                "Invalid base_url: {}",
                self.base_url
            )));
        }

        if self.fuel_limit == 0 {
            return Err(PluginError::ConfigError(
                "fuel_limit must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if a plugin is enabled.
    pub fn is_plugin_enabled(&self, plugin_id: &str) -> bool {
        if self.disabled_plugins.iter().any(|id| id == plugin_id) {
            return false;
        }

        if !self.enabled_plugins.is_empty() {
            return self.enabled_plugins.iter().any(|id| id == plugin_id);
        }

        true
    }

    /// Enable a plugin.
    pub fn enable_plugin(&mut self, plugin_id: &str) {
        self.disabled_plugins.retain(|id| id != plugin_id);
        if !self.enabled_plugins.is_empty() && !self.enabled_plugins.iter().any(|id| id == plugin_id)
        {
            self.enabled_plugins.push(plugin_id.to_string());
        }
    }

    /// Disable a plugin.
    pub fn disable_plugin(&mut self, plugin_id: &str) {
        if !self.disabled_plugins.iter().any(|id| id == plugin_id) {
            self.disabled_plugins.push(plugin_id.to_string());
        }
        self.enabled_plugins.retain(|id| id != plugin_id);
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000 // 30 seconds
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_fuel_limit() -> u64 {
    10_000_000
}

fn default_max_memory_bytes() -> usize {
    16 * 1024 * 1024 // 16 MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.fuel_limit, 10_000_000);
        assert_eq!(config.max_memory_bytes, 16 * 1024 * 1024);
        assert!(config.api_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_plugin_enabled() {
        let mut config = RuntimeConfig::default();

        assert!(config.is_plugin_enabled("weather"));

        config.disable_plugin("weather");
        assert!(!config.is_plugin_enabled("weather"));

        config.enable_plugin("weather");
        assert!(config.is_plugin_enabled("weather"));
    }

    #[test]
    fn test_enabled_list_is_exclusive() {
        let config = RuntimeConfig {
            enabled_plugins: vec!["weather".to_string()],
            ..Default::default()
        };

        assert!(config.is_plugin_enabled("weather"));
        assert!(!config.is_plugin_enabled("admin-tools"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = RuntimeConfig::parse(
            r#"
base_url = "https://panel.example.com/api"
api_token = "secret"
disabled_plugins = ["broken"]
"#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://panel.example.com/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert!(!config.is_plugin_enabled("broken"));
        assert_eq!(config.request_timeout_ms, 30000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.toml");
        std::fs::write(&path, "fuel_limit = 500\nenabled_plugins = [\"weather\"]\n").unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.fuel_limit, 500);
        assert!(!config.is_plugin_enabled("admin-tools"));

        let missing = RuntimeConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(PluginError::IoError(_))));
    }

    #[test]
    fn test_parse_rejects_bad_url() {
        let result = RuntimeConfig::parse(r#"base_url = "not a url""#);
        assert!(matches!(result, Err(PluginError::ConfigError(_))));
    }
}
