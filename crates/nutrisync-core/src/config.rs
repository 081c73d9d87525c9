//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, HTTP timeouts and the last used email.
//!
//! Configuration is stored at `~/.config/nutrisync/config.json`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "nutrisync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "NUTRISYNC_API_URL";

const DEFAULT_API_BASE_URL: &str = "https://food-analyzer-backend.onrender.com";

/// Idle time allowed between bytes of a response.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound for a whole request, including slow uploads.
const DEFAULT_RESOURCE_TIMEOUT_SECS: u64 = 90;

/// The liveness check should fail fast.
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub last_email: Option<String>,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            last_email: None,
            http: HttpConfig::default(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    pub resource_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            resource_timeout_secs: DEFAULT_RESOURCE_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
        }
    }
}

impl HttpConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            request: Duration::from_secs(self.request_timeout_secs),
            resource: Duration::from_secs(self.resource_timeout_secs),
            health: Duration::from_secs(self.health_timeout_secs),
        }
    }
}

/// Timeouts applied by the API client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum idle time while waiting for response bytes.
    pub request: Duration,
    /// Maximum time for a whole call.
    pub resource: Duration,
    /// Overall limit for the liveness check.
    pub health: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        HttpConfig::default().timeouts()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url":"http://localhost:5050","http":{"health_timeout_secs":3}}"#)
                .unwrap();
        assert_eq!(config.api_base_url, "http://localhost:5050");
        let timeouts = config.http.timeouts();
        assert_eq!(timeouts.health, Duration::from_secs(3));
        assert_eq!(timeouts.request, Duration::from_secs(30));
        assert_eq!(timeouts.resource, Duration::from_secs(90));
        assert!(config.last_email.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.http.timeouts(), Timeouts::default());
    }
}
