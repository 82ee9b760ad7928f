//! Configuration loading for murmur-proxy.
//!
//! Configuration is loaded from a TOML file (default: `proxy.toml`). Every
//! field has a default, so an empty file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for murmur-proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Proxy configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Bind address for the local UI listener (default: 127.0.0.1:3001).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Relay base URL (default: http://localhost:8080).
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Timeout for requests to the relay, in seconds (default: 10).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProxyConfig {
    /// Key lookup timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.proxy.server_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "proxy.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.proxy.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "proxy.request_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
