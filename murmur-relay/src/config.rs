//! Configuration loading for murmur-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for murmur-relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Bearer-token configuration.
    pub auth: AuthConfig,
    /// Queue sizes and rate limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Bearer-token configuration.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with the token issuer.
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

/// Queue sizes and rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Outbound frames buffered per connection before live pushes drop (default: 256).
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum concurrently registered connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum `content` length of a message frame in bytes (default: 64KB).
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
    /// Maximum messages per user per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum messages per second across all users (default: 5000).
    #[serde(default = "default_global_messages_per_second")]
    pub global_messages_per_second: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("murmur.db")
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_content_bytes() -> usize {
    64 * 1024
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_messages_per_second() -> u32 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_connections: default_max_connections(),
            max_content_bytes: default_max_content_bytes(),
            messages_per_minute: default_messages_per_minute(),
            global_messages_per_second: default_global_messages_per_second(),
        }
    }
}

impl Config {
    /// Configuration with defaults and the given token secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            auth: AuthConfig {
                jwt_secret: jwt_secret.into(),
            },
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
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
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.jwt_secret must not be empty".into()));
        }
        if self.limits.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "limits.outbound_queue_capacity must be at least 1".into(),
            ));
        }
        if self.limits.messages_per_minute == 0 || self.limits.global_messages_per_second == 0 {
            return Err(ConfigError::Invalid("message rate limits must be non-zero".into()));
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
