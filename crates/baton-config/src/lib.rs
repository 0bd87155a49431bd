//! Baton Configuration System
//!
//! TOML-based configuration with environment variable overrides. The
//! election reads a fixed set of options at startup: where the coordination
//! service lives, how long its sessions survive without heartbeats, and which
//! namespace holds candidacy records.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordination: CoordinationConfig,
    pub election: ElectionConfig,
    pub monitor: MonitorConfig,
}

/// Coordination service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Service endpoint, `host:port`
    pub address: String,
    /// Time the service waits without heartbeats before expiring a session
    pub session_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            address: "localhost:2181".to_string(),
            session_timeout_ms: 3000,
        }
    }
}

impl CoordinationConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Election settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Absolute path holding all candidacy records
    pub namespace: String,
    /// Name prefix of candidacy records; the service appends the ordinal
    pub prefix: String,
    /// Create the namespace as a persistent node if it is missing
    pub create_namespace: bool,
    /// Delay before retrying an operation that failed transiently
    pub retry_backoff_ms: u64,
    /// Consecutive transient failures tolerated before giving up
    pub max_retries: u32,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            namespace: "/election".to_string(),
            prefix: "c_".to_string(),
            create_namespace: true,
            retry_backoff_ms: 200,
            max_retries: 5,
        }
    }
}

impl ElectionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Node monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub target_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_path: "/target_znode".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check the options the election relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordination.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "coordination.address must not be empty".to_string(),
            ));
        }
        if self.coordination.session_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "coordination.session_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let namespace = &self.election.namespace;
        if !namespace.starts_with('/') || namespace.len() < 2 || namespace.ends_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "election.namespace must be an absolute path without a trailing slash, got {:?}",
                namespace
            )));
        }

        let prefix = &self.election.prefix;
        if prefix.is_empty() || prefix.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "election.prefix must be non-empty and must not contain '/', got {:?}",
                prefix
            )));
        }

        if self.monitor.enabled && !self.monitor.target_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "monitor.target_path must be absolute, got {:?}",
                self.monitor.target_path
            )));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Baton Configuration
# Environment variables (BATON_*) override these settings

[coordination]
address = "localhost:2181"
session_timeout_ms = 3000

[election]
namespace = "/election"
prefix = "c_"
create_namespace = true
retry_backoff_ms = 200
max_retries = 5

[monitor]
enabled = false
target_path = "/target_znode"
"#
        .to_string()
    }
}
