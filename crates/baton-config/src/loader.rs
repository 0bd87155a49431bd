//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "baton.toml",
    "config.toml",
    "./config/baton.toml",
    "/etc/baton/baton.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, then validate it
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file does not exist, searching defaults");
        }

        if let Ok(path) = env::var("BATON_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `BATON_*` overrides. Values that fail to parse leave the field untouched.
fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Coordination
    if let Some(val) = lookup("BATON_COORDINATION_ADDRESS") {
        config.coordination.address = val;
    }
    if let Some(val) = lookup("BATON_SESSION_TIMEOUT_MS") {
        if let Ok(timeout) = val.parse() {
            config.coordination.session_timeout_ms = timeout;
        }
    }

    // Election
    if let Some(val) = lookup("BATON_ELECTION_NAMESPACE") {
        config.election.namespace = val;
    }
    if let Some(val) = lookup("BATON_ELECTION_PREFIX") {
        config.election.prefix = val;
    }
    if let Some(val) = lookup("BATON_CREATE_NAMESPACE") {
        if let Ok(create) = val.parse() {
            config.election.create_namespace = create;
        }
    }
    if let Some(val) = lookup("BATON_RETRY_BACKOFF_MS") {
        if let Ok(backoff) = val.parse() {
            config.election.retry_backoff_ms = backoff;
        }
    }
    if let Some(val) = lookup("BATON_MAX_RETRIES") {
        if let Ok(retries) = val.parse() {
            config.election.max_retries = retries;
        }
    }

    // Monitor
    if let Some(val) = lookup("BATON_MONITOR_ENABLED") {
        if let Ok(enabled) = val.parse() {
            config.monitor.enabled = enabled;
        }
    }
    if let Some(val) = lookup("BATON_MONITOR_TARGET") {
        config.monitor.target_path = val;
    }
}
