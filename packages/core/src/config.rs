/// Configuration for the write coordinator and event emitter
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest accepted store call timeout (ten minutes)
const MAX_STORE_TIMEOUT_MS: u64 = 600_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Event log stream events are written to
    pub event_stream_name: String,

    /// Bounded event queue; events beyond it are dropped and logged
    pub event_queue_capacity: usize,

    /// Per-subscriber buffer of the live event broadcast
    pub broadcast_capacity: usize,

    /// Deadline for every single store call
    pub store_timeout_ms: u64,

    /// Prefix of the record links written to the event log
    pub api_base_path: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_stream_name: "treecreeper-events".to_string(),
            event_queue_capacity: 1024,
            broadcast_capacity: 128,
            store_timeout_ms: 10_000,
            api_base_path: "/api".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from `TC_*` environment variables, defaulting anything unset or unparseable
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            event_stream_name: lookup("TC_EVENT_LOG_STREAM_NAME").unwrap_or(defaults.event_stream_name),
            event_queue_capacity: parse_or(
                lookup("TC_EVENT_QUEUE_CAPACITY"),
                defaults.event_queue_capacity,
            ),
            broadcast_capacity: parse_or(
                lookup("TC_EVENT_BROADCAST_CAPACITY"),
                defaults.broadcast_capacity,
            ),
            store_timeout_ms: parse_or(lookup("TC_STORE_TIMEOUT_MS"), defaults.store_timeout_ms),
            api_base_path: lookup("TC_API_BASE_PATH").unwrap_or(defaults.api_base_path),
        };
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.event_stream_name.is_empty() {
            return Err("event_stream_name cannot be empty".to_string());
        }

        if self.event_queue_capacity == 0 {
            return Err("event_queue_capacity must be greater than 0".to_string());
        }

        if self.broadcast_capacity == 0 {
            return Err("broadcast_capacity must be greater than 0".to_string());
        }

        if self.store_timeout_ms == 0 || self.store_timeout_ms > MAX_STORE_TIMEOUT_MS {
            return Err(format!(
                "store_timeout_ms must be between 1 and {}",
                MAX_STORE_TIMEOUT_MS
            ));
        }

        if !self.api_base_path.starts_with('/') {
            return Err("api_base_path must start with '/'".to_string());
        }

        Ok(())
    }
}

/// Parse a raw variable, keeping the default when it is absent or invalid
fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|raw| raw.trim().parse().ok()).unwrap_or(default)
}
