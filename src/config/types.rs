//! Configuration types for container-gate
//!
//! This module defines all configuration structures used by the daemon.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::partition::ContainerInfo;
use crate::rules::normalize_domain;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// State persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Request gate behavior
    #[serde(default)]
    pub gate: GateConfig,

    /// Containers registered with the in-process provider at startup
    #[serde(default)]
    pub containers: Vec<ContainerSeed>,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ipc.validate()?;
        self.log.validate()?;
        self.store.validate()?;
        self.gate.validate()?;

        let mut ids = HashSet::new();
        for seed in &self.containers {
            seed.validate()?;
            if !ids.insert(seed.cookie_store_id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate container id: {}",
                    seed.cookie_store_id
                )));
            }
            if seed.cookie_store_id == self.gate.default_cookie_store_id {
                return Err(ConfigError::ValidationError(format!(
                    "Container '{}' reuses the default cookie store id",
                    seed.name
                )));
            }
        }

        Ok(())
    }

    /// Create a default configuration with a few example containers
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            containers: vec![
                ContainerSeed::new("firefox-container-1", "Personal"),
                ContainerSeed::new("firefox-container-2", "Work"),
                ContainerSeed::new("firefox-container-3", "Banking"),
                ContainerSeed::new("firefox-container-4", "Shopping"),
            ],
            ..Self::default()
        }
    }
}

/// IPC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o600)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty socket path or a
    /// zero message size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an unknown format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown log format '{other}' (expected json or text)"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

/// State persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// JSON file holding rules, settings and temporary partitions
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Write the state after every mutating intent
    #[serde(default = "default_true")]
    pub persist: bool,
}

impl StoreConfig {
    /// Validate store configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty state path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist && self.state_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "state_path cannot be empty when persistence is enabled".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            persist: true,
        }
    }
}

/// Request gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Cookie store id of the browser's default partition
    #[serde(default = "default_cookie_store_id")]
    pub default_cookie_store_id: String,

    /// Name prefix for temporary partitions
    #[serde(default = "default_temp_name_prefix")]
    pub temp_name_prefix: String,

    /// Multi-label public suffixes (e.g. "co.uk") never treated as a site
    #[serde(default)]
    pub extra_public_suffixes: Vec<String>,

    /// Buffered pending count notifications per subscriber
    #[serde(default = "default_pending_event_capacity")]
    pub pending_event_capacity: usize,
}

impl GateConfig {
    /// Validate gate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for empty identifiers, invalid
    /// suffixes or a zero event capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_cookie_store_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_cookie_store_id cannot be empty".into(),
            ));
        }
        if self.temp_name_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "temp_name_prefix cannot be empty".into(),
            ));
        }
        if self.pending_event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pending_event_capacity must be greater than 0".into(),
            ));
        }
        for suffix in &self.extra_public_suffixes {
            if normalize_domain(suffix).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid public suffix: {suffix:?}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_cookie_store_id: default_cookie_store_id(),
            temp_name_prefix: default_temp_name_prefix(),
            extra_public_suffixes: Vec::new(),
            pending_event_capacity: default_pending_event_capacity(),
        }
    }
}

/// A container registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContainerSeed {
    /// Cookie store id
    pub cookie_store_id: String,

    /// Display name
    pub name: String,

    /// Optional color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Optional icon hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ContainerSeed {
    /// Create a seed without color or icon
    pub fn new(cookie_store_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cookie_store_id: cookie_store_id.into(),
            name: name.into(),
            color: None,
            icon: None,
        }
    }

    /// Validate the seed
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for an empty id or name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_store_id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Container seed needs an id and a name: {self:?}"
            )));
        }
        Ok(())
    }
}

impl From<ContainerSeed> for ContainerInfo {
    fn from(seed: ContainerSeed) -> Self {
        Self {
            cookie_store_id: seed.cookie_store_id,
            name: seed.name,
            color: seed.color,
            icon: seed.icon,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/container-gate/gate.sock")
}

const fn default_socket_mode() -> u32 {
    0o600
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/container-gate/state.json")
}

fn default_cookie_store_id() -> String {
    "firefox-default".into()
}

fn default_temp_name_prefix() -> String {
    "Temp".into()
}

const fn default_pending_event_capacity() -> usize {
    crate::gate::DEFAULT_EVENT_CAPACITY
}
