//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: {} containers, default partition={}",
        config.containers.len(),
        config.gate.default_cookie_store_id
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `CONTAINER_GATE_LOG_LEVEL`: Override log level
/// - `CONTAINER_GATE_IPC_SOCKET`: Override IPC socket path
/// - `CONTAINER_GATE_STATE_PATH`: Override state file path
/// - `CONTAINER_GATE_DEFAULT_PARTITION`: Override default cookie store id
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Apply environment variable overrides to a loaded configuration
///
/// # Errors
///
/// Returns `ConfigError` if an override is malformed or the result fails
/// validation.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(level) = std::env::var("CONTAINER_GATE_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Ok(socket) = std::env::var("CONTAINER_GATE_IPC_SOCKET") {
        config.ipc.socket_path = socket.into();
        debug!("IPC socket path overridden to {:?}", config.ipc.socket_path);
    }

    if let Ok(state) = std::env::var("CONTAINER_GATE_STATE_PATH") {
        config.store.state_path = state.into();
        debug!("State path overridden to {:?}", config.store.state_path);
    }

    if let Ok(partition) = std::env::var("CONTAINER_GATE_DEFAULT_PARTITION") {
        if partition.trim().is_empty() {
            return Err(ConfigError::EnvError {
                name: "CONTAINER_GATE_DEFAULT_PARTITION".into(),
                reason: "must not be empty".into(),
            });
        }
        config.gate.default_cookie_store_id = partition;
        debug!(
            "Default partition overridden to {}",
            config.gate.default_cookie_store_id
        );
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
