//! Configuration module for container-gate
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use container_gate::config::{load_config, Config};
//!
//! let config = load_config("/etc/container-gate/config.json").unwrap();
//! println!("Default partition: {}", config.gate.default_cookie_store_id);
//! ```

mod loader;
mod types;

pub use loader::{
    apply_env_overrides, create_default_config, load_config, load_config_str,
    load_config_with_env,
};
pub use types::{Config, ContainerSeed, GateConfig, IpcConfig, LogConfig, StoreConfig};
