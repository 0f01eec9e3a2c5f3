//! Error types for container-gate
//!
//! This module defines the error hierarchy for the rule engine, request gate,
//! partition lifecycle and the intent protocol. All errors are categorized by
//! subsystem and include recovery hints.
//!
//! Nothing on the request path returns these errors: a resolution failure
//! degrades to the conservative verdict instead. They surface from intents,
//! configuration, persistence and the IPC transport.

use std::io;

use thiserror::Error;

/// Top-level error type for container-gate
#[derive(Debug, Error)]
pub enum ContainerGateError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rule state errors (invalid domains, missing rules)
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Partition provider errors
    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    /// State persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerGateError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Rule(e) => e.is_recoverable(),
            Self::Partition(e) => e.is_recoverable(),
            Self::Store(e) => e.is_recoverable(),
            Self::Ipc(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Rule state errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// The domain could not be normalized
    #[error("Invalid domain: {domain:?}")]
    InvalidDomain { domain: String },

    /// No rule exists for the domain
    #[error("No rule for domain: {domain}")]
    RuleNotFound { domain: String },

    /// Partition identifier is empty
    #[error("Invalid partition id: {id:?}")]
    InvalidPartition { id: String },
}

impl RuleError {
    /// Rule errors are caller mistakes; retrying the same intent fails again
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create an invalid domain error
    pub fn invalid_domain(domain: impl Into<String>) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
        }
    }

    /// Create a rule not found error
    pub fn not_found(domain: impl Into<String>) -> Self {
        Self::RuleNotFound {
            domain: domain.into(),
        }
    }
}

/// Partition provider errors
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Partition does not exist
    #[error("Partition not found: {id}")]
    NotFound { id: String },

    /// Container name is empty or otherwise unusable
    #[error("Invalid container name: {name:?}")]
    InvalidName { name: String },

    /// The provider refused or failed the operation
    #[error("Partition provider failed during {operation}: {reason}")]
    Provider { operation: String, reason: String },
}

impl PartitionError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::InvalidName { .. } => false,
            Self::Provider { .. } => true,
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a provider error
    pub fn provider(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// State persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored state could not be parsed
    #[error("Failed to parse stored state at {path}: {reason}")]
    ParseError { path: String, reason: String },

    /// State could not be serialized
    #[error("Failed to serialize state: {0}")]
    SerializeError(String),

    /// I/O error while reading or writing state
    #[error("Store I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl StoreError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::ParseError { .. } => false,
            Self::SerializeError(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } => false,
            Self::BindError { .. } => false,
            Self::ConnectionError(_) => true,
            Self::ProtocolError(_) => true,
            Self::SerializationError(_) => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}

/// Type alias for Result with `ContainerGateError`
pub type Result<T> = std::result::Result<T, ContainerGateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!config_err.is_recoverable());

        let rule_err = RuleError::invalid_domain("bad domain");
        assert!(!rule_err.is_recoverable());

        // Provider hiccups can be retried, missing partitions cannot
        assert!(PartitionError::provider("create", "busy").is_recoverable());
        assert!(!PartitionError::not_found("firefox-container-9").is_recoverable());

        let store_err = StoreError::ParseError {
            path: "/tmp/state.json".into(),
            reason: "eof".into(),
        };
        assert!(!store_err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = RuleError::not_found("example.com");
        assert!(err.to_string().contains("example.com"));

        let err = PartitionError::provider("remove", "container locked");
        let msg = err.to_string();
        assert!(msg.contains("remove"));
        assert!(msg.contains("container locked"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let gate_err: ContainerGateError = io_err.into();
        assert!(gate_err.is_recoverable());

        let rule_err = RuleError::invalid_domain("");
        let gate_err: ContainerGateError = rule_err.into();
        assert!(!gate_err.is_recoverable());
        assert!(gate_err.to_string().starts_with("Rule error"));
    }
}
