//! IPC Protocol definitions
//!
//! This module defines the intent and response types exchanged with the
//! browser-side UI over the Unix socket. Messages are tagged by `type`; names
//! and fields are camelCase.

use serde::{Deserialize, Serialize};

use crate::gate::{GateDecision, InterceptEvent, PendingEvent, PendingRequest};
use crate::partition::ContainerInfo;
use crate::rules::{DomainRule, GlobalSubdomains, PartitionId, SubdomainSetting, TabId};
use crate::store::PersistedState;

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get server status
    Status,

    /// Get the full rule, setting and temporary partition state
    GetState,

    /// List partitions known to the provider
    GetContainers,

    /// List paused requests of a tab
    GetPendingRequests {
        /// Tab to inspect
        tab_id: TabId,
    },

    /// Assign a domain to a container, creating the container if missing
    AddRule {
        /// Domain to assign
        domain: String,
        /// Display name of the owning container
        container_name: String,
        /// Subdomain setting of the new rule
        #[serde(default)]
        subdomains: SubdomainSetting,
    },

    /// Delete a domain rule
    RemoveRule {
        /// Domain of the rule
        domain: String,
    },

    /// Resolve a paused domain by allowing it, once or permanently
    AllowDomain {
        /// Tab the request was paused in
        tab_id: TabId,
        /// Paused domain (or an ancestor of it)
        domain: String,
        /// Store a rule instead of allowing once
        #[serde(default)]
        add_rule: bool,
        /// Owning container for the rule
        #[serde(default)]
        container_name: Option<String>,
        /// Subdomain setting of the rule
        #[serde(default)]
        enable_subdomains: SubdomainSetting,
    },

    /// Allow a domain for the tab's current page
    AllowOnce {
        /// Tab the request was paused in
        tab_id: TabId,
        /// Paused domain
        domain: String,
    },

    /// Block a paused domain
    BlockDomain {
        /// Tab the request was paused in
        tab_id: TabId,
        /// Domain to block
        domain: String,
        /// Exclude the domain from the partition for good
        #[serde(default)]
        add_exclusion: bool,
        /// Partition of the tab
        cookie_store_id: PartitionId,
    },

    /// Let a partition load a domain owned elsewhere
    AddBlend {
        /// Partition receiving the blend
        cookie_store_id: PartitionId,
        /// Domain to blend
        domain: String,
        /// Tab to allow the domain in right away
        #[serde(default)]
        tab_id: Option<TabId>,
        /// The user acknowledged the blend warning
        #[serde(default)]
        confirmed: bool,
    },

    /// Skip the blend confirmation from now on
    SetHideBlendWarning {
        /// New flag value
        value: bool,
    },

    /// Decide an intercepted request
    Intercept {
        /// The intercepted request
        event: InterceptEvent,
    },

    /// A tab was closed
    TabClosed {
        /// Closed tab
        tab_id: TabId,
    },

    /// Set the global subdomain default
    SetGlobalSubdomains {
        /// `true`, `false` or `"ask"`
        value: GlobalSubdomains,
    },

    /// Set a container's subdomain setting
    SetContainerSubdomains {
        /// Container to configure
        cookie_store_id: PartitionId,
        /// `true`, `false` or `null`
        #[serde(default)]
        value: SubdomainSetting,
    },

    /// Set a rule's subdomain setting
    SetRuleSubdomains {
        /// Domain of the rule
        domain: String,
        /// `true`, `false` or `null`
        #[serde(default)]
        value: SubdomainSetting,
    },

    /// Remove a domain from a partition's exclusion set
    RemoveExclusion {
        /// Partition
        cookie_store_id: PartitionId,
        /// Excluded domain
        domain: String,
    },

    /// Remove a domain from a partition's blend set
    RemoveBlend {
        /// Partition
        cookie_store_id: PartitionId,
        /// Blended domain
        domain: String,
    },

    /// Turn the connection into a stream of `pendingChanged` frames.
    ///
    /// Answered with `success`; afterwards the server only writes events.
    Subscribe {
        /// Only report this tab; every tab when absent
        #[serde(default)]
        tab_id: Option<TabId>,
    },

    /// Initiate graceful shutdown
    Shutdown,
}

impl IpcCommand {
    /// Check if the command changes persisted state when it succeeds
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        match self {
            Self::Ping
            | Self::Status
            | Self::GetState
            | Self::GetContainers
            | Self::GetPendingRequests { .. }
            | Self::AllowOnce { .. }
            | Self::Intercept { .. }
            | Self::Subscribe { .. }
            | Self::Shutdown => false,
            Self::AllowDomain { add_rule, .. } => *add_rule,
            Self::BlockDomain { add_exclusion, .. } => *add_exclusion,
            Self::AddRule { .. }
            | Self::RemoveRule { .. }
            | Self::AddBlend { .. }
            | Self::SetHideBlendWarning { .. }
            | Self::TabClosed { .. }
            | Self::SetGlobalSubdomains { .. }
            | Self::SetContainerSubdomains { .. }
            | Self::SetRuleSubdomains { .. }
            | Self::RemoveExclusion { .. }
            | Self::RemoveBlend { .. } => true,
        }
    }
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IpcResponse {
    /// Ping response
    Pong,

    /// Status response
    Status(ServerStatus),

    /// Full state response
    State(StateSnapshot),

    /// Provider partitions
    Containers {
        /// Every partition the provider reports
        containers: Vec<ContainerInfo>,
    },

    /// Paused requests of a tab
    PendingRequests {
        /// Inspected tab
        tab_id: TabId,
        /// Paused requests, sorted by domain
        requests: Vec<PendingRequest>,
    },

    /// Gate decision for an intercepted request
    Verdict(GateDecision),

    /// A rule was stored
    Rule {
        /// Rule domain
        domain: String,
        /// Stored rule
        rule: DomainRule,
    },

    /// A blend was recorded
    Blended {
        /// Partition receiving the blend
        cookie_store_id: PartitionId,
        /// Domain recorded in the blend set
        target: String,
    },

    /// The blend needs an explicit confirmation; nothing changed
    BlendConfirmationRequired {
        /// Partition that would receive the blend
        cookie_store_id: PartitionId,
        /// Requested domain
        domain: String,
        /// Domain that would be recorded
        target: String,
        /// Label of the partition whose domain would be shared
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_label: Option<String>,
    },

    /// Pushed to subscribers when a tab's pending set changes
    PendingChanged {
        /// Tab whose set changed
        tab_id: TabId,
        /// Number of paused domains
        domains: usize,
        /// Sum of blocked attempts over those domains
        requests: u64,
    },

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(IpcError),
}

impl IpcResponse {
    /// Create a success response with no message
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(IpcError {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<PendingEvent> for IpcResponse {
    fn from(event: PendingEvent) -> Self {
        let PendingEvent::CountChanged {
            tab_id,
            domains,
            requests,
        } = event;
        Self::PendingChanged {
            tab_id,
            domains,
            requests,
        }
    }
}

/// Server status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Crate version
    pub version: String,
    /// Seconds since the handler started
    pub uptime_secs: u64,
    /// Version of the current rule snapshot
    pub rules_version: u64,
    /// Number of domain rules
    pub domain_rules: usize,
    /// Number of exclusion entries over all partitions
    pub exclusions: usize,
    /// Number of blend entries over all partitions
    pub blends: usize,
    /// Live temporary partitions
    pub temporary_partitions: usize,
    /// Tabs with paused requests or page decisions
    pub tracked_tabs: usize,
}

/// Full state as returned by `getState`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Rule snapshot version
    pub version: u64,
    /// Rules, settings and temporary partitions
    #[serde(flatten)]
    pub state: PersistedState,
}

/// IPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    /// Error code
    pub code: ErrorCode,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for IpcError {}

/// Error codes for IPC responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unknown error
    Unknown,
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Resource not found
    NotFound,
    /// Operation failed
    OperationFailed,
    /// Server is shutting down
    ShuttingDown,
    /// Internal error
    InternalError,
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
///
/// # Errors
///
/// Returns `serde_json::Error` if the message cannot be serialized.
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len()).map_err(serde::ser::Error::custom)?;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a message body (without its length prefix)
///
/// # Errors
///
/// Returns `serde_json::Error` if the body is not a valid message.
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
