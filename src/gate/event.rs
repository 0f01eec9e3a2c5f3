//! Interception events and verdicts
//!
//! The interception hook delivers an [`InterceptEvent`] per request and
//! expects an immediate [`Verdict`]. A request that needs a human decision is
//! blocked now; the pending state makes a later attempt succeed once resolved.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::{PartitionId, TabId};

/// Kind of request being intercepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Top-level navigation of a tab
    MainFrame,
    /// Anything loaded by a page; every other browser resource type
    /// (`image`, `script`, `sub_frame`, ...) maps here
    #[default]
    #[serde(other)]
    SubResource,
}

impl ResourceType {
    /// Check if this is a top-level navigation
    #[must_use]
    pub const fn is_main_frame(self) -> bool {
        matches!(self, Self::MainFrame)
    }
}

/// A request observed by the interception hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptEvent {
    /// Host-assigned request id, echoed in the decision
    pub request_id: String,

    /// Tab issuing the request
    pub tab_id: TabId,

    /// Partition the tab runs in
    pub cookie_store_id: PartitionId,

    /// Full request URL
    pub url: String,

    /// Navigation or sub-resource
    #[serde(default)]
    pub resource_type: ResourceType,
}

impl InterceptEvent {
    /// Create a sub-resource event
    pub fn new(
        request_id: impl Into<String>,
        tab_id: TabId,
        cookie_store_id: impl Into<PartitionId>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tab_id,
            cookie_store_id: cookie_store_id.into(),
            url: url.into(),
            resource_type: ResourceType::SubResource,
        }
    }

    /// Mark the event as a top-level navigation
    #[must_use]
    pub const fn main_frame(mut self) -> Self {
        self.resource_type = ResourceType::MainFrame;
        self
    }
}

/// What the host must do with the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Verdict {
    /// Let the request proceed
    Allow,
    /// Cancel the request
    Block,
    /// Cancel the navigation and reopen it in another partition
    Reopen {
        /// Partition to reopen the tab in
        #[serde(rename = "cookieStoreId")]
        cookie_store_id: PartitionId,
    },
}

impl Verdict {
    /// Check if the request may proceed
    #[must_use]
    pub const fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Check if the request is cancelled (blocked or reopened)
    #[must_use]
    pub const fn is_cancel(&self) -> bool {
        !self.is_allow()
    }
}

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerdictReason {
    /// The domain is excluded from the tab's partition
    Excluded,
    /// The tab's partition owns the domain
    SamePartition,
    /// No rule covers the domain and the partition admits unowned domains
    Unowned,
    /// The domain is blended into the tab's partition
    Blended,
    /// The user allowed the domain for this page
    AllowedOnce,
    /// The user blocked the domain for this page
    BlockedByUser,
    /// Waiting for a user decision
    Paused,
    /// The URL had no usable host
    Unparseable,
    /// A navigation to a domain owned by another partition
    OwnedElsewhere,
    /// A navigation moved into a temporary partition
    Temporary,
    /// A temporary partition could not be provisioned
    ProvisionFailed,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excluded => "excluded",
            Self::SamePartition => "same-partition",
            Self::Unowned => "unowned",
            Self::Blended => "blended",
            Self::AllowedOnce => "allowed-once",
            Self::BlockedByUser => "blocked-by-user",
            Self::Paused => "paused",
            Self::Unparseable => "unparseable",
            Self::OwnedElsewhere => "owned-elsewhere",
            Self::Temporary => "temporary",
            Self::ProvisionFailed => "provision-failed",
        };
        f.write_str(s)
    }
}

/// The gate's answer for one intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    /// Request id from the event
    pub request_id: String,

    /// Verdict for the host
    pub verdict: Verdict,

    /// Reason for the verdict
    pub reason: VerdictReason,

    /// Normalized request domain, when one could be extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Pending count for (tab, domain) after a pause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_count: Option<u64>,
}

impl GateDecision {
    pub(crate) fn new(
        event: &InterceptEvent,
        verdict: Verdict,
        reason: VerdictReason,
        domain: Option<&str>,
    ) -> Self {
        Self {
            request_id: event.request_id.clone(),
            verdict,
            reason,
            domain: domain.map(str::to_string),
            pending_count: None,
        }
    }

    /// Check if the request may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.verdict.is_allow()
    }
}

/// Observable state of a (tab, domain) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestState {
    /// No paused request and no decision
    Unseen,
    /// Allowed by a user decision for the current page
    Allowed,
    /// Blocked by a user decision for the current page
    Blocked,
    /// At least one request is waiting for a decision
    Paused,
}
