//! Rule type definitions
//!
//! Wire and storage representations follow the persisted state shape: rule
//! and container subdomain settings are `true` / `false` / `null`, the global
//! setting is `true` / `false` / `"ask"`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a partition (a browser cookie store id).
pub type PartitionId = String;

/// Identifier of a browser tab.
pub type TabId = i64;

/// Label shown for a rule whose owning partition no longer exists.
pub const UNKNOWN_OWNER_LABEL: &str = "unknown";

/// Tri-state subdomain setting used by domain rules and containers.
///
/// Serialized as `true` (inherit), `false` (exact only) or `null` (defer to
/// the next precedence level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum SubdomainSetting {
    /// Rule applies to every subdomain
    Inherit,
    /// Rule applies to the exact domain only
    ExactOnly,
    /// Defer to the next precedence level
    #[default]
    Defer,
}

impl SubdomainSetting {
    /// Check if this level makes no decision
    #[must_use]
    pub const fn is_defer(self) -> bool {
        matches!(self, Self::Defer)
    }
}

impl From<Option<bool>> for SubdomainSetting {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Inherit,
            Some(false) => Self::ExactOnly,
            None => Self::Defer,
        }
    }
}

impl From<SubdomainSetting> for Option<bool> {
    fn from(value: SubdomainSetting) -> Self {
        match value {
            SubdomainSetting::Inherit => Some(true),
            SubdomainSetting::ExactOnly => Some(false),
            SubdomainSetting::Defer => None,
        }
    }
}

/// Lowest-precedence subdomain default.
///
/// Serialized as `true`, `false` or `"ask"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "GlobalRepr", into = "GlobalRepr")]
pub enum GlobalSubdomains {
    /// Rules inherit to subdomains unless overridden
    Inherit,
    /// Rules match exactly unless overridden
    ExactOnly,
    /// Subdomains of ruled domains are paused until the user decides
    #[default]
    Ask,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GlobalRepr {
    Flag(bool),
    Word(String),
}

impl TryFrom<GlobalRepr> for GlobalSubdomains {
    type Error = String;

    fn try_from(value: GlobalRepr) -> Result<Self, Self::Error> {
        match value {
            GlobalRepr::Flag(true) => Ok(Self::Inherit),
            GlobalRepr::Flag(false) => Ok(Self::ExactOnly),
            GlobalRepr::Word(word) if word == "ask" => Ok(Self::Ask),
            GlobalRepr::Word(word) => Err(format!(
                "invalid global subdomain setting {word:?}, expected true, false or \"ask\""
            )),
        }
    }
}

impl From<GlobalSubdomains> for GlobalRepr {
    fn from(value: GlobalSubdomains) -> Self {
        match value {
            GlobalSubdomains::Inherit => Self::Flag(true),
            GlobalSubdomains::ExactOnly => Self::Flag(false),
            GlobalSubdomains::Ask => Self::Word("ask".into()),
        }
    }
}

/// Outcome of the three-level subdomain precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inheritance {
    /// Subdomains belong to the rule's owner
    Inherit,
    /// Subdomains are not covered by the rule
    ExactOnly,
    /// Subdomains need a user decision
    Ask,
}

/// Explicit assignment of a domain to a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRule {
    /// Owning partition
    pub owner_id: PartitionId,
    /// Display name of the owner at assignment time
    pub owner_label: String,
    /// Subdomain inheritance for this rule
    #[serde(default)]
    pub subdomains: SubdomainSetting,
}

impl DomainRule {
    /// Create a rule
    pub fn new(owner_id: impl Into<PartitionId>, owner_label: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            owner_label: owner_label.into(),
            subdomains: SubdomainSetting::Defer,
        }
    }

    /// Set the subdomain setting
    #[must_use]
    pub const fn with_subdomains(mut self, subdomains: SubdomainSetting) -> Self {
        self.subdomains = subdomains;
        self
    }
}

/// A successful owner lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerMatch {
    /// Owning partition
    pub owner_id: PartitionId,
    /// Owner label stored on the rule
    pub owner_label: String,
    /// Domain of the rule that matched
    pub matched_domain: String,
    /// `true` if an ancestor rule matched through inheritance
    pub inherited: bool,
}

/// Full outcome of resolving a domain against the rule state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An exact or inheriting rule owns the domain
    Owned(OwnerMatch),
    /// Only ancestor rules whose effective setting is "ask" cover the domain
    Undecided(OwnerMatch),
    /// No rule covers the domain
    Unowned,
}

impl Resolution {
    /// The owner, if the domain is owned outright
    #[must_use]
    pub fn owned(self) -> Option<OwnerMatch> {
        match self {
            Self::Owned(owner) => Some(owner),
            Self::Undecided(_) | Self::Unowned => None,
        }
    }

    /// Owner or "ask" candidate, whichever applies
    #[must_use]
    pub const fn candidate(&self) -> Option<&OwnerMatch> {
        match self {
            Self::Owned(owner) | Self::Undecided(owner) => Some(owner),
            Self::Unowned => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(m) => write!(f, "owned:{}@{}", m.owner_id, m.matched_domain),
            Self::Undecided(m) => write!(f, "ask:{}@{}", m.owner_id, m.matched_domain),
            Self::Unowned => write!(f, "unowned"),
        }
    }
}
