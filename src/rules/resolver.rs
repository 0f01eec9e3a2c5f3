//! Domain ownership resolution
//!
//! # Priority Order
//!
//! 1. Exact rule for the domain (regardless of its subdomain setting)
//! 2. Most specific ancestor rule whose effective setting inherits
//! 3. Unowned
//!
//! The effective setting of an ancestor rule comes from
//! [`effective_inheritance`]: the rule's own setting, then the owning
//! container's, then the global default.

use super::domain::DomainWalker;
use super::state::RuleState;
use super::types::{
    DomainRule, GlobalSubdomains, Inheritance, OwnerMatch, Resolution, SubdomainSetting,
};

/// Three-level subdomain precedence: domain rule > container > global.
///
/// # Example
///
/// ```
/// use container_gate::rules::resolver::effective_inheritance;
/// use container_gate::rules::{GlobalSubdomains, Inheritance, SubdomainSetting};
///
/// let effective = effective_inheritance(
///     SubdomainSetting::Defer,
///     SubdomainSetting::Inherit,
///     GlobalSubdomains::Ask,
/// );
/// assert_eq!(effective, Inheritance::Inherit);
/// ```
#[must_use]
pub const fn effective_inheritance(
    rule: SubdomainSetting,
    container: SubdomainSetting,
    global: GlobalSubdomains,
) -> Inheritance {
    match (rule, container, global) {
        (SubdomainSetting::Inherit, _, _) => Inheritance::Inherit,
        (SubdomainSetting::ExactOnly, _, _) => Inheritance::ExactOnly,
        (SubdomainSetting::Defer, SubdomainSetting::Inherit, _) => Inheritance::Inherit,
        (SubdomainSetting::Defer, SubdomainSetting::ExactOnly, _) => Inheritance::ExactOnly,
        (SubdomainSetting::Defer, SubdomainSetting::Defer, GlobalSubdomains::Inherit) => {
            Inheritance::Inherit
        }
        (SubdomainSetting::Defer, SubdomainSetting::Defer, GlobalSubdomains::ExactOnly) => {
            Inheritance::ExactOnly
        }
        (SubdomainSetting::Defer, SubdomainSetting::Defer, GlobalSubdomains::Ask) => {
            Inheritance::Ask
        }
    }
}

/// Read-only view of a [`RuleState`] that answers ownership questions.
#[derive(Debug, Clone, Copy)]
pub struct RuleResolver<'a> {
    state: &'a RuleState,
    walker: &'a DomainWalker,
}

impl<'a> RuleResolver<'a> {
    /// Create a resolver over a state snapshot
    #[must_use]
    pub const fn new(state: &'a RuleState, walker: &'a DomainWalker) -> Self {
        Self { state, walker }
    }

    /// Effective subdomain inheritance of a rule
    #[must_use]
    pub fn inheritance_of(&self, rule: &DomainRule) -> Inheritance {
        effective_inheritance(
            rule.subdomains,
            self.state.container_setting(&rule.owner_id),
            self.state.global_subdomains,
        )
    }

    /// Resolve the owner of `domain`, distinguishing "ask" from unowned.
    #[must_use]
    pub fn resolve(&self, domain: &str) -> Resolution {
        if domain.is_empty() {
            return Resolution::Unowned;
        }

        if let Some(rule) = self.state.rule(domain) {
            return Resolution::Owned(owner_match(domain, rule, false));
        }

        let mut ask_candidate = None;
        for ancestor in self.walker.parents(domain) {
            let Some(rule) = self.state.rule(ancestor) else {
                continue;
            };
            match self.inheritance_of(rule) {
                Inheritance::Inherit => {
                    return Resolution::Owned(owner_match(ancestor, rule, true));
                }
                Inheritance::Ask if ask_candidate.is_none() => {
                    ask_candidate = Some(owner_match(ancestor, rule, true));
                }
                Inheritance::Ask | Inheritance::ExactOnly => {}
            }
        }

        ask_candidate.map_or(Resolution::Unowned, Resolution::Undecided)
    }

    /// Resolve the owner of `domain`; `None` when unowned or undecided.
    #[must_use]
    pub fn resolve_owner(&self, domain: &str) -> Option<OwnerMatch> {
        self.resolve(domain).owned()
    }

    /// Check whether `domain` or an ancestor is excluded from `partition`.
    #[must_use]
    pub fn is_excluded(&self, domain: &str, partition: &str) -> bool {
        self.state
            .exclusions(partition)
            .is_some_and(|set| {
                set.contains(domain) || self.walker.parents(domain).any(|d| set.contains(d))
            })
    }

    /// Check whether `domain` or an ancestor is blended into `partition`.
    #[must_use]
    pub fn is_blended(&self, domain: &str, partition: &str) -> bool {
        self.state
            .blends(partition)
            .is_some_and(|set| {
                set.contains(domain) || self.walker.parents(domain).any(|d| set.contains(d))
            })
    }

    /// Domain to record when blending `domain`: the domain of the rule that
    /// owns (or would own) it, so every subdomain is covered; otherwise the
    /// domain itself.
    #[must_use]
    pub fn blend_target(&self, domain: &str) -> String {
        self.resolve(domain)
            .candidate()
            .map_or_else(|| domain.to_string(), |m| m.matched_domain.clone())
    }

    /// The state this resolver reads
    #[must_use]
    pub const fn state(&self) -> &'a RuleState {
        self.state
    }

    /// The walker this resolver uses
    #[must_use]
    pub const fn walker(&self) -> &'a DomainWalker {
        self.walker
    }
}

fn owner_match(domain: &str, rule: &DomainRule, inherited: bool) -> OwnerMatch {
    OwnerMatch {
        owner_id: rule.owner_id.clone(),
        owner_label: rule.owner_label.clone(),
        matched_domain: domain.to_string(),
        inherited,
    }
}
