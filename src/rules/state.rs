//! Rule, exclusion, blend and setting state
//!
//! [`RuleState`] is plain data. It is only mutated through
//! [`RuleEngine::update`](super::engine::RuleEngine::update), which publishes
//! the result as a new immutable snapshot.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::types::{DomainRule, GlobalSubdomains, PartitionId, SubdomainSetting};
use crate::error::RuleError;

/// Every rule-level map the resolver reads.
///
/// Field names and defaults follow the persisted state shape: any missing
/// field loads as its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleState {
    /// Lowest-precedence subdomain default
    pub global_subdomains: GlobalSubdomains,

    /// Presentation flag: skip the blend confirmation
    pub hide_blend_warning: bool,

    /// Per-partition subdomain override
    pub container_subdomains: HashMap<PartitionId, SubdomainSetting>,

    /// Domains each partition may never reach
    pub container_exclusions: HashMap<PartitionId, BTreeSet<String>>,

    /// Domains owned elsewhere that each partition may load
    pub container_blends: HashMap<PartitionId, BTreeSet<String>>,

    /// Domain to owner assignments
    pub domain_rules: HashMap<String, DomainRule>,
}

impl RuleState {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the rule for an exact domain
    #[must_use]
    pub fn rule(&self, domain: &str) -> Option<&DomainRule> {
        self.domain_rules.get(domain)
    }

    /// Container-level subdomain setting (`Defer` when unset)
    #[must_use]
    pub fn container_setting(&self, partition: &str) -> SubdomainSetting {
        self.container_subdomains
            .get(partition)
            .copied()
            .unwrap_or_default()
    }

    /// Exclusion set of a partition
    #[must_use]
    pub fn exclusions(&self, partition: &str) -> Option<&BTreeSet<String>> {
        self.container_exclusions.get(partition)
    }

    /// Blend set of a partition
    #[must_use]
    pub fn blends(&self, partition: &str) -> Option<&BTreeSet<String>> {
        self.container_blends.get(partition)
    }

    /// Create or overwrite the rule for `domain`. Returns the previous rule.
    pub fn set_rule(&mut self, domain: impl Into<String>, rule: DomainRule) -> Option<DomainRule> {
        self.domain_rules.insert(domain.into(), rule)
    }

    /// Delete the rule for `domain`
    ///
    /// # Errors
    ///
    /// Returns `RuleError::RuleNotFound` if no rule exists.
    pub fn remove_rule(&mut self, domain: &str) -> Result<DomainRule, RuleError> {
        self.domain_rules
            .remove(domain)
            .ok_or_else(|| RuleError::not_found(domain))
    }

    /// Change the subdomain setting of an existing rule
    ///
    /// # Errors
    ///
    /// Returns `RuleError::RuleNotFound` if no rule exists.
    pub fn set_rule_subdomains(
        &mut self,
        domain: &str,
        setting: SubdomainSetting,
    ) -> Result<(), RuleError> {
        let rule = self
            .domain_rules
            .get_mut(domain)
            .ok_or_else(|| RuleError::not_found(domain))?;
        rule.subdomains = setting;
        Ok(())
    }

    /// Set a container-level override; `Defer` clears it
    pub fn set_container_setting(&mut self, partition: &str, setting: SubdomainSetting) {
        if setting.is_defer() {
            self.container_subdomains.remove(partition);
        } else {
            self.container_subdomains
                .insert(partition.to_string(), setting);
        }
    }

    /// Add `domain` to a partition's exclusion set. Returns `true` if new.
    pub fn add_exclusion(&mut self, partition: &str, domain: &str) -> bool {
        insert_into(&mut self.container_exclusions, partition, domain)
    }

    /// Remove `domain` from a partition's exclusion set. Returns `true` if present.
    pub fn remove_exclusion(&mut self, partition: &str, domain: &str) -> bool {
        remove_from(&mut self.container_exclusions, partition, domain)
    }

    /// Add `domain` to a partition's blend set. Returns `true` if new.
    pub fn add_blend(&mut self, partition: &str, domain: &str) -> bool {
        insert_into(&mut self.container_blends, partition, domain)
    }

    /// Remove `domain` from a partition's blend set. Returns `true` if present.
    pub fn remove_blend(&mut self, partition: &str, domain: &str) -> bool {
        remove_from(&mut self.container_blends, partition, domain)
    }

    /// Drop per-partition settings, exclusions and blends of a destroyed
    /// partition. Rules owned by it are kept and keep matching.
    pub fn forget_partition(&mut self, partition: &str) {
        self.container_subdomains.remove(partition);
        self.container_exclusions.remove(partition);
        self.container_blends.remove(partition);
    }

    /// Refresh the denormalized owner label after a container rename.
    /// Returns the number of rules touched.
    pub fn relabel_owner(&mut self, partition: &str, label: &str) -> usize {
        let mut touched = 0;
        for rule in self
            .domain_rules
            .values_mut()
            .filter(|rule| rule.owner_id == partition)
        {
            rule.owner_label = label.to_string();
            touched += 1;
        }
        touched
    }

    /// Number of domain rules
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.domain_rules.len()
    }
}

fn insert_into(
    map: &mut HashMap<PartitionId, BTreeSet<String>>,
    partition: &str,
    domain: &str,
) -> bool {
    map.entry(partition.to_string())
        .or_default()
        .insert(domain.to_string())
}

fn remove_from(
    map: &mut HashMap<PartitionId, BTreeSet<String>>,
    partition: &str,
    domain: &str,
) -> bool {
    let Some(set) = map.get_mut(partition) else {
        return false;
    };
    let removed = set.remove(domain);
    if set.is_empty() {
        map.remove(partition);
    }
    removed
}
