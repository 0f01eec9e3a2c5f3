//! Rule engine module for ownership decisions
//!
//! This module provides:
//! - Rule type definitions (tri-state subdomain settings, domain rules)
//! - Domain hierarchy walking with a pluggable suffix policy
//! - Ownership, exclusion and blend resolution
//! - A copy-on-write rule engine with lock-free snapshot reads
//!
//! # Architecture
//!
//! A request domain is resolved against the rule state in priority order:
//! exact rule, then the most specific inheriting ancestor rule. Whether an
//! ancestor rule inherits is the three-level precedence of the rule's own
//! setting, its container's setting and the global default.
//!
//! # Example
//!
//! ```
//! use container_gate::rules::{
//!     DomainRule, RuleEngine, RuleState, SubdomainSetting,
//! };
//!
//! let mut state = RuleState::new();
//! state.set_rule("amazon.com", DomainRule::new("firefox-container-2", "Shopping"));
//! state.set_container_setting("firefox-container-2", SubdomainSetting::Inherit);
//!
//! let engine = RuleEngine::new(state);
//! let snapshot = engine.load();
//! let resolver = engine.resolver(&snapshot);
//!
//! let owner = resolver.resolve_owner("pay.amazon.com").unwrap();
//! assert_eq!(owner.owner_label, "Shopping");
//! assert!(owner.inherited);
//! ```

pub mod domain;
pub mod engine;
pub mod resolver;
pub mod state;
pub mod types;

// Re-exports
pub use domain::{
    extract_domain, is_same_or_subdomain, normalize_domain, DomainWalker, SingleLabelSuffix,
    SuffixList, SuffixPolicy,
};
pub use engine::{RuleEngine, RuleSnapshot, SnapshotStats};
pub use resolver::{effective_inheritance, RuleResolver};
pub use state::RuleState;
pub use types::*;
