//! Rule engine with copy-on-write snapshots.
//!
//! This module provides the single writer of rule state, using `ArcSwap` for
//! lock-free reads on the request path.
//!
//! # Architecture
//!
//! ```text
//! Request  -> RuleEngine::load() -> ArcSwap::load() -> RuleSnapshot
//!                                        |
//!                                 (lock-free read)
//!
//! Intent   -> RuleEngine::update() -> writer lock -> clone + mutate -> ArcSwap::store()
//!                                                                         |
//!                                                         old snapshot dropped when
//!                                                         readers finish
//! ```
//!
//! Readers never observe a partially applied intent: every update publishes a
//! complete new snapshot with a bumped version.
//!
//! # Example
//!
//! ```
//! use container_gate::rules::engine::RuleEngine;
//! use container_gate::rules::{DomainRule, RuleState, SubdomainSetting};
//!
//! let engine = RuleEngine::new(RuleState::new());
//! engine.update(|state| {
//!     state.set_rule(
//!         "example.com",
//!         DomainRule::new("firefox-container-1", "Work")
//!             .with_subdomains(SubdomainSetting::Inherit),
//!     );
//! });
//!
//! let snapshot = engine.load();
//! let owner = engine.resolver(&snapshot).resolve_owner("docs.example.com").unwrap();
//! assert_eq!(owner.owner_id, "firefox-container-1");
//! assert_eq!(engine.version(), 1);
//! ```

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::domain::DomainWalker;
use super::resolver::RuleResolver;
use super::state::RuleState;

/// Immutable, versioned view of the rule state.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    /// Rule, exclusion, blend and setting maps
    pub state: RuleState,

    /// Incremented on every published change
    pub version: u64,
}

/// Summary statistics about a rule snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStats {
    /// Number of domain rules
    pub domain_rules: usize,

    /// Total exclusion entries across partitions
    pub exclusions: usize,

    /// Total blend entries across partitions
    pub blends: usize,

    /// Snapshot version
    pub version: u64,
}

impl RuleSnapshot {
    /// Get summary statistics about this snapshot.
    #[must_use]
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            domain_rules: self.state.rule_count(),
            exclusions: self.state.container_exclusions.values().map(|s| s.len()).sum(),
            blends: self.state.container_blends.values().map(|s| s.len()).sum(),
            version: self.version,
        }
    }
}

/// Owner of all rule state.
///
/// # Thread Safety
///
/// Reads are lock-free. Writes are serialized by an internal mutex so that
/// intents are applied one at a time, each on top of the previous result.
pub struct RuleEngine {
    /// Current snapshot (lock-free reads via `ArcSwap`).
    current: ArcSwap<RuleSnapshot>,

    /// Serializes writers.
    writer: Mutex<()>,

    /// Ancestor walker shared by every resolver.
    walker: DomainWalker,
}

impl RuleEngine {
    /// Create an engine with the default single-label suffix policy.
    #[must_use]
    pub fn new(state: RuleState) -> Self {
        Self::with_walker(state, DomainWalker::default())
    }

    /// Create an engine with a custom domain walker.
    #[must_use]
    pub fn with_walker(state: RuleState, walker: DomainWalker) -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleSnapshot { state, version: 0 }),
            writer: Mutex::new(()),
            walker,
        }
    }

    /// Get the current snapshot (lock-free read).
    ///
    /// The returned `Guard` keeps the snapshot alive, so several lookups made
    /// through it all see the same state.
    pub fn load(&self) -> Guard<Arc<RuleSnapshot>> {
        self.current.load()
    }

    /// Get an owned handle to the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Build a resolver over a snapshot obtained from this engine.
    #[must_use]
    pub fn resolver<'a>(&'a self, snapshot: &'a RuleSnapshot) -> RuleResolver<'a> {
        RuleResolver::new(&snapshot.state, &self.walker)
    }

    /// The domain walker used for every resolution.
    #[must_use]
    pub const fn walker(&self) -> &DomainWalker {
        &self.walker
    }

    /// Apply a mutation and publish the result as a new snapshot.
    ///
    /// The closure runs on a private copy of the state; readers keep seeing
    /// the previous snapshot until the new one is stored.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut RuleState) -> R) -> R {
        let _writer = self.writer.lock();
        let current = self.current.load();
        let mut state = current.state.clone();
        let result = mutate(&mut state);
        let version = current.version + 1;
        self.current.store(Arc::new(RuleSnapshot { state, version }));
        debug!(version, "rule snapshot published");
        result
    }

    /// Like [`update`](Self::update) but only publishes when the closure
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns whatever error the closure returns; the state is unchanged.
    pub fn try_update<R, E>(
        &self,
        mutate: impl FnOnce(&mut RuleState) -> Result<R, E>,
    ) -> Result<R, E> {
        let _writer = self.writer.lock();
        let current = self.current.load();
        let mut state = current.state.clone();
        let result = mutate(&mut state)?;
        let version = current.version + 1;
        self.current.store(Arc::new(RuleSnapshot { state, version }));
        debug!(version, "rule snapshot published");
        Ok(result)
    }

    /// Replace the whole state (e.g. after loading from the store).
    pub fn replace(&self, state: RuleState) {
        let _writer = self.writer.lock();
        let version = self.current.load().version + 1;
        info!(
            rules = state.rule_count(),
            version, "rule state replaced"
        );
        self.current.store(Arc::new(RuleSnapshot { state, version }));
    }

    /// Current snapshot version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.current.load();
        let stats = snapshot.stats();
        f.debug_struct("RuleEngine")
            .field("version", &stats.version)
            .field("domain_rules", &stats.domain_rules)
            .field("exclusions", &stats.exclusions)
            .field("blends", &stats.blends)
            .finish()
    }
}
