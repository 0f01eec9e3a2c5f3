//! Request gate
//!
//! Answers every intercepted request synchronously from the current rule
//! snapshot and the tab's pending state. Only a navigation that must move
//! into a temporary partition awaits the provider.
//!
//! # Locking
//!
//! Evaluations take the read side of the gate barrier; intents that change
//! rules and pending state together take the write side. An evaluation thus
//! never observes a new rule while the matching pending entry is still
//! queued. The barrier is never held across an `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::event::{GateDecision, InterceptEvent, RequestState, Verdict, VerdictReason};
use super::pending::{PauseOutcome, PendingEvent, PendingRegistry, PendingRequest, TabDecision};
use crate::config::GateConfig;
use crate::error::RuleError;
use crate::partition::{PartitionKind, TempPartitionManager};
use crate::rules::{
    extract_domain, is_same_or_subdomain, normalize_domain, DomainRule, OwnerMatch, PartitionId,
    Resolution, RuleEngine, RuleResolver, SubdomainSetting, TabId,
};

/// Synchronous part of an evaluation
#[derive(Debug)]
enum Evaluation {
    Decided(GateDecision),
    NeedsTemporary { domain: String },
}

/// Decides the fate of intercepted requests and applies user intents.
pub struct RequestGate {
    rules: Arc<RuleEngine>,
    pending: PendingRegistry,
    temps: Arc<TempPartitionManager>,
    default_partition: PartitionId,
    barrier: RwLock<()>,
}

impl RequestGate {
    /// Create a gate over a rule engine and a temporary partition manager
    pub fn new(
        config: &GateConfig,
        rules: Arc<RuleEngine>,
        temps: Arc<TempPartitionManager>,
    ) -> Self {
        Self {
            rules,
            pending: PendingRegistry::new(config.pending_event_capacity),
            temps,
            default_partition: config.default_cookie_store_id.clone(),
            barrier: RwLock::new(()),
        }
    }

    /// The rule engine
    #[must_use]
    pub const fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    /// The pending registry
    #[must_use]
    pub const fn registry(&self) -> &PendingRegistry {
        &self.pending
    }

    /// The temporary partition manager
    #[must_use]
    pub const fn temporaries(&self) -> &Arc<TempPartitionManager> {
        &self.temps
    }

    /// Cookie store id of the default partition
    #[must_use]
    pub fn default_partition(&self) -> &str {
        &self.default_partition
    }

    /// Classify a partition
    #[must_use]
    pub fn classify(&self, partition: &str) -> PartitionKind {
        if partition == self.default_partition {
            PartitionKind::Default
        } else if self.temps.is_temporary(partition) {
            PartitionKind::Temporary
        } else {
            PartitionKind::Permanent
        }
    }

    /// Subscribe to pending count changes
    pub fn subscribe(&self) -> broadcast::Receiver<PendingEvent> {
        self.pending.subscribe()
    }

    /// Decide an intercepted request.
    ///
    /// Never fails: anything that cannot be decided favorably is blocked.
    pub async fn handle(&self, event: &InterceptEvent) -> GateDecision {
        match self.evaluate(event) {
            Evaluation::Decided(decision) => decision,
            Evaluation::NeedsTemporary { domain } => {
                match self.temps.acquire(event.tab_id).await {
                    Ok(partition) => {
                        debug!(
                            tab = event.tab_id,
                            domain = %domain,
                            partition = %partition,
                            "navigation moved to temporary partition"
                        );
                        GateDecision::new(
                            event,
                            Verdict::Reopen {
                                cookie_store_id: partition,
                            },
                            VerdictReason::Temporary,
                            Some(&domain),
                        )
                    }
                    Err(e) => {
                        warn!(
                            tab = event.tab_id,
                            domain = %domain,
                            "failed to provision temporary partition: {}",
                            e
                        );
                        GateDecision::new(
                            event,
                            Verdict::Block,
                            VerdictReason::ProvisionFailed,
                            Some(&domain),
                        )
                    }
                }
            }
        }
    }

    fn evaluate(&self, event: &InterceptEvent) -> Evaluation {
        let tab = event.tab_id;
        let partition = event.cookie_store_id.as_str();
        let main_frame = event.resource_type.is_main_frame();

        if let Some(orphan) = self.temps.associate(tab, partition) {
            self.retire_temporary(orphan);
        }
        let kind = self.classify(partition);
        let domain = extract_domain(&event.url);

        if main_frame {
            self.pending.begin_navigation(tab, domain.as_deref());
        }

        let Some(domain) = domain else {
            let decision = if kind.admits_unowned() {
                GateDecision::new(event, Verdict::Allow, VerdictReason::Unowned, None)
            } else {
                GateDecision::new(event, Verdict::Block, VerdictReason::Unparseable, None)
            };
            debug!(tab, url = %event.url, verdict = ?decision.verdict, "unparseable request");
            return Evaluation::Decided(decision);
        };

        let _barrier = self.barrier.read();
        let snapshot = self.rules.load();
        let resolver = self.rules.resolver(&snapshot);

        let decided = |verdict: Verdict, reason: VerdictReason| {
            debug!(tab, partition, domain = %domain, reason = %reason, "request decided");
            Evaluation::Decided(GateDecision::new(event, verdict, reason, Some(&domain)))
        };

        if resolver.is_excluded(&domain, partition) {
            return decided(Verdict::Block, VerdictReason::Excluded);
        }

        let resolution = resolver.resolve(&domain);
        match &resolution {
            Resolution::Owned(owner) if owner.owner_id == partition => {
                return decided(Verdict::Allow, VerdictReason::SamePartition);
            }
            Resolution::Unowned if main_frame && kind == PartitionKind::Default => {
                return Evaluation::NeedsTemporary {
                    domain: domain.clone(),
                };
            }
            Resolution::Unowned if kind.admits_unowned() => {
                return decided(Verdict::Allow, VerdictReason::Unowned);
            }
            _ => {}
        }

        if resolver.is_blended(&domain, partition) {
            return decided(Verdict::Allow, VerdictReason::Blended);
        }

        if main_frame {
            if let Resolution::Owned(owner) = &resolution {
                return decided(
                    Verdict::Reopen {
                        cookie_store_id: owner.owner_id.clone(),
                    },
                    VerdictReason::OwnedElsewhere,
                );
            }
        }

        match self.pending.pause_or_decide(tab, &domain) {
            PauseOutcome::Decided(TabDecision::AllowedOnce) => {
                decided(Verdict::Allow, VerdictReason::AllowedOnce)
            }
            PauseOutcome::Decided(TabDecision::Blocked) => {
                decided(Verdict::Block, VerdictReason::BlockedByUser)
            }
            PauseOutcome::Paused(count) => {
                debug!(tab, partition, domain = %domain, count, "request paused");
                let mut decision =
                    GateDecision::new(event, Verdict::Block, VerdictReason::Paused, Some(&domain));
                decision.pending_count = Some(count);
                Evaluation::Decided(decision)
            }
        }
    }

    /// Observable state of (tab, domain)
    #[must_use]
    pub fn request_state(&self, tab: TabId, domain: &str) -> RequestState {
        normalize_domain(domain).map_or(RequestState::Unseen, |d| self.pending.state(tab, &d))
    }

    /// Pending requests of a tab with their (possible) owners
    #[must_use]
    pub fn pending_requests(&self, tab: TabId) -> Vec<PendingRequest> {
        let snapshot = self.rules.load();
        let resolver = self.rules.resolver(&snapshot);
        let mut list = self.pending.list(tab);
        for request in &mut list {
            if let Some(owner) = resolver.resolve(&request.domain).candidate() {
                request.owner_id = Some(owner.owner_id.clone());
                request.owner_label = Some(owner.owner_label.clone());
            }
        }
        list
    }

    /// Owner that a blend of `domain` would share, if any
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidDomain` if `domain` cannot be normalized.
    pub fn blend_owner(&self, domain: &str) -> Result<Option<OwnerMatch>, RuleError> {
        let domain = parse_domain(domain)?;
        let snapshot = self.rules.load();
        let resolver = self.rules.resolver(&snapshot);
        Ok(resolver.resolve(&domain).candidate().cloned())
    }

    /// Allow `domain` for the tab's current page without changing rules.
    ///
    /// Returns `true` if a pending entry was cleared.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::InvalidDomain` if `domain` cannot be normalized.
    pub fn allow_once(&self, tab: TabId, domain: &str) -> Result<bool, RuleError> {
        let domain = parse_domain(domain)?;
        let _barrier = self.barrier.write();
        let cleared = self
            .pending
            .resolve(tab, &domain, Some(TabDecision::AllowedOnce))
            .is_some();
        info!(tab, domain = %domain, cleared, "allowed once");
        Ok(cleared)
    }

    /// Assign `domain` to `owner` and clear every pending entry of the tab
    /// that the new rule covers.
    ///
    /// A deferring rule set on a strict ancestor of a paused domain is
    /// stored as inheriting, so the paused subdomain is covered.
    ///
    /// # Errors
    ///
    /// Returns `RuleError` if `domain` or the owner id is invalid.
    pub fn allow_permanently(
        &self,
        tab: TabId,
        domain: &str,
        owner_id: &str,
        owner_label: &str,
        subdomains: SubdomainSetting,
    ) -> Result<DomainRule, RuleError> {
        let domain = parse_domain(domain)?;
        let owner_id = parse_partition(owner_id)?;
        let _barrier = self.barrier.write();

        let covers_paused_subdomain = self
            .pending
            .pending_domains(tab)
            .iter()
            .any(|paused| paused != &domain && is_same_or_subdomain(paused, &domain));
        let subdomains = if subdomains.is_defer() && covers_paused_subdomain {
            SubdomainSetting::Inherit
        } else {
            subdomains
        };

        let rule = DomainRule::new(owner_id, owner_label).with_subdomains(subdomains);
        self.rules
            .update(|state| state.set_rule(domain.clone(), rule.clone()));

        let snapshot = self.rules.load();
        let resolver = self.rules.resolver(&snapshot);
        let cleared = self.pending.resolve_where(tab, |paused| {
            paused == domain
                || resolver
                    .resolve_owner(paused)
                    .is_some_and(|owner| owner.matched_domain == domain)
        });

        info!(
            tab,
            domain = %domain,
            owner = %rule.owner_id,
            cleared = cleared.len(),
            "domain assigned"
        );
        Ok(rule)
    }

    /// Block `domain` for the tab, or exclude it from `partition` for good.
    ///
    /// # Errors
    ///
    /// Returns `RuleError` if `domain` or `partition` is invalid.
    pub fn block(
        &self,
        tab: TabId,
        domain: &str,
        partition: &str,
        add_exclusion: bool,
    ) -> Result<(), RuleError> {
        let domain = parse_domain(domain)?;
        let _barrier = self.barrier.write();

        if add_exclusion {
            let partition = parse_partition(partition)?;
            self.rules
                .update(|state| state.add_exclusion(&partition, &domain));
            let cleared = self.pending.resolve_covered(tab, &domain);
            info!(
                tab,
                domain = %domain,
                partition = %partition,
                cleared = cleared.len(),
                "domain excluded"
            );
        } else {
            self.pending
                .resolve(tab, &domain, Some(TabDecision::Blocked));
            info!(tab, domain = %domain, "domain blocked for page");
        }
        Ok(())
    }

    /// Blend `domain` (through its owning rule domain) into `partition`,
    /// then allow it once for `tab`.
    ///
    /// Returns the domain recorded in the blend set.
    ///
    /// # Errors
    ///
    /// Returns `RuleError` if `domain` or `partition` is invalid.
    pub fn blend(
        &self,
        partition: &str,
        domain: &str,
        tab: Option<TabId>,
    ) -> Result<String, RuleError> {
        let domain = parse_domain(domain)?;
        let partition = parse_partition(partition)?;
        let _barrier = self.barrier.write();

        let walker = self.rules.walker();
        let target = self.rules.update(|state| {
            let target = RuleResolver::new(state, walker).blend_target(&domain);
            state.add_blend(&partition, &target);
            target
        });

        if let Some(tab) = tab {
            self.pending
                .resolve(tab, &domain, Some(TabDecision::AllowedOnce));
            // Siblings under the blended parent are allowed by the new blend
            self.pending.resolve_covered(tab, &target);
        }
        info!(
            partition = %partition,
            domain = %domain,
            target = %target,
            "domain blended"
        );
        Ok(target)
    }

    /// Forget a closed tab.
    ///
    /// Returns the temporary partition left without tabs, already scheduled
    /// for destruction.
    pub fn tab_closed(&self, tab: TabId) -> Option<PartitionId> {
        let dropped = self.pending.remove_tab(tab);
        let orphan = self.temps.release(tab);
        if let Some(partition) = &orphan {
            self.retire_temporary(partition.clone());
        }
        debug!(tab, dropped, "tab closed");
        orphan
    }

    /// Destroy a temporary partition that lost its last tab and drop the
    /// per-partition settings recorded for it.
    pub fn retire_temporary(&self, partition: PartitionId) {
        let snapshot = self.rules.load();
        let state = &snapshot.state;
        let has_settings = state.exclusions(&partition).is_some()
            || state.blends(&partition).is_some()
            || state.container_subdomains.contains_key(&partition);
        if has_settings {
            self.rules.update(|state| state.forget_partition(&partition));
        }
        self.temps.destroy_later(partition);
    }
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("default_partition", &self.default_partition)
            .field("rules_version", &self.rules.version())
            .field("tabs", &self.pending.tab_count())
            .finish()
    }
}

fn parse_domain(domain: &str) -> Result<String, RuleError> {
    normalize_domain(domain).ok_or_else(|| RuleError::invalid_domain(domain))
}

fn parse_partition(partition: &str) -> Result<PartitionId, RuleError> {
    let trimmed = partition.trim();
    if trimmed.is_empty() {
        return Err(RuleError::InvalidPartition {
            id: partition.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::MemoryProvider;
    use crate::rules::RuleState;

    const DEFAULT: &str = "firefox-default";
    const PERSONAL: &str = "firefox-container-1";
    const SHOPPING: &str = "firefox-container-2";
    const BANKING: &str = "firefox-container-3";

    fn gate_with(state: RuleState) -> RequestGate {
        let provider = Arc::new(MemoryProvider::new());
        let temps = Arc::new(TempPartitionManager::new(provider, "Temp"));
        RequestGate::new(
            &GateConfig::default(),
            Arc::new(RuleEngine::new(state)),
            temps,
        )
    }

    fn request(tab: TabId, partition: &str, url: &str) -> InterceptEvent {
        InterceptEvent::new(format!("req-{tab}"), tab, partition, url)
    }

    #[tokio::test]
    async fn test_container_level_inheritance_allows_subdomain() {
        let mut state = RuleState::new();
        state.set_rule("amazon.com", DomainRule::new(SHOPPING, "Shopping"));
        state.set_container_setting(SHOPPING, SubdomainSetting::Inherit);
        let gate = gate_with(state);

        let decision = gate
            .handle(&request(1, SHOPPING, "https://pay.amazon.com/checkout"))
            .await;
        assert!(decision.is_allowed());
        assert_eq!(decision.reason, VerdictReason::SamePartition);
        assert_eq!(decision.domain.as_deref(), Some("pay.amazon.com"));
    }

    #[tokio::test]
    async fn test_unowned_in_permanent_partition_pauses_until_allowed_once() {
        let gate = gate_with(RuleState::new());
        let version = gate.rules().version();

        let first = gate
            .handle(&request(5, PERSONAL, "https://tracker.io/pixel.gif"))
            .await;
        assert_eq!(first.verdict, Verdict::Block);
        assert_eq!(first.reason, VerdictReason::Paused);
        assert_eq!(first.pending_count, Some(1));

        let second = gate
            .handle(&request(5, PERSONAL, "https://tracker.io/pixel.gif"))
            .await;
        assert_eq!(second.pending_count, Some(2));
        assert_eq!(gate.request_state(5, "tracker.io"), RequestState::Paused);

        assert!(gate.allow_once(5, "tracker.io").unwrap());
        assert!(gate.pending_requests(5).is_empty());
        assert_eq!(gate.rules().version(), version);

        let third = gate
            .handle(&request(5, PERSONAL, "https://tracker.io/pixel.gif"))
            .await;
        assert!(third.is_allowed());
        assert_eq!(third.reason, VerdictReason::AllowedOnce);
        assert_eq!(gate.request_state(5, "tracker.io"), RequestState::Allowed);
    }

    #[tokio::test]
    async fn test_blend_allows_foreign_domain_in_one_direction() {
        let mut state = RuleState::new();
        state.set_rule("paypal.com", DomainRule::new(BANKING, "Banking"));
        let gate = gate_with(state);

        let paused = gate
            .handle(&request(2, SHOPPING, "https://www.paypal.com/sdk.js"))
            .await;
        assert_eq!(paused.reason, VerdictReason::Paused);

        let target = gate.blend(SHOPPING, "www.paypal.com", Some(2)).unwrap();
        assert_eq!(target, "paypal.com");
        assert!(gate.pending_requests(2).is_empty());

        let allowed = gate
            .handle(&request(2, SHOPPING, "https://paypal.com/sdk.js"))
            .await;
        assert!(allowed.is_allowed());
        assert_eq!(allowed.reason, VerdictReason::Blended);

        // Personal has no blend; the domain still pauses there
        let other = gate
            .handle(&request(3, PERSONAL, "https://paypal.com/sdk.js"))
            .await;
        assert_eq!(other.reason, VerdictReason::Paused);

        let snapshot = gate.rules().snapshot();
        assert!(snapshot.state.blends(BANKING).is_none());
    }

    #[tokio::test]
    async fn test_blend_clears_sibling_requests_under_target() {
        let mut state = RuleState::new();
        state.set_rule("paypal.com", DomainRule::new(BANKING, "Banking"));
        let gate = gate_with(state);

        for url in ["https://www.paypal.com/", "https://api.paypal.com/v1"] {
            let paused = gate.handle(&request(4, SHOPPING, url)).await;
            assert_eq!(paused.reason, VerdictReason::Paused);
        }
        gate.handle(&request(4, SHOPPING, "https://tracker.io/p.gif"))
            .await;

        let target = gate.blend(SHOPPING, "www.paypal.com", Some(4)).unwrap();
        assert_eq!(target, "paypal.com");
        let remaining: Vec<_> = gate
            .pending_requests(4)
            .into_iter()
            .map(|request| request.domain)
            .collect();
        assert_eq!(remaining, ["tracker.io"]);
        assert_eq!(gate.request_state(4, "www.paypal.com"), RequestState::Allowed);

        let sibling = gate
            .handle(&request(4, SHOPPING, "https://api.paypal.com/v1"))
            .await;
        assert!(sibling.is_allowed());
    }

    #[tokio::test]
    async fn test_exclusion_beats_ownership() {
        let mut state = RuleState::new();
        state.set_rule("ads.com", DomainRule::new(SHOPPING, "Shopping"));
        state.add_exclusion(SHOPPING, "ads.com");
        let gate = gate_with(state);

        let decision = gate
            .handle(&request(1, SHOPPING, "https://x.ads.com/banner"))
            .await;
        assert_eq!(decision.verdict, Verdict::Block);
        assert_eq!(decision.reason, VerdictReason::Excluded);
        assert!(gate.pending_requests(1).is_empty());
    }

    #[tokio::test]
    async fn test_unowned_allowed_in_default_partition() {
        let gate = gate_with(RuleState::new());
        let decision = gate
            .handle(&request(1, DEFAULT, "https://news.example/"))
            .await;
        assert!(decision.is_allowed());
        assert_eq!(decision.reason, VerdictReason::Unowned);
    }

    #[tokio::test]
    async fn test_unparseable_url() {
        let gate = gate_with(RuleState::new());

        let default = gate.handle(&request(1, DEFAULT, "not a url")).await;
        assert!(default.is_allowed());
        assert!(default.domain.is_none());

        let permanent = gate.handle(&request(2, PERSONAL, "data:text/plain,hi")).await;
        assert_eq!(permanent.verdict, Verdict::Block);
        assert_eq!(permanent.reason, VerdictReason::Unparseable);
        assert_eq!(gate.registry().tab_count(), 0);
    }

    #[tokio::test]
    async fn test_ask_ancestor_pauses_even_in_default_partition() {
        let mut state = RuleState::new();
        state.set_rule("example.com", DomainRule::new(PERSONAL, "Personal"));
        let gate = gate_with(state);

        let decision = gate
            .handle(&request(4, DEFAULT, "https://api.example.com/v1"))
            .await;
        assert_eq!(decision.reason, VerdictReason::Paused);

        let pending = gate.pending_requests(4);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner_label.as_deref(), Some("Personal"));
        assert_eq!(pending[0].owner_id.as_deref(), Some(PERSONAL));
    }

    #[tokio::test]
    async fn test_allow_permanently_at_ancestor_inherits() {
        let gate = gate_with(RuleState::new());
        gate.handle(&request(6, PERSONAL, "https://cdn.example.com/app.js"))
            .await;

        let rule = gate
            .allow_permanently(6, "example.com", PERSONAL, "Personal", SubdomainSetting::Defer)
            .unwrap();
        assert_eq!(rule.subdomains, SubdomainSetting::Inherit);
        assert!(gate.pending_requests(6).is_empty());

        let decision = gate
            .handle(&request(6, PERSONAL, "https://cdn.example.com/app.js"))
            .await;
        assert_eq!(decision.reason, VerdictReason::SamePartition);
    }

    #[tokio::test]
    async fn test_allow_permanently_exact_only_keeps_subdomain_paused() {
        let gate = gate_with(RuleState::new());
        gate.handle(&request(6, PERSONAL, "https://cdn.example.com/app.js"))
            .await;
        gate.handle(&request(6, PERSONAL, "https://example.com/"))
            .await;

        gate.allow_permanently(6, "example.com", PERSONAL, "Personal", SubdomainSetting::ExactOnly)
            .unwrap();
        let pending: Vec<_> = gate
            .pending_requests(6)
            .into_iter()
            .map(|p| p.domain)
            .collect();
        assert_eq!(pending, ["cdn.example.com"]);
    }

    #[tokio::test]
    async fn test_block_for_page_and_navigation_resets() {
        let gate = gate_with(RuleState::new());
        gate.handle(&request(7, PERSONAL, "https://tracker.io/"))
            .await;
        gate.block(7, "tracker.io", PERSONAL, false).unwrap();

        let blocked = gate.handle(&request(7, PERSONAL, "https://tracker.io/"))
            .await;
        assert_eq!(blocked.reason, VerdictReason::BlockedByUser);
        assert!(gate.pending_requests(7).is_empty());

        let mut state = RuleState::new();
        state.set_rule("site.com", DomainRule::new(PERSONAL, "Personal"));
        gate.rules().replace(state);
        let nav = request(7, PERSONAL, "https://site.com/").main_frame();
        assert!(gate.handle(&nav).await.is_allowed());
        assert_eq!(gate.request_state(7, "tracker.io"), RequestState::Unseen);
    }

    #[tokio::test]
    async fn test_block_with_exclusion_persists_rule() {
        let gate = gate_with(RuleState::new());
        gate.handle(&request(8, PERSONAL, "https://ads.tracker.io/"))
            .await;
        gate.block(8, "tracker.io", PERSONAL, true).unwrap();
        assert!(gate.pending_requests(8).is_empty());

        let decision = gate
            .handle(&request(9, PERSONAL, "https://ads.tracker.io/"))
            .await;
        assert_eq!(decision.reason, VerdictReason::Excluded);
    }

    #[tokio::test]
    async fn test_navigation_to_foreign_owner_reopens() {
        let mut state = RuleState::new();
        state.set_rule("bank.com", DomainRule::new(BANKING, "Banking"));
        let gate = gate_with(state);

        let nav = request(1, DEFAULT, "https://bank.com/login").main_frame();
        let decision = gate.handle(&nav).await;
        assert_eq!(
            decision.verdict,
            Verdict::Reopen {
                cookie_store_id: BANKING.into()
            }
        );
        assert_eq!(decision.reason, VerdictReason::OwnedElsewhere);
    }

    #[tokio::test]
    async fn test_unowned_navigation_moves_to_temporary_partition() {
        let gate = gate_with(RuleState::new());

        let nav = request(11, DEFAULT, "https://random.site/").main_frame();
        let decision = gate.handle(&nav).await;
        let Verdict::Reopen { cookie_store_id } = decision.verdict else {
            panic!("expected reopen, got {:?}", decision.verdict);
        };
        assert_eq!(decision.reason, VerdictReason::Temporary);
        assert_eq!(gate.classify(&cookie_store_id), PartitionKind::Temporary);

        let inside = request(11, &cookie_store_id, "https://cdn.random.site/a.js");
        assert!(gate.handle(&inside).await.is_allowed());

        assert_eq!(gate.tab_closed(11), Some(cookie_store_id.clone()));
        assert_eq!(gate.classify(&cookie_store_id), PartitionKind::Permanent);
    }

    #[tokio::test]
    async fn test_allowed_once_navigation_survives_retry() {
        let gate = gate_with(RuleState::new());
        let nav = request(12, PERSONAL, "https://elsewhere.org/").main_frame();

        assert_eq!(gate.handle(&nav).await.reason, VerdictReason::Paused);
        gate.allow_once(12, "elsewhere.org").unwrap();
        assert_eq!(gate.handle(&nav).await.reason, VerdictReason::AllowedOnce);
    }

    #[tokio::test]
    async fn test_tab_closed_cancels_pending() {
        let gate = gate_with(RuleState::new());
        let mut events = gate.subscribe();
        gate.handle(&request(13, PERSONAL, "https://tracker.io/"))
            .await;
        assert!(gate.tab_closed(13).is_none());
        assert!(gate.pending_requests(13).is_empty());

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(PendingEvent::CountChanged {
                tab_id: 13,
                domains: 0,
                requests: 0
            })
        );
    }

    #[test]
    fn test_intents_reject_invalid_input() {
        let gate = gate_with(RuleState::new());
        assert!(matches!(
            gate.allow_once(1, "bad domain"),
            Err(RuleError::InvalidDomain { .. })
        ));
        assert!(matches!(
            gate.blend("  ", "a.com", None),
            Err(RuleError::InvalidPartition { .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_counts_monotonic_under_concurrency() {
        let gate = Arc::new(gate_with(RuleState::new()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..25 {
                    let decision = gate
                        .handle(&request(20, PERSONAL, "https://tracker.io/"))
                        .await;
                    let count = decision.pending_count.unwrap();
                    assert!(count > last);
                    last = count;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(gate.pending_requests(20)[0].count, 100);
    }
}
