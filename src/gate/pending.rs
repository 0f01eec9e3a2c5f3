//! Pending request registry
//!
//! Per-tab record of paused domains and of the user's per-page decisions.
//! The registry is a `DashMap` keyed by tab; holding a tab's entry serializes
//! check-decision-then-increment for that tab while other tabs proceed in
//! parallel.
//!
//! Every change to a tab's pending set is announced on a broadcast channel so
//! a badge or prompt can follow the count.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::event::RequestState;
use crate::rules::{is_same_or_subdomain, PartitionId, TabId};

/// Default capacity of the pending event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Counters for one paused (tab, domain) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    /// Number of blocked attempts since the entry was created
    pub count: u64,
    /// First attempt, milliseconds since the Unix epoch
    pub first_seen_ms: u64,
    /// Latest attempt, milliseconds since the Unix epoch
    pub last_seen_ms: u64,
}

impl PendingEntry {
    fn new(now: u64) -> Self {
        Self {
            count: 0,
            first_seen_ms: now,
            last_seen_ms: now,
        }
    }

    fn bump(&mut self, now: u64) -> u64 {
        self.count = self.count.saturating_add(1);
        self.last_seen_ms = now.max(self.last_seen_ms);
        self.count
    }
}

/// A user decision scoped to the tab's current page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TabDecision {
    /// Later attempts for the domain are allowed
    AllowedOnce,
    /// Later attempts for the domain are blocked without queueing
    Blocked,
}

/// Pending request as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Paused domain
    pub domain: String,
    /// Blocked attempts so far
    pub count: u64,
    /// First attempt, milliseconds since the Unix epoch
    pub first_seen_ms: u64,
    /// Latest attempt, milliseconds since the Unix epoch
    pub last_seen_ms: u64,
    /// Partition that owns (or may own) the domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<PartitionId>,
    /// Display name of that partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_label: Option<String>,
}

/// Notification about a tab's pending set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEvent {
    /// The tab's pending set changed
    CountChanged {
        /// Tab whose set changed
        tab_id: TabId,
        /// Number of paused domains
        domains: usize,
        /// Sum of blocked attempts over those domains
        requests: u64,
    },
}

/// Result of routing a request through the tab's decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    /// A tab decision applies; nothing was queued
    Decided(TabDecision),
    /// The request was queued; carries the new count
    Paused(u64),
}

#[derive(Debug, Default)]
struct TabRequests {
    pending: HashMap<String, PendingEntry>,
    decisions: HashMap<String, TabDecision>,
}

impl TabRequests {
    fn totals(&self) -> (usize, u64) {
        let requests = self.pending.values().map(|e| e.count).sum();
        (self.pending.len(), requests)
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.decisions.is_empty()
    }
}

/// Per-tab pending requests and decisions
#[derive(Debug)]
pub struct PendingRegistry {
    tabs: DashMap<TabId, TabRequests>,
    events: broadcast::Sender<PendingEvent>,
}

impl PendingRegistry {
    /// Create a registry whose event channel buffers `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            tabs: DashMap::new(),
            events,
        }
    }

    /// Subscribe to pending set changes
    pub fn subscribe(&self) -> broadcast::Receiver<PendingEvent> {
        self.events.subscribe()
    }

    /// Apply the tab's decision for `domain`, or queue the request.
    ///
    /// The decision lookup and the increment happen under the same entry
    /// lock, so a concurrent allow-once either sees the request queued or
    /// the request sees the decision.
    pub fn pause_or_decide(&self, tab: TabId, domain: &str) -> PauseOutcome {
        let now = now_ms();
        let mut requests = self.tabs.entry(tab).or_default();
        if let Some(decision) = requests.decisions.get(domain) {
            return PauseOutcome::Decided(*decision);
        }
        let count = requests
            .pending
            .entry(domain.to_string())
            .or_insert_with(|| PendingEntry::new(now))
            .bump(now);
        // Sent under the entry lock so events leave in count order
        self.announce(tab, requests.totals());
        PauseOutcome::Paused(count)
    }

    /// Tab decision for `domain`
    #[must_use]
    pub fn decision(&self, tab: TabId, domain: &str) -> Option<TabDecision> {
        self.tabs
            .get(&tab)
            .and_then(|requests| requests.decisions.get(domain).copied())
    }

    /// Pending counters for `domain`
    #[must_use]
    pub fn entry(&self, tab: TabId, domain: &str) -> Option<PendingEntry> {
        self.tabs
            .get(&tab)
            .and_then(|requests| requests.pending.get(domain).copied())
    }

    /// Observable state of (tab, domain)
    #[must_use]
    pub fn state(&self, tab: TabId, domain: &str) -> RequestState {
        let Some(requests) = self.tabs.get(&tab) else {
            return RequestState::Unseen;
        };
        match requests.decisions.get(domain) {
            Some(TabDecision::AllowedOnce) => RequestState::Allowed,
            Some(TabDecision::Blocked) => RequestState::Blocked,
            None if requests.pending.contains_key(domain) => RequestState::Paused,
            None => RequestState::Unseen,
        }
    }

    /// Clear the pending entry for `domain` and optionally record a decision.
    ///
    /// Returns the removed entry.
    pub fn resolve(
        &self,
        tab: TabId,
        domain: &str,
        decision: Option<TabDecision>,
    ) -> Option<PendingEntry> {
        let removed = {
            let mut requests = self.tabs.entry(tab).or_default();
            if let Some(decision) = decision {
                requests.decisions.insert(domain.to_string(), decision);
            }
            let removed = requests.pending.remove(domain);
            if removed.is_some() {
                self.announce(tab, requests.totals());
            }
            removed
        };
        self.drop_if_empty(tab);
        removed
    }

    /// Clear every pending entry of the tab for which `covered` holds.
    ///
    /// Returns the cleared domains, sorted.
    pub fn resolve_where(&self, tab: TabId, covered: impl Fn(&str) -> bool) -> Vec<String> {
        let Some(mut cleared) = self.tabs.get_mut(&tab).map(|mut requests| {
            let cleared: Vec<String> = requests
                .pending
                .keys()
                .filter(|domain| covered(domain))
                .cloned()
                .collect();
            for domain in &cleared {
                requests.pending.remove(domain);
            }
            if !cleared.is_empty() {
                self.announce(tab, requests.totals());
            }
            cleared
        }) else {
            return Vec::new();
        };
        self.drop_if_empty(tab);
        cleared.sort();
        cleared
    }

    /// Clear pending entries for `scope` and every subdomain of it
    pub fn resolve_covered(&self, tab: TabId, scope: &str) -> Vec<String> {
        self.resolve_where(tab, |domain| is_same_or_subdomain(domain, scope))
    }

    /// Paused domains of the tab, sorted
    #[must_use]
    pub fn pending_domains(&self, tab: TabId) -> Vec<String> {
        let mut domains: Vec<String> = self
            .tabs
            .get(&tab)
            .map(|requests| requests.pending.keys().cloned().collect())
            .unwrap_or_default();
        domains.sort();
        domains
    }

    /// Pending requests of the tab, sorted by domain; owners are left empty
    #[must_use]
    pub fn list(&self, tab: TabId) -> Vec<PendingRequest> {
        let mut list: Vec<PendingRequest> = self
            .tabs
            .get(&tab)
            .map(|requests| {
                requests
                    .pending
                    .iter()
                    .map(|(domain, entry)| PendingRequest {
                        domain: domain.clone(),
                        count: entry.count,
                        first_seen_ms: entry.first_seen_ms,
                        last_seen_ms: entry.last_seen_ms,
                        owner_id: None,
                        owner_label: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        list.sort_by(|a, b| a.domain.cmp(&b.domain));
        list
    }

    /// The tab navigated: forget its pending entries and decisions, keeping
    /// only a decision recorded for `keep`.
    ///
    /// Returns the kept decision.
    pub fn begin_navigation(&self, tab: TabId, keep: Option<&str>) -> Option<TabDecision> {
        let kept = {
            let Some(mut requests) = self.tabs.get_mut(&tab) else {
                return None;
            };
            if !requests.pending.is_empty() {
                requests.pending.clear();
                self.announce(tab, (0, 0));
            }
            let kept = keep.and_then(|domain| {
                requests
                    .decisions
                    .get(domain)
                    .copied()
                    .map(|decision| (domain.to_string(), decision))
            });
            requests.decisions.clear();
            if let Some((domain, decision)) = &kept {
                requests.decisions.insert(domain.clone(), *decision);
            }
            kept.map(|(_, decision)| decision)
        };
        self.drop_if_empty(tab);
        kept
    }

    /// Remove everything recorded for a closed tab.
    ///
    /// Returns the number of pending domains dropped.
    pub fn remove_tab(&self, tab: TabId) -> usize {
        let Entry::Occupied(entry) = self.tabs.entry(tab) else {
            return 0;
        };
        let dropped = entry.get().pending.len();
        if dropped > 0 {
            debug!(tab, dropped, "pending requests cancelled");
            self.announce(tab, (0, 0));
        }
        entry.remove();
        dropped
    }

    /// Number of tabs with pending entries or decisions
    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    fn drop_if_empty(&self, tab: TabId) {
        self.tabs.remove_if(&tab, |_, requests| requests.is_empty());
    }

    fn announce(&self, tab: TabId, (domains, requests): (usize, u64)) {
        // No subscribers is not an error
        let _ = self.events.send(PendingEvent::CountChanged {
            tab_id: tab,
            domains,
            requests,
        });
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
