//! Temporary partition lifecycle
//!
//! A temporary partition is created when a tab in the default partition
//! navigates to a domain no rule covers. Tabs opened from it join it; once the
//! last associated tab is gone the partition is destroyed.
//!
//! The set of temporary partitions is owned here exclusively. Every partition
//! in the set has at least one associated tab; destruction through the
//! provider happens afterwards in a spawned task.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::provider::ContainerProvider;
use crate::error::PartitionError;
use crate::rules::{PartitionId, TabId};

#[derive(Debug, Default)]
struct TempState {
    by_tab: HashMap<TabId, PartitionId>,
    members: HashMap<PartitionId, HashSet<TabId>>,
}

impl TempState {
    /// Detach `tab`; returns its partition if that left it without tabs.
    fn detach(&mut self, tab: TabId) -> Option<PartitionId> {
        let partition = self.by_tab.remove(&tab)?;
        let members = self.members.get_mut(&partition)?;
        members.remove(&tab);
        if members.is_empty() {
            self.members.remove(&partition);
            return Some(partition);
        }
        None
    }

    fn attach(&mut self, tab: TabId, partition: &str) {
        self.by_tab.insert(tab, partition.to_string());
        self.members
            .entry(partition.to_string())
            .or_default()
            .insert(tab);
    }
}

/// Creates, tracks and destroys temporary partitions.
pub struct TempPartitionManager {
    provider: Arc<dyn ContainerProvider>,
    name_prefix: String,
    state: Mutex<TempState>,
    counter: AtomicU64,
}

impl TempPartitionManager {
    /// Create a manager that names partitions `"<prefix> <n>"`
    pub fn new(provider: Arc<dyn ContainerProvider>, name_prefix: impl Into<String>) -> Self {
        Self {
            provider,
            name_prefix: name_prefix.into(),
            state: Mutex::new(TempState::default()),
            counter: AtomicU64::new(1),
        }
    }

    /// Check if `partition` is a live temporary partition
    #[must_use]
    pub fn is_temporary(&self, partition: &str) -> bool {
        self.state.lock().members.contains_key(partition)
    }

    /// Temporary partition the tab belongs to
    #[must_use]
    pub fn partition_of(&self, tab: TabId) -> Option<PartitionId> {
        self.state.lock().by_tab.get(&tab).cloned()
    }

    /// Number of tabs associated with `partition`
    #[must_use]
    pub fn tab_count(&self, partition: &str) -> usize {
        self.state
            .lock()
            .members
            .get(partition)
            .map_or(0, HashSet::len)
    }

    /// All live temporary partitions, sorted
    #[must_use]
    pub fn known(&self) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self.state.lock().members.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Join `tab` to the temporary partition `partition` (tab lineage).
    ///
    /// Does nothing unless `partition` is a live temporary partition. If the
    /// tab was associated with a different temporary partition that is now
    /// orphaned, that partition is returned for destruction.
    pub fn associate(&self, tab: TabId, partition: &str) -> Option<PartitionId> {
        let mut state = self.state.lock();
        if !state.members.contains_key(partition) {
            return None;
        }
        if state.by_tab.get(&tab).map(String::as_str) == Some(partition) {
            return None;
        }
        let orphan = state.detach(tab);
        state.attach(tab, partition);
        debug!(tab, partition, "tab joined temporary partition");
        orphan
    }

    /// Return the tab's temporary partition, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError` if the provider cannot create the partition.
    pub async fn acquire(&self, tab: TabId) -> Result<PartitionId, PartitionError> {
        if let Some(existing) = self.partition_of(tab) {
            return Ok(existing);
        }

        let name = format!(
            "{} {}",
            self.name_prefix,
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        let created = self.provider.create(&name).await?;

        let raced = {
            let mut state = self.state.lock();
            match state.by_tab.get(&tab).cloned() {
                Some(existing) => Some(existing),
                None => {
                    state.attach(tab, &created.cookie_store_id);
                    None
                }
            }
        };

        if let Some(existing) = raced {
            // Another acquire for the same tab won; discard ours
            self.destroy_later(created.cookie_store_id);
            return Ok(existing);
        }

        info!(
            tab,
            partition = %created.cookie_store_id,
            name = %created.name,
            "temporary partition created"
        );
        Ok(created.cookie_store_id)
    }

    /// Detach a tab. Returns its partition if no tab references it anymore;
    /// that partition has already left the set.
    pub fn release(&self, tab: TabId) -> Option<PartitionId> {
        let orphan = self.state.lock().detach(tab);
        if let Some(partition) = &orphan {
            debug!(tab, partition = %partition, "temporary partition orphaned");
        }
        orphan
    }

    /// Remove a partition in a background task.
    ///
    /// Outside a Tokio runtime the partition is left for the next startup
    /// cleanup.
    pub fn destroy_later(&self, partition: PartitionId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(partition = %partition, "no runtime to destroy temporary partition");
            return;
        };
        let provider = Arc::clone(&self.provider);
        runtime.spawn(async move {
            match provider.remove(&partition).await {
                Ok(()) => info!(partition = %partition, "temporary partition destroyed"),
                Err(e) => warn!(
                    partition = %partition,
                    "failed to destroy temporary partition: {}",
                    e
                ),
            }
        });
    }

    /// Reconcile partitions persisted by a previous run.
    ///
    /// Tabs do not survive a restart, so none of them has an associated tab;
    /// they are returned for destruction and never enter the set.
    #[must_use]
    pub fn restore(&self, persisted: &[PartitionId]) -> Vec<PartitionId> {
        let state = self.state.lock();
        persisted
            .iter()
            .filter(|id| !state.members.contains_key(id.as_str()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for TempPartitionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TempPartitionManager")
            .field("name_prefix", &self.name_prefix)
            .field("partitions", &state.members.len())
            .field("tabs", &state.by_tab.len())
            .finish()
    }
}
