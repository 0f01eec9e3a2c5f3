//! IPC command handler
//!
//! This module applies intents to the gate and rule engine and generates
//! responses. Successful mutations are persisted through the configured
//! [`StateStore`]; a failed save is logged and does not fail the intent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, ServerStatus, StateSnapshot};
use crate::error::{PartitionError, RuleError};
use crate::gate::{InterceptEvent, RequestGate, VerdictReason};
use crate::partition::{ensure_container, ContainerProvider};
use crate::rules::{
    normalize_domain, DomainRule, GlobalSubdomains, PartitionId, SubdomainSetting, TabId,
    UNKNOWN_OWNER_LABEL,
};
use crate::store::{PersistedState, StateStore};

/// IPC command handler
pub struct IpcHandler {
    /// Request gate (rules, pending state, temporary partitions)
    gate: Arc<RequestGate>,

    /// Browser partition API
    provider: Arc<dyn ContainerProvider>,

    /// Where mutations are persisted, if anywhere
    store: Option<Arc<dyn StateStore>>,

    /// Held from snapshot to save so the newest state is written last
    persist_lock: Mutex<()>,

    /// Server start time
    start_time: Instant,

    /// Server version
    version: String,
}

impl IpcHandler {
    /// Create a new IPC handler without persistence
    pub fn new(gate: Arc<RequestGate>, provider: Arc<dyn ContainerProvider>) -> Self {
        Self {
            gate,
            provider,
            store: None,
            persist_lock: Mutex::new(()),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Persist every successful mutation to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The gate this handler drives
    #[must_use]
    pub const fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }

    /// Handle an IPC command and return a response
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        let mutation = command.is_mutation();

        let response = match command {
            IpcCommand::Ping => IpcResponse::Pong,

            IpcCommand::Status => self.handle_status(),

            IpcCommand::GetState => self.handle_get_state(),

            IpcCommand::GetContainers => self.handle_get_containers().await,

            IpcCommand::GetPendingRequests { tab_id } => {
                self.handle_get_pending_requests(tab_id).await
            }

            IpcCommand::AddRule {
                domain,
                container_name,
                subdomains,
            } => {
                self.handle_add_rule(&domain, &container_name, subdomains)
                    .await
            }

            IpcCommand::RemoveRule { domain } => self.handle_remove_rule(&domain),

            IpcCommand::AllowDomain {
                tab_id,
                domain,
                add_rule,
                container_name,
                enable_subdomains,
            } => {
                if add_rule {
                    self.handle_allow_permanently(
                        tab_id,
                        &domain,
                        container_name.as_deref(),
                        enable_subdomains,
                    )
                    .await
                } else {
                    self.handle_allow_once(tab_id, &domain)
                }
            }

            IpcCommand::AllowOnce { tab_id, domain } => self.handle_allow_once(tab_id, &domain),

            IpcCommand::BlockDomain {
                tab_id,
                domain,
                add_exclusion,
                cookie_store_id,
            } => self.handle_block_domain(tab_id, &domain, &cookie_store_id, add_exclusion),

            IpcCommand::AddBlend {
                cookie_store_id,
                domain,
                tab_id,
                confirmed,
            } => self.handle_add_blend(&cookie_store_id, &domain, tab_id, confirmed),

            IpcCommand::SetHideBlendWarning { value } => {
                self.gate
                    .rules()
                    .update(|state| state.hide_blend_warning = value);
                info!(value, "blend warning preference changed");
                IpcResponse::success()
            }

            IpcCommand::Intercept { event } => self.handle_intercept(&event).await,

            IpcCommand::TabClosed { tab_id } => {
                match self.gate.tab_closed(tab_id) {
                    Some(partition) => IpcResponse::success_with_message(format!(
                        "Temporary partition {partition} released"
                    )),
                    None => IpcResponse::success(),
                }
            }

            IpcCommand::SetGlobalSubdomains { value } => self.handle_set_global_subdomains(value),

            IpcCommand::SetContainerSubdomains {
                cookie_store_id,
                value,
            } => self.handle_set_container_subdomains(&cookie_store_id, value),

            IpcCommand::SetRuleSubdomains { domain, value } => {
                self.handle_set_rule_subdomains(&domain, value)
            }

            IpcCommand::RemoveExclusion {
                cookie_store_id,
                domain,
            } => self.handle_remove_entry(&cookie_store_id, &domain, EntryKind::Exclusion),

            IpcCommand::RemoveBlend {
                cookie_store_id,
                domain,
            } => self.handle_remove_entry(&cookie_store_id, &domain, EntryKind::Blend),

            IpcCommand::Subscribe { tab_id } => {
                // The server streams the events once this is sent
                debug!(tab = ?tab_id, "pending subscription accepted");
                IpcResponse::success_with_message("Subscribed")
            }

            IpcCommand::Shutdown => {
                info!("Shutdown requested");
                // The server stops accepting after this response is sent
                IpcResponse::success_with_message("Shutdown initiated")
            }
        };

        let changed = mutation
            && !matches!(
                response,
                IpcResponse::Error(_) | IpcResponse::BlendConfirmationRequired { .. }
            );
        if changed {
            self.persist();
        }

        response
    }

    /// State as it would be persisted now
    #[must_use]
    pub fn persisted_state(&self) -> PersistedState {
        let snapshot = self.gate.rules().snapshot();
        PersistedState::new(snapshot.state.clone(), self.gate.temporaries().known())
    }

    /// Save the current state; failures are logged only
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _persisting = self.persist_lock.lock();
        if let Err(e) = store.save(&self.persisted_state()) {
            warn!("Failed to persist state: {}", e);
        }
    }

    /// Refresh owner labels stored on rules from the provider's current
    /// container names.
    ///
    /// Returns the number of rules relabeled.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub async fn sync_owner_labels(&self) -> Result<usize, PartitionError> {
        let names: HashMap<PartitionId, String> = self
            .provider
            .list()
            .await?
            .into_iter()
            .map(|c| (c.cookie_store_id, c.name))
            .collect();

        let touched = self.gate.rules().update(|state| {
            let stale: Vec<(PartitionId, String)> = state
                .domain_rules
                .values()
                .filter_map(|rule| {
                    names
                        .get(&rule.owner_id)
                        .filter(|name| **name != rule.owner_label)
                        .map(|name| (rule.owner_id.clone(), name.clone()))
                })
                .collect();
            let mut touched = 0;
            for (partition, name) in stale {
                touched += state.relabel_owner(&partition, &name);
            }
            touched
        });

        if touched > 0 {
            info!(touched, "owner labels refreshed");
            self.persist();
        }
        Ok(touched)
    }

    fn handle_status(&self) -> IpcResponse {
        let snapshot = self.gate.rules().snapshot();
        let stats = snapshot.stats();
        IpcResponse::Status(ServerStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            rules_version: stats.version,
            domain_rules: stats.domain_rules,
            exclusions: stats.exclusions,
            blends: stats.blends,
            temporary_partitions: self.gate.temporaries().known().len(),
            tracked_tabs: self.gate.registry().tab_count(),
        })
    }

    fn handle_get_state(&self) -> IpcResponse {
        let snapshot = self.gate.rules().snapshot();
        IpcResponse::State(StateSnapshot {
            version: snapshot.version,
            state: PersistedState::new(snapshot.state.clone(), self.gate.temporaries().known()),
        })
    }

    async fn handle_get_containers(&self) -> IpcResponse {
        match self.provider.list().await {
            Ok(containers) => IpcResponse::Containers { containers },
            Err(e) => partition_error(&e),
        }
    }

    async fn handle_get_pending_requests(&self, tab_id: TabId) -> IpcResponse {
        let mut requests = self.gate.pending_requests(tab_id);

        if requests.iter().any(|r| r.owner_id.is_some()) {
            match self.provider.list().await {
                Ok(containers) => {
                    let names: HashMap<_, _> = containers
                        .into_iter()
                        .map(|c| (c.cookie_store_id, c.name))
                        .collect();
                    for request in &mut requests {
                        if let Some(owner) = &request.owner_id {
                            request.owner_label = Some(
                                names
                                    .get(owner)
                                    .cloned()
                                    .unwrap_or_else(|| UNKNOWN_OWNER_LABEL.to_string()),
                            );
                        }
                    }
                }
                Err(e) => {
                    // Fall back to the labels stored on the rules
                    warn!("Failed to list containers for owner labels: {}", e);
                }
            }
        }

        IpcResponse::PendingRequests { tab_id, requests }
    }

    async fn handle_add_rule(
        &self,
        domain: &str,
        container_name: &str,
        subdomains: SubdomainSetting,
    ) -> IpcResponse {
        let Some(domain) = normalize_domain(domain) else {
            return rule_error(&RuleError::invalid_domain(domain));
        };

        let container = match ensure_container(self.provider.as_ref(), container_name).await {
            Ok(container) => container,
            Err(e) => return partition_error(&e),
        };

        let rule = DomainRule::new(container.cookie_store_id, container.name)
            .with_subdomains(subdomains);
        let previous = self
            .gate
            .rules()
            .update(|state| state.set_rule(domain.clone(), rule.clone()));

        info!(
            domain = %domain,
            owner = %rule.owner_id,
            replaced = previous.is_some(),
            "rule added"
        );
        IpcResponse::Rule { domain, rule }
    }

    fn handle_remove_rule(&self, domain: &str) -> IpcResponse {
        let Some(domain) = normalize_domain(domain) else {
            return rule_error(&RuleError::invalid_domain(domain));
        };

        match self
            .gate
            .rules()
            .try_update(|state| state.remove_rule(&domain))
        {
            Ok(rule) => {
                info!(domain = %domain, owner = %rule.owner_id, "rule removed");
                IpcResponse::success()
            }
            Err(e) => rule_error(&e),
        }
    }

    async fn handle_allow_permanently(
        &self,
        tab_id: TabId,
        domain: &str,
        container_name: Option<&str>,
        subdomains: SubdomainSetting,
    ) -> IpcResponse {
        let Some(container_name) = container_name else {
            return IpcResponse::error(
                ErrorCode::InvalidParameters,
                "containerName is required when addRule is set",
            );
        };
        let Some(domain) = normalize_domain(domain) else {
            return rule_error(&RuleError::invalid_domain(domain));
        };

        let container = match ensure_container(self.provider.as_ref(), container_name).await {
            Ok(container) => container,
            Err(e) => return partition_error(&e),
        };

        match self.gate.allow_permanently(
            tab_id,
            &domain,
            &container.cookie_store_id,
            &container.name,
            subdomains,
        ) {
            Ok(rule) => IpcResponse::Rule { domain, rule },
            Err(e) => rule_error(&e),
        }
    }

    fn handle_allow_once(&self, tab_id: TabId, domain: &str) -> IpcResponse {
        match self.gate.allow_once(tab_id, domain) {
            Ok(true) => IpcResponse::success(),
            Ok(false) => IpcResponse::success_with_message("No pending request for domain"),
            Err(e) => rule_error(&e),
        }
    }

    fn handle_block_domain(
        &self,
        tab_id: TabId,
        domain: &str,
        cookie_store_id: &str,
        add_exclusion: bool,
    ) -> IpcResponse {
        match self
            .gate
            .block(tab_id, domain, cookie_store_id, add_exclusion)
        {
            Ok(()) => IpcResponse::success(),
            Err(e) => rule_error(&e),
        }
    }

    fn handle_add_blend(
        &self,
        cookie_store_id: &str,
        domain: &str,
        tab_id: Option<TabId>,
        confirmed: bool,
    ) -> IpcResponse {
        let hide_warning = self.gate.rules().load().state.hide_blend_warning;

        if !hide_warning && !confirmed {
            let Some(normalized) = normalize_domain(domain) else {
                return rule_error(&RuleError::invalid_domain(domain));
            };
            return match self.gate.blend_owner(&normalized) {
                Ok(owner) => IpcResponse::BlendConfirmationRequired {
                    cookie_store_id: cookie_store_id.to_string(),
                    target: owner
                        .as_ref()
                        .map_or_else(|| normalized.clone(), |o| o.matched_domain.clone()),
                    owner_label: owner.map(|o| o.owner_label),
                    domain: normalized,
                },
                Err(e) => rule_error(&e),
            };
        }

        match self.gate.blend(cookie_store_id, domain, tab_id) {
            Ok(target) => IpcResponse::Blended {
                cookie_store_id: cookie_store_id.trim().to_string(),
                target,
            },
            Err(e) => rule_error(&e),
        }
    }

    async fn handle_intercept(&self, event: &InterceptEvent) -> IpcResponse {
        let decision = self.gate.handle(event).await;
        if decision.reason == VerdictReason::Temporary {
            // A new temporary partition must be known after a crash
            self.persist();
        }
        IpcResponse::Verdict(decision)
    }

    fn handle_set_global_subdomains(&self, value: GlobalSubdomains) -> IpcResponse {
        self.gate
            .rules()
            .update(|state| state.global_subdomains = value);
        info!(?value, "global subdomain default changed");
        IpcResponse::success()
    }

    fn handle_set_container_subdomains(
        &self,
        cookie_store_id: &str,
        value: SubdomainSetting,
    ) -> IpcResponse {
        if cookie_store_id.trim().is_empty() {
            return rule_error(&RuleError::InvalidPartition {
                id: cookie_store_id.to_string(),
            });
        }
        self.gate
            .rules()
            .update(|state| state.set_container_setting(cookie_store_id.trim(), value));
        info!(partition = cookie_store_id, ?value, "container subdomain setting changed");
        IpcResponse::success()
    }

    fn handle_set_rule_subdomains(&self, domain: &str, value: SubdomainSetting) -> IpcResponse {
        let Some(domain) = normalize_domain(domain) else {
            return rule_error(&RuleError::invalid_domain(domain));
        };
        match self
            .gate
            .rules()
            .try_update(|state| state.set_rule_subdomains(&domain, value))
        {
            Ok(()) => {
                info!(domain = %domain, ?value, "rule subdomain setting changed");
                IpcResponse::success()
            }
            Err(e) => rule_error(&e),
        }
    }

    fn handle_remove_entry(
        &self,
        cookie_store_id: &str,
        domain: &str,
        kind: EntryKind,
    ) -> IpcResponse {
        let Some(domain) = normalize_domain(domain) else {
            return rule_error(&RuleError::invalid_domain(domain));
        };
        let removed = self.gate.rules().try_update(|state| {
            let removed = match kind {
                EntryKind::Exclusion => state.remove_exclusion(cookie_store_id, &domain),
                EntryKind::Blend => state.remove_blend(cookie_store_id, &domain),
            };
            if removed {
                Ok(())
            } else {
                Err(())
            }
        });
        match removed {
            Ok(()) => {
                info!(
                    partition = cookie_store_id,
                    domain = %domain,
                    kind = kind.as_str(),
                    "entry removed"
                );
                IpcResponse::success()
            }
            Err(()) => IpcResponse::error(
                ErrorCode::NotFound,
                format!("No {} of {domain} in {cookie_store_id}", kind.as_str()),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryKind {
    Exclusion,
    Blend,
}

impl EntryKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Exclusion => "exclusion",
            Self::Blend => "blend",
        }
    }
}

fn rule_error(e: &RuleError) -> IpcResponse {
    let code = match e {
        RuleError::InvalidDomain { .. } | RuleError::InvalidPartition { .. } => {
            ErrorCode::InvalidParameters
        }
        RuleError::RuleNotFound { .. } => ErrorCode::NotFound,
    };
    IpcResponse::error(code, e.to_string())
}

fn partition_error(e: &PartitionError) -> IpcResponse {
    let code = match e {
        PartitionError::NotFound { .. } => ErrorCode::NotFound,
        PartitionError::InvalidName { .. } => ErrorCode::InvalidParameters,
        PartitionError::Provider { .. } => ErrorCode::OperationFailed,
    };
    IpcResponse::error(code, e.to_string())
}
