//! Integration tests for container-gate
//!
//! These tests drive the gate through its public surface: the IPC handler,
//! the Unix socket server and the JSON state file.
//!
//! # Test Organization
//!
//! - `gate_scenarios`: End-to-end interception and intent flows
//! - `ipc`: Socket round trips and wire format
//! - `persistence`: State surviving a restart

use std::sync::Arc;

use container_gate::config::GateConfig;
use container_gate::gate::{InterceptEvent, RequestGate};
use container_gate::ipc::{IpcCommand, IpcHandler};
use container_gate::partition::{ContainerInfo, MemoryProvider, TempPartitionManager};
use container_gate::rules::{RuleEngine, RuleState, TabId};
use container_gate::store::StateStore;

pub mod gate_scenarios;
pub mod ipc;
pub mod persistence;

pub const DEFAULT: &str = "firefox-default";
pub const PERSONAL: &str = "firefox-container-1";
pub const WORK: &str = "firefox-container-2";
pub const SHOPPING: &str = "firefox-container-3";
pub const BANKING: &str = "firefox-container-4";

/// Provider seeded with the containers used across the suite
pub fn seeded_provider() -> Arc<MemoryProvider> {
    let provider = Arc::new(MemoryProvider::new());
    provider.insert(ContainerInfo::new(PERSONAL, "Personal"));
    provider.insert(ContainerInfo::new(WORK, "Work"));
    provider.insert(ContainerInfo::new(SHOPPING, "Shopping"));
    provider.insert(ContainerInfo::new(BANKING, "Banking"));
    provider
}

/// Build a handler over `state`, optionally backed by `store`
pub fn build_handler(
    provider: Arc<MemoryProvider>,
    state: RuleState,
    store: Option<Arc<dyn StateStore>>,
) -> IpcHandler {
    let temps = Arc::new(TempPartitionManager::new(provider.clone(), "Temp"));
    let gate = Arc::new(RequestGate::new(
        &GateConfig::default(),
        Arc::new(RuleEngine::new(state)),
        temps,
    ));
    let handler = IpcHandler::new(gate, provider);
    match store {
        Some(store) => handler.with_store(store),
        None => handler,
    }
}

pub fn intercept(tab: TabId, partition: &str, url: &str) -> IpcCommand {
    IpcCommand::Intercept {
        event: InterceptEvent::new(format!("req-{tab}"), tab, partition, url),
    }
}

pub fn navigate(tab: TabId, partition: &str, url: &str) -> IpcCommand {
    IpcCommand::Intercept {
        event: InterceptEvent::new(format!("nav-{tab}"), tab, partition, url).main_frame(),
    }
}
