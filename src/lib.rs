//! container-gate: Domain-to-container rule engine and request gate
//!
//! This crate decides which browser container (cookie partition) a request
//! belongs to, and whether it may proceed, be blocked, be reopened in
//! another container, or be paused until the user decides.
//!
//! # Features
//!
//! - **Domain Rules**: Exact and inherited domain ownership with three-level
//!   subdomain precedence (rule, container, global)
//! - **Exclusions and Blends**: Per-container block lists and shared domains
//! - **Request Gating**: Paused requests tracked per tab with live counts
//! - **Temporary Containers**: Throwaway partitions bound to tab lifetimes
//! - **IPC Control**: Unix socket-based intent and interception channel
//! - **Persistence**: Atomic JSON state file
//!
//! # Architecture
//!
//! ```text
//! Browser host → IPC → RequestGate → RuleResolver → Verdict
//!                          ↓               ↑
//!                   PendingRegistry    RuleEngine (ArcSwap snapshot)
//!                          ↓
//!                  Temp partitions → ContainerProvider
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use container_gate::config::GateConfig;
//! use container_gate::gate::{InterceptEvent, RequestGate};
//! use container_gate::partition::{MemoryProvider, TempPartitionManager};
//! use container_gate::rules::{DomainRule, RuleEngine, RuleState};
//!
//! # async fn example() {
//! let mut state = RuleState::default();
//! state.set_rule("amazon.com", DomainRule::new("firefox-container-2", "Shopping"));
//!
//! let provider = Arc::new(MemoryProvider::new());
//! let temps = Arc::new(TempPartitionManager::new(provider, "Temp"));
//! let gate = RequestGate::new(&GateConfig::default(), Arc::new(RuleEngine::new(state)), temps);
//!
//! let event = InterceptEvent::new("r1", 7, "firefox-container-2", "https://www.amazon.com/");
//! let decision = gate.handle(&event).await;
//! println!("{:?}", decision.verdict);
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types
//! - [`gate`]: Request interception and pending request tracking
//! - [`ipc`]: IPC server and protocol
//! - [`partition`]: Container provider and temporary partitions
//! - [`rules`]: Domain rules, resolution and the rule engine
//! - [`store`]: State persistence

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod gate;
pub mod ipc;
pub mod partition;
pub mod rules;
pub mod store;

// Re-export commonly used types at the crate root
pub use config::{Config, GateConfig};
pub use error::{ConfigError, ContainerGateError, IpcError, PartitionError, RuleError, StoreError};
pub use gate::{GateDecision, InterceptEvent, RequestGate, Verdict, VerdictReason};
pub use ipc::{IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
pub use partition::{ContainerInfo, ContainerProvider, MemoryProvider, TempPartitionManager};
pub use rules::{DomainRule, RuleEngine, RuleState, SubdomainSetting};
pub use store::{JsonFileStore, PersistedState, StateStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
