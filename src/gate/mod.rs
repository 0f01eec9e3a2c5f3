//! Request gate module
//!
//! This module provides:
//! - Interception event and verdict types
//! - The per-tab pending request registry with change notifications
//! - The [`RequestGate`], which decides requests and applies user intents
//!
//! # Decision order
//!
//! For a sub-resource of domain `D` in a tab running in partition `P`:
//!
//! 1. `D` excluded from `P`: block
//! 2. `D` owned by `P`, or unowned while `P` is the default or a temporary
//!    partition: allow
//! 3. `D` blended into `P`: allow
//! 4. A per-page decision for (tab, `D`): apply it
//! 5. Otherwise: queue a pending request and block

pub mod event;
pub mod pending;
pub mod request;

pub use event::{GateDecision, InterceptEvent, RequestState, ResourceType, Verdict, VerdictReason};
pub use pending::{
    PauseOutcome, PendingEntry, PendingEvent, PendingRegistry, PendingRequest, TabDecision,
    DEFAULT_EVENT_CAPACITY,
};
pub use request::RequestGate;
