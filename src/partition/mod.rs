//! Partition (container) management
//!
//! This module provides:
//! - The [`ContainerProvider`] capability trait (`create`, `rename`, `remove`,
//!   `list`) and an in-process [`MemoryProvider`]
//! - The temporary partition lifecycle ([`TempPartitionManager`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use container_gate::partition::{MemoryProvider, TempPartitionManager};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let provider = Arc::new(MemoryProvider::new());
//! let temps = TempPartitionManager::new(provider, "Temp");
//!
//! let partition = temps.acquire(42).await.unwrap();
//! assert!(temps.is_temporary(&partition));
//! assert_eq!(temps.release(42), Some(partition));
//! # }
//! ```

pub mod provider;
pub mod temporary;

pub use provider::{
    ensure_container, find_by_name, ContainerInfo, ContainerProvider, MemoryProvider,
};
pub use temporary::TempPartitionManager;

/// How the gate treats the partition a tab runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// The browser's default, uncontained cookie store
    Default,
    /// A temporary partition owned by the lifecycle manager
    Temporary,
    /// A user container
    Permanent,
}

impl PartitionKind {
    /// Whether unowned domains load freely in this partition
    #[must_use]
    pub const fn admits_unowned(self) -> bool {
        matches!(self, Self::Default | Self::Temporary)
    }
}
