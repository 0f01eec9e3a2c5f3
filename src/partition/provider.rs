//! Container provider trait definitions
//!
//! The browser's container API is reached only through [`ContainerProvider`].
//! [`MemoryProvider`] keeps containers in process; it backs the daemon when no
//! browser bridge is attached and every test.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PartitionError;
use crate::rules::PartitionId;

/// A partition as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Cookie store id of the container
    pub cookie_store_id: PartitionId,

    /// Display name
    pub name: String,

    /// Optional color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Optional icon hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ContainerInfo {
    /// Create a container description without color or icon
    pub fn new(cookie_store_id: impl Into<PartitionId>, name: impl Into<String>) -> Self {
        Self {
            cookie_store_id: cookie_store_id.into(),
            name: name.into(),
            color: None,
            icon: None,
        }
    }
}

/// Capability interface to the browser's partition API.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Create a container with the given name.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError` if the name is unusable or the provider fails.
    async fn create(&self, name: &str) -> Result<ContainerInfo, PartitionError>;

    /// Rename a container.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NotFound` if the container does not exist.
    async fn rename(&self, id: &str, name: &str) -> Result<ContainerInfo, PartitionError>;

    /// Remove a container and its cookies.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError::NotFound` if the container does not exist.
    async fn remove(&self, id: &str) -> Result<(), PartitionError>;

    /// List all containers.
    ///
    /// # Errors
    ///
    /// Returns `PartitionError` if the provider fails.
    async fn list(&self) -> Result<Vec<ContainerInfo>, PartitionError>;
}

/// Find a container by its display name.
///
/// # Errors
///
/// Propagates provider failures.
pub async fn find_by_name(
    provider: &dyn ContainerProvider,
    name: &str,
) -> Result<Option<ContainerInfo>, PartitionError> {
    Ok(provider
        .list()
        .await?
        .into_iter()
        .find(|container| container.name == name))
}

/// Find a container by name, creating it when missing.
///
/// # Errors
///
/// Propagates provider failures.
pub async fn ensure_container(
    provider: &dyn ContainerProvider,
    name: &str,
) -> Result<ContainerInfo, PartitionError> {
    if let Some(existing) = find_by_name(provider, name).await? {
        return Ok(existing);
    }
    provider.create(name).await
}

/// In-process container registry.
#[derive(Debug)]
pub struct MemoryProvider {
    containers: RwLock<BTreeMap<PartitionId, ContainerInfo>>,
    id_prefix: String,
    next_id: AtomicU64,
}

impl MemoryProvider {
    /// Default prefix for generated cookie store ids
    pub const DEFAULT_ID_PREFIX: &'static str = "firefox-container-";

    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_ID_PREFIX)
    }

    /// Create an empty registry generating ids with `prefix`
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            containers: RwLock::new(BTreeMap::new()),
            id_prefix: prefix.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a container with a fixed id
    pub fn insert(&self, container: ContainerInfo) {
        self.containers
            .write()
            .insert(container.cookie_store_id.clone(), container);
    }

    /// Check if a container exists
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.containers.read().contains_key(id)
    }

    /// Number of containers
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.read().len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.read().is_empty()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerProvider for MemoryProvider {
    async fn create(&self, name: &str) -> Result<ContainerInfo, PartitionError> {
        if name.trim().is_empty() {
            return Err(PartitionError::InvalidName { name: name.into() });
        }
        let mut containers = self.containers.write();
        let id = loop {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{}{n}", self.id_prefix);
            if !containers.contains_key(&candidate) {
                break candidate;
            }
        };
        let container = ContainerInfo::new(id.clone(), name);
        containers.insert(id, container.clone());
        debug!(id = %container.cookie_store_id, name, "container created");
        Ok(container)
    }

    async fn rename(&self, id: &str, name: &str) -> Result<ContainerInfo, PartitionError> {
        if name.trim().is_empty() {
            return Err(PartitionError::InvalidName { name: name.into() });
        }
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(id)
            .ok_or_else(|| PartitionError::not_found(id))?;
        container.name = name.to_string();
        Ok(container.clone())
    }

    async fn remove(&self, id: &str) -> Result<(), PartitionError> {
        if self.containers.write().remove(id).is_none() {
            return Err(PartitionError::not_found(id));
        }
        debug!(id, "container removed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>, PartitionError> {
        Ok(self.containers.read().values().cloned().collect())
    }
}
