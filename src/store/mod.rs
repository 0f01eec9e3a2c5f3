//! State persistence
//!
//! The rule state and the set of live temporary partitions are saved as one
//! JSON document after every mutating intent and loaded once at startup.
//! Every missing field loads as its default, so older or hand-written files
//! remain readable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::rules::{PartitionId, RuleState};

/// Everything that survives a restart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    /// Rules, exclusions, blends and settings
    #[serde(flatten)]
    pub rules: RuleState,

    /// Temporary partitions alive when the state was saved
    pub temp_containers: Vec<PartitionId>,
}

impl PersistedState {
    /// Bundle a rule state with the live temporary partitions
    #[must_use]
    pub fn new(rules: RuleState, temp_containers: Vec<PartitionId>) -> Self {
        Self {
            rules,
            temp_containers,
        }
    }
}

/// Durable storage for [`PersistedState`]
pub trait StateStore: Send + Sync {
    /// Load the stored state; a store that was never written yields the
    /// default state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the stored state cannot be read or parsed.
    fn load(&self) -> Result<PersistedState, StoreError>;

    /// Replace the stored state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the state cannot be written.
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

/// JSON file store with atomic replacement.
///
/// Saves through one store (and its clones) are serialized.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        if !self.path.exists() {
            info!(path = ?self.path, "no stored state, starting empty");
            return Ok(PersistedState::default());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(PersistedState::default());
        }

        let state: PersistedState =
            serde_json::from_str(&contents).map_err(|e| StoreError::ParseError {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        info!(
            path = ?self.path,
            rules = state.rules.rule_count(),
            temporary = state.temp_containers.len(),
            "state loaded"
        );
        Ok(state)
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::SerializeError(e.to_string()))?;
        let _write = self.write_lock.lock();
        atomic_write(&self.path, &json)?;
        debug!(path = ?self.path, bytes = json.len(), "state saved");
        Ok(())
    }
}

/// Write to a sibling temp file, fsync, then rename over the target.
fn atomic_write(target: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        target.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, target) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    // Make the rename durable
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// In-process store, for tests and runs without persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `state`
    #[must_use]
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Last saved state
    #[must_use]
    pub fn stored(&self) -> Option<PersistedState> {
        self.state.lock().clone()
    }

    /// Number of saves performed
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(self.state.lock().clone().unwrap_or_default())
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        *self.state.lock() = Some(state.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
