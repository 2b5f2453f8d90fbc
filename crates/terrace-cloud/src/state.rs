//! State management for realized resources
//!
//! Manages the `.terrace/<stage>/state.json` file which records every
//! resource a previous run realized: its kind, a digest of the inputs it was
//! realized with, and the outputs the provider returned. Plaintext inputs are
//! never written. Digests are keyed with a random per-state key so a digest
//! cannot be matched against hashes of guessed inputs computed elsewhere.

use crate::error::{CloudError, Result};
use crate::value::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".terrace";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Persisted state of one stack stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State file version
    pub version: u32,

    /// Stack name, if the definition declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Hex key of the input digests
    #[serde(default = "new_digest_key")]
    pub digest_key: String,

    /// Resources indexed by node id
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            stack: None,
            updated_at: Utc::now(),
            digest_key: new_digest_key(),
            resources: BTreeMap::new(),
        }
    }
}

fn new_digest_key() -> String {
    blake3::Hash::from_bytes(rand::random::<[u8; 32]>())
        .to_hex()
        .to_string()
}

impl StackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource, keeping its original creation time
    pub fn set_resource(&mut self, mut state: ResourceState) {
        if let Some(previous) = self.resources.get(&state.id) {
            state.created_at = previous.created_at;
        }
        self.resources.insert(state.id.clone(), state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, id: &str) -> Option<ResourceState> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a resource by id
    pub fn get_resource(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Keyed blake3 digest of resolved inputs
    ///
    /// `Properties` keeps its keys sorted, so the JSON encoding is canonical.
    /// A key that does not parse (hand-edited state) yields digests that
    /// never match, which only forces updates.
    pub fn digest(&self, inputs: &Properties) -> String {
        let canonical = serde_json::to_vec(inputs).unwrap_or_default();
        let hash = match blake3::Hash::from_hex(&self.digest_key) {
            Ok(key) => blake3::keyed_hash(key.as_bytes(), &canonical),
            Err(_) => blake3::keyed_hash(&[0; 32], &canonical),
        };
        hash.to_hex().to_string()
    }

    /// New entry for `id` realized from `inputs`
    pub fn new_resource(
        &self,
        id: impl Into<String>,
        kind: impl Into<String>,
        inputs: &Properties,
    ) -> ResourceState {
        ResourceState::new(id, kind, self.digest(inputs))
    }

    /// Stored entry of `id` if it was realized from the same kind and inputs
    pub fn matching(&self, id: &str, kind: &str, inputs: &Properties) -> Option<&ResourceState> {
        let entry = self.resources.get(id)?;
        (entry.kind == kind && entry.inputs_digest == self.digest(inputs)).then_some(entry)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Ids ordered so that every resource comes after the resources it
    /// depends on; unrelated resources keep id order
    pub fn creation_order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = Vec::with_capacity(self.resources.len());
        let mut placed = std::collections::BTreeSet::new();
        while order.len() < self.resources.len() {
            let before = order.len();
            for (id, resource) in &self.resources {
                if placed.contains(id.as_str()) {
                    continue;
                }
                let ready = resource
                    .dependencies
                    .iter()
                    .all(|d| placed.contains(d.as_str()) || !self.resources.contains_key(d));
                if ready {
                    placed.insert(id.as_str());
                    order.push(id.as_str());
                }
            }
            if order.len() == before {
                // Corrupt state with a cycle; append the rest in id order
                for id in self.resources.keys() {
                    if placed.insert(id.as_str()) {
                        order.push(id.as_str());
                    }
                }
            }
        }
        order
    }
}

/// State of a single realized resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Node id
    pub id: String,

    /// Provider resource type
    pub kind: String,

    /// Keyed digest of the resolved inputs
    pub inputs_digest: String,

    /// Output attributes returned by the provider
    pub outputs: Properties,

    /// Ids of the resources this one was realized after
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When the resource was created
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        inputs_digest: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: kind.into(),
            inputs_digest: inputs_digest.into(),
            outputs: Properties::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_outputs(mut self, outputs: Properties) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.outputs
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// State manager for reading/writing state files of one stage
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,

    stage: String,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>, stage: impl Into<String>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            stage: stage.into(),
        }
    }

    /// Get the state directory path
    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR).join(&self.stage)
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<StackState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!(stage = %self.stage, "State file not found, returning empty state");
            return Ok(StackState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Acquire a lock for exclusive access
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Locks older than an hour are considered abandoned
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State of stage '{}' is locked by {} since {}",
                    self.stage, lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
