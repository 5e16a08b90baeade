//! Hot-swappable policy and the components built from it
//!
//! Request handlers call [`PolicyRuntimeManager::current`] once and work
//! against that `Arc` for the rest of the request, so a reload never changes
//! the rules halfway through a command. Pending operation stores live in
//! [`SharedState`] and survive every rebuild.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::info;

use super::validate;
use super::PolicyConfig;
use crate::error::{BridgeError, Result};
use crate::fs_service::FileService;
use crate::path_policy::PathPolicy;
use crate::process::ProcessRunner;
use crate::redact::Redactor;
use crate::write::{
    PendingStore, PendingWriteBatchOp, PendingWriteOp, WriteBatchManager, WriteManager,
};

/// State that outlives policy reloads
#[derive(Debug)]
pub struct SharedState {
    pub pending_writes: Arc<PendingStore<PendingWriteOp>>,
    pub pending_batches: Arc<PendingStore<PendingWriteBatchOp>>,
    pub backup_dir: PathBuf,
}

impl SharedState {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self {
            pending_writes: Arc::new(PendingStore::new()),
            pending_batches: Arc::new(PendingStore::new()),
            backup_dir,
        }
    }
}

/// Everything that depends on the active policy
pub struct Components {
    pub policy: Arc<PolicyConfig>,
    pub paths: Arc<PathPolicy>,
    pub redactor: Arc<Redactor>,
    pub files: Arc<FileService>,
    pub writes: WriteManager,
    pub batches: WriteBatchManager,
    pub processes: ProcessRunner,
}

impl Components {
    pub fn build(policy: PolicyConfig, shared: &SharedState) -> Result<Self> {
        let policy = Arc::new(policy);
        let paths = Arc::new(PathPolicy::new(&policy)?);
        let redactor = Arc::new(Redactor::new(&policy.redaction)?);
        let files = Arc::new(FileService::new(
            policy.clone(),
            paths.clone(),
            shared.backup_dir.clone(),
        ));

        Ok(Self {
            writes: WriteManager::new(policy.clone(), files.clone(), shared.pending_writes.clone()),
            batches: WriteBatchManager::new(
                policy.clone(),
                files.clone(),
                shared.pending_batches.clone(),
            ),
            processes: ProcessRunner::new(policy.clone(), paths.clone(), redactor.clone()),
            policy,
            paths,
            redactor,
            files,
        })
    }
}

pub struct PolicyRuntimeManager {
    active: RwLock<Arc<Components>>,
    shared: SharedState,
    /// Where accepted patches are written; `None` keeps them in memory
    policy_file: Option<PathBuf>,
    apply_lock: Mutex<()>,
}

impl PolicyRuntimeManager {
    pub fn new(
        policy: PolicyConfig,
        shared: SharedState,
        policy_file: Option<PathBuf>,
    ) -> Result<Self> {
        validate::validate(&policy)?;
        let components = Components::build(policy, &shared)?;
        Ok(Self {
            active: RwLock::new(Arc::new(components)),
            shared,
            policy_file,
            apply_lock: Mutex::new(()),
        })
    }

    /// The components in effect right now
    pub fn current(&self) -> Arc<Components> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn policy(&self) -> Arc<PolicyConfig> {
        self.current().policy.clone()
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Validate, persist and publish a partial policy update
    pub async fn apply_patch(&self, patch: &Value) -> Result<Arc<PolicyConfig>> {
        let _guard = self.apply_lock.lock().await;

        let current = self.current();
        let next = validate::merge_patch(&current.policy, patch)?;
        let components = Components::build(next, &self.shared)?;

        if let Some(path) = &self.policy_file {
            components
                .policy
                .save_to(path)
                .map_err(|e| BridgeError::Internal(format!("failed to save policy: {:#}", e)))?;
        }

        let published = Arc::new(components);
        let policy = published.policy.clone();
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = published;

        info!("Policy updated ({} roots)", policy.roots.len());
        Ok(policy)
    }

    /// Free expired pending writes and batches
    pub fn sweep(&self) -> usize {
        self.shared.pending_writes.sweep() + self.shared.pending_batches.sweep()
    }
}
