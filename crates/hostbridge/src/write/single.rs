//! Two-phase single-file writes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::pending::PendingStore;
use super::{check_expected_hash, check_site};
use crate::error::{BridgeError, Result};
use crate::fs_service::{sha256_of, FileService, WriteMode, WriteOutcome};
use crate::policy::validate::ttl_secs;
use crate::policy::PolicyConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritePrepareRequest {
    pub path: String,
    #[serde(default)]
    pub mode: WriteMode,
    pub content: String,
    #[serde(default)]
    pub expected_sha256: Option<String>,
    #[serde(default)]
    pub disable_confirmation: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCommitRequest {
    pub op_id: String,
    #[serde(default)]
    pub confirmed_by_user: bool,
}

/// A prepared write waiting for its commit
#[derive(Debug, Clone)]
pub struct PendingWriteOp {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub content: String,
    pub require_confirmation: bool,
    pub trace_id: String,
    pub site: String,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedWrite {
    pub op_id: String,
    pub require_confirmation: bool,
    pub summary: String,
    pub bytes: u64,
    pub expires_at: DateTime<Utc>,
}

pub struct WriteManager {
    policy: Arc<PolicyConfig>,
    files: Arc<FileService>,
    pending: Arc<PendingStore<PendingWriteOp>>,
}

impl WriteManager {
    pub fn new(
        policy: Arc<PolicyConfig>,
        files: Arc<FileService>,
        pending: Arc<PendingStore<PendingWriteOp>>,
    ) -> Self {
        Self {
            policy,
            files,
            pending,
        }
    }

    pub fn prepare(
        &self,
        req: WritePrepareRequest,
        trace_id: &str,
        site: &str,
    ) -> Result<PreparedWrite> {
        let path = self.files.path_policy().assert_allowed(&req.path)?;

        let bytes = req.content.len() as u64;
        if bytes > self.policy.limits.max_file_bytes {
            return Err(BridgeError::LimitExceeded(format!(
                "content is {} bytes; max_file_bytes is {}",
                bytes, self.policy.limits.max_file_bytes
            )));
        }
        if let Some(hash) = &req.expected_sha256 {
            check_expected_hash(hash)?;
        }

        let rules = &self.policy.write;
        let require_confirmation = rules.require_confirmation
            && !(rules.allow_disable_confirmation && req.disable_confirmation);

        let summary = format!("{} {} ({} bytes)", req.mode.as_str(), path.display(), bytes);
        let op = PendingWriteOp {
            path,
            mode: req.mode,
            content: req.content,
            require_confirmation,
            trace_id: trace_id.to_string(),
            site: site.to_string(),
            expected_sha256: req.expected_sha256.map(|h| h.to_ascii_lowercase()),
        };

        let ttl = ttl_secs("write.pending_ttl_secs", rules.pending_ttl_secs)?;
        let (op_id, expires_at) = self.pending.insert(op, ttl)?;
        debug!("Prepared write {}: {}", op_id, summary);

        Ok(PreparedWrite {
            op_id,
            require_confirmation,
            summary,
            bytes,
            expires_at,
        })
    }

    /// Apply a prepared write.
    ///
    /// A missing confirmation leaves the op in place so it can be retried.
    /// Any other outcome consumes it.
    pub async fn commit(&self, req: &WriteCommitRequest, site: &str) -> Result<WriteOutcome> {
        let op = self
            .pending
            .take_if(&req.op_id, |op| {
                check_site(&op.site, site)?;
                if op.require_confirmation && !req.confirmed_by_user {
                    return Err(BridgeError::confirmation_required(format!(
                        "write to {} needs user confirmation",
                        op.path.display()
                    )));
                }
                Ok(())
            })?
            .op;

        let path = self
            .files
            .path_policy()
            .assert_allowed(&op.path.to_string_lossy())?;

        if let Some(expected) = &op.expected_sha256 {
            let current = sha256_of(&path).await?;
            if current.as_deref() != Some(expected.as_str()) {
                warn!("Write {} rejected: {} changed since prepare", req.op_id, path.display());
                return Err(BridgeError::Conflict(format!(
                    "{} changed since it was read",
                    path.display()
                )));
            }
        }

        self.files
            .commit_write(
                &path,
                op.mode,
                op.content.as_bytes(),
                self.policy.write.backup_on_overwrite,
            )
            .await
    }
}
