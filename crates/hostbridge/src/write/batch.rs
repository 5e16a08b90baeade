//! Two-phase multi-file writes
//!
//! Files are applied strictly in prepared order with a forced backup of
//! every file that already exists. The first failure rolls back everything
//! this commit wrote, in reverse order: overwritten files are restored from
//! their backup, newly created ones are deleted along with any directories
//! created for them. A rollback step that fails is recorded and the
//! remaining steps still run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pending::PendingStore;
use super::single::WriteCommitRequest;
use super::{check_expected_hash, check_site};
use crate::error::{BatchFailure, BridgeError, Result};
use crate::fs_service::{sha256_of, FileService, WriteMode, WriteOutcome};
use crate::policy::validate::ttl_secs;
use crate::policy::PolicyConfig;

/// Largest batch accepted in one prepare
pub const MAX_BATCH_FILES: usize = 100;

/// Paths named in the summary before it elides the rest
const SUMMARY_PATHS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileRequest {
    pub path: String,
    #[serde(default)]
    pub mode: WriteMode,
    pub content: String,
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPrepareRequest {
    pub files: Vec<BatchFileRequest>,
    #[serde(default)]
    pub disable_confirmation: bool,
}

#[derive(Debug, Clone)]
pub struct PendingBatchFile {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub content: String,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PendingWriteBatchOp {
    pub files: Vec<PendingBatchFile>,
    pub require_confirmation: bool,
    pub trace_id: String,
    pub site: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedBatch {
    pub op_id: String,
    pub require_confirmation: bool,
    pub summary: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCommitResult {
    pub files: Vec<WriteOutcome>,
    pub rolled_back: bool,
}

/// What one applied file needs for its undo
struct Applied {
    path: PathBuf,
    backup: Option<PathBuf>,
    created: bool,
    created_dirs: Vec<PathBuf>,
}

pub struct WriteBatchManager {
    policy: Arc<PolicyConfig>,
    files: Arc<FileService>,
    pending: Arc<PendingStore<PendingWriteBatchOp>>,
}

impl WriteBatchManager {
    pub fn new(
        policy: Arc<PolicyConfig>,
        files: Arc<FileService>,
        pending: Arc<PendingStore<PendingWriteBatchOp>>,
    ) -> Self {
        Self {
            policy,
            files,
            pending,
        }
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.policy.mutations.batch_enabled {
            Ok(())
        } else {
            Err(BridgeError::Forbidden(
                "batch writes are disabled by policy".to_string(),
            ))
        }
    }

    pub fn prepare(
        &self,
        req: BatchPrepareRequest,
        trace_id: &str,
        site: &str,
    ) -> Result<PreparedBatch> {
        self.ensure_enabled()?;
        if req.files.is_empty() {
            return Err(BridgeError::InvalidInput("batch has no files".to_string()));
        }
        if req.files.len() > MAX_BATCH_FILES {
            return Err(BridgeError::LimitExceeded(format!(
                "batch has {} files; at most {} allowed",
                req.files.len(),
                MAX_BATCH_FILES
            )));
        }

        let max = self.policy.limits.max_file_bytes;
        let mut seen = HashSet::new();
        let mut files = Vec::with_capacity(req.files.len());
        let mut total_bytes = 0u64;

        for (index, file) in req.files.into_iter().enumerate() {
            let path = self.files.path_policy().assert_allowed(&file.path)?;
            if !seen.insert(path.clone()) {
                return Err(BridgeError::InvalidInput(format!(
                    "files[{}]: {} appears twice in the batch",
                    index,
                    path.display()
                )));
            }

            let bytes = file.content.len() as u64;
            if bytes > max {
                return Err(BridgeError::LimitExceeded(format!(
                    "files[{}]: content is {} bytes; max_file_bytes is {}",
                    index, bytes, max
                )));
            }
            if let Some(hash) = &file.expected_sha256 {
                check_expected_hash(hash)?;
            }

            total_bytes += bytes;
            files.push(PendingBatchFile {
                path,
                mode: file.mode,
                content: file.content,
                expected_sha256: file.expected_sha256.map(|h| h.to_ascii_lowercase()),
            });
        }

        let rules = &self.policy.write;
        let require_confirmation = rules.require_confirmation
            && !(rules.allow_disable_confirmation && req.disable_confirmation);
        let summary = summarize(&files, total_bytes);
        let file_count = files.len();

        let op = PendingWriteBatchOp {
            files,
            require_confirmation,
            trace_id: trace_id.to_string(),
            site: site.to_string(),
        };
        let ttl = ttl_secs("write.pending_ttl_secs", rules.pending_ttl_secs)?;
        let (op_id, expires_at) = self.pending.insert(op, ttl)?;
        debug!("Prepared batch {}: {}", op_id, summary);

        Ok(PreparedBatch {
            op_id,
            require_confirmation,
            summary,
            file_count,
            total_bytes,
            expires_at,
        })
    }

    /// Apply a prepared batch, all or nothing
    pub async fn commit(&self, req: &WriteCommitRequest, site: &str) -> Result<BatchCommitResult> {
        self.ensure_enabled()?;
        let op = self
            .pending
            .take_if(&req.op_id, |op| {
                check_site(&op.site, site)?;
                if op.require_confirmation && !req.confirmed_by_user {
                    return Err(BridgeError::confirmation_required(format!(
                        "batch of {} files needs user confirmation",
                        op.files.len()
                    )));
                }
                Ok(())
            })?
            .op;

        let mut targets = Vec::with_capacity(op.files.len());
        for file in &op.files {
            let path = self
                .files
                .path_policy()
                .assert_allowed(&file.path.to_string_lossy())?;
            if let Some(expected) = &file.expected_sha256 {
                if sha256_of(&path).await?.as_deref() != Some(expected.as_str()) {
                    return Err(BridgeError::Conflict(format!(
                        "{} changed since it was read",
                        path.display()
                    )));
                }
            }
            targets.push(path);
        }

        let mut applied = Vec::with_capacity(targets.len());
        let mut outcomes = Vec::with_capacity(targets.len());

        for (index, (file, path)) in op.files.iter().zip(&targets).enumerate() {
            match self
                .files
                .commit_write(path, file.mode, file.content.as_bytes(), true)
                .await
            {
                Ok(outcome) => {
                    applied.push(Applied {
                        path: path.clone(),
                        backup: outcome.backup_path.as_ref().map(PathBuf::from),
                        created: outcome.created,
                        created_dirs: outcome.created_dirs.iter().map(PathBuf::from).collect(),
                    });
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(
                        "Batch {} failed at index {} ({}): {}",
                        req.op_id,
                        index,
                        path.display(),
                        e
                    );
                    let rollback_errors = self.rollback(&applied).await;
                    return Err(BridgeError::BatchRolledBack(BatchFailure {
                        rolled_back: true,
                        failed_at_index: index,
                        rollback_errors,
                        reason: e.to_string(),
                    }));
                }
            }
        }

        if !self.policy.write.backup_on_overwrite {
            for outcome in &mut outcomes {
                if let Some(backup) = outcome.backup_path.take() {
                    tokio::fs::remove_file(&backup).await.ok();
                }
            }
        }

        info!("Committed batch {} ({} files)", req.op_id, outcomes.len());
        Ok(BatchCommitResult {
            files: outcomes,
            rolled_back: false,
        })
    }

    async fn rollback(&self, applied: &[Applied]) -> Vec<String> {
        let mut errors = Vec::new();
        for step in applied.iter().rev() {
            let result = match (&step.backup, step.created) {
                (_, true) => tokio::fs::remove_file(&step.path)
                    .await
                    .map_err(|e| BridgeError::from_io(&step.path, e)),
                (Some(backup), false) => self.files.restore_backup(backup, &step.path).await,
                (None, false) => Err(BridgeError::Internal(format!(
                    "no backup for {}",
                    step.path.display()
                ))),
            };
            if let Err(e) = result {
                warn!("Rollback of {} failed: {}", step.path.display(), e);
                errors.push(format!("{}: {}", step.path.display(), e));
                continue;
            }

            for dir in step.created_dirs.iter().rev() {
                if let Err(e) = tokio::fs::remove_dir(dir).await {
                    debug!("Kept {} during rollback: {}", dir.display(), e);
                    break;
                }
            }
        }
        errors
    }
}

fn summarize(files: &[PendingBatchFile], total_bytes: u64) -> String {
    let names: Vec<String> = files
        .iter()
        .take(SUMMARY_PATHS)
        .map(|f| f.path.to_string_lossy().to_string())
        .collect();
    let more = files.len().saturating_sub(SUMMARY_PATHS);
    let mut summary = format!(
        "write {} files ({} bytes): {}",
        files.len(),
        total_bytes,
        names.join(", ")
    );
    if more > 0 {
        summary.push_str(&format!(" and {} more", more));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_policy::PathPolicy;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        manager: WriteBatchManager,
        root: TempDir,
        state: TempDir,
    }

    fn fixture(configure: impl FnOnce(&mut PolicyConfig)) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let mut policy = PolicyConfig {
            roots: vec![root.path().to_string_lossy().to_string()],
            ..PolicyConfig::default()
        };
        configure(&mut policy);

        let policy = Arc::new(policy);
        let paths = Arc::new(PathPolicy::new(&policy).unwrap());
        let files = Arc::new(FileService::new(policy.clone(), paths, state.path().join("backups")));
        Fixture {
            manager: WriteBatchManager::new(policy, files, Arc::new(PendingStore::new())),
            root,
            state,
        }
    }

    fn file(path: &Path, content: &str) -> BatchFileRequest {
        BatchFileRequest {
            path: path.to_string_lossy().to_string(),
            mode: WriteMode::Overwrite,
            content: content.to_string(),
            expected_sha256: None,
        }
    }

    fn confirmed(op_id: &str) -> WriteCommitRequest {
        WriteCommitRequest {
            op_id: op_id.to_string(),
            confirmed_by_user: true,
        }
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        let f = fixture(|_| {});
        let a = f.root.path().join("a.txt");
        let b = f.root.path().join("nested/b.txt");
        std::fs::write(&a, "old a").unwrap();

        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![file(&a, "new a"), file(&b, "new b")],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();
        assert_eq!(prepared.file_count, 2);
        assert_eq!(prepared.total_bytes, 10);
        assert!(prepared.summary.starts_with("write 2 files"));

        let result = f.manager.commit(&confirmed(&prepared.op_id), "claude.ai").await.unwrap();
        assert!(!result.rolled_back);
        assert_eq!(result.files.len(), 2);
        assert!(result.files[0].backup_path.is_some());
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "new a");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "new b");
    }

    #[tokio::test]
    async fn test_failure_at_index_one_rolls_back() {
        let f = fixture(|_| {});
        let first = f.root.path().join("first.txt");
        let blocked = f.root.path().join("blocked");
        let third = f.root.path().join("third.txt");
        std::fs::write(&first, "original").unwrap();

        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![
                        file(&first, "changed"),
                        file(&blocked, "boom"),
                        file(&third, "never"),
                    ],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();

        // Becomes a directory between prepare and commit, so the write fails
        std::fs::create_dir(&blocked).unwrap();

        let err = f
            .manager
            .commit(&confirmed(&prepared.op_id), "claude.ai")
            .await
            .unwrap_err();
        match err {
            BridgeError::BatchRolledBack(failure) => {
                assert!(failure.rolled_back);
                assert_eq!(failure.failed_at_index, 1);
                assert!(failure.rollback_errors.is_empty());
            }
            other => panic!("expected rollback, got {:?}", other),
        }

        assert_eq!(std::fs::read_to_string(&first).unwrap(), "original");
        assert!(!third.exists());
    }

    #[tokio::test]
    async fn test_rollback_deletes_created_files() {
        let f = fixture(|_| {});
        let fresh = f.root.path().join("fresh.txt");
        let blocked = f.root.path().join("dir-later");

        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![file(&fresh, "hi"), file(&blocked, "x")],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();
        std::fs::create_dir(&blocked).unwrap();

        let err = f
            .manager
            .commit(&confirmed(&prepared.op_id), "claude.ai")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BatchRolledBack(_)));
        assert!(!fresh.exists());
    }

    #[tokio::test]
    async fn test_rollback_removes_created_directories() {
        let f = fixture(|_| {});
        let nested = f.root.path().join("newdir/deep/f.txt");
        let sibling = f.root.path().join("newdir/deep/g.txt");
        let blocked = f.root.path().join("blocked");

        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![file(&nested, "a"), file(&sibling, "b"), file(&blocked, "c")],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();
        std::fs::create_dir(&blocked).unwrap();

        let err = f
            .manager
            .commit(&confirmed(&prepared.op_id), "claude.ai")
            .await
            .unwrap_err();
        match err {
            BridgeError::BatchRolledBack(failure) => {
                assert_eq!(failure.failed_at_index, 2);
                assert!(failure.rollback_errors.is_empty());
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(!nested.exists());
        assert!(!f.root.path().join("newdir").exists());
        assert!(blocked.is_dir());
    }

    #[tokio::test]
    async fn test_stale_hash_writes_nothing() {
        let f = fixture(|_| {});
        let a = f.root.path().join("a.txt");
        let b = f.root.path().join("b.txt");
        std::fs::write(&b, "b1").unwrap();

        let mut second = file(&b, "b2");
        second.expected_sha256 = Some(crate::fs_service::sha256_hex(b"b1"));
        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![file(&a, "a"), second],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();
        std::fs::write(&b, "b1 changed").unwrap();

        let err = f
            .manager
            .commit(&confirmed(&prepared.op_id), "claude.ai")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
        assert!(!a.exists());
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_batches() {
        let f = fixture(|_| {});
        let a = f.root.path().join("a.txt");

        let empty = BatchPrepareRequest {
            files: vec![],
            disable_confirmation: false,
        };
        assert!(matches!(
            f.manager.prepare(empty, "t", "claude.ai").unwrap_err(),
            BridgeError::InvalidInput(_)
        ));

        let dupes = BatchPrepareRequest {
            files: vec![file(&a, "1"), file(&a, "2")],
            disable_confirmation: false,
        };
        assert!(matches!(
            f.manager.prepare(dupes, "t", "claude.ai").unwrap_err(),
            BridgeError::InvalidInput(_)
        ));

        let denied = BatchPrepareRequest {
            files: vec![file(&a, "1"), file(&f.root.path().join(".env"), "2")],
            disable_confirmation: false,
        };
        assert!(matches!(
            f.manager.prepare(denied, "t", "claude.ai").unwrap_err(),
            BridgeError::PolicyBlocked(_)
        ));
    }

    #[tokio::test]
    async fn test_disabled_by_policy() {
        let f = fixture(|p| p.mutations.batch_enabled = false);
        let req = BatchPrepareRequest {
            files: vec![file(&f.root.path().join("a"), "x")],
            disable_confirmation: false,
        };
        assert!(matches!(
            f.manager.prepare(req, "t", "claude.ai").unwrap_err(),
            BridgeError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_backups_dropped_when_policy_says_so() {
        let f = fixture(|p| p.write.backup_on_overwrite = false);
        let a = f.root.path().join("a.txt");
        std::fs::write(&a, "old").unwrap();

        let prepared = f
            .manager
            .prepare(
                BatchPrepareRequest {
                    files: vec![file(&a, "new")],
                    disable_confirmation: false,
                },
                "t",
                "claude.ai",
            )
            .unwrap();
        let result = f.manager.commit(&confirmed(&prepared.op_id), "claude.ai").await.unwrap();
        assert!(result.files[0].backup_path.is_none());

        let backups = f.state.path().join("backups");
        let leftover = std::fs::read_dir(&backups).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftover, 0);
    }
}
