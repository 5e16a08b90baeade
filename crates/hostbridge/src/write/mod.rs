//! Transactional writes
//!
//! Nothing touches the disk at prepare time. The pending stores outlive
//! policy reloads, so an op prepared under one snapshot can be committed
//! under the next; commit re-checks its paths against the active policy.

pub mod batch;
pub mod pending;
pub mod single;

pub use batch::{
    BatchCommitResult, BatchFileRequest, BatchPrepareRequest, PendingWriteBatchOp, PreparedBatch,
    WriteBatchManager,
};
pub use pending::{Pending, PendingStore};
pub use single::{PendingWriteOp, PreparedWrite, WriteCommitRequest, WriteManager, WritePrepareRequest};

use crate::error::{BridgeError, Result};
use crate::path_policy::normalize_site;

/// Only the site that prepared an op may commit it
fn check_site(prepared_by: &str, site: &str) -> Result<()> {
    if normalize_site(prepared_by) == normalize_site(site) {
        Ok(())
    } else {
        Err(BridgeError::Forbidden(
            "operation was prepared by another site".to_string(),
        ))
    }
}

fn check_expected_hash(hash: &str) -> Result<()> {
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(BridgeError::InvalidInput(
            "expectedSha256 must be 64 hex characters".to_string(),
        ))
    }
}
