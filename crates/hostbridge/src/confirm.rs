//! Human approval gate for risky tool calls
//!
//! A gated call first creates a pending entry and fails with
//! `WRITE_CONFIRMATION_REQUIRED` carrying the entry id. The desktop shell
//! lists pending entries and resolves them. The caller then retries with the
//! id, and an approved entry matching the same site, tool and arguments is
//! consumed exactly once.
//!
//! A pending entry past its expiry reads back as `timeout`; nothing flips it
//! eagerly. [`ConfirmationManager::sweep`] frees dead entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app_config::AppConfigStore;
use crate::error::{BridgeError, Result};
use crate::path_policy::normalize_site;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Approved => "approved",
            ConfirmationStatus::Rejected => "rejected",
            ConfirmationStatus::Timeout => "timeout",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationEntry {
    pub id: String,
    pub site: String,
    pub tool: String,
    pub summary: String,
    pub status: ConfirmationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConfirmationEntry {
    /// Status as seen at `now`
    fn derived(&self, now: DateTime<Utc>) -> ConfirmationEntry {
        let mut entry = self.clone();
        if entry.status == ConfirmationStatus::Pending && now >= entry.expires_at {
            entry.status = ConfirmationStatus::Timeout;
        }
        entry
    }
}

#[derive(Debug)]
struct Stored {
    entry: ConfirmationEntry,
    payload: Value,
    ttl: Duration,
}

impl Stored {
    /// Resolved entries stay usable for one more TTL window
    fn is_dead(&self, now: DateTime<Utc>) -> bool {
        match self.entry.resolved_at {
            Some(resolved) => now >= resolved + self.ttl,
            None => now >= self.entry.expires_at,
        }
    }
}

pub struct ConfirmationManager {
    entries: Mutex<HashMap<String, Stored>>,
    app_config: Arc<AppConfigStore>,
}

impl ConfirmationManager {
    pub fn new(app_config: Arc<AppConfigStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            app_config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Stored>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_pending(
        &self,
        site: &str,
        tool: &str,
        summary: &str,
        payload: Value,
        ttl: Duration,
    ) -> ConfirmationEntry {
        let now = Utc::now();
        let entry = ConfirmationEntry {
            id: Uuid::new_v4().to_string(),
            site: normalize_site(site),
            tool: tool.to_string(),
            summary: summary.to_string(),
            status: ConfirmationStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            resolved_at: None,
        };

        info!("Confirmation {} requested: {} ({})", entry.id, tool, summary);
        self.lock().insert(
            entry.id.clone(),
            Stored {
                entry: entry.clone(),
                payload,
                ttl,
            },
        );
        entry
    }

    /// Entry with its derived status and the request payload it guards
    pub fn get(&self, id: &str) -> Option<(ConfirmationEntry, Value)> {
        let now = Utc::now();
        self.lock()
            .get(id)
            .map(|stored| (stored.entry.derived(now), stored.payload.clone()))
    }

    /// All known entries, oldest first
    pub fn list(&self) -> Vec<ConfirmationEntry> {
        let now = Utc::now();
        let mut entries: Vec<ConfirmationEntry> =
            self.lock().values().map(|s| s.entry.derived(now)).collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    /// Approve or reject a pending entry
    pub async fn resolve(
        &self,
        id: &str,
        approved: bool,
        always_allow: bool,
    ) -> Result<ConfirmationEntry> {
        let resolved = {
            let now = Utc::now();
            let mut entries = self.lock();
            let stored = entries
                .get_mut(id)
                .ok_or_else(|| BridgeError::NotFound(format!("confirmation {}", id)))?;

            let status = stored.entry.derived(now).status;
            if status != ConfirmationStatus::Pending {
                return Err(BridgeError::Conflict(format!(
                    "confirmation {} is already {}",
                    id, status
                )));
            }

            stored.entry.status = if approved {
                ConfirmationStatus::Approved
            } else {
                ConfirmationStatus::Rejected
            };
            stored.entry.resolved_at = Some(now);
            stored.entry.clone()
        };

        info!("Confirmation {} {}", resolved.id, resolved.status);
        if approved && always_allow {
            self.app_config
                .add_allow_rule(&resolved.site, &resolved.tool)
                .await?;
        }
        Ok(resolved)
    }

    pub async fn should_skip_confirmation(&self, site: &str, tool: &str) -> bool {
        self.app_config.has_allow_rule(site, tool).await
    }

    /// Spend an approval on a retried request.
    ///
    /// The entry must be approved and match `site`, `tool` and `payload`. A
    /// still-pending entry fails with `WRITE_CONFIRMATION_REQUIRED` again and
    /// stays put.
    pub fn consume_approval(&self, id: &str, site: &str, tool: &str, payload: &Value) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.lock();

        let stored = match entries.get(id) {
            Some(stored) if !stored.is_dead(now) => stored,
            Some(_) => {
                entries.remove(id);
                return Err(BridgeError::NotFound(format!("confirmation {} expired", id)));
            }
            None => return Err(BridgeError::NotFound(format!("confirmation {}", id))),
        };

        if stored.entry.site != normalize_site(site) || stored.entry.tool != tool {
            return Err(BridgeError::Forbidden(format!(
                "confirmation {} was issued for another site or tool",
                id
            )));
        }
        if &stored.payload != payload {
            return Err(BridgeError::Forbidden(format!(
                "confirmation {} does not match this request",
                id
            )));
        }

        match stored.entry.derived(now).status {
            ConfirmationStatus::Approved => {
                entries.remove(id);
                debug!("Confirmation {} consumed", id);
                Ok(())
            }
            ConfirmationStatus::Pending => Err(BridgeError::ConfirmationRequired {
                message: format!("{} is waiting for user approval", tool),
                confirmation_id: Some(id.to_string()),
            }),
            ConfirmationStatus::Rejected => {
                Err(BridgeError::Forbidden(format!("{} was rejected by the user", tool)))
            }
            ConfirmationStatus::Timeout => {
                entries.remove(id);
                Err(BridgeError::NotFound(format!("confirmation {} expired", id)))
            }
        }
    }

    /// Drop timed-out and stale resolved entries, returning how many were freed
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, stored| !stored.is_dead(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (ConfirmationManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app_config = AppConfigStore::open(&dir.path().join("app-config.json")).unwrap();
        (ConfirmationManager::new(Arc::new(app_config)), dir)
    }

    #[tokio::test]
    async fn test_approve_then_consume_once() {
        let (manager, _dir) = manager();
        let payload = json!({"path": "/srv/app/x"});
        let entry = manager.create_pending("claude.ai", "fs.rm", "remove x", payload.clone(), Duration::seconds(60));
        assert_eq!(entry.status, ConfirmationStatus::Pending);

        let err = manager
            .consume_approval(&entry.id, "claude.ai", "fs.rm", &payload)
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConfirmationRequired { .. }));

        let resolved = manager.resolve(&entry.id, true, false).await.unwrap();
        assert_eq!(resolved.status, ConfirmationStatus::Approved);
        assert!(resolved.resolved_at.is_some());

        manager
            .consume_approval(&entry.id, "claude.ai", "fs.rm", &payload)
            .unwrap();
        let err = manager
            .consume_approval(&entry.id, "claude.ai", "fs.rm", &payload)
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_approval_bound_to_request() {
        let (manager, _dir) = manager();
        let payload = json!({"path": "/srv/app/x"});
        let entry = manager.create_pending("claude.ai", "fs.rm", "remove x", payload.clone(), Duration::seconds(60));
        manager.resolve(&entry.id, true, false).await.unwrap();

        let other = json!({"path": "/srv/app/y"});
        assert!(matches!(
            manager.consume_approval(&entry.id, "claude.ai", "fs.rm", &other),
            Err(BridgeError::Forbidden(_))
        ));
        assert!(matches!(
            manager.consume_approval(&entry.id, "claude.ai", "fs.mv", &payload),
            Err(BridgeError::Forbidden(_))
        ));
        manager
            .consume_approval(&entry.id, "claude.ai", "fs.rm", &payload)
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_and_double_resolve() {
        let (manager, _dir) = manager();
        let entry = manager.create_pending("claude.ai", "process.run", "run git", json!({}), Duration::seconds(60));

        manager.resolve(&entry.id, false, false).await.unwrap();
        let err = manager.resolve(&entry.id, true, false).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));

        let err = manager
            .consume_approval(&entry.id, "claude.ai", "process.run", &json!({}))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_derived() {
        let (manager, _dir) = manager();
        let entry = manager.create_pending("claude.ai", "fs.rm", "rm", json!({}), Duration::seconds(-1));

        let (read_back, _) = manager.get(&entry.id).unwrap();
        assert_eq!(read_back.status, ConfirmationStatus::Timeout);
        assert_eq!(manager.list()[0].status, ConfirmationStatus::Timeout);

        let err = manager.resolve(&entry.id, true, false).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));

        assert_eq!(manager.sweep(), 1);
        assert!(manager.get(&entry.id).is_none());
    }

    #[tokio::test]
    async fn test_always_allow_persists_rule() {
        let (manager, _dir) = manager();
        assert!(!manager.should_skip_confirmation("claude.ai", "fs.mv").await);

        let entry = manager.create_pending("claude.ai", "fs.mv", "mv", json!({}), Duration::seconds(60));
        manager.resolve(&entry.id, true, true).await.unwrap();

        assert!(manager.should_skip_confirmation("claude.ai", "fs.mv").await);
        assert!(!manager.should_skip_confirmation("claude.ai", "fs.rm").await);
        assert!(!manager.should_skip_confirmation("chatgpt.com", "fs.mv").await);
    }

    #[tokio::test]
    async fn test_rejected_always_allow_does_not_persist() {
        let (manager, _dir) = manager();
        let entry = manager.create_pending("claude.ai", "fs.mv", "mv", json!({}), Duration::seconds(60));
        manager.resolve(&entry.id, false, true).await.unwrap();
        assert!(!manager.should_skip_confirmation("claude.ai", "fs.mv").await);
    }

    #[test]
    fn test_unknown_id() {
        let (manager, _dir) = manager();
        assert!(manager.get("missing").is_none());
        assert!(matches!(
            manager.consume_approval("missing", "claude.ai", "fs.rm", &json!({})),
            Err(BridgeError::NotFound(_))
        ));
    }
}
