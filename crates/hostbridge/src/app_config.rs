//! Desktop app settings shared with the daemon
//!
//! Stored as `app-config.json`. The daemon only writes the always-allow
//! rules; theme and log retention are owned by the desktop shell and kept
//! as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::path_policy::normalize_site;
use crate::store::JsonStore;

/// Suppresses confirmation prompts for one (site, tool) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowRule {
    pub site: String,
    pub tool: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,

    #[serde(default)]
    pub always_allow: Vec<AllowRule>,
}

fn default_theme() -> String {
    "system".to_string()
}

fn default_log_retention_days() -> u32 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            log_retention_days: default_log_retention_days(),
            always_allow: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn allows(&self, site: &str, tool: &str) -> bool {
        let site = normalize_site(site);
        self.always_allow
            .iter()
            .any(|rule| rule.site == site && rule.tool == tool)
    }
}

#[derive(Debug)]
pub struct AppConfigStore {
    store: JsonStore<AppConfig>,
}

impl AppConfigStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            store: JsonStore::open(path)?,
        })
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.store.read(AppConfig::clone).await
    }

    pub async fn has_allow_rule(&self, site: &str, tool: &str) -> bool {
        self.store.read(|config| config.allows(site, tool)).await
    }

    /// Remember an always-allow rule; returns false when it already existed
    pub async fn add_allow_rule(&self, site: &str, tool: &str) -> Result<bool> {
        let site = normalize_site(site);
        let added = self
            .store
            .update_if(|config| {
                if config.allows(&site, tool) {
                    return (false, false);
                }
                config.always_allow.push(AllowRule {
                    site: site.clone(),
                    tool: tool.to_string(),
                    created_at: Utc::now(),
                });
                (true, true)
            })
            .await?;

        if added {
            info!("Always allowing {} for {}", tool, site);
        }
        Ok(added)
    }

    pub async fn remove_allow_rule(&self, site: &str, tool: &str) -> Result<bool> {
        let site = normalize_site(site);
        self.store
            .update_if(|config| {
                let before = config.always_allow.len();
                config
                    .always_allow
                    .retain(|rule| !(rule.site == site && rule.tool == tool));
                let removed = config.always_allow.len() != before;
                (removed, removed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_rules_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-config.json");

        let store = AppConfigStore::open(&path).unwrap();
        assert!(!store.has_allow_rule("claude.ai", "fs.rm").await);
        assert!(store.add_allow_rule("Claude.ai", "fs.rm").await.unwrap());
        assert!(!store.add_allow_rule("claude.ai", "fs.rm").await.unwrap());

        let reopened = AppConfigStore::open(&path).unwrap();
        assert!(reopened.has_allow_rule("claude.ai", "fs.rm").await);
        assert!(!reopened.has_allow_rule("claude.ai", "fs.mv").await);
        assert!(!reopened.has_allow_rule("chatgpt.com", "fs.rm").await);
    }

    #[tokio::test]
    async fn test_shell_fields_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-config.json");
        std::fs::write(&path, r#"{"theme": "dark", "logRetentionDays": 7}"#).unwrap();

        let store = AppConfigStore::open(&path).unwrap();
        store.add_allow_rule("claude.ai", "process.run").await.unwrap();

        let config = store.snapshot().await;
        assert_eq!(config.theme, "dark");
        assert_eq!(config.log_retention_days, 7);
        assert_eq!(config.always_allow.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_allow_rule() {
        let dir = tempfile::tempdir().unwrap();
        let store = AppConfigStore::open(&dir.path().join("app-config.json")).unwrap();
        store.add_allow_rule("claude.ai", "fs.rm").await.unwrap();

        assert!(store.remove_allow_rule("claude.ai", "fs.rm").await.unwrap());
        assert!(!store.has_allow_rule("claude.ai", "fs.rm").await);
    }
}
