//! Per-site keys binding a browser origin to this daemon

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::{constant_time_eq, random_hex};
use crate::error::{BridgeError, Result};
use crate::path_policy::normalize_site;
use crate::store::JsonStore;

/// 128-bit keys
const SITE_KEY_BYTES: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SiteKeyFile {
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct SiteKeyManager {
    store: JsonStore<SiteKeyFile>,
}

impl SiteKeyManager {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            store: JsonStore::open(path)?,
        })
    }

    /// Key for `site`, generated and persisted on first use
    pub async fn key_for(&self, site: &str) -> Result<String> {
        let site = checked_site(site)?;
        self.store
            .update_if(|file| match file.keys.get(&site) {
                Some(key) => (key.clone(), false),
                None => {
                    let key = random_hex(SITE_KEY_BYTES);
                    file.keys.insert(site.clone(), key.clone());
                    (key, true)
                }
            })
            .await
    }

    pub async fn verify(&self, site: &str, key: &str) -> bool {
        let site = normalize_site(site);
        self.store
            .read(|file| {
                file.keys
                    .get(&site)
                    .is_some_and(|known| constant_time_eq(known, key))
            })
            .await
    }

    /// Replace the key for `site`, invalidating the old one
    pub async fn rotate(&self, site: &str) -> Result<String> {
        let site = checked_site(site)?;
        let key = random_hex(SITE_KEY_BYTES);
        let stored = key.clone();
        self.store
            .update(|file| file.keys.insert(site.clone(), stored))
            .await?;
        info!("Rotated site key for {}", site);
        Ok(key)
    }
}

fn checked_site(site: &str) -> Result<String> {
    let site = normalize_site(site);
    if site.is_empty() {
        return Err(BridgeError::InvalidInput("site is required".to_string()));
    }
    Ok(site)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_is_stable_per_site() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SiteKeyManager::open(&dir.path().join("site-keys.json")).unwrap();

        let first = manager.key_for("https://Claude.ai/chat").await.unwrap();
        let second = manager.key_for("claude.ai").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SITE_KEY_BYTES * 2);

        let other = manager.key_for("chatgpt.com").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_verify_and_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-keys.json");
        let manager = SiteKeyManager::open(&path).unwrap();

        let key = manager.key_for("claude.ai").await.unwrap();
        assert!(manager.verify("claude.ai", &key).await);
        assert!(!manager.verify("chatgpt.com", &key).await);

        let rotated = manager.rotate("claude.ai").await.unwrap();
        assert!(!manager.verify("claude.ai", &key).await);

        let reopened = SiteKeyManager::open(&path).unwrap();
        assert!(reopened.verify("claude.ai", &rotated).await);
    }

    #[tokio::test]
    async fn test_empty_site_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SiteKeyManager::open(&dir.path().join("site-keys.json")).unwrap();
        assert!(matches!(
            manager.key_for("  ").await.unwrap_err(),
            BridgeError::InvalidInput(_)
        ));
    }
}
