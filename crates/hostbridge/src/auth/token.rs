//! Bearer tokens handed out after pairing

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{constant_time_eq, random_hex};
use crate::error::Result;
use crate::store::JsonStore;

/// 192 bits of randomness
const TOKEN_BYTES: usize = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Site that paired for this token, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl TokenRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    tokens: Vec<TokenRecord>,
}

/// Persisted list of issued tokens
#[derive(Debug)]
pub struct TokenManager {
    store: JsonStore<TokenFile>,
}

impl TokenManager {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            store: JsonStore::open(path)?,
        })
    }

    pub async fn issue(&self, ttl: Duration, site: Option<&str>) -> Result<TokenRecord> {
        let now = Utc::now();
        let record = TokenRecord {
            token: random_hex(TOKEN_BYTES),
            created_at: now,
            expires_at: now + ttl,
            site: site.map(str::to_string),
        };

        let stored = record.clone();
        self.store.update(move |file| file.tokens.push(stored)).await?;
        debug!("Issued token expiring {}", record.expires_at);
        Ok(record)
    }

    /// Whether `token` is known and unexpired. Expired records are pruned.
    pub async fn verify(&self, token: &str) -> Result<bool> {
        let now = Utc::now();
        self.store
            .update_if(|file| {
                let before = file.tokens.len();
                file.tokens.retain(|r| r.is_live(now));
                let found = file
                    .tokens
                    .iter()
                    .any(|r| constant_time_eq(&r.token, token));
                (found, file.tokens.len() != before)
            })
            .await
    }

    /// Forget `token`; returns whether it existed
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        self.store
            .update_if(|file| {
                let before = file.tokens.len();
                file.tokens.retain(|r| !constant_time_eq(&r.token, token));
                let removed = file.tokens.len() != before;
                (removed, removed)
            })
            .await
    }

    pub async fn len(&self) -> usize {
        self.store.read(|file| file.tokens.len()).await
    }
}
