//! Audit logging for every command the daemon handles
//!
//! Storage: `<data>/audit/YYYY-MM-DD.jsonl`, one JSON object per line, one
//! file per UTC day. Entries are only ever appended; retention belongs to
//! whoever owns the data directory.

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{BridgeError, ErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Error,
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub audit_id: String,
    pub trace_id: String,
    pub site: String,
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub outcome: Outcome,

    /// Bytes read, written or produced
    #[serde(default)]
    pub bytes: u64,

    #[serde(default)]
    pub truncated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_confirmed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditEntry {
    /// A successful entry with a fresh audit id
    pub fn new(trace_id: &str, site: &str, command: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            audit_id: Uuid::new_v4().to_string(),
            trace_id: trace_id.to_string(),
            site: site.to_string(),
            command: command.to_string(),
            path: None,
            outcome: Outcome::Ok,
            bytes: 0,
            truncated: false,
            user_confirmed: None,
            error_code: None,
            error_message: None,
        }
    }

    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    pub fn with_bytes(mut self, bytes: u64, truncated: bool) -> Self {
        self.bytes = bytes;
        self.truncated = truncated;
        self
    }

    pub fn with_confirmation(mut self, confirmed: Option<bool>) -> Self {
        self.user_confirmed = confirmed;
        self
    }

    pub fn failed(mut self, err: &BridgeError) -> Self {
        self.outcome = Outcome::Error;
        self.error_code = Some(err.code());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Append-only per-day audit log
#[derive(Debug)]
pub struct AuditLogger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append an entry to the file for its day
    pub async fn log(&self, entry: &AuditEntry) -> AnyResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let path = self.day_file(entry.timestamp.date_naive());

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create audit dir {:?}", self.dir))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open audit log at {:?}", path))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every readable entry recorded on `date`, oldest first
    pub async fn read_day(&self, date: NaiveDate) -> AnyResult<Vec<AuditEntry>> {
        let path = self.day_file(date);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
