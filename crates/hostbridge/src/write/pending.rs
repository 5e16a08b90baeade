//! Time-limited store for prepared operations
//!
//! Entries are keyed by a generated id. Expiry is checked lazily on every
//! access and proactively by [`PendingStore::sweep`], which the daemon runs
//! on an interval. Taking an entry validates and removes it inside one
//! critical section, so two concurrent commits of the same id can never both
//! succeed.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// A stored operation with its lifetime
#[derive(Debug, Clone)]
pub struct Pending<T> {
    pub op: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> Pending<T> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Map of pending operations with TTL
#[derive(Debug)]
pub struct PendingStore<T> {
    entries: Mutex<HashMap<String, Pending<T>>>,
}

impl<T> Default for PendingStore<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `op` under a fresh id
    pub fn insert(&self, op: T, ttl: Duration) -> Result<(String, DateTime<Utc>)> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or_else(|| BridgeError::InvalidInput(format!("pending lifetime {} is out of range", ttl)))?;
        self.lock().insert(
            id.clone(),
            Pending {
                op,
                created_at,
                expires_at,
            },
        );
        Ok((id, expires_at))
    }

    /// Remove and return the op if it exists, is live, and passes `check`.
    ///
    /// When `check` fails the entry stays in place and its error is returned.
    pub fn take_if<F>(&self, id: &str, check: F) -> Result<Pending<T>>
    where
        F: FnOnce(&T) -> Result<()>,
    {
        let now = Utc::now();
        let mut entries = self.lock();

        let expired = match entries.get(id) {
            None => return Err(BridgeError::NotFound(format!("pending operation {}", id))),
            Some(pending) => pending.is_expired(now),
        };
        if expired {
            entries.remove(id);
            return Err(BridgeError::NotFound(format!("pending operation {} expired", id)));
        }

        if let Some(pending) = entries.get(id) {
            check(&pending.op)?;
        }

        entries
            .remove(id)
            .ok_or_else(|| BridgeError::NotFound(format!("pending operation {}", id)))
    }

    /// Drop every expired entry, returning how many were freed
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, pending| !pending.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }
}
