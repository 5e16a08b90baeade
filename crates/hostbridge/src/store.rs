//! Single-writer JSON snapshot files
//!
//! A [`JsonStore`] owns one file on disk and the deserialized value in
//! memory. All reads and writes go through one async mutex, so a
//! read-modify-write cycle can never interleave with another one in this
//! process. Writes land via a temp file and a rename.

use anyhow::{Context, Result as AnyResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::{BridgeError, Result};

#[derive(Debug)]
pub struct JsonStore<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load `path`, or start from `T::default()` when it doesn't exist yet
    pub fn open(path: &Path) -> AnyResult<Self> {
        let value = if path.exists() {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            T::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(value),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the current value
    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    /// Mutate the value and persist it
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.update_if(|value| (f(value), true)).await
    }

    /// Mutate the value; persist only when `f` reports a change
    pub async fn update_if<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> Result<R> {
        let mut state = self.state.lock().await;
        let (result, dirty) = f(&mut state);
        if dirty {
            self.persist(&state).await?;
        }
        Ok(result)
    }

    async fn persist(&self, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| BridgeError::Internal(format!("serialize {}: {}", self.path.display(), e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BridgeError::from_io(parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| BridgeError::from_io(&tmp, e))?;
        restrict_permissions(&tmp).await;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| BridgeError::from_io(&self.path, e))?;
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .ok();
}

#[cfg(not(unix))]
pub(crate) async fn restrict_permissions(_path: &Path) {}
