//! Standard paths used by hostbridge

use std::path::{Path, PathBuf};

/// Standard hostbridge paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory (~/.config/hostbridge)
    pub config: PathBuf,
    /// Data directory (~/.local/share/hostbridge)
    pub data: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("hostbridge");

        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("hostbridge");

        Self { config, data }
    }

    /// Keep config and data under a single root (used by tests and portable installs)
    pub fn with_root(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            data: root.join("data"),
        }
    }

    /// Override individual directories
    pub fn with_dirs(config: Option<PathBuf>, data: Option<PathBuf>) -> Self {
        let defaults = Self::new();
        Self {
            config: config.unwrap_or(defaults.config),
            data: data.unwrap_or(defaults.data),
        }
    }

    /// Active policy snapshot
    pub fn policy_file(&self) -> PathBuf {
        self.config.join("policy.yaml")
    }

    /// Per-site static keys
    pub fn site_keys_file(&self) -> PathBuf {
        self.config.join("site-keys.json")
    }

    /// Issued bearer tokens
    pub fn token_store(&self) -> PathBuf {
        self.config.join("tokens.json")
    }

    /// Theme, log retention and always-allow rules
    pub fn app_config_file(&self) -> PathBuf {
        self.config.join("app-config.json")
    }

    /// Secret the desktop shell uses for confirmations and policy edits
    pub fn admin_token_file(&self) -> PathBuf {
        self.config.join("admin.token")
    }

    /// Daily audit logs
    pub fn audit_dir(&self) -> PathBuf {
        self.data.join("audit")
    }

    /// Copies taken before overwriting files
    pub fn backup_dir(&self) -> PathBuf {
        self.data.join("backups")
    }
}
