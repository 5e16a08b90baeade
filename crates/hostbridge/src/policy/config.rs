//! Policy configuration
//!
//! Stored as `policy.yaml` in the hostbridge config directory. A loaded
//! [`PolicyConfig`] is never mutated: runtime changes produce a new snapshot
//! (see [`crate::policy::runtime`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::redact::RedactionRule;

/// Process-wide policy snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Directories the daemon may touch (and everything below them)
    #[serde(default)]
    pub roots: Vec<String>,

    /// Globs, relative to a root, that are never accessible
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,

    /// Chat sites allowed to talk to the daemon
    #[serde(default = "default_sites")]
    pub sites: Vec<String>,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub write: WriteRules,

    #[serde(default)]
    pub mutations: MutationToggles,

    #[serde(default)]
    pub process: ProcessRules,

    #[serde(default)]
    pub confirmation: ConfirmationRules,

    /// Applied in order to all text leaving the daemon
    #[serde(default = "default_redaction")]
    pub redaction: Vec<RedactionRule>,

    #[serde(default)]
    pub audit: AuditRules,

    #[serde(default)]
    pub auth: AuthRules,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            deny: default_deny(),
            sites: default_sites(),
            limits: Limits::default(),
            write: WriteRules::default(),
            mutations: MutationToggles::default(),
            process: ProcessRules::default(),
            confirmation: ConfirmationRules::default(),
            redaction: default_redaction(),
            audit: AuditRules::default(),
            auth: AuthRules::default(),
        }
    }
}

impl PolicyConfig {
    /// Load from a specific path, falling back to defaults when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read policy from {:?}", path))?;
            let config: Self = serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse policy from {:?}", path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether `tool` needs a human approval before it runs
    pub fn requires_confirmation(&self, tool: &str) -> bool {
        self.confirmation.tools.iter().any(|t| t == tool)
    }
}

fn default_deny() -> Vec<String> {
    [
        "**/.git",
        "**/.git/**",
        "**/.ssh",
        "**/.ssh/**",
        "**/.env",
        "**/.env.*",
        "**/*.pem",
        "**/id_rsa*",
        "**/id_ed25519*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sites() -> Vec<String> {
    [
        "chatgpt.com",
        "chat.openai.com",
        "claude.ai",
        "gemini.google.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_redaction() -> Vec<RedactionRule> {
    RedactionRule::defaults()
}

/// Numeric caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Largest file the daemon reads in full or writes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Rough budget for text handed back into a chat (4 bytes per token)
    #[serde(default = "default_max_injected_tokens")]
    pub max_injected_tokens: u64,

    #[serde(default = "default_max_search_matches")]
    pub max_search_matches: usize,
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_max_injected_tokens() -> u64 {
    32_000
}

fn default_max_search_matches() -> usize {
    200
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_injected_tokens: default_max_injected_tokens(),
            max_search_matches: default_max_search_matches(),
        }
    }
}

/// Rules for prepared writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRules {
    /// Whether commits need explicit user confirmation by default
    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    /// Whether a caller may ask to skip confirmation
    #[serde(default)]
    pub allow_disable_confirmation: bool,

    /// Copy existing files aside before overwriting them
    #[serde(default = "default_true")]
    pub backup_on_overwrite: bool,

    /// Seconds a prepared write stays committable
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_pending_ttl_secs() -> u64 {
    300
}

impl Default for WriteRules {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            allow_disable_confirmation: false,
            backup_on_overwrite: true,
            pending_ttl_secs: default_pending_ttl_secs(),
        }
    }
}

/// Switches for destructive filesystem commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationToggles {
    #[serde(default)]
    pub rm_enabled: bool,
    #[serde(default)]
    pub mv_enabled: bool,
    #[serde(default)]
    pub chmod_enabled: bool,
    #[serde(default = "default_true")]
    pub batch_enabled: bool,
}

impl Default for MutationToggles {
    fn default() -> Self {
        Self {
            rm_enabled: false,
            mv_enabled: false,
            chmod_enabled: false,
            batch_enabled: true,
        }
    }
}

/// Rules for the process runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessRules {
    #[serde(default)]
    pub enabled: bool,

    /// Executable base names (no extension, case-insensitive)
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Working directories processes may start in; empty means any allowed root
    #[serde(default)]
    pub allowed_cwds: Vec<String>,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Shared stdout + stderr budget before the child is killed
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Caller environment variables that survive into the child
    #[serde(default)]
    pub allowed_env: Vec<String>,
}

fn default_allowed_commands() -> Vec<String> {
    ["git", "ls", "cat", "echo", "node", "npm", "python", "python3", "cargo"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    120_000
}

fn default_max_output_bytes() -> usize {
    256 * 1024
}

impl Default for ProcessRules {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_commands: default_allowed_commands(),
            allowed_cwds: Vec::new(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            allowed_env: Vec::new(),
        }
    }
}

/// Which tools go through the human confirmation gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmationRules {
    #[serde(default = "default_confirmation_tools")]
    pub tools: Vec<String>,

    #[serde(default = "default_confirmation_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_confirmation_tools() -> Vec<String> {
    ["fs.rm", "fs.mv", "fs.chmod", "process.run", "shell.exec"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_confirmation_ttl_secs() -> u64 {
    120
}

impl Default for ConfirmationRules {
    fn default() -> Self {
        Self {
            tools: default_confirmation_tools(),
            ttl_secs: default_confirmation_ttl_secs(),
        }
    }
}

/// Audit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditRules {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AuditRules {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Lifetimes of pairing material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthRules {
    #[serde(default = "default_pair_code_ttl_secs")]
    pub pair_code_ttl_secs: u64,

    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: u64,

    /// Require the per-site key on every authenticated command
    #[serde(default)]
    pub require_site_key: bool,
}

fn default_pair_code_ttl_secs() -> u64 {
    300
}

fn default_token_ttl_days() -> u64 {
    30
}

impl Default for AuthRules {
    fn default() -> Self {
        Self {
            pair_code_ttl_secs: default_pair_code_ttl_secs(),
            token_ttl_days: default_token_ttl_days(),
            require_site_key: false,
        }
    }
}
