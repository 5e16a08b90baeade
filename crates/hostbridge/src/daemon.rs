//! The dispatcher that sits between the transports and the components
//!
//! Every command goes through the same sequence: capture the active policy
//! snapshot, authenticate, check the site, check paths and toggles, pass the
//! confirmation gate, run, redact, audit. The outcome always becomes a
//! [`CommandResponse`], never a transport error.

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hostbridge_core::Paths;

use crate::app_config::AppConfigStore;
use crate::audit::{AuditEntry, AuditLogger};
use crate::auth::{constant_time_eq, random_hex, PairCodeManager, SiteKeyManager, TokenManager};
use crate::budget::cap_text;
use crate::command::{
    describe, parse_args, ChmodArgs, Command, CommandRequest, CommandResponse, DiffArgs, LsArgs,
    MvArgs, PathArgs, RecursiveArgs, SearchArgs,
};
use crate::confirm::{ConfirmationEntry, ConfirmationManager};
use crate::error::{BridgeError, Result};
use crate::fs_service::DiffAgainst;
use crate::policy::validate::{ttl_days, ttl_secs};
use crate::policy::{Components, PolicyConfig, PolicyRuntimeManager, SharedState};
use crate::process::{ExecRequest, RunRequest};
use crate::redact::Redactor;
use crate::write::{BatchPrepareRequest, WriteCommitRequest, WritePrepareRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct PairRequest {
    pub code: String,
    pub site: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub site_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub id: String,
    pub approved: bool,
    #[serde(default)]
    pub always_allow: bool,
}

/// A successful command before it is wrapped and audited
struct Handled {
    data: Value,
    bytes: u64,
    truncated: bool,
    confirmed: Option<bool>,
}

impl Handled {
    fn new<T: Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_value(value)
            .map_err(|e| BridgeError::Internal(format!("serialize result: {}", e)))?;
        Ok(Self {
            data,
            bytes: 0,
            truncated: false,
            confirmed: None,
        })
    }

    fn bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    fn truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }
}

pub struct Daemon {
    runtime: PolicyRuntimeManager,
    pair_codes: PairCodeManager,
    tokens: TokenManager,
    site_keys: SiteKeyManager,
    confirmations: ConfirmationManager,
    app_config: Arc<AppConfigStore>,
    audit: AuditLogger,
    admin_token: String,
}

impl Daemon {
    /// Load the policy from disk (writing defaults on first run) and open every store
    pub async fn open(paths: &Paths) -> AnyResult<Self> {
        let policy_file = paths.policy_file();
        let policy = PolicyConfig::load_from(&policy_file)?;
        if !policy_file.exists() {
            policy.save_to(&policy_file)?;
            info!("Wrote default policy to {}", policy_file.display());
        }
        Self::with_policy(paths, policy).await
    }

    pub async fn with_policy(paths: &Paths, policy: PolicyConfig) -> AnyResult<Self> {
        let runtime = PolicyRuntimeManager::new(
            policy,
            SharedState::new(paths.backup_dir()),
            Some(paths.policy_file()),
        )
        .map_err(|e| match e.data() {
            Some(details) => anyhow::anyhow!("{} {}", e, details),
            None => anyhow::anyhow!("{}", e),
        })
        .context("Failed to activate policy")?;
        let pair_ttl = ttl_secs(
            "auth.pair_code_ttl_secs",
            runtime.current().policy.auth.pair_code_ttl_secs,
        )
        .map_err(|e| anyhow::anyhow!("{}", e))?;

        let app_config = Arc::new(AppConfigStore::open(&paths.app_config_file())?);
        let admin_token = write_admin_token(&paths.admin_token_file()).await?;

        Ok(Self {
            runtime,
            pair_codes: PairCodeManager::new(pair_ttl),
            tokens: TokenManager::open(&paths.token_store())?,
            site_keys: SiteKeyManager::open(&paths.site_keys_file())?,
            confirmations: ConfirmationManager::new(app_config.clone()),
            app_config,
            audit: AuditLogger::new(paths.audit_dir()),
            admin_token,
        })
    }

    pub fn runtime(&self) -> &PolicyRuntimeManager {
        &self.runtime
    }

    pub fn app_config(&self) -> &AppConfigStore {
        &self.app_config
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// The code the user types into the browser
    pub fn pair_code(&self) -> (String, DateTime<Utc>) {
        self.pair_codes.current()
    }

    /// Exchange a pair code for a bearer token and the site's key
    pub async fn pair(&self, req: &PairRequest) -> Result<PairResponse> {
        let components = self.runtime.current();
        components.paths.assert_site_allowed(&req.site)?;

        if !self.pair_codes.verify(&req.code) {
            warn!("Rejected pairing attempt from {}", req.site);
            return Err(BridgeError::PairingFailed);
        }

        let ttl = ttl_days("auth.token_ttl_days", components.policy.auth.token_ttl_days)?;
        let record = self.tokens.issue(ttl, Some(req.site.as_str())).await?;
        let site_key = self.site_keys.key_for(&req.site).await?;
        info!("Paired {} (token expires {})", req.site, record.expires_at);

        Ok(PairResponse {
            token: record.token,
            expires_at: record.expires_at,
            site_key,
        })
    }

    /// Check the bearer token, the site allowlist and, when required, the site key
    pub async fn authenticate(
        &self,
        components: &Components,
        token: Option<&str>,
        site: &str,
        site_key: Option<&str>,
    ) -> Result<()> {
        let token =
            token.ok_or_else(|| BridgeError::Unauthorized("missing bearer token".to_string()))?;
        if !self.tokens.verify(token).await? {
            return Err(BridgeError::Unauthorized(
                "token is invalid or expired".to_string(),
            ));
        }

        components.paths.assert_site_allowed(site)?;

        if components.policy.auth.require_site_key {
            let valid = match site_key {
                Some(key) => self.site_keys.verify(site, key).await,
                None => false,
            };
            if !valid {
                return Err(BridgeError::Unauthorized(format!(
                    "missing or invalid site key for {}",
                    site
                )));
            }
        }
        Ok(())
    }

    /// Secret required by the local management endpoints
    pub fn verify_admin(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) if constant_time_eq(token, &self.admin_token) => Ok(()),
            _ => Err(BridgeError::Unauthorized("admin token required".to_string())),
        }
    }

    /// Run one command and produce its envelope
    pub async fn handle(
        &self,
        req: CommandRequest,
        token: Option<&str>,
        site_key: Option<&str>,
    ) -> CommandResponse {
        let components = self.runtime.current();
        let trace_id = if req.trace_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            req.trace_id.clone()
        };

        let entry = AuditEntry::new(&trace_id, &req.site, &req.command).with_path(primary_path(&req));
        let audit_id = entry.audit_id.clone();

        let result = self
            .dispatch(&components, &req, &trace_id, token, site_key)
            .await;

        let (entry, response) = match result {
            Ok(handled) => {
                debug!("{} ok (trace {})", req.command, trace_id);
                (
                    entry
                        .with_bytes(handled.bytes, handled.truncated)
                        .with_confirmation(handled.confirmed),
                    CommandResponse::success(audit_id, handled.data, handled.truncated),
                )
            }
            Err(err) => {
                warn!("{} failed (trace {}): {}", req.command, trace_id, err);
                let response = CommandResponse::failure(audit_id, &err);
                (entry.failed(&err), response)
            }
        };

        if components.policy.audit.enabled {
            if let Err(e) = self.audit.log(&entry).await {
                warn!("Failed to write audit entry: {:#}", e);
            }
        }
        response
    }

    async fn dispatch(
        &self,
        components: &Components,
        req: &CommandRequest,
        trace_id: &str,
        token: Option<&str>,
        site_key: Option<&str>,
    ) -> Result<Handled> {
        self.authenticate(components, token, &req.site, site_key)
            .await?;

        let command = Command::parse(&req.command).ok_or_else(|| {
            BridgeError::InvalidInput(format!("unknown command: {}", req.command))
        })?;
        let mut args = match &req.args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return Err(BridgeError::InvalidInput(
                    "args must be an object".to_string(),
                ))
            }
        };
        let confirmation_id = args.remove("confirmationId");

        preflight(components, command, &args)?;
        let confirmed = self
            .confirm(&components.policy, command, &req.site, &args, confirmation_id)
            .await?;

        let mut handled = self
            .execute(components, command, &args, trace_id, &req.site)
            .await?;
        redact_value(&components.redactor, &mut handled.data);
        if confirmed.is_some() {
            handled.confirmed = confirmed;
        }
        Ok(handled)
    }

    /// Gate `command` behind a human approval when the policy asks for one.
    ///
    /// Returns `Some(true)` when an approval or always-allow rule was used.
    async fn confirm(
        &self,
        policy: &PolicyConfig,
        command: Command,
        site: &str,
        args: &Map<String, Value>,
        confirmation_id: Option<Value>,
    ) -> Result<Option<bool>> {
        let tool = command.name();
        if !policy.requires_confirmation(tool) {
            return Ok(None);
        }
        if self.confirmations.should_skip_confirmation(site, tool).await {
            debug!("{} always allowed for {}", tool, site);
            return Ok(Some(true));
        }

        let payload = Value::Object(args.clone());
        match confirmation_id {
            Some(Value::String(id)) => {
                self.confirmations
                    .consume_approval(&id, site, tool, &payload)?;
                Ok(Some(true))
            }
            Some(_) => Err(BridgeError::InvalidInput(
                "confirmationId must be a string".to_string(),
            )),
            None => {
                let ttl = ttl_secs("confirmation.ttl_secs", policy.confirmation.ttl_secs)?;
                let entry = self.confirmations.create_pending(
                    site,
                    tool,
                    &describe(command, args),
                    payload,
                    ttl,
                );
                info!("Awaiting approval {}: {}", entry.id, entry.summary);
                Err(BridgeError::ConfirmationRequired {
                    message: format!("{} needs user approval", tool),
                    confirmation_id: Some(entry.id),
                })
            }
        }
    }

    async fn execute(
        &self,
        components: &Components,
        command: Command,
        args: &Map<String, Value>,
        trace_id: &str,
        site: &str,
    ) -> Result<Handled> {
        let files = &components.files;
        let policy = &components.policy;

        match command {
            Command::Ls => {
                let a: LsArgs = parse_args(args)?;
                let listing = files.ls(&a.path, a.depth).await?;
                Ok(Handled::new(&listing)?.truncated(listing.truncated))
            }
            Command::Mkdir => {
                let a: RecursiveArgs = parse_args(args)?;
                Handled::new(&files.mkdir(&a.path, a.recursive).await?)
            }
            Command::Read => {
                let a: PathArgs = parse_args(args)?;
                let mut file = files.read(&a.path).await?;
                let redacted = components.redactor.redact(&file.content);
                let (content, capped) = cap_text(
                    &redacted.text,
                    policy.limits.max_file_bytes as usize,
                    policy.limits.max_injected_tokens,
                );
                file.content = content;
                file.truncated |= capped;
                Ok(Handled::new(&file)?
                    .bytes(file.content.len() as u64)
                    .truncated(file.truncated))
            }
            Command::Search => {
                let a: SearchArgs = parse_args(args)?;
                let result = files.search(&a.path, &a.query).await?;
                Ok(Handled::new(&result)?.truncated(result.truncated))
            }
            Command::Rm => {
                let a: RecursiveArgs = parse_args(args)?;
                Handled::new(&files.rm(&a.path, a.recursive).await?)
            }
            Command::Mv => {
                let a: MvArgs = parse_args(args)?;
                Handled::new(&files.mv(&a.from, &a.to, a.overwrite).await?)
            }
            Command::Chmod => {
                let a: ChmodArgs = parse_args(args)?;
                Handled::new(&files.chmod(&a.path, &a.mode).await?)
            }
            Command::Diff => {
                let a: DiffArgs = parse_args(args)?;
                let against = match (a.content, a.other_path) {
                    (Some(content), None) => DiffAgainst::Content(content),
                    (None, Some(other)) => DiffAgainst::Path(other),
                    _ => {
                        return Err(BridgeError::InvalidInput(
                            "give exactly one of content or otherPath".to_string(),
                        ))
                    }
                };
                Handled::new(&files.diff(&a.path, against).await?)
            }
            Command::WritePrepare => {
                let req: WritePrepareRequest = parse_args(args)?;
                Handled::new(&components.writes.prepare(req, trace_id, site)?)
            }
            Command::WriteCommit => {
                let req: WriteCommitRequest = parse_args(args)?;
                let outcome = components.writes.commit(&req, site).await?;
                let mut handled = Handled::new(&outcome)?.bytes(outcome.bytes_written);
                handled.confirmed = Some(req.confirmed_by_user);
                Ok(handled)
            }
            Command::BatchPrepare => {
                let req: BatchPrepareRequest = parse_args(args)?;
                Handled::new(&components.batches.prepare(req, trace_id, site)?)
            }
            Command::BatchCommit => {
                let req: WriteCommitRequest = parse_args(args)?;
                let result = components.batches.commit(&req, site).await?;
                let bytes = result.files.iter().map(|f| f.bytes_written).sum();
                let mut handled = Handled::new(&result)?.bytes(bytes);
                handled.confirmed = Some(req.confirmed_by_user);
                Ok(handled)
            }
            Command::ProcessRun => {
                let req: RunRequest = parse_args(args)?;
                let output = components.processes.run(req).await?;
                let bytes = (output.stdout.len() + output.stderr.len()) as u64;
                Ok(Handled::new(&output)?.bytes(bytes).truncated(output.truncated))
            }
            Command::ShellExec => {
                let req: ExecRequest = parse_args(args)?;
                let output = components.processes.exec(req).await?;
                let bytes = (output.stdout.len() + output.stderr.len()) as u64;
                Ok(Handled::new(&output)?.bytes(bytes).truncated(output.truncated))
            }
        }
    }

    pub fn list_confirmations(&self) -> Vec<ConfirmationEntry> {
        self.confirmations.list()
    }

    pub async fn resolve_confirmation(&self, req: &ResolveRequest) -> Result<ConfirmationEntry> {
        self.confirmations
            .resolve(&req.id, req.approved, req.always_allow)
            .await
    }

    pub fn policy(&self) -> Arc<PolicyConfig> {
        self.runtime.policy()
    }

    pub async fn patch_policy(&self, patch: &Value) -> Result<Arc<PolicyConfig>> {
        self.runtime.apply_patch(patch).await
    }

    /// Free expired pending writes, batches and confirmations
    pub fn sweep(&self) -> usize {
        self.runtime.sweep() + self.confirmations.sweep()
    }
}

/// Reject disabled commands and disallowed paths before asking anyone to approve them
fn preflight(components: &Components, command: Command, args: &Map<String, Value>) -> Result<()> {
    let policy = &components.policy;
    let disabled = match command {
        Command::Rm => !policy.mutations.rm_enabled,
        Command::Mv => !policy.mutations.mv_enabled,
        Command::Chmod => !policy.mutations.chmod_enabled,
        Command::BatchPrepare | Command::BatchCommit => !policy.mutations.batch_enabled,
        Command::ProcessRun | Command::ShellExec => !policy.process.enabled,
        _ => false,
    };
    if disabled {
        return Err(BridgeError::Forbidden(format!(
            "{} is disabled by policy",
            command.name()
        )));
    }

    for name in command.path_args() {
        if let Some(raw) = args.get(*name).and_then(Value::as_str) {
            components.paths.assert_allowed(raw)?;
        }
    }
    Ok(())
}

fn primary_path(req: &CommandRequest) -> Option<String> {
    ["path", "from"]
        .iter()
        .find_map(|name| req.args.get(*name).and_then(Value::as_str))
        .map(str::to_string)
}

/// Scrub every string inside `value`
fn redact_value(redactor: &Redactor, value: &mut Value) {
    match value {
        Value::String(text) => {
            let redacted = redactor.redact(text);
            if redacted.changed {
                *text = redacted.text;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| redact_value(redactor, v)),
        Value::Object(map) => map.values_mut().for_each(|v| redact_value(redactor, v)),
        _ => {}
    }
}

/// Issue a fresh admin secret for this run, readable only by the owner
async fn write_admin_token(path: &Path) -> AnyResult<String> {
    let token = random_hex(24);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, &token)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    crate::store::restrict_permissions(path).await;
    Ok(token)
}
