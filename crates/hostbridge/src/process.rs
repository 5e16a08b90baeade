//! Sandboxed process execution
//!
//! [`ProcessRunner::run`] spawns a literal argument vector, so the
//! allowlist check covers exactly what runs. [`ProcessRunner::exec`] hands a
//! whole line to the platform shell and only checks its first token; the
//! rest is shell syntax (pipes, `&&`, substitutions) and is not inspected.
//! Treat `exec` as a strictly weaker guarantee and keep it behind
//! confirmation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::budget::cap_text;
use crate::error::{BridgeError, Result};
use crate::path_policy::PathPolicy;
use crate::policy::validate::MIN_TIMEOUT_MS;
use crate::policy::PolicyConfig;
use crate::redact::Redactor;

const READ_CHUNK: usize = 8 * 1024;

#[cfg(unix)]
const BASE_ENV: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

#[cfg(windows)]
const BASE_ENV: &[&str] = &["PATH", "PATHEXT", "SYSTEMROOT", "COMSPEC", "TEMP", "TMP", "USERPROFILE"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    /// `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
    pub redacted: bool,
    pub duration_ms: u64,
}

pub struct ProcessRunner {
    policy: Arc<PolicyConfig>,
    paths: Arc<PathPolicy>,
    redactor: Arc<Redactor>,
}

impl ProcessRunner {
    pub fn new(policy: Arc<PolicyConfig>, paths: Arc<PathPolicy>, redactor: Arc<Redactor>) -> Self {
        Self {
            policy,
            paths,
            redactor,
        }
    }

    /// Spawn an allow-listed executable with a literal argument vector
    pub async fn run(&self, req: RunRequest) -> Result<ProcessOutput> {
        self.ensure_enabled()?;
        self.check_command(&req.command)?;
        let cwd = self.resolve_cwd(req.cwd.as_deref())?;
        let timeout = self.clamp_timeout(req.timeout_ms);

        let mut cmd = Command::new(&req.command);
        cmd.args(&req.args);
        debug!("run {} {:?} in {}", req.command, req.args, cwd.display());
        self.execute(cmd, &req.command, &cwd, timeout, &req.env).await
    }

    /// Run a shell line whose first token is allow-listed
    pub async fn exec(&self, req: ExecRequest) -> Result<ProcessOutput> {
        self.ensure_enabled()?;
        let program = first_token(&req.command)
            .ok_or_else(|| BridgeError::InvalidInput("command is empty".to_string()))?;
        self.check_command(&program)?;
        let cwd = self.resolve_cwd(req.cwd.as_deref())?;
        let timeout = self.clamp_timeout(req.timeout_ms);

        let cmd = shell_command(&req.command);
        debug!("exec {:?} in {}", req.command, cwd.display());
        self.execute(cmd, &program, &cwd, timeout, &req.env).await
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.policy.process.enabled {
            Ok(())
        } else {
            Err(BridgeError::Forbidden(
                "process execution is disabled by policy".to_string(),
            ))
        }
    }

    fn check_command(&self, command: &str) -> Result<()> {
        if command.contains(['/', '\\']) {
            return Err(BridgeError::Forbidden(format!(
                "'{}' must be a bare command name",
                command
            )));
        }
        let name = command_name(command);
        let allowed = self
            .policy
            .process
            .allowed_commands
            .iter()
            .any(|c| command_name(c) == name);
        if allowed {
            Ok(())
        } else {
            warn!("Rejected command '{}': not allow-listed", command);
            Err(BridgeError::Forbidden(format!(
                "command '{}' is not allow-listed",
                name
            )))
        }
    }

    fn resolve_cwd(&self, raw: Option<&str>) -> Result<PathBuf> {
        let cwd = match raw {
            Some(raw) => self.paths.assert_allowed(raw)?,
            None => {
                let root = self.paths.roots().first().ok_or_else(|| {
                    BridgeError::PolicyBlocked("no allowed roots are configured".to_string())
                })?;
                PathBuf::from(root)
            }
        };

        let allowed_cwds = &self.policy.process.allowed_cwds;
        if !allowed_cwds.is_empty() {
            let cwd_str = cwd.to_string_lossy();
            let permitted = allowed_cwds.iter().any(|dir| {
                self.paths
                    .resolve_input_path(dir)
                    .is_ok_and(|dir| self.paths.is_within(&cwd_str, &dir))
            });
            if !permitted {
                return Err(BridgeError::PolicyBlocked(format!(
                    "{} is not an allowed working directory",
                    cwd.display()
                )));
            }
        }
        Ok(cwd)
    }

    fn clamp_timeout(&self, requested: Option<u64>) -> Duration {
        let rules = &self.policy.process;
        let ms = requested
            .unwrap_or(rules.default_timeout_ms)
            .clamp(MIN_TIMEOUT_MS, rules.max_timeout_ms.max(MIN_TIMEOUT_MS));
        Duration::from_millis(ms)
    }

    fn child_env(&self, requested: &HashMap<String, String>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = BASE_ENV
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|v| (name.to_string(), v)))
            .collect();
        let allowed = &self.policy.process.allowed_env;
        for (name, value) in requested {
            if allowed.iter().any(|a| a == name) {
                env.push((name.clone(), value.clone()));
            } else {
                debug!("Dropping env var {} (not allow-listed)", name);
            }
        }
        env
    }

    async fn execute(
        &self,
        mut cmd: Command,
        program: &str,
        cwd: &Path,
        timeout: Duration,
        env: &HashMap<String, String>,
    ) -> Result<ProcessOutput> {
        cmd.current_dir(cwd)
            .env_clear()
            .envs(self.child_env(env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::InvalidInput(format!("failed to start {}: {}", program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Internal("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Internal("child stderr not captured".to_string()))?;

        let budget = self.policy.process.max_output_bytes;
        let mut capture = Capture::new(budget);
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let (mut out_open, mut err_open) = (true, true);
        let mut timed_out = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        while (out_open || err_open) && !capture.overflowed {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read {
                    Ok(0) | Err(_) => out_open = false,
                    Ok(n) => capture.push(Stream::Stdout, &out_buf[..n]),
                },
                read = stderr.read(&mut err_buf), if err_open => match read {
                    Ok(0) | Err(_) => err_open = false,
                    Ok(n) => capture.push(Stream::Stderr, &err_buf[..n]),
                },
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
            }
        }

        let status = if timed_out || capture.overflowed {
            kill_tree(&mut child);
            child.wait().await.ok()
        } else {
            tokio::select! {
                status = child.wait() => status.ok(),
                _ = &mut deadline => {
                    timed_out = true;
                    kill_tree(&mut child);
                    child.wait().await.ok()
                }
            }
        };

        if timed_out {
            warn!("{} timed out after {}ms; killed", program, timeout.as_millis());
        } else if capture.overflowed {
            warn!("{} exceeded {} output bytes; killed", program, budget);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let max_tokens = self.policy.limits.max_injected_tokens;

        let stdout = self.redactor.redact(&String::from_utf8_lossy(&capture.stdout));
        let stderr = self.redactor.redact(&String::from_utf8_lossy(&capture.stderr));
        let (stdout_text, stdout_cut) = cap_text(&stdout.text, budget, max_tokens);
        let (stderr_text, stderr_cut) = cap_text(&stderr.text, budget, max_tokens);

        Ok(ProcessOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout: stdout_text,
            stderr: stderr_text,
            timed_out,
            truncated: capture.overflowed || stdout_cut || stderr_cut,
            redacted: stdout.changed || stderr.changed,
            duration_ms,
        })
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// stdout and stderr drawing from one byte budget
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    remaining: usize,
    overflowed: bool,
}

impl Capture {
    fn new(budget: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            remaining: budget,
            overflowed: false,
        }
    }

    fn push(&mut self, stream: Stream, chunk: &[u8]) {
        let take = chunk.len().min(self.remaining);
        let target = match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        };
        target.extend_from_slice(&chunk[..take]);
        self.remaining -= take;
        if take < chunk.len() {
            self.overflowed = true;
        }
    }
}

/// Kill the child and every process it started in its group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own process group, so its pid is the group id
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    child.start_kill().ok();
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

/// Lowercased base name without extension
fn command_name(command: &str) -> String {
    let trimmed = command.trim();
    Path::new(trimmed)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| trimmed.to_lowercase())
}

/// First whitespace- or quote-delimited token of a shell line
fn first_token(line: &str) -> Option<String> {
    let line = line.trim_start();
    let mut chars = line.chars();
    let first = chars.next()?;

    let token: String = if first == '"' || first == '\'' {
        chars.take_while(|c| *c != first).collect()
    } else {
        line.chars()
            .take_while(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
            .collect()
    };

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::RedactionRule;
    use tempfile::TempDir;

    fn runner_at(root: TempDir, configure: impl FnOnce(&mut PolicyConfig)) -> (ProcessRunner, TempDir) {
        let mut policy = PolicyConfig {
            roots: vec![root.path().to_string_lossy().to_string()],
            ..PolicyConfig::default()
        };
        policy.process.enabled = true;
        configure(&mut policy);

        let paths = Arc::new(PathPolicy::new(&policy).unwrap());
        let redactor = Arc::new(Redactor::new(&RedactionRule::defaults()).unwrap());
        (ProcessRunner::new(Arc::new(policy), paths, redactor), root)
    }

    fn runner(configure: impl FnOnce(&mut PolicyConfig)) -> (ProcessRunner, TempDir) {
        runner_at(tempfile::tempdir().unwrap(), configure)
    }

    fn run_req(command: &str, args: &[&str]) -> RunRequest {
        RunRequest {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..RunRequest::default()
        }
    }

    #[test]
    fn test_first_token() {
        assert_eq!(first_token("  git status").as_deref(), Some("git"));
        assert_eq!(first_token("\"my tool\" --flag").as_deref(), Some("my tool"));
        assert_eq!(first_token("ls\"x\"").as_deref(), Some("ls"));
        assert_eq!(first_token("   "), None);
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("Git.EXE"), "git");
        assert_eq!(command_name("python3"), "python3");
    }

    #[test]
    fn test_timeout_clamped() {
        let (runner, _root) = runner(|p| p.process.max_timeout_ms = 5_000);
        assert_eq!(runner.clamp_timeout(Some(1)), Duration::from_millis(100));
        assert_eq!(runner.clamp_timeout(Some(60_000)), Duration::from_millis(5_000));
        assert_eq!(runner.clamp_timeout(None), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn test_disabled_by_policy() {
        let (runner, _root) = runner(|p| p.process.enabled = false);
        let err = runner.run(run_req("echo", &["hi"])).await.unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_not_allowlisted_never_spawns() {
        let (runner, root) = runner(|_| {});
        let marker = root.path().join("marker");
        let err = runner
            .run(run_req("touch", &[marker.to_str().unwrap()]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
        assert!(!marker.exists());

        let err = runner.run(run_req("/bin/echo", &["x"])).await.unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let (runner, _root) = runner(|_| {});
        let output = runner.run(run_req("echo", &["hello", "world"])).await.unwrap();
        assert_eq!(output.stdout, "hello world\n");
        assert_eq!(output.exit_code, Some(0));
        assert!(!output.timed_out);
        assert!(!output.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_overflow_kills_child() {
        let (runner, _root) = runner(|p| {
            p.process.allowed_commands.push("yes".to_string());
            p.process.max_output_bytes = 1024;
        });
        let output = runner.run(run_req("yes", &[])).await.unwrap();
        assert!(output.truncated);
        assert!(!output.timed_out);
        assert!(output.stdout.len() <= 1024);
        assert_ne!(output.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let (runner, _root) = runner(|p| p.process.allowed_commands.push("sleep".to_string()));
        let mut req = run_req("sleep", &["5"]);
        req.timeout_ms = Some(200);

        let output = runner.run(req).await.unwrap();
        assert!(output.timed_out);
        assert!(output.duration_ms < 5_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_shell_descendants() {
        let (runner, root) = runner(|p| p.process.allowed_commands.push("sleep".to_string()));
        let marker = root.path().join("survivor");

        let output = runner
            .exec(ExecRequest {
                command: format!("sleep 0.1; (sleep 1; touch '{}') & wait", marker.display()),
                timeout_ms: Some(300),
                ..ExecRequest::default()
            })
            .await
            .unwrap();
        assert!(output.timed_out);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_env_is_filtered() {
        let (runner, _root) = runner(|p| p.process.allowed_env = vec!["ALLOWED_Y".to_string()]);
        let mut env = HashMap::new();
        env.insert("SECRET_X".to_string(), "leak".to_string());
        env.insert("ALLOWED_Y".to_string(), "kept".to_string());

        let output = runner
            .exec(ExecRequest {
                command: "echo \"[$SECRET_X][$ALLOWED_Y]\"".to_string(),
                env,
                ..ExecRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(output.stdout, "[][kept]\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_output_redacted() {
        let (runner, _root) = runner(|_| {});
        let output = runner
            .exec(ExecRequest {
                command: "echo password=hunter2".to_string(),
                ..ExecRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(output.stdout, "password=***REDACTED***\n");
        assert!(output.redacted);
    }

    #[tokio::test]
    async fn test_exec_checks_first_token() {
        let (runner, _root) = runner(|_| {});
        let err = runner
            .exec(ExecRequest {
                command: "rm -rf somewhere".to_string(),
                ..ExecRequest::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_cwd_outside_roots_blocked() {
        let (runner, _root) = runner(|_| {});
        let outside = tempfile::tempdir().unwrap();
        let mut req = run_req("echo", &["x"]);
        req.cwd = Some(outside.path().to_string_lossy().to_string());
        assert!(matches!(
            runner.run(req).await.unwrap_err(),
            BridgeError::PolicyBlocked(_)
        ));
    }

    #[test]
    fn test_allowed_cwds_restrict() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("work")).unwrap();
        std::fs::create_dir(root.path().join("other")).unwrap();
        let work = root.path().join("work").to_string_lossy().to_string();
        let other = root.path().join("other").to_string_lossy().to_string();

        let allowed = work.clone();
        let (runner, _root) = runner_at(root, |p| p.process.allowed_cwds = vec![allowed]);

        assert!(matches!(
            runner.resolve_cwd(Some(&other)).unwrap_err(),
            BridgeError::PolicyBlocked(_)
        ));
        assert!(matches!(
            runner.resolve_cwd(None).unwrap_err(),
            BridgeError::PolicyBlocked(_)
        ));
        assert!(runner.resolve_cwd(Some(&work)).is_ok());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_invalid_input() {
        let (runner, _root) = runner(|p| {
            p.process
                .allowed_commands
                .push("hostbridge-no-such-binary".to_string())
        });
        let err = runner
            .run(run_req("hostbridge-no-such-binary", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }
}
