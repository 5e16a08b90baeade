//! Command names, request envelope and response envelope

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, ErrorCode, Result};
use crate::fs_service::SearchQuery;

/// Every command the daemon routes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ls,
    Mkdir,
    Read,
    Search,
    Rm,
    Mv,
    Chmod,
    Diff,
    WritePrepare,
    WriteCommit,
    BatchPrepare,
    BatchCommit,
    ProcessRun,
    ShellExec,
}

impl Command {
    pub const ALL: [Command; 14] = [
        Command::Ls,
        Command::Mkdir,
        Command::Read,
        Command::Search,
        Command::Rm,
        Command::Mv,
        Command::Chmod,
        Command::Diff,
        Command::WritePrepare,
        Command::WriteCommit,
        Command::BatchPrepare,
        Command::BatchCommit,
        Command::ProcessRun,
        Command::ShellExec,
    ];

    /// Wire name, also used for confirmation rules and audit entries
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ls => "fs.ls",
            Command::Mkdir => "fs.mkdir",
            Command::Read => "fs.read",
            Command::Search => "fs.search",
            Command::Rm => "fs.rm",
            Command::Mv => "fs.mv",
            Command::Chmod => "fs.chmod",
            Command::Diff => "fs.diff",
            Command::WritePrepare => "fs.write.prepare",
            Command::WriteCommit => "fs.write.commit",
            Command::BatchPrepare => "fs.writeBatch.prepare",
            Command::BatchCommit => "fs.writeBatch.commit",
            Command::ProcessRun => "process.run",
            Command::ShellExec => "shell.exec",
        }
    }

    /// MCP clients only accept `[A-Za-z0-9_-]` in tool names
    pub fn tool_name(&self) -> String {
        self.name().replace('.', "_")
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Accepts either the wire name or the MCP tool name
    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == name || c.tool_name() == name)
    }

    /// Path-bearing argument names, checked before anything else runs
    pub fn path_args(&self) -> &'static [&'static str] {
        match self {
            Command::Mv => &["from", "to"],
            Command::Diff => &["path", "otherPath"],
            Command::Ls
            | Command::Mkdir
            | Command::Read
            | Command::Search
            | Command::Rm
            | Command::Chmod
            | Command::WritePrepare => &["path"],
            _ => &[],
        }
    }
}

/// `POST /v1/command` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub trace_id: String,
    pub site: String,
    #[serde(default)]
    pub args: Value,
}

/// The envelope every command answers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub audit_id: String,
    #[serde(default)]
    pub truncated: bool,
}

impl CommandResponse {
    pub fn success(audit_id: String, data: Value, truncated: bool) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: None,
            data: Some(data),
            audit_id,
            truncated,
        }
    }

    pub fn failure(audit_id: String, err: &BridgeError) -> Self {
        Self {
            ok: false,
            error_code: Some(err.code()),
            message: Some(err.to_string()),
            data: err.data(),
            audit_id,
            truncated: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LsArgs {
    pub path: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

fn default_depth() -> usize {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathArgs {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecursiveArgs {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    pub path: String,
    #[serde(flatten)]
    pub query: SearchQuery,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MvArgs {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChmodArgs {
    pub path: String,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffArgs {
    pub path: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub other_path: Option<String>,
}

/// Deserialize command arguments, reporting shape errors as `INVALID_INPUT`
pub fn parse_args<T: DeserializeOwned>(args: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| BridgeError::InvalidInput(format!("invalid arguments: {}", e)))
}

/// One-line description shown to the user in a confirmation prompt
pub fn describe(command: Command, args: &Map<String, Value>) -> String {
    let arg = |name: &str| args.get(name).and_then(Value::as_str).unwrap_or("?");
    match command {
        Command::Mv => format!("{} {} -> {}", command.name(), arg("from"), arg("to")),
        Command::Chmod => format!("{} {} {}", command.name(), arg("mode"), arg("path")),
        Command::ProcessRun => {
            let argv: Vec<&str> = args
                .get("args")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            format!("{} {} {}", command.name(), arg("command"), argv.join(" "))
                .trim_end()
                .to_string()
        }
        Command::ShellExec => format!("{} {}", command.name(), arg("command")),
        Command::BatchPrepare => {
            let count = args.get("files").and_then(Value::as_array).map_or(0, Vec::len);
            format!("{} ({} files)", command.name(), count)
        }
        Command::WriteCommit | Command::BatchCommit => {
            format!("{} {}", command.name(), arg("opId"))
        }
        _ => format!("{} {}", command.name(), arg("path")),
    }
}
