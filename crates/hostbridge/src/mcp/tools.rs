//! Tool definitions exposed over MCP, one per daemon command

use serde_json::{json, Value};

use super::protocol::{InputSchema, Tool};
use crate::command::Command;

fn tool(command: Command, description: &str, properties: Value, required: &[&str]) -> Tool {
    let mut props = properties.as_object().cloned().unwrap_or_default();
    props.insert(
        "site".to_string(),
        json!({"type": "string", "description": "Chat site the request comes from, e.g. claude.ai"}),
    );
    props.insert(
        "traceId".to_string(),
        json!({"type": "string", "description": "Caller trace id, recorded in the audit log"}),
    );
    props.insert(
        "confirmationId".to_string(),
        json!({"type": "string", "description": "Approved confirmation to spend when retrying a gated call"}),
    );

    let mut required: Vec<String> = required.iter().map(|s| s.to_string()).collect();
    required.push("site".to_string());

    Tool {
        name: command.tool_name(),
        description: description.to_string(),
        input_schema: InputSchema {
            schema_type: "object".to_string(),
            properties: props,
            required,
        },
    }
}

fn write_file_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string"},
            "mode": {"type": "string", "enum": ["overwrite", "append"]},
            "content": {"type": "string"},
            "expectedSha256": {"type": "string", "description": "Fail with CONFLICT if the file changed"}
        },
        "required": ["path", "content"]
    })
}

pub fn all_tools() -> Vec<Tool> {
    Command::ALL.into_iter().map(definition).collect()
}

fn definition(command: Command) -> Tool {
    match command {
        Command::Ls => tool(
            command,
            "List a directory under an allowed root",
            json!({
                "path": {"type": "string"},
                "depth": {"type": "integer", "description": "Levels to descend (default 1)"}
            }),
            &["path"],
        ),
        Command::Mkdir => tool(
            command,
            "Create a directory",
            json!({
                "path": {"type": "string"},
                "recursive": {"type": "boolean"}
            }),
            &["path"],
        ),
        Command::Read => tool(
            command,
            "Read a text file. Secrets are redacted and long files truncated.",
            json!({"path": {"type": "string"}}),
            &["path"],
        ),
        Command::Search => tool(
            command,
            "Search file contents below a directory",
            json!({
                "path": {"type": "string"},
                "query": {"type": "string"},
                "regex": {"type": "boolean"},
                "caseSensitive": {"type": "boolean"},
                "maxMatches": {"type": "integer"}
            }),
            &["path", "query"],
        ),
        Command::Rm => tool(
            command,
            "Remove a file or directory",
            json!({
                "path": {"type": "string"},
                "recursive": {"type": "boolean"}
            }),
            &["path"],
        ),
        Command::Mv => tool(
            command,
            "Move or rename a file or directory",
            json!({
                "from": {"type": "string"},
                "to": {"type": "string"},
                "overwrite": {"type": "boolean"}
            }),
            &["from", "to"],
        ),
        Command::Chmod => tool(
            command,
            "Change permission bits (octal, Unix only)",
            json!({
                "path": {"type": "string"},
                "mode": {"type": "string", "description": "Octal mode, e.g. 644"}
            }),
            &["path", "mode"],
        ),
        Command::Diff => tool(
            command,
            "Unified diff of a file against new content or another file",
            json!({
                "path": {"type": "string"},
                "content": {"type": "string"},
                "otherPath": {"type": "string"}
            }),
            &["path"],
        ),
        Command::WritePrepare => tool(
            command,
            "Stage a file write. Returns an opId to commit.",
            json!({
                "path": {"type": "string"},
                "mode": {"type": "string", "enum": ["overwrite", "append"]},
                "content": {"type": "string"},
                "expectedSha256": {"type": "string"},
                "disableConfirmation": {"type": "boolean"}
            }),
            &["path", "content"],
        ),
        Command::WriteCommit => tool(
            command,
            "Apply a staged write",
            json!({
                "opId": {"type": "string"},
                "confirmedByUser": {"type": "boolean"}
            }),
            &["opId"],
        ),
        Command::BatchPrepare => tool(
            command,
            "Stage writes to several files, applied all-or-nothing",
            json!({
                "files": {"type": "array", "items": write_file_schema()},
                "disableConfirmation": {"type": "boolean"}
            }),
            &["files"],
        ),
        Command::BatchCommit => tool(
            command,
            "Apply a staged batch; rolls back every file if one fails",
            json!({
                "opId": {"type": "string"},
                "confirmedByUser": {"type": "boolean"}
            }),
            &["opId"],
        ),
        Command::ProcessRun => tool(
            command,
            "Run an allow-listed program with arguments (no shell)",
            json!({
                "command": {"type": "string"},
                "args": {"type": "array", "items": {"type": "string"}},
                "cwd": {"type": "string"},
                "timeoutMs": {"type": "integer"},
                "env": {"type": "object", "additionalProperties": {"type": "string"}}
            }),
            &["command"],
        ),
        Command::ShellExec => tool(
            command,
            "Run a shell line whose first word is an allow-listed program",
            json!({
                "command": {"type": "string"},
                "cwd": {"type": "string"},
                "timeoutMs": {"type": "integer"},
                "env": {"type": "object", "additionalProperties": {"type": "string"}}
            }),
            &["command"],
        ),
    }
}
