//! MCP (JSON-RPC 2.0) envelope over the daemon's command set
//!
//! Transport-agnostic: the HTTP binding hands each decoded message to
//! [`handle_message`] together with the caller's credentials.

pub mod protocol;
pub mod tools;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandRequest};
use crate::daemon::Daemon;
use protocol::{
    CallToolParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolResult, ToolsCapability, INTERNAL_ERROR, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};

type RpcResult = std::result::Result<Value, (i32, String)>;

/// Caller identity carried alongside every message
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub token: Option<&'a str>,
    pub site_key: Option<&'a str>,
}

/// Decode and answer one message. Notifications get no response.
pub async fn handle_message(
    daemon: &Daemon,
    creds: Credentials<'_>,
    message: &str,
) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(message) {
        Ok(req) => req,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                None,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
        }
    };
    handle_request(daemon, creds, request).await
}

pub async fn handle_request(
    daemon: &Daemon,
    creds: Credentials<'_>,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return Some(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ));
    }

    if id.is_none() {
        debug!("Notification: {}", request.method);
        return None;
    }

    let result = match request.method.as_str() {
        "initialize" => initialize(),
        "tools/list" => list_tools(),
        "tools/call" => call_tool(daemon, creds, request.params).await,
        "ping" => Ok(json!({})),
        method => {
            warn!("Unknown MCP method: {}", method);
            Err((METHOD_NOT_FOUND, format!("Method not found: {}", method)))
        }
    };

    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err((code, message)) => JsonRpcResponse::error(id, code, message),
    })
}

fn initialize() -> RpcResult {
    info!("MCP client initialized");
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {},
        },
        server_info: ServerInfo {
            name: "hostbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };
    to_value(result)
}

fn list_tools() -> RpcResult {
    to_value(ListToolsResult {
        tools: tools::all_tools(),
    })
}

async fn call_tool(daemon: &Daemon, creds: Credentials<'_>, params: Option<Value>) -> RpcResult {
    let params: CallToolParams = match params {
        Some(p) => serde_json::from_value(p)
            .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))?,
        None => return Err((INVALID_PARAMS, "Missing params".to_string())),
    };

    let command = Command::from_tool_name(&params.name)
        .ok_or_else(|| (INVALID_PARAMS, format!("Unknown tool: {}", params.name)))?;

    let mut arguments = params.arguments;
    let site = take_string(&mut arguments, "site")
        .ok_or_else(|| (INVALID_PARAMS, "site is required".to_string()))?;
    let trace_id = take_string(&mut arguments, "traceId").unwrap_or_default();

    let request = CommandRequest {
        command: command.name().to_string(),
        trace_id,
        site,
        args: Value::Object(arguments),
    };
    let response = daemon.handle(request, creds.token, creds.site_key).await;

    let text = serde_json::to_string_pretty(&response)
        .map_err(|e| (INTERNAL_ERROR, format!("Serialization error: {}", e)))?;
    to_value(ToolResult::envelope(text, response.ok))
}

fn take_string(args: &mut Map<String, Value>, key: &str) -> Option<String> {
    match args.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn to_value<T: serde::Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| (INTERNAL_ERROR, format!("Serialization error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::PairRequest;
    use crate::policy::PolicyConfig;
    use hostbridge_core::Paths;

    async fn paired_daemon() -> (Daemon, tempfile::TempDir, tempfile::TempDir, String) {
        let state = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let policy = PolicyConfig {
            roots: vec![root.path().to_string_lossy().to_string()],
            ..PolicyConfig::default()
        };
        let daemon = Daemon::with_policy(&Paths::with_root(state.path()), policy)
            .await
            .unwrap();
        let (code, _) = daemon.pair_code();
        let paired = daemon
            .pair(&PairRequest {
                code,
                site: "claude.ai".to_string(),
            })
            .await
            .unwrap();
        (daemon, state, root, paired.token)
    }

    async fn send(daemon: &Daemon, creds: Credentials<'_>, body: Value) -> Option<JsonRpcResponse> {
        handle_message(daemon, creds, &body.to_string()).await
    }

    fn creds(token: &str) -> Credentials<'_> {
        Credentials {
            token: Some(token),
            site_key: None,
        }
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (daemon, _state, _root, token) = paired_daemon().await;

        let init = send(
            &daemon,
            creds(&token),
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        )
        .await
        .unwrap();
        let result = init.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "hostbridge");

        let list = send(
            &daemon,
            creds(&token),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await
        .unwrap();
        let tools = list.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, Command::ALL.len());
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let (daemon, _state, _root, token) = paired_daemon().await;
        let response = send(
            &daemon,
            creds(&token),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_malformed_message_is_parse_error() {
        let (daemon, _state, _root, token) = paired_daemon().await;
        let response = handle_message(&daemon, creds(&token), "{not json")
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_call_tool_runs_command() {
        let (daemon, _state, root, token) = paired_daemon().await;
        std::fs::write(root.path().join("notes.txt"), "hello").unwrap();

        let response = send(
            &daemon,
            creds(&token),
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "fs_read",
                    "arguments": {
                        "site": "claude.ai",
                        "traceId": "mcp-1",
                        "path": root.path().join("notes.txt").to_string_lossy()
                    }
                }
            }),
        )
        .await
        .unwrap();

        let result = response.result.unwrap();
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert_eq!(envelope["ok"], true);
        assert_eq!(envelope["data"]["content"], "hello");
    }

    #[tokio::test]
    async fn test_call_tool_errors() {
        let (daemon, _state, _root, token) = paired_daemon().await;

        let unknown = send(
            &daemon,
            creds(&token),
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                    "params": {"name": "fs_format", "arguments": {"site": "claude.ai"}}}),
        )
        .await
        .unwrap();
        assert_eq!(unknown.error.unwrap().code, INVALID_PARAMS);

        let denied = send(
            &daemon,
            Credentials::default(),
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                    "params": {"name": "fs_ls", "arguments": {"site": "claude.ai", "path": "/"}}}),
        )
        .await
        .unwrap();
        let result = denied.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("UNAUTHORIZED"));

        let missing = send(
            &daemon,
            creds(&token),
            json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}),
        )
        .await
        .unwrap();
        assert_eq!(missing.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
