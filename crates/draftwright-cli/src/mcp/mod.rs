//! MCP (Model Context Protocol) server.
//!
//! Lets an MCP-capable assistant read document shapes and submit edit lists
//! as tool calls. Submitted edits go through the same parser and applicator
//! as model responses.

mod protocol;
mod tools;

use anyhow::{Context, Result};
use protocol::{
    InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    PARSE_ERROR, ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability, ToolsListResult,
};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{debug, error, info};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "draftwright";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the MCP server, reading from stdin and writing to stdout.
pub fn serve(workspace_path: &Path) -> Result<()> {
    info!(workspace = %workspace_path.display(), "Starting MCP server");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = handle_line(workspace_path, &line) {
            let json = serde_json::to_string(&response)?;
            debug!(response = %json, "Sending");
            writeln!(stdout, "{json}")?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn handle_line(workspace_path: &Path, line: &str) -> Option<JsonRpcResponse> {
    debug!(request = %line, "Received");

    match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => handle_request(workspace_path, &request),
        Err(e) => {
            error!(error = %e, "Failed to parse request");
            Some(JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}")))
        }
    }
}

fn handle_request(workspace_path: &Path, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    let id = request.id.clone();
    match request.method.as_str() {
        "initialize" => Some(handle_initialize(request)),
        "tools/list" => Some(JsonRpcResponse::success(
            id,
            ToolsListResult {
                tools: tools::definitions(),
            },
        )),
        "tools/call" => Some(handle_tools_call(workspace_path, request)),
        "ping" => Some(JsonRpcResponse::success(id, json!({}))),
        method if method == "initialized" || method.starts_with("notifications/") => {
            debug!(method, "Notification");
            None
        }
        method => {
            error!(method, "Unknown method");
            Some(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            ))
        }
    }
}

fn handle_initialize(request: &JsonRpcRequest) -> JsonRpcResponse {
    let params: InitializeParams = match request.params() {
        Ok(params) => params,
        Err(response) => return response,
    };
    debug!(client_protocol = %params.protocol_version, "Initialize");

    JsonRpcResponse::success(
        request.id.clone(),
        InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities {
                tools: ToolsCapability { list_changed: false },
            },
            server_info: ServerInfo {
                name: SERVER_NAME,
                version: SERVER_VERSION,
            },
        },
    )
}

fn handle_tools_call(workspace_path: &Path, request: &JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams = match request.params() {
        Ok(params) => params,
        Err(response) => return response,
    };

    info!(tool = %params.name, "Tool call");
    let result = tools::call(workspace_path, &params.name, params.arguments);
    JsonRpcResponse::success(request.id.clone(), result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn respond(line: &str) -> Value {
        let response = handle_line(Path::new("/nonexistent"), line).unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn test_initialize() {
        let response = respond(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#,
        );
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["serverInfo"]["name"], json!("draftwright"));
        assert_eq!(response["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
    }

    #[test]
    fn test_tools_list() {
        let response = respond(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"draftwright_propose"));
        assert!(names.contains(&"draftwright_structure"));
    }

    #[test]
    fn test_errors_and_notifications() {
        assert_eq!(respond("{not json")["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(
            respond(r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#)["error"]["code"],
            json!(METHOD_NOT_FOUND)
        );
        assert_eq!(
            respond(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#)["error"]["code"],
            json!(protocol::INVALID_PARAMS)
        );
        assert!(
            handle_line(
                Path::new("/nonexistent"),
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#
            )
            .is_none()
        );
    }
}
