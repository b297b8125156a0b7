//! Internal JSON-RPC message types and parameter builders.

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, DiagnosticSeverity, Position, Range};

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Classification of an inbound JSON-RPC message by shape.
///
/// Responses carry an `id` and a `result`/`error` but no `method`;
/// server-originated requests carry both `id` and `method`; notifications
/// carry only `method`.
pub(crate) enum Incoming {
    Response {
        id: u64,
        result: Option<serde_json::Value>,
        error: Option<ResponseError>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<Incoming> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_response_shaped = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response_shaped) {
        (Some(id_val), None, true) => Some(Incoming::Response {
            id: id_val.as_u64()?,
            result: frame.get("result").cloned(),
            error: frame
                .get("error")
                .and_then(|e| serde_json::from_value(e.clone()).ok()),
        }),
        (Some(id_val), Some(method), _) => Some(Incoming::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(Incoming::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// JSON-RPC error response for server requests we do not implement.
pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": -32601,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": true
                },
                "hover": {
                    "contentFormat": ["markdown", "plaintext"]
                },
                "completion": {
                    "completionItem": {
                        "snippetSupport": false
                    }
                },
                "signatureHelp": {},
                "rename": {},
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

/// A single incremental change: replace `range` with `text`.
pub(crate) fn did_change_params(
    uri: &str,
    version: i32,
    range: Range,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "range": range,
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

pub(crate) fn did_save_params(uri: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "text": text
    })
}

pub(crate) fn position_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

pub(crate) fn rename_params(
    uri: &str,
    position: Position,
    new_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position,
        "newName": new_name
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDiagnostic {
    pub range: Range,
    pub severity: Option<u64>,
    pub source: Option<String>,
    pub message: String,
}

impl WireDiagnostic {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_wire)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.range,
            self.message.clone(),
            self.source
                .clone()
                .unwrap_or_else(|| String::from("unknown")),
        )
    }
}
