// src/mcp/protocol.rs
// JSON-RPC 2.0 envelopes, newline framing, stable error codes

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version echoed on the wire.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32000;

/// One inbound or outbound JSON-RPC message. A missing `id` marks a
/// notification: no response may be produced for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params,
        }
    }

    /// One-way message: carries no id, expects no response.
    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: None,
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Serialize to a single frame: one line, no interior newlines.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A response we built from plain strings cannot fail to
            // serialize; keep the wire alive regardless.
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"serialization failure"}}}}"#,
                INTERNAL_ERROR
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let req = JsonRpcRequest::new(7, "tools/call", json!({"name": "hub_list"}));
        let line = serde_json::to_string(&req).unwrap();
        let back: JsonRpcRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(back.id, Some(json!(7)));
        assert_eq!(back.method, "tools/call");
        assert!(!back.is_notification());
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcRequest::notification("notifications/initialized", json!({}));
        let line = serde_json::to_string(&note).unwrap();
        assert!(!line.contains("\"id\""));
        let back: JsonRpcRequest = serde_json::from_str(&line).unwrap();
        assert!(back.is_notification());
    }

    #[test]
    fn test_request_without_params_parses() {
        let back: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(back.params.is_null());
    }

    #[test]
    fn test_error_response_shape() {
        let resp = JsonRpcResponse::error(Some(json!(3)), METHOD_NOT_FOUND, "method not found");
        let line = resp.to_line();
        assert!(line.contains("-32601"));
        assert!(!line.contains("\"result\""));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_success_response_shape() {
        let resp = JsonRpcResponse::success(Some(json!(1)), json!({"ok": true}));
        let line = resp.to_line();
        assert!(line.contains("\"result\""));
        assert!(!line.contains("\"error\""));
    }

    #[test]
    fn test_child_error_parses() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"boom"}}"#,
        )
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "boom");
    }
}
