//! Line-delimited JSON-RPC framing for the stdio transport.
//!
//! The core treats the transport as opaque; this module is the entire
//! framing layer. One request per line in, one response per line out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse failure.
pub const PARSE_ERROR: i64 = -32700;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Malformed params.
pub const INVALID_PARAMS: i64 = -32602;

/// An incoming request.
#[derive(Debug, Deserialize)]
pub struct Request {
    /// Request id; echoed back. Notifications carry none.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name, e.g. `tools/list` or `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Deserialize)]
pub struct CallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// An outgoing response.
#[derive(Debug, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl Response {
    /// A success response.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A protocol-level error response.
    #[must_use]
    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Serialize to one output line.
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"unserializable response"}}"#
                .to_owned()
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_call_request() {
        let request: Request = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"chat","arguments":{"prompt":"hi"}}}"#,
        )
        .unwrap();
        assert_eq!(request.method, "tools/call");
        let params: CallParams = serde_json::from_value(request.params).unwrap();
        assert_eq!(params.name, "chat");
        assert_eq!(params.arguments["prompt"], "hi");
    }

    #[test]
    fn success_line_echoes_the_id() {
        let line = Response::success(Some(serde_json::json!(7)), serde_json::json!({"ok": true}))
            .to_line();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["result"]["ok"], true);
        assert_eq!(parsed["jsonrpc"], "2.0");
    }

    #[test]
    fn error_line_carries_code_and_message() {
        let line = Response::error(None, METHOD_NOT_FOUND, "no such method").to_line();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["error"]["code"], -32601);
        assert_eq!(parsed["error"]["message"], "no such method");
    }
}
