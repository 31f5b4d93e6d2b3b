//! Wire protocol frames
//!
//! One frame is one complete JSON text message over the persistent
//! WebSocket connection. Both channel sides share these shapes:
//!
//! - handshake request: `{"token": "..."}`
//! - handshake success: `{"status": "authenticated"}`
//! - handshake failure: `{"error": "..."}` followed by closure
//! - operation request: `{"request_id", "tool", "params"}`
//! - operation response: `{"request_id", "result"}` or `{"request_id", "error"}`
//! - channel-level error (no request id): `{"error": "..."}`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status string sent on a successful handshake.
pub const STATUS_AUTHENTICATED: &str = "authenticated";

/// First frame sent by the client after the transport opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub token: String,
}

/// Server reply to the handshake frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeReply {
    pub fn authenticated() -> Self {
        Self {
            status: Some(STATUS_AUTHENTICATED.to_string()),
            error: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: None,
            error: Some(message.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status.as_deref() == Some(STATUS_AUTHENTICATED)
    }
}

/// An operation request. `request_id` values are assigned monotonically by
/// the client and never reused within a connection's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestFrame {
    pub request_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl RequestFrame {
    pub fn new(request_id: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            request_id: request_id.into(),
            tool: tool.into(),
            params,
        }
    }
}

/// An operation response, or a channel-level error when `request_id` is
/// absent. Exactly one of `result`/`error` is set by the constructors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    /// Successful response for a request.
    pub fn result(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: Some(request_id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Failed response for a request.
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            result: None,
            error: Some(message.into()),
        }
    }

    /// Channel-level error with no request to echo (malformed input).
    pub fn channel_error(message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Parse a text frame into a [`RequestFrame`].
///
/// Returns a human-readable reason when the frame is not a well-formed
/// request; the server reports it as a channel-level error and keeps the
/// connection open.
pub fn parse_request(text: &str) -> Result<RequestFrame, String> {
    let value: Value = serde_json::from_str(text).map_err(|_| "Invalid JSON".to_string())?;
    serde_json::from_value(value).map_err(|_| "Invalid request frame".to_string())
}

/// Serialize a frame to its wire text.
pub fn to_text<T: Serialize>(frame: &T) -> String {
    serde_json::to_string(frame).expect("protocol frames serialize to JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let req = parse_request(
            r#"{"request_id":"req_1","tool":"read_file","params":{"path":"/etc/hosts"}}"#,
        )
        .unwrap();
        assert_eq!(req.request_id, "req_1");
        assert_eq!(req.tool, "read_file");
        assert_eq!(req.params.get("path"), Some(&json!("/etc/hosts")));
    }

    #[test]
    fn test_parse_request_defaults_params() {
        let req = parse_request(r#"{"request_id":"req_2","tool":"get_system_info"}"#).unwrap();
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        assert_eq!(parse_request("not json").unwrap_err(), "Invalid JSON");
        assert_eq!(
            parse_request(r#"{"tool":"read_file"}"#).unwrap_err(),
            "Invalid request frame"
        );
        assert_eq!(
            parse_request(r#"{"request_id":"req_3"}"#).unwrap_err(),
            "Invalid request frame"
        );
    }

    #[test]
    fn test_response_wire_shapes() {
        let ok = to_text(&ResponseFrame::result("req_1", json!({"count": 2})));
        assert_eq!(ok, r#"{"request_id":"req_1","result":{"count":2}}"#);

        let err = to_text(&ResponseFrame::error("req_1", "Unknown tool: nope"));
        assert_eq!(err, r#"{"request_id":"req_1","error":"Unknown tool: nope"}"#);

        let channel = to_text(&ResponseFrame::channel_error("Invalid JSON"));
        assert_eq!(channel, r#"{"error":"Invalid JSON"}"#);
    }

    #[test]
    fn test_handshake_reply_shapes() {
        assert_eq!(
            to_text(&HandshakeReply::authenticated()),
            r#"{"status":"authenticated"}"#
        );
        let rejected: HandshakeReply =
            serde_json::from_str(r#"{"error":"Authentication failed"}"#).unwrap();
        assert!(!rejected.is_authenticated());
        assert_eq!(rejected.error.as_deref(), Some("Authentication failed"));
    }
}
