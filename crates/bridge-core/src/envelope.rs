//! The JSON request/response envelope exchanged over the socket.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestEnvelope {
    pub module: String,
    pub function: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perl_caller: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_error: Option<bool>,
}

impl ResponseEnvelope {
    pub fn ok(result: Value, request_id: Option<String>, duration_ms: u64) -> Self {
        ResponseEnvelope {
            success: true,
            result: Some(result),
            error: None,
            error_code: None,
            details: None,
            request_id,
            duration_ms: Some(duration_ms),
            daemon_error: None,
        }
    }

    /// A failure that originated in the broker (validator, throttle,
    /// dispatcher, codec) rather than in handler business logic.
    pub fn daemon_failure(err: &BridgeError, request_id: Option<String>) -> Self {
        ResponseEnvelope {
            success: false,
            result: None,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            details: err
                .retry_after_ms()
                .map(|ms| serde_json::json!({ "retry_after_ms": ms })),
            request_id,
            duration_ms: None,
            daemon_error: Some(true),
        }
    }

    /// A failure surfaced by handler business logic. Not a `daemon_error`.
    pub fn handler_failure(err: &BridgeError, request_id: Option<String>, duration_ms: u64) -> Self {
        ResponseEnvelope {
            success: false,
            result: None,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
            details: None,
            request_id,
            duration_ms: Some(duration_ms),
            daemon_error: None,
        }
    }

    /// The client-visible failure when the daemon cannot be reached and
    /// subprocess fallback also failed or was disabled.
    pub fn daemon_unreachable(detail: impl Into<String>) -> Self {
        ResponseEnvelope {
            success: false,
            result: None,
            error: Some(detail.into()),
            error_code: Some("daemon_unreachable".to_string()),
            details: None,
            request_id: None,
            duration_ms: None,
            daemon_error: Some(true),
        }
    }
}

/// Serializes an envelope to UTF-8 JSON bytes.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>, BridgeError> {
    serde_json::to_vec(envelope).map_err(|e| BridgeError::Encoding(e.to_string()))
}

/// Parses UTF-8 JSON bytes into a request envelope. Rejects malformed JSON
/// and non-object roots.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, BridgeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Decoding(e.to_string()))?;
    if !value.is_object() {
        return Err(BridgeError::Decoding("envelope root is not an object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| BridgeError::InvalidEnvelope(e.to_string()))
}

pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope, BridgeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::Decoding(e.to_string()))?;
    if !value.is_object() {
        return Err(BridgeError::Decoding("envelope root is not an object".to_string()));
    }
    serde_json::from_value(value).map_err(|e| BridgeError::InvalidEnvelope(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request() {
        let req = RequestEnvelope {
            module: "system".to_string(),
            function: "ping".to_string(),
            params: serde_json::json!({}),
            request_id: Some("abc".to_string()),
            client_version: None,
            timestamp: None,
            perl_caller: None,
        };
        let bytes = encode(&req).unwrap();
        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded.module, "system");
        assert_eq!(decoded.function, "ping");
        assert_eq!(decoded.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn rejects_non_object_root() {
        let bytes = b"[1,2,3]".to_vec();
        assert!(matches!(decode_request(&bytes), Err(BridgeError::Decoding(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        let bytes = b"{not json".to_vec();
        assert!(matches!(decode_request(&bytes), Err(BridgeError::Decoding(_))));
    }

    #[test]
    fn missing_module_is_invalid_envelope() {
        let bytes = br#"{"function":"ping","params":{}}"#.to_vec();
        assert!(matches!(decode_request(&bytes), Err(BridgeError::InvalidEnvelope(_))));
    }

    #[test]
    fn response_round_trip_preserves_success_result() {
        let resp = ResponseEnvelope::ok(serde_json::json!({"pong": true}), Some("r1".to_string()), 3);
        let bytes = encode(&resp).unwrap();
        let decoded = decode_response(&bytes).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.result.unwrap()["pong"], true);
    }
}
