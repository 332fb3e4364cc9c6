//! The unified JSON-RPC envelope and its wire codec.
//!
//! One envelope per WebSocket text frame; framing itself is left to the transport
//! (`axum`'s WebSocket upgrade on the server, `tokio-tungstenite` on the client).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A JSON-RPC error object, distinct from transport-level failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code={} message={}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}

/// The raw wire envelope. `params` and `result` are kept as unparsed [`Value`] fragments
/// so a handler can decode them into its own typed shape without the codec allocating
/// twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// What an [`Envelope`] turned out to be once its fields are inspected.
///
/// Classification rule: `method` non-empty => request if `id` non-empty else
/// notification; `method` empty and `id` non-empty with `result` or `error` present =>
/// response; any other shape is a protocol error.
#[derive(Debug)]
pub enum Classified {
    Request {
        id: String,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: String,
        result: Option<Value>,
        error: Option<ErrorObject>,
    },
}

impl Envelope {
    pub fn request(id: String, method: String, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: Some(method),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: String, params: Option<Value>) -> Self {
        Self {
            id: None,
            method: Some(method),
            params,
            result: None,
            error: None,
        }
    }

    pub fn response(id: String, result: Option<Value>, error: Option<ErrorObject>) -> Self {
        Self {
            id: Some(id),
            method: None,
            params: None,
            result,
            error,
        }
    }

    /// Classify this envelope per the wire protocol's shape rules.
    pub fn classify(self) -> Result<Classified> {
        let has_method = self.method.as_deref().is_some_and(|m| !m.is_empty());
        let has_id = self.id.as_deref().is_some_and(|i| !i.is_empty());

        if has_method {
            let method = self.method.unwrap();
            return Ok(if has_id {
                Classified::Request {
                    id: self.id.unwrap(),
                    method,
                    params: self.params,
                }
            } else {
                Classified::Notification {
                    method,
                    params: self.params,
                }
            });
        }

        if has_id && (self.result.is_some() || self.error.is_some()) {
            return Ok(Classified::Response {
                id: self.id.unwrap(),
                result: self.result,
                error: self.error,
            });
        }

        Err(Error::Protocol(format!(
            "envelope matches no known shape: id={:?} method={:?} result={:?} error={:?}",
            self.id,
            self.method,
            self.result.is_some(),
            self.error.is_some()
        )))
    }
}

/// Encode an envelope to its wire (UTF-8 JSON) representation.
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Protocol(format!("encode failed: {e}")))
}

/// Decode one wire frame into an envelope. Malformed JSON is a protocol error.
pub fn decode(raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw).map_err(|e| Error::Protocol(format!("decode failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_request() {
        let env = Envelope::request("1".into(), "echo".into(), Some(json!({"a": 1})));
        let wire = encode(&env).unwrap();
        let back = decode(&wire).unwrap();
        match back.classify().unwrap() {
            Classified::Request { id, method, params } => {
                assert_eq!(id, "1");
                assert_eq!(method, "echo");
                assert_eq!(params, Some(json!({"a": 1})));
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_notification() {
        let env = Envelope::notification("ping".into(), None);
        let wire = encode(&env).unwrap();
        assert!(!wire.contains("\"id\""));
        let back = decode(&wire).unwrap();
        match back.classify().unwrap() {
            Classified::Notification { method, params } => {
                assert_eq!(method, "ping");
                assert_eq!(params, None);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_response_with_error() {
        let err = ErrorObject::new(1234, "much error").with_data(json!({"k": "v"}));
        let env = Envelope::response("9".into(), None, Some(err.clone()));
        let wire = encode(&env).unwrap();
        assert!(!wire.contains("\"method\""));
        let back = decode(&wire).unwrap();
        match back.classify().unwrap() {
            Classified::Response { id, result, error } => {
                assert_eq!(id, "9");
                assert_eq!(result, None);
                assert_eq!(error, Some(err));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(decode("{not json").is_err());
    }

    #[test]
    fn rejects_shapeless_envelope() {
        let env = Envelope {
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        assert!(env.classify().is_err());
    }
}
