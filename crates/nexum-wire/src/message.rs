//! Wire protocol message types.
//!
//! All traffic between a client and a controller uses JSON-framed messages
//! over TCP. Each frame is prefixed with a 4-byte big-endian length header.
//! Session keys travel in the outer frame so the server can validate a
//! session before attempting decryption.

use chrono::{DateTime, Utc};
use nexum_types::NexumError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named (keyword) arguments of an invocation.
pub type NamedArgs = serde_json::Map<String, Value>;

/// Reserved registry name bound to the controller itself.
pub const CONTROLLER_NAME: &str = "controller";

/// Status classification carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Handshake accepted; session credentials follow.
    Accepted,
    /// Invocation succeeded; a value follows.
    Ok,
    /// Handshake secret mismatch or peer refused.
    Unauthorized,
    /// Missing or stale session.
    SessionError,
    /// Unknown object or method.
    NotFound,
    /// Method denied by the authorization policy.
    Forbidden,
    /// A hosted method failed while executing.
    ExecutionError,
    /// The server failed to process the request (codec, crypto, internal).
    ServerError,
}

impl Status {
    /// Numeric code used in logs.
    pub fn code(&self) -> u16 {
        match self {
            Status::Accepted => 202,
            Status::Ok => 200,
            Status::Unauthorized => 401,
            Status::SessionError => 440,
            Status::NotFound => 404,
            Status::Forbidden => 403,
            Status::ExecutionError => 500,
            Status::ServerError => 502,
        }
    }

    /// Whether this status carries a value rather than an error.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Accepted | Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Accepted => "accepted",
            Status::Ok => "ok",
            Status::Unauthorized => "unauthorized",
            Status::SessionError => "session_error",
            Status::NotFound => "not_found",
            Status::Forbidden => "forbidden",
            Status::ExecutionError => "execution_error",
            Status::ServerError => "server_error",
        };
        write!(f, "{name}")
    }
}

/// One step of a call chain: method name, positional and named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Method name.
    pub method: String,
    /// Ordered positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Named (keyword) arguments.
    #[serde(default)]
    pub named: NamedArgs,
}

impl Invocation {
    /// Build an invocation with positional arguments only.
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
            named: NamedArgs::new(),
        }
    }

    /// Build an invocation with positional and named arguments.
    pub fn with_named(method: impl Into<String>, args: Vec<Value>, named: NamedArgs) -> Self {
        Self {
            method: method.into(),
            args,
            named,
        }
    }
}

/// An authenticated request: target object plus an ordered invocation chain.
///
/// The chain executes strictly in order; the receiver of step *i+1* is the
/// return value of step *i*, starting from the registered object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Registered name of the target object.
    pub object: String,
    /// Ordered invocation sequence (length 1 for a plain call).
    pub invocations: Vec<Invocation>,
    /// When set, the result value is returned as compact JSON text instead
    /// of a structured value.
    #[serde(default)]
    pub raw: bool,
}

/// The server's answer to any request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Status classification.
    pub status: Status,
    /// Result value (success statuses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Error description (failure statuses only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server-side timestamp.
    pub time: DateTime<Utc>,
}

impl ResponseEnvelope {
    /// A successful response carrying a value.
    pub fn ok(value: Value) -> Self {
        Self {
            status: Status::Ok,
            value: Some(value),
            error: None,
            time: Utc::now(),
        }
    }

    /// A failure response with a status classification and message.
    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            value: None,
            error: Some(message.into()),
            time: Utc::now(),
        }
    }

    /// Map a [`NexumError`] onto its status classification.
    pub fn from_error(err: &NexumError) -> Self {
        let status = match err {
            NexumError::Validation(_) => Status::ServerError,
            NexumError::Authentication(_) => Status::Unauthorized,
            NexumError::Session(_) => Status::SessionError,
            NexumError::Authorization(_) => Status::Forbidden,
            NexumError::Dispatch(_) => Status::NotFound,
            NexumError::Execution(_) => Status::ExecutionError,
            NexumError::Crypto(_)
            | NexumError::Serialization(_)
            | NexumError::Io(_)
            | NexumError::Internal(_) => Status::ServerError,
        };
        Self::failure(status, err.to_string())
    }
}

/// Frames a client may send. The session key stays outside the ciphertext
/// so the server can check it before decrypting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present the shared secret and request session credentials.
    Handshake {
        /// The shared secret.
        secret: String,
    },
    /// A plaintext request (sessions with encryption disabled).
    Request {
        /// Hex session key minted at handshake.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_key: Option<String>,
        /// The request envelope.
        envelope: RequestEnvelope,
    },
    /// An encrypted request.
    Sealed {
        /// Hex session key minted at handshake.
        session_key: String,
        /// Base64 AES-256-GCM ciphertext of a JSON [`RequestEnvelope`].
        payload: String,
    },
}

/// Frames a server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Successful handshake: session credentials, always plaintext.
    HandshakeAck {
        /// Always [`Status::Accepted`].
        status: Status,
        /// Hex-encoded 32-byte session key.
        session_key: String,
        /// Hex-encoded 12-byte session IV.
        session_iv: String,
        /// Whether subsequent traffic must be encrypted.
        encrypt: bool,
        /// Server-side timestamp.
        time: DateTime<Utc>,
    },
    /// A plaintext response.
    Response(ResponseEnvelope),
    /// An encrypted response.
    Sealed {
        /// Base64 AES-256-GCM ciphertext of a JSON [`ResponseEnvelope`].
        payload: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Accepted.code(), 202);
        assert_eq!(Status::Unauthorized.code(), 401);
        assert_eq!(Status::Forbidden.code(), 403);
        assert_eq!(Status::NotFound.code(), 404);
        assert_eq!(Status::SessionError.code(), 440);
        assert_eq!(Status::ExecutionError.code(), 500);
        assert_eq!(Status::ServerError.code(), 502);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::SessionError).unwrap();
        assert_eq!(json, "\"session_error\"");
        let back: Status = serde_json::from_str("\"execution_error\"").unwrap();
        assert_eq!(back, Status::ExecutionError);
    }

    #[test]
    fn test_invocation_defaults() {
        // A chain step without arguments omits both argument fields.
        let inv: Invocation = serde_json::from_str(r#"{"method":"total"}"#).unwrap();
        assert_eq!(inv.method, "total");
        assert!(inv.args.is_empty());
        assert!(inv.named.is_empty());
    }

    #[test]
    fn test_request_envelope_roundtrip() {
        let envelope = RequestEnvelope {
            object: "calc".to_string(),
            invocations: vec![Invocation::new("add", vec![json!(2), json!(3)])],
            raw: false,
        };
        let text = serde_json::to_string(&envelope).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.object, "calc");
        assert_eq!(back.invocations.len(), 1);
        assert_eq!(back.invocations[0].args, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_handshake_frame_shape() {
        let frame = ClientFrame::Handshake {
            secret: "s3cr3t".to_string(),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"handshake\""));
        let back: ClientFrame = serde_json::from_str(&text).unwrap();
        match back {
            ClientFrame::Handshake { secret } => assert_eq!(secret, "s3cr3t"),
            other => panic!("Expected Handshake, got {other:?}"),
        }
    }

    #[test]
    fn test_sealed_frame_roundtrip() {
        let frame = ClientFrame::Sealed {
            session_key: "ab12".to_string(),
            payload: "Zm9v".to_string(),
        };
        let text = serde_json::to_string(&frame).unwrap();
        let back: ClientFrame = serde_json::from_str(&text).unwrap();
        match back {
            ClientFrame::Sealed {
                session_key,
                payload,
            } => {
                assert_eq!(session_key, "ab12");
                assert_eq!(payload, "Zm9v");
            }
            other => panic!("Expected Sealed, got {other:?}"),
        }
    }

    #[test]
    fn test_response_envelope_omits_empty_fields() {
        let response = ResponseEnvelope::ok(json!(5));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("error"));

        let failure = ResponseEnvelope::failure(Status::Forbidden, "denied");
        let text = serde_json::to_string(&failure).unwrap();
        assert!(!text.contains("value"));
        assert!(text.contains("denied"));
    }

    #[test]
    fn test_error_mapping() {
        let response =
            ResponseEnvelope::from_error(&NexumError::Authorization("no 'eval' on 'calc'".into()));
        assert_eq!(response.status, Status::Forbidden);
        assert!(response.error.unwrap().contains("eval"));

        let response = ResponseEnvelope::from_error(&NexumError::Session("stale key".into()));
        assert_eq!(response.status, Status::SessionError);
    }

    #[test]
    fn test_server_frame_response_tagging() {
        let frame = ServerFrame::Response(ResponseEnvelope::ok(json!({"a": 1})));
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"response\""));
        let back: ServerFrame = serde_json::from_str(&text).unwrap();
        match back {
            ServerFrame::Response(envelope) => assert_eq!(envelope.status, Status::Ok),
            other => panic!("Expected Response, got {other:?}"),
        }
    }
}
