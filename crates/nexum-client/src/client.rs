//! The client: handshake, per-call connections, and the bounded retry.
//!
//! Connection model is one TCP connection per call, fully synchronous from
//! the caller's point of view: connect, send one framed request, read one
//! framed response, close. The only automatic retry is a single transparent
//! re-authentication when a call comes back `unauthorized` or
//! `session_error` and a secret is cached.

use crate::replicant::Replicant;
use nexum_types::ClientConfig;
use nexum_wire::{
    read_frame, write_frame, CipherSession, ClientFrame, Invocation, NamedArgs, RequestEnvelope,
    ResponseEnvelope, ServerFrame, Status, WireError, CONTROLLER_NAME,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Framing, codec, or crypto failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The connect or request deadline elapsed.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a failure status.
    #[error("Remote error ({status}): {message}")]
    Remote {
        /// Status classification from the response envelope.
        status: Status,
        /// The server's error description.
        message: String,
    },

    /// The peer sent a frame that makes no sense at this point.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `proxy` was asked for a name the registry does not carry.
    #[error("No object is registered under the name '{0}'")]
    UnknownObject(String),
}

#[derive(Debug)]
struct SessionState {
    /// Secret cached after a successful handshake, for the retry path.
    secret: Option<Zeroizing<String>>,
    /// Session credentials mirroring the server's entry for this peer.
    session: Option<CipherSession>,
}

/// Client-side session and request engine.
///
/// Cheap to clone; clones share the cached session, so a retry performed
/// through one handle benefits proxies created from another.
#[derive(Clone, Debug)]
pub struct Client {
    config: ClientConfig,
    state: Arc<Mutex<SessionState>>,
}

impl Client {
    /// Build a client from configuration. No connection is opened until the
    /// first handshake or call.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SessionState {
                secret: None,
                session: None,
            })),
        }
    }

    /// Convenience constructor for host/port with default timeouts.
    pub fn connect_to(host: impl Into<String>, port: u16) -> Self {
        Self::new(ClientConfig {
            host: host.into(),
            port,
            ..ClientConfig::default()
        })
    }

    /// Present the shared secret and cache the minted session.
    ///
    /// Never raises: failure returns `false` and the caller decides how to
    /// react. A failed attempt leaves a previously cached session in place,
    /// mirroring the server's rule that a failed handshake does not
    /// invalidate an existing session.
    pub async fn authenticate(&self, secret: impl Into<String>) -> bool {
        let secret = Zeroizing::new(secret.into());
        match self.handshake(&secret).await {
            Ok(session) => {
                let mut state = self.lock_state();
                state.secret = Some(secret);
                state.session = Some(session);
                true
            }
            Err(e) => {
                warn!(error = %e, "client: handshake failed");
                false
            }
        }
    }

    /// Whether a session is currently cached.
    pub fn is_authenticated(&self) -> bool {
        self.lock_state().session.is_some()
    }

    /// Invoke one method on a registered object and return its value.
    pub async fn call(
        &self,
        object: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        named: NamedArgs,
    ) -> Result<Value, ClientError> {
        self.request(RequestEnvelope {
            object: object.into(),
            invocations: vec![Invocation::with_named(method, args, named)],
            raw: false,
        })
        .await
    }

    /// Send a request envelope, absorbing one session failure by
    /// re-authenticating and retrying. A second consecutive failure
    /// surfaces to the caller.
    pub(crate) async fn request(&self, envelope: RequestEnvelope) -> Result<Value, ClientError> {
        let first = self.send_once(&envelope).await?;
        if matches!(first.status, Status::Unauthorized | Status::SessionError) {
            let secret = self.lock_state().secret.clone();
            if let Some(secret) = secret {
                debug!(status = %first.status, "client: session failure, re-authenticating once");
                if self.authenticate(secret.as_str()).await {
                    let second = self.send_once(&envelope).await?;
                    return into_result(second);
                }
            }
        }
        into_result(first)
    }

    /// Names of all objects registered on the controller.
    pub async fn registered_objects(&self) -> Result<Vec<String>, ClientError> {
        let value = self
            .call(CONTROLLER_NAME, "registered_objects", vec![], NamedArgs::new())
            .await?;
        Ok(serde_json::from_value(value).map_err(WireError::Json)?)
    }

    /// Capability strings the controller declares.
    pub async fn required_capabilities(&self) -> Result<Vec<String>, ClientError> {
        let value = self
            .call(
                CONTROLLER_NAME,
                "required_capabilities",
                vec![],
                NamedArgs::new(),
            )
            .await?;
        Ok(serde_json::from_value(value).map_err(WireError::Json)?)
    }

    /// Obtain a proxy for a registered object.
    pub async fn proxy(&self, name: &str) -> Result<Replicant, ClientError> {
        if self.registered_objects().await?.iter().any(|n| n == name) {
            Ok(Replicant::new(name.to_string(), self.clone()))
        } else {
            Err(ClientError::UnknownObject(name.to_string()))
        }
    }

    /// One connection, one request, one response.
    async fn send_once(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope, ClientError> {
        let session = self.lock_state().session.clone();
        let frame = match &session {
            Some(session) if session.enabled() => ClientFrame::Sealed {
                session_key: session.key_hex(),
                payload: session.seal_json(envelope)?,
            },
            Some(session) => ClientFrame::Request {
                session_key: Some(session.key_hex()),
                envelope: envelope.clone(),
            },
            None => ClientFrame::Request {
                session_key: None,
                envelope: envelope.clone(),
            },
        };

        let reply = self.exchange(&frame).await?;
        match reply {
            ServerFrame::Response(response) => Ok(response),
            ServerFrame::Sealed { payload } => {
                let Some(session) = session else {
                    return Err(ClientError::Protocol(
                        "sealed response without a cached session".to_string(),
                    ));
                };
                Ok(session.open_json(&payload)?)
            }
            ServerFrame::HandshakeAck { .. } => Err(ClientError::Protocol(
                "handshake acknowledgement in reply to a request".to_string(),
            )),
        }
    }

    /// Run the handshake and build the session from the acknowledgement.
    async fn handshake(&self, secret: &str) -> Result<CipherSession, ClientError> {
        let frame = ClientFrame::Handshake {
            secret: secret.to_string(),
        };
        match self.exchange(&frame).await? {
            ServerFrame::HandshakeAck {
                status: Status::Accepted,
                session_key,
                session_iv,
                encrypt,
                ..
            } => Ok(CipherSession::from_hex(&session_key, &session_iv, encrypt)?),
            ServerFrame::HandshakeAck { status, .. } => Err(ClientError::Protocol(format!(
                "unexpected handshake status '{status}'"
            ))),
            ServerFrame::Response(response) => Err(ClientError::Remote {
                status: response.status,
                message: response.error.unwrap_or_default(),
            }),
            ServerFrame::Sealed { .. } => Err(ClientError::Protocol(
                "sealed frame in reply to a handshake".to_string(),
            )),
        }
    }

    /// Open a fresh connection, write one frame, read one frame.
    async fn exchange(&self, frame: &ClientFrame) -> Result<ServerFrame, ClientError> {
        let stream = self.open_stream().await?;
        let (mut reader, mut writer) = stream.into_split();

        let deadline = Duration::from_secs(self.config.request_timeout_secs);
        let roundtrip = async {
            write_frame(&mut writer, frame).await?;
            read_frame::<_, ServerFrame>(&mut reader).await
        };
        match tokio::time::timeout(deadline, roundtrip).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn open_stream(&self) -> Result<TcpStream, ClientError> {
        let deadline = Duration::from_secs(self.config.connect_timeout_secs);
        let connect = async {
            match self.config.bind_addr {
                Some(bind_ip) => {
                    let remote = self.resolve(bind_ip.is_ipv4()).await?;
                    let socket = if bind_ip.is_ipv4() {
                        TcpSocket::new_v4()?
                    } else {
                        TcpSocket::new_v6()?
                    };
                    socket.bind(SocketAddr::new(bind_ip, 0))?;
                    socket.connect(remote).await
                }
                None => {
                    TcpStream::connect((self.config.host.as_str(), self.config.port)).await
                }
            }
        };
        match tokio::time::timeout(deadline, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ClientError::Transport(e)),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn resolve(&self, want_v4: bool) -> std::io::Result<SocketAddr> {
        let mut addrs =
            tokio::net::lookup_host((self.config.host.as_str(), self.config.port)).await?;
        addrs
            .find(|addr| addr.is_ipv4() == want_v4)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no address family matching the bind address",
                )
            })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn into_result(response: ResponseEnvelope) -> Result<Value, ClientError> {
    if response.status.is_success() {
        Ok(response.value.unwrap_or(Value::Null))
    } else {
        Err(ClientError::Remote {
            status: response.status,
            message: response.error.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_client_is_unauthenticated() {
        let client = Client::new(ClientConfig::default());
        assert!(!client.is_authenticated());
    }

    #[test]
    fn test_clones_share_session_state() {
        let client = Client::new(ClientConfig::default());
        let clone = client.clone();
        client.lock_state().session = Some(CipherSession::mint(
            &"127.0.0.1".parse().unwrap(),
            "s3cr3t",
            true,
        ));
        assert!(clone.is_authenticated());
    }

    #[test]
    fn test_into_result_classification() {
        let ok = ResponseEnvelope::ok(serde_json::json!(5));
        assert_eq!(into_result(ok).unwrap(), serde_json::json!(5));

        let denied = ResponseEnvelope::failure(Status::Forbidden, "nope");
        match into_result(denied) {
            Err(ClientError::Remote { status, message }) => {
                assert_eq!(status, Status::Forbidden);
                assert_eq!(message, "nope");
            }
            other => panic!("Expected Remote error, got {other:?}"),
        }
    }
}
