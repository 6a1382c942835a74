//! The Controller: accept loop, handshake, session checks, and dispatch.
//!
//! Every accepted connection is handled on its own task: read one framed
//! request (with a read deadline), answer it, close. A handshake presenting
//! the configured secret mints a cipher session keyed by the peer's IP
//! address; authenticated requests are checked against that session, then
//! decrypted, authorized per step, and dispatched with value threading.

use crate::policy::{AuthPolicy, PeerFilter, PolicyScope};
use crate::registry::{InvokeError, ObjectRegistry, Outcome, ServiceObject, CONTROLLER_NAME};
use crate::sessions::SessionStore;
use nexum_types::{ControllerConfig, NexumError, NexumResult};
use nexum_wire::{
    read_frame, write_frame, CipherSession, ClientFrame, RequestEnvelope, ResponseEnvelope,
    ServerFrame, Status, WireError,
};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Methods on the controller facade that stay callable despite its
/// deny-all marker.
const CONTROLLER_WHITELIST: [&str; 6] = [
    "port",
    "running",
    "restart",
    "registered_objects",
    "required_capabilities",
    "uptime_secs",
];

#[derive(Default)]
struct ListenerState {
    /// Last bound address; survives a stop so a restart keeps its port.
    addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl ListenerState {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

struct ControllerInner {
    config: ControllerConfig,
    registry: ObjectRegistry,
    sessions: SessionStore,
    policy: RwLock<AuthPolicy>,
    peers: PeerFilter,
    listener: tokio::sync::Mutex<ListenerState>,
    started_at: Instant,
}

/// Server-side engine: object registry, session store, authorization
/// policy, and the TCP accept loop.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    /// Build a controller from configuration. Compiles peer patterns and
    /// installs the default policy: global `eval` blacklist, deny-all on
    /// the controller facade with its introspection whitelist.
    pub fn new(config: ControllerConfig) -> NexumResult<Self> {
        let peers = PeerFilter::from_config(&config)?;
        let ttl = config.session_ttl_secs.map(Duration::from_secs);

        let mut policy = AuthPolicy::new();
        policy.deny_all(CONTROLLER_NAME);
        policy.whitelist(PolicyScope::object(CONTROLLER_NAME), CONTROLLER_WHITELIST);

        let inner = Arc::new_cyclic(|weak: &Weak<ControllerInner>| {
            let registry = ObjectRegistry::new();
            registry.bind_controller(Arc::new(ControllerObject {
                inner: weak.clone(),
            }));
            ControllerInner {
                config,
                registry,
                sessions: SessionStore::new(ttl),
                policy: RwLock::new(policy),
                peers,
                listener: tokio::sync::Mutex::new(ListenerState::default()),
                started_at: Instant::now(),
            }
        });

        Ok(Self { inner })
    }

    /// Register name → object bindings. Validation happens before any
    /// insert, so a rejected batch has no partial effect.
    pub fn register<I>(&self, bindings: I) -> NexumResult<()>
    where
        I: IntoIterator<Item = (String, Arc<dyn ServiceObject>)>,
    {
        self.inner.registry.register(bindings)
    }

    /// Remove a registered object. The reserved controller entry cannot be
    /// removed.
    pub fn remove(&self, name: &str) -> NexumResult<Option<Arc<dyn ServiceObject>>> {
        self.inner.registry.remove(name)
    }

    /// Names of all registered objects, including `controller`.
    pub fn registered_objects(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Add methods to a whitelist (global scope or one object).
    pub fn whitelist<I, S>(&self, scope: PolicyScope, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_policy().whitelist(scope, methods);
    }

    /// Add methods to a blacklist (global scope or one object).
    pub fn blacklist<I, S>(&self, scope: PolicyScope, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_policy().blacklist(scope, methods);
    }

    /// Deny every method on an object (whitelists still win).
    pub fn deny_all(&self, object: impl Into<String>) {
        self.write_policy().deny_all(object);
    }

    /// Bind the listener and spawn the accept loop. Idempotent: a running
    /// controller just reports its bound address.
    pub async fn start(&self) -> NexumResult<SocketAddr> {
        self.inner.start().await
    }

    /// Abort the accept loop. Best-effort: in-flight handlers finish on
    /// their own sockets. Returns whether a listener was actually stopped.
    pub async fn stop(&self) -> bool {
        self.inner.stop().await
    }

    /// Stop then start, rebinding the previously bound address.
    pub async fn restart(&self) -> NexumResult<SocketAddr> {
        self.inner.restart().await
    }

    /// Whether the accept loop is alive.
    pub async fn running(&self) -> bool {
        self.inner.running().await
    }

    /// Bound listen address, if running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().await
    }

    /// Bound listen port, if running.
    pub async fn port(&self) -> Option<u16> {
        self.inner.local_addr().await.map(|addr| addr.port())
    }

    /// Seconds since the controller was constructed.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Number of live sessions (expired entries may still be counted until
    /// their next lookup or a prune).
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Drop expired sessions; returns how many were removed.
    pub fn prune_sessions(&self) -> usize {
        self.inner.sessions.prune()
    }

    /// Drop every session, forcing all peers to re-handshake.
    pub fn clear_sessions(&self) {
        self.inner.sessions.clear()
    }

    fn write_policy(&self) -> std::sync::RwLockWriteGuard<'_, AuthPolicy> {
        self.inner.policy.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ControllerInner {
    async fn start(self: &Arc<Self>) -> NexumResult<SocketAddr> {
        let mut state = self.listener.lock().await;
        if state.is_running() {
            return Ok(state.addr.unwrap_or(self.config.listen_addr));
        }

        // Rebind the prior address so a restart keeps its port even when
        // the config asked for an ephemeral one.
        let target = state.addr.unwrap_or(self.config.listen_addr);
        let listener = TcpListener::bind(target).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "controller: listening");

        let inner = Arc::clone(self);
        state.addr = Some(addr);
        state.task = Some(tokio::spawn(async move {
            accept_loop(listener, inner).await;
        }));
        Ok(addr)
    }

    async fn stop(&self) -> bool {
        let mut state = self.listener.lock().await;
        match state.task.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                // Wait for the task to drop so the listener socket is
                // actually closed before a restart rebinds it.
                let _ = task.await;
                if let Some(addr) = state.addr {
                    info!(%addr, "controller: stopped");
                }
                true
            }
            _ => false,
        }
    }

    async fn restart(self: &Arc<Self>) -> NexumResult<SocketAddr> {
        self.stop().await;
        self.start().await
    }

    async fn running(&self) -> bool {
        self.listener.lock().await.is_running()
    }

    async fn local_addr(&self) -> Option<SocketAddr> {
        let state = self.listener.lock().await;
        if state.is_running() {
            state.addr
        } else {
            None
        }
    }

    fn read_policy(&self) -> std::sync::RwLockReadGuard<'_, AuthPolicy> {
        self.policy.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Accept connections forever, one task per connection.
async fn accept_loop(listener: TcpListener, inner: Arc<ControllerInner>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(peer = %addr, "controller: accepted connection");
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    handle_connection(stream, addr, inner).await;
                });
            }
            Err(e) => {
                error!(error = %e, "controller: accept error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Handle one connection: read a frame, answer it, close.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, inner: Arc<ControllerInner>) {
    let peer_ip = peer.ip();
    let (mut reader, mut writer) = stream.into_split();

    let read_deadline = Duration::from_secs(inner.config.read_timeout_secs);
    let frame = match tokio::time::timeout(read_deadline, read_frame::<_, ClientFrame>(&mut reader))
        .await
    {
        Ok(Ok(frame)) => frame,
        Ok(Err(WireError::ConnectionClosed)) => {
            debug!(peer = %peer, "controller: peer closed before sending a frame");
            return;
        }
        Ok(Err(e)) => {
            warn!(peer = %peer, error = %e, "controller: malformed frame");
            let error = NexumError::Serialization(e.to_string());
            respond_plain(&mut writer, ResponseEnvelope::from_error(&error)).await;
            return;
        }
        Err(_) => {
            warn!(peer = %peer, "controller: read timed out");
            let error = NexumError::Internal("read timed out".to_string());
            respond_plain(&mut writer, ResponseEnvelope::from_error(&error)).await;
            return;
        }
    };

    match frame {
        ClientFrame::Handshake { secret } => {
            let frame = handle_handshake(&inner, peer_ip, &secret);
            send_frame(&mut writer, &frame).await;
        }
        ClientFrame::Request {
            session_key,
            envelope,
        } => {
            let frame = handle_request(&inner, peer_ip, session_key.as_deref(), Ok(envelope)).await;
            send_frame(&mut writer, &frame).await;
        }
        ClientFrame::Sealed {
            session_key,
            payload,
        } => {
            let frame =
                handle_request(&inner, peer_ip, Some(&session_key), Err(payload.as_str())).await;
            send_frame(&mut writer, &frame).await;
        }
    }
}

/// Compare the presented secret to the configured one and mint a session.
///
/// A failed attempt never touches an existing session for the peer.
fn handle_handshake(inner: &Arc<ControllerInner>, peer_ip: IpAddr, secret: &str) -> ServerFrame {
    if !inner.peers.permits(&peer_ip) {
        warn!(peer = %peer_ip, "controller: peer refused by filter");
        return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Authentication(
            format!("peer address {peer_ip} is not allowed"),
        )));
    }

    let secret_ok: bool = inner
        .config
        .secret
        .as_bytes()
        .ct_eq(secret.as_bytes())
        .into();
    if !secret_ok {
        warn!(peer = %peer_ip, "controller: handshake with invalid secret");
        return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Authentication(
            "invalid secret".to_string(),
        )));
    }

    let session = CipherSession::mint(&peer_ip, &inner.config.secret, inner.config.encrypt);
    let ack = ServerFrame::HandshakeAck {
        status: Status::Accepted,
        session_key: session.key_hex(),
        session_iv: session.iv_hex(),
        encrypt: session.enabled(),
        time: chrono::Utc::now(),
    };
    inner.sessions.insert(peer_ip, session);
    info!(peer = %peer_ip, "controller: handshake accepted");
    ack
}

/// Check the session, decode the envelope, dispatch, and build the reply.
///
/// `body` is either an already-decoded plaintext envelope or a sealed
/// base64 payload still to be opened with the peer's session. Every failure
/// is converted into a structured response right here at the handler
/// boundary; nothing propagates further up.
async fn handle_request(
    inner: &Arc<ControllerInner>,
    peer_ip: IpAddr,
    session_key: Option<&str>,
    body: Result<RequestEnvelope, &str>,
) -> ServerFrame {
    let Some(session) = inner.sessions.get(&peer_ip) else {
        return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Session(
            format!("no session for peer {peer_ip}, authenticate first"),
        )));
    };

    let key_ok = session_key.is_some_and(|presented| session.matches_key(presented));
    if !key_ok {
        warn!(peer = %peer_ip, "controller: session key mismatch");
        return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Session(
            format!("session key mismatch for peer {peer_ip}"),
        )));
    }

    let envelope = match body {
        Ok(envelope) => {
            if session.enabled() {
                // The session was minted with encryption on; refuse the
                // plaintext downgrade.
                return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Session(
                    "encryption is required for this session".to_string(),
                )));
            }
            envelope
        }
        Err(payload) => match session.open_json::<RequestEnvelope>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer = %peer_ip, error = %e, "controller: failed to open sealed request");
                return ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Crypto(
                    e.to_string(),
                )));
            }
        },
    };

    let response = match dispatch(inner, &envelope).await {
        Ok(value) => ResponseEnvelope::ok(value),
        Err(e) => ResponseEnvelope::from_error(&e),
    };
    debug!(
        peer = %peer_ip,
        object = %envelope.object,
        status = %response.status,
        code = response.status.code(),
        steps = envelope.invocations.len(),
        "controller: request handled"
    );

    if session.enabled() {
        match session.seal_json(&response) {
            Ok(payload) => ServerFrame::Sealed { payload },
            Err(e) => ServerFrame::Response(ResponseEnvelope::from_error(&NexumError::Crypto(
                e.to_string(),
            ))),
        }
    } else {
        ServerFrame::Response(response)
    }
}

/// Walk the invocation sequence in order, threading receivers.
///
/// The receiver of step *i+1* is the object returned by step *i*; the first
/// receiver is the registered object. Authorization is checked per step
/// against the registered name. The first failure aborts the chain.
async fn dispatch(
    inner: &Arc<ControllerInner>,
    envelope: &RequestEnvelope,
) -> Result<Value, NexumError> {
    let root = inner.registry.get(&envelope.object).ok_or_else(|| {
        NexumError::Dispatch(format!("object '{}' does not exist", envelope.object))
    })?;
    if envelope.invocations.is_empty() {
        return Err(NexumError::Validation(
            "request carries no invocations".to_string(),
        ));
    }

    let mut receiver: Arc<dyn ServiceObject> = root;
    let mut final_value: Option<Value> = None;

    for (index, invocation) in envelope.invocations.iter().enumerate() {
        if final_value.is_some() {
            return Err(NexumError::Dispatch(format!(
                "step {index} has no receiver: the previous step returned a plain value, \
                 which has no method '{}'",
                invocation.method
            )));
        }

        let permitted = inner
            .read_policy()
            .permits(&envelope.object, &invocation.method);
        if !permitted {
            return Err(NexumError::Authorization(format!(
                "you are not authorized to run '{}' on '{}'",
                invocation.method, envelope.object
            )));
        }

        // A panicking hosted method must not take the handler down; run the
        // step on its own task and map a panic to an execution error.
        let step_receiver = Arc::clone(&receiver);
        let step = invocation.clone();
        let joined = tokio::spawn(async move { step_receiver.invoke(&step).await }).await;

        match joined {
            Err(e) => {
                return Err(NexumError::Execution(format!(
                    "method '{}' panicked: {e}",
                    invocation.method
                )));
            }
            Ok(Err(InvokeError::NoSuchMethod(method))) => {
                return Err(NexumError::Dispatch(format!(
                    "'{}' has no method '{method}'",
                    receiver.kind()
                )));
            }
            Ok(Err(InvokeError::Failed(message))) => {
                return Err(NexumError::Execution(format!(
                    "step {index} ('{}') failed: {message}",
                    invocation.method
                )));
            }
            Ok(Ok(Outcome::Object(next))) => receiver = next,
            Ok(Ok(Outcome::Value(value))) => final_value = Some(value),
        }
    }

    let value = final_value.unwrap_or_else(|| receiver.render());
    if envelope.raw {
        let text =
            serde_json::to_string(&value).map_err(|e| NexumError::Serialization(e.to_string()))?;
        Ok(Value::String(text))
    } else {
        Ok(value)
    }
}

async fn respond_plain(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    response: ResponseEnvelope,
) {
    send_frame(writer, &ServerFrame::Response(response)).await;
}

async fn send_frame(writer: &mut tokio::net::tcp::OwnedWriteHalf, frame: &ServerFrame) {
    if let Err(e) = write_frame(writer, frame).await {
        debug!(error = %e, "controller: failed to write response");
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(writer).await;
}

/// The controller's own introspection object, bound at the reserved name.
///
/// Deny-all by default; only the small whitelist in
/// [`CONTROLLER_WHITELIST`] is reachable over the wire.
struct ControllerObject {
    inner: Weak<ControllerInner>,
}

#[async_trait::async_trait]
impl ServiceObject for ControllerObject {
    fn kind(&self) -> &str {
        CONTROLLER_NAME
    }

    async fn invoke(&self, invocation: &nexum_wire::Invocation) -> Result<Outcome, InvokeError> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(InvokeError::Failed("controller is gone".to_string()));
        };
        match invocation.method.as_str() {
            "port" => Ok(Outcome::Value(json!(inner
                .local_addr()
                .await
                .map(|addr| addr.port())))),
            "running" => Ok(Outcome::Value(json!(inner.running().await))),
            "restart" => match inner.restart().await {
                Ok(addr) => Ok(Outcome::Value(json!(addr.port()))),
                Err(e) => Err(InvokeError::Failed(e.to_string())),
            },
            "registered_objects" => Ok(Outcome::Value(json!(inner.registry.names()))),
            "required_capabilities" => Ok(Outcome::Value(json!(inner.config.capabilities))),
            "uptime_secs" => Ok(Outcome::Value(json!(inner.started_at.elapsed().as_secs()))),
            other => Err(InvokeError::NoSuchMethod(other.to_string())),
        }
    }
}
