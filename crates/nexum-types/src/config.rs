//! Configuration structs for the controller and the client.
//!
//! Both deserialize from TOML (the CLI loads `~/.nexum/config.toml`) and
//! carry defaults that match the original deployment conventions: port 2016,
//! encryption on, no peer restrictions, no session expiry.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 2016;

/// Server-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Address the controller binds its TCP listener on. Port 0 picks an
    /// ephemeral port; the bound address is reported by `Controller::port`.
    pub listen_addr: SocketAddr,
    /// Shared secret clients must present at handshake.
    pub secret: String,
    /// Whether minted sessions encrypt envelope traffic.
    pub encrypt: bool,
    /// Peer IPs allowed to handshake (exact match). Empty means all.
    pub allowed_peers: Vec<String>,
    /// Peer IP patterns allowed to handshake (regex). Empty means all.
    pub allowed_peer_patterns: Vec<String>,
    /// Peer IPs refused at handshake (exact match). Checked before allows.
    pub denied_peers: Vec<String>,
    /// Peer IP patterns refused at handshake (regex). Checked before allows.
    pub denied_peer_patterns: Vec<String>,
    /// Optional session lifetime in seconds. `None` keeps sessions for the
    /// life of the process, one entry per distinct peer address.
    pub session_ttl_secs: Option<u64>,
    /// How long a handler waits for the inbound frame before giving up.
    pub read_timeout_secs: u64,
    /// Capability strings reported by `controller.required_capabilities`.
    pub capabilities: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            secret: String::new(),
            encrypt: true,
            allowed_peers: Vec::new(),
            allowed_peer_patterns: Vec::new(),
            denied_peers: Vec::new(),
            denied_peer_patterns: Vec::new(),
            session_ttl_secs: None,
            read_timeout_secs: 30,
            capabilities: Vec::new(),
        }
    }
}

/// Client-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller host.
    pub host: String,
    /// Controller port.
    pub port: u16,
    /// Optional local address to bind outgoing connections to. Useful on
    /// multi-homed hosts where the server keys sessions by source IP.
    pub bind_addr: Option<IpAddr>,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds (write request + read response).
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bind_addr: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}
