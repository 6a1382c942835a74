//! Per-peer session store.
//!
//! One entry per peer IP address, written only on a successful handshake.
//! Overwrite policy is last-successful-handshake-wins: a request racing a
//! re-handshake from the same address fails its session check and surfaces
//! the error to its caller. Entries optionally expire after a TTL; expiry is
//! applied lazily at lookup.

use dashmap::DashMap;
use nexum_wire::CipherSession;
use std::net::IpAddr;
use std::time::{Duration, Instant};

struct SessionEntry {
    session: CipherSession,
    created_at: Instant,
}

/// Concurrency-safe map: peer address → cipher session.
pub struct SessionStore {
    sessions: DashMap<IpAddr, SessionEntry>,
    ttl: Option<Duration>,
}

impl SessionStore {
    /// Create a store; `ttl = None` keeps sessions for the process lifetime.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Store a freshly minted session, replacing any prior entry.
    ///
    /// Callers must only invoke this on the handshake success path; a failed
    /// handshake never touches an existing session.
    pub fn insert(&self, peer: IpAddr, session: CipherSession) {
        self.sessions.insert(
            peer,
            SessionEntry {
                session,
                created_at: Instant::now(),
            },
        );
    }

    /// Look up the session for a peer, dropping it if expired.
    pub fn get(&self, peer: &IpAddr) -> Option<CipherSession> {
        let expired = match self.sessions.get(peer) {
            Some(entry) => match self.ttl {
                Some(ttl) if entry.created_at.elapsed() >= ttl => true,
                _ => return Some(entry.session.clone()),
            },
            None => return None,
        };
        if expired {
            self.sessions.remove(peer);
        }
        None
    }

    /// Drop every session, forcing all peers to re-handshake.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Drop all expired entries; returns how many were removed.
    pub fn prune(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - self.sessions.len()
    }

    /// Number of stored sessions, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
