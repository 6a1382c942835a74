//! Method authorization and peer filtering.
//!
//! Authorization precedence: whitelist membership (global or per-object)
//! always allows, overriding any blacklist entry; otherwise blacklist
//! membership (global, per-object, or a per-object deny-all marker) denies;
//! otherwise the default is allow.

use nexum_types::{ControllerConfig, NexumError, NexumResult};
use regex_lite::Regex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Scope of a whitelist/blacklist rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyScope {
    /// Applies to every object.
    Global,
    /// Applies to one registered object.
    Object(String),
}

impl PolicyScope {
    /// Convenience constructor for per-object scopes.
    pub fn object(name: impl Into<String>) -> Self {
        PolicyScope::Object(name.into())
    }
}

/// Whitelist/blacklist rule sets for (object, method) pairs.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    global_allow: HashSet<String>,
    global_deny: HashSet<String>,
    object_allow: HashMap<String, HashSet<String>>,
    object_deny: HashMap<String, HashSet<String>>,
    deny_all: HashSet<String>,
}

impl AuthPolicy {
    /// A policy with the default global blacklist (`eval`).
    pub fn new() -> Self {
        Self {
            global_allow: HashSet::new(),
            global_deny: HashSet::from(["eval".to_string()]),
            object_allow: HashMap::new(),
            object_deny: HashMap::new(),
            deny_all: HashSet::new(),
        }
    }

    /// Add methods to a whitelist.
    pub fn whitelist<I, S>(&mut self, scope: PolicyScope, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let methods = methods.into_iter().map(Into::into);
        match scope {
            PolicyScope::Global => self.global_allow.extend(methods),
            PolicyScope::Object(name) => {
                self.object_allow.entry(name).or_default().extend(methods)
            }
        }
    }

    /// Add methods to a blacklist.
    pub fn blacklist<I, S>(&mut self, scope: PolicyScope, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let methods = methods.into_iter().map(Into::into);
        match scope {
            PolicyScope::Global => self.global_deny.extend(methods),
            PolicyScope::Object(name) => {
                self.object_deny.entry(name).or_default().extend(methods)
            }
        }
    }

    /// Mark every method on an object as denied (whitelists still win).
    pub fn deny_all(&mut self, object: impl Into<String>) {
        self.deny_all.insert(object.into());
    }

    /// Decide whether `method` may run on `object`.
    pub fn permits(&self, object: &str, method: &str) -> bool {
        if self.global_allow.contains(method) {
            return true;
        }
        if self
            .object_allow
            .get(object)
            .is_some_and(|methods| methods.contains(method))
        {
            return true;
        }
        if self.global_deny.contains(method) {
            return false;
        }
        if self.deny_all.contains(object) {
            return false;
        }
        if self
            .object_deny
            .get(object)
            .is_some_and(|methods| methods.contains(method))
        {
            return false;
        }
        true
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer allow/deny rule: an exact address or a compiled pattern.
#[derive(Debug, Clone)]
enum PeerRule {
    Exact(String),
    Pattern(Regex),
}

impl PeerRule {
    fn matches(&self, addr: &str) -> bool {
        match self {
            PeerRule::Exact(expected) => addr == expected,
            PeerRule::Pattern(regex) => regex.is_match(addr),
        }
    }
}

/// Peer address filter applied at handshake. Deny rules are evaluated
/// before allow rules; an empty allow set admits every peer.
#[derive(Debug, Clone, Default)]
pub struct PeerFilter {
    allow: Vec<PeerRule>,
    deny: Vec<PeerRule>,
}

impl PeerFilter {
    /// Build the filter from controller configuration, compiling patterns.
    pub fn from_config(config: &ControllerConfig) -> NexumResult<Self> {
        let mut filter = PeerFilter::default();
        for addr in &config.allowed_peers {
            filter.allow.push(PeerRule::Exact(addr.clone()));
        }
        for pattern in &config.allowed_peer_patterns {
            filter.allow.push(PeerRule::Pattern(compile(pattern)?));
        }
        for addr in &config.denied_peers {
            filter.deny.push(PeerRule::Exact(addr.clone()));
        }
        for pattern in &config.denied_peer_patterns {
            filter.deny.push(PeerRule::Pattern(compile(pattern)?));
        }
        Ok(filter)
    }

    /// Decide whether a peer address may handshake.
    pub fn permits(&self, peer: &IpAddr) -> bool {
        let addr = peer.to_string();
        if self.deny.iter().any(|rule| rule.matches(&addr)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|rule| rule.matches(&addr))
    }
}

fn compile(pattern: &str) -> NexumResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| NexumError::Validation(format!("invalid peer pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_denies_eval() {
        let policy = AuthPolicy::new();
        assert!(!policy.permits("calc", "eval"));
        assert!(policy.permits("calc", "add"));
    }

    #[test]
    fn test_whitelist_dominates_blacklist() {
        // Property: whitelist membership always allows, no matter which
        // blacklists also name the method.
        let mut policy = AuthPolicy::new();
        policy.blacklist(PolicyScope::Global, ["dump"]);
        policy.blacklist(PolicyScope::object("store"), ["dump"]);
        policy.deny_all("store");
        policy.whitelist(PolicyScope::object("store"), ["dump"]);
        assert!(policy.permits("store", "dump"));

        // A global whitelist entry wins too, even over deny_all.
        let mut policy = AuthPolicy::new();
        policy.deny_all("store");
        policy.whitelist(PolicyScope::Global, ["ping"]);
        assert!(policy.permits("store", "ping"));
    }

    #[test]
    fn test_global_whitelist_overrides_default_eval_deny() {
        let mut policy = AuthPolicy::new();
        policy.whitelist(PolicyScope::Global, ["eval"]);
        assert!(policy.permits("calc", "eval"));
    }

    #[test]
    fn test_deny_all_blocks_everything_else() {
        let mut policy = AuthPolicy::new();
        policy.deny_all("store");
        policy.whitelist(PolicyScope::object("store"), ["status"]);
        assert!(policy.permits("store", "status"));
        assert!(!policy.permits("store", "clear"));
        assert!(!policy.permits("store", "get"));
        // Other objects are unaffected.
        assert!(policy.permits("calc", "add"));
    }

    #[test]
    fn test_object_blacklist_scoped() {
        let mut policy = AuthPolicy::new();
        policy.blacklist(PolicyScope::object("store"), ["clear"]);
        assert!(!policy.permits("store", "clear"));
        assert!(policy.permits("calc", "clear"));
    }

    #[test]
    fn test_global_blacklist_applies_everywhere() {
        let mut policy = AuthPolicy::new();
        policy.blacklist(PolicyScope::Global, ["shutdown"]);
        assert!(!policy.permits("store", "shutdown"));
        assert!(!policy.permits("calc", "shutdown"));
    }

    #[test]
    fn test_default_is_allow() {
        let policy = AuthPolicy::new();
        assert!(policy.permits("anything", "whatever"));
    }

    fn peer(addr: &str) -> IpAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_empty_filter_admits_all() {
        let filter = PeerFilter::from_config(&ControllerConfig::default()).unwrap();
        assert!(filter.permits(&peer("10.0.0.1")));
        assert!(filter.permits(&peer("::1")));
    }

    #[test]
    fn test_exact_allow() {
        let mut config = ControllerConfig::default();
        config.allowed_peers = vec!["10.0.0.7".to_string()];
        let filter = PeerFilter::from_config(&config).unwrap();
        assert!(filter.permits(&peer("10.0.0.7")));
        assert!(!filter.permits(&peer("10.0.0.8")));
    }

    #[test]
    fn test_pattern_allow() {
        let mut config = ControllerConfig::default();
        config.allowed_peer_patterns = vec![r"^192\.168\.1\.\d+$".to_string()];
        let filter = PeerFilter::from_config(&config).unwrap();
        assert!(filter.permits(&peer("192.168.1.42")));
        assert!(!filter.permits(&peer("192.168.2.42")));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let mut config = ControllerConfig::default();
        config.allowed_peer_patterns = vec![r"^10\.0\.0\.\d+$".to_string()];
        config.denied_peers = vec!["10.0.0.66".to_string()];
        let filter = PeerFilter::from_config(&config).unwrap();
        assert!(filter.permits(&peer("10.0.0.5")));
        assert!(!filter.permits(&peer("10.0.0.66")));
    }

    #[test]
    fn test_bad_pattern_is_a_validation_error() {
        let mut config = ControllerConfig::default();
        config.allowed_peer_patterns = vec!["[unclosed".to_string()];
        assert!(matches!(
            PeerFilter::from_config(&config),
            Err(NexumError::Validation(_))
        ));
    }
}
