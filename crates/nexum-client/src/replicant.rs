//! Proxies: single-call Replicants and chained, batched invocation builders.
//!
//! A [`Replicant`] forwards each operation as its own request — one round
//! trip per call. A [`ChainedReplicant`] is an immutable builder: every
//! append copies the chain and returns a new value, so any intermediate
//! builder can be reused as a branch point. Realizing a chain sends the
//! whole sequence in one request; the server threads each step's return
//! value into the next step's receiver.

use crate::client::{Client, ClientError};
use nexum_wire::{Invocation, NamedArgs, RequestEnvelope};
use serde_json::Value;

/// Client-side ordered sequence of pending invocations.
///
/// Appending never mutates in place: the previous chain stays valid.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    steps: Vec<Invocation>,
}

impl Chain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy this chain with one more step at the end.
    pub fn append(&self, step: Invocation) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// The pending steps, in order.
    pub fn steps(&self) -> &[Invocation] {
        &self.steps
    }

    /// Number of pending steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Transparent single-call proxy to one remote object.
#[derive(Clone, Debug)]
pub struct Replicant {
    object: String,
    client: Client,
}

impl Replicant {
    pub(crate) fn new(object: String, client: Client) -> Self {
        Self { object, client }
    }

    /// Name of the remote object this proxy is bound to.
    pub fn object_name(&self) -> &str {
        &self.object
    }

    /// Forward one operation as a single request and return its value.
    pub async fn invoke(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        named: NamedArgs,
    ) -> Result<Value, ClientError> {
        self.client
            .call(self.object.clone(), method, args, named)
            .await
    }

    /// Start an empty chain for the same object.
    pub fn chained(&self) -> ChainedReplicant {
        ChainedReplicant {
            object: self.object.clone(),
            client: self.client.clone(),
            chain: Chain::new(),
        }
    }
}

/// What realizing a chain produced.
#[derive(Debug)]
pub enum Realized {
    /// Final threaded value of a non-empty chain.
    Value(Value),
    /// An empty chain realizes to the plain proxy, without network I/O.
    Proxy(Replicant),
}

impl Realized {
    /// The value, if the chain was non-empty.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Realized::Value(value) => Some(value),
            Realized::Proxy(_) => None,
        }
    }
}

/// Immutable builder accumulating an ordered call chain for one batched
/// execution.
#[derive(Clone)]
pub struct ChainedReplicant {
    object: String,
    client: Client,
    chain: Chain,
}

impl ChainedReplicant {
    /// Append a step, returning a new builder; `self` stays usable as a
    /// branch point.
    pub fn invoke(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        named: NamedArgs,
    ) -> ChainedReplicant {
        ChainedReplicant {
            object: self.object.clone(),
            client: self.client.clone(),
            chain: self.chain.append(Invocation::with_named(method, args, named)),
        }
    }

    /// Name of the remote object the chain targets.
    pub fn object_name(&self) -> &str {
        &self.object
    }

    /// The accumulated chain.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// The plain single-call proxy for the same object.
    pub fn replicant(&self) -> Replicant {
        Replicant::new(self.object.clone(), self.client.clone())
    }

    /// Execute the accumulated chain in one request.
    ///
    /// The whole batch costs one round trip instead of one per step. It
    /// fails atomically from the caller's view: the response reports the
    /// first failing step, and no partial results are exposed.
    pub async fn realize(&self) -> Result<Realized, ClientError> {
        if self.chain.is_empty() {
            return Ok(Realized::Proxy(self.replicant()));
        }
        let value = self
            .client
            .request(RequestEnvelope {
                object: self.object.clone(),
                invocations: self.chain.steps().to_vec(),
                raw: false,
            })
            .await?;
        Ok(Realized::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexum_types::ClientConfig;
    use serde_json::json;

    fn chained(object: &str) -> ChainedReplicant {
        Replicant::new(object.to_string(), Client::new(ClientConfig::default())).chained()
    }

    #[test]
    fn test_append_copies_chain() {
        let base = chained("store");
        let one = base.invoke("get_bucket", vec![json!("a")], NamedArgs::new());
        assert!(base.chain().is_empty());
        assert_eq!(one.chain().len(), 1);
        assert_eq!(one.chain().steps()[0].method, "get_bucket");
    }

    #[test]
    fn test_branch_point_reuse() {
        let base = chained("counter").invoke("add", vec![json!(2)], NamedArgs::new());

        let left = base.invoke("add", vec![json!(3)], NamedArgs::new());
        let right = base.invoke("add", vec![json!(10)], NamedArgs::new());

        // Both continuations share the same first step but diverge after it.
        assert_eq!(base.chain().len(), 1);
        assert_eq!(left.chain().len(), 2);
        assert_eq!(right.chain().len(), 2);
        assert_eq!(left.chain().steps()[1].args, vec![json!(3)]);
        assert_eq!(right.chain().steps()[1].args, vec![json!(10)]);
    }

    #[test]
    fn test_chain_preserves_order() {
        let built = chained("kv")
            .invoke("put", vec![json!("k"), json!("v")], NamedArgs::new())
            .invoke("get", vec![json!("k")], NamedArgs::new())
            .invoke("len", vec![], NamedArgs::new());
        let methods: Vec<&str> = built
            .chain()
            .steps()
            .iter()
            .map(|s| s.method.as_str())
            .collect();
        assert_eq!(methods, vec!["put", "get", "len"]);
    }

    #[tokio::test]
    async fn test_empty_chain_realizes_to_proxy() {
        let base = chained("calc");
        match base.realize().await.unwrap() {
            Realized::Proxy(proxy) => assert_eq!(proxy.object_name(), "calc"),
            Realized::Value(_) => panic!("empty chain must not produce a value"),
        }
    }
}
