//! Built-in objects hosted by `nexum serve`.

use async_trait::async_trait;
use dashmap::DashMap;
use nexum_controller::{InvokeError, Outcome, ServiceObject};
use nexum_wire::Invocation;
use serde_json::{json, Value};

/// In-memory key/value store, so a fresh install has something to call.
pub struct KvStore {
    entries: DashMap<String, Value>,
}

impl KvStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn key_arg(invocation: &Invocation) -> Result<String, InvokeError> {
        invocation
            .args
            .first()
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                InvokeError::Failed(format!("'{}' expects a string key", invocation.method))
            })
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceObject for KvStore {
    fn kind(&self) -> &str {
        "kv"
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<Outcome, InvokeError> {
        match invocation.method.as_str() {
            "put" => {
                let key = Self::key_arg(invocation)?;
                let value = invocation
                    .args
                    .get(1)
                    .cloned()
                    .ok_or_else(|| InvokeError::Failed("'put' expects a value".to_string()))?;
                let previous = self.entries.insert(key, value);
                Ok(Outcome::Value(previous.unwrap_or(Value::Null)))
            }
            "get" => {
                let key = Self::key_arg(invocation)?;
                let value = self
                    .entries
                    .get(&key)
                    .map(|entry| entry.value().clone())
                    .unwrap_or(Value::Null);
                Ok(Outcome::Value(value))
            }
            "del" => {
                let key = Self::key_arg(invocation)?;
                Ok(Outcome::Value(json!(self.entries.remove(&key).is_some())))
            }
            "keys" => {
                let mut keys: Vec<String> =
                    self.entries.iter().map(|entry| entry.key().clone()).collect();
                keys.sort();
                Ok(Outcome::Value(json!(keys)))
            }
            "len" => Ok(Outcome::Value(json!(self.entries.len()))),
            "clear" => {
                self.entries.clear();
                Ok(Outcome::Value(Value::Null))
            }
            other => Err(InvokeError::NoSuchMethod(other.to_string())),
        }
    }

    fn render(&self) -> Value {
        json!({ "kind": "kv", "len": self.entries.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn invoke(store: &KvStore, method: &str, args: Vec<Value>) -> Result<Value, InvokeError> {
        match store.invoke(&Invocation::new(method, args)).await? {
            Outcome::Value(value) => Ok(value),
            Outcome::Object(_) => panic!("kv methods return values"),
        }
    }

    #[tokio::test]
    async fn test_put_get_del() {
        let store = KvStore::new();
        assert_eq!(
            invoke(&store, "put", vec![json!("a"), json!(1)]).await.unwrap(),
            Value::Null
        );
        assert_eq!(
            invoke(&store, "get", vec![json!("a")]).await.unwrap(),
            json!(1)
        );
        assert_eq!(
            invoke(&store, "put", vec![json!("a"), json!(2)]).await.unwrap(),
            json!(1)
        );
        assert_eq!(
            invoke(&store, "del", vec![json!("a")]).await.unwrap(),
            json!(true)
        );
        assert_eq!(
            invoke(&store, "get", vec![json!("a")]).await.unwrap(),
            Value::Null
        );
    }

    #[tokio::test]
    async fn test_keys_sorted_and_len() {
        let store = KvStore::new();
        invoke(&store, "put", vec![json!("b"), json!(2)]).await.unwrap();
        invoke(&store, "put", vec![json!("a"), json!(1)]).await.unwrap();
        assert_eq!(
            invoke(&store, "keys", vec![]).await.unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(invoke(&store, "len", vec![]).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_missing_key_arg() {
        let store = KvStore::new();
        assert!(matches!(
            store.invoke(&Invocation::new("get", vec![])).await,
            Err(InvokeError::Failed(_))
        ));
    }
}
