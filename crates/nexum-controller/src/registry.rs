//! Hosted objects and the name → object registry.
//!
//! The registry is a thread-safe map from registered names to hosted
//! objects. The name `controller` is reserved: it is permanently bound to
//! the controller's own introspection object and can be neither registered
//! nor removed by users.

use async_trait::async_trait;
use dashmap::DashMap;
use nexum_types::{NexumError, NexumResult};
use nexum_wire::Invocation;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use nexum_wire::CONTROLLER_NAME;

/// Why a hosted method invocation failed.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The receiver has no method with this name.
    #[error("no method '{0}'")]
    NoSuchMethod(String),
    /// The method ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// The result of one invocation step.
pub enum Outcome {
    /// A plain data value; ends value threading.
    Value(Value),
    /// Another invocable object; becomes the receiver of the next step.
    Object(Arc<dyn ServiceObject>),
}

/// A hosted object that the controller can dispatch invocations to.
///
/// Chains thread receivers: a method that returns [`Outcome::Object`] hands
/// the rest of the chain to that object. A method returning
/// [`Outcome::Value`] produces the final result; if further steps follow,
/// the chain aborts because a plain value has no methods.
#[async_trait]
pub trait ServiceObject: Send + Sync {
    /// Short label used in logs and default renderings.
    fn kind(&self) -> &str;

    /// Run one method with its positional and named arguments.
    async fn invoke(&self, invocation: &Invocation) -> Result<Outcome, InvokeError>;

    /// Plain-value representation used when an object ends a chain.
    fn render(&self) -> Value {
        Value::String(format!("<{}>", self.kind()))
    }
}

/// Thread-safe registry of hosted objects.
pub struct ObjectRegistry {
    objects: DashMap<String, Arc<dyn ServiceObject>>,
}

impl ObjectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Register a batch of name → object bindings.
    ///
    /// All names are validated before any insert happens, so a rejected
    /// batch leaves the registry untouched. Re-registering an existing name
    /// replaces the binding.
    pub fn register<I>(&self, bindings: I) -> NexumResult<()>
    where
        I: IntoIterator<Item = (String, Arc<dyn ServiceObject>)>,
    {
        let bindings: Vec<_> = bindings.into_iter().collect();
        for (name, _) in &bindings {
            if name == CONTROLLER_NAME {
                return Err(NexumError::Validation(format!(
                    "cannot register an object named '{CONTROLLER_NAME}', it is reserved"
                )));
            }
        }
        for (name, object) in bindings {
            self.objects.insert(name, object);
        }
        Ok(())
    }

    /// Bind the controller's own introspection object under the reserved name.
    pub(crate) fn bind_controller(&self, object: Arc<dyn ServiceObject>) {
        self.objects.insert(CONTROLLER_NAME.to_string(), object);
    }

    /// Remove a binding. The reserved controller entry cannot be removed.
    pub fn remove(&self, name: &str) -> NexumResult<Option<Arc<dyn ServiceObject>>> {
        if name == CONTROLLER_NAME {
            return Err(NexumError::Validation(format!(
                "cannot remove '{CONTROLLER_NAME}', it is reserved"
            )));
        }
        Ok(self.objects.remove(name).map(|(_, object)| object))
    }

    /// Look up a hosted object by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceObject>> {
        self.objects.get(name).map(|r| r.value().clone())
    }

    /// Registered names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ServiceObject for Echo {
        fn kind(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, invocation: &Invocation) -> Result<Outcome, InvokeError> {
            match invocation.method.as_str() {
                "say" => Ok(Outcome::Value(json!(invocation.args.clone()))),
                other => Err(InvokeError::NoSuchMethod(other.to_string())),
            }
        }
    }

    fn echo() -> Arc<dyn ServiceObject> {
        Arc::new(Echo)
    }

    #[test]
    fn test_register_and_get() {
        let registry = ObjectRegistry::new();
        registry
            .register([("echo".to_string(), echo())])
            .unwrap();
        assert!(registry.contains("echo"));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_reserved_name_rejected_without_partial_effect() {
        let registry = ObjectRegistry::new();
        let result = registry.register([
            ("first".to_string(), echo()),
            (CONTROLLER_NAME.to_string(), echo()),
        ]);
        assert!(matches!(result, Err(NexumError::Validation(_))));
        // The valid entry in the same batch must not have landed.
        assert!(!registry.contains("first"));
    }

    #[test]
    fn test_remove_reserved_name_rejected() {
        let registry = ObjectRegistry::new();
        registry.bind_controller(echo());
        assert!(matches!(
            registry.remove(CONTROLLER_NAME),
            Err(NexumError::Validation(_))
        ));
        assert!(registry.contains(CONTROLLER_NAME));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = ObjectRegistry::new();
        registry.register([("echo".to_string(), echo())]).unwrap();
        registry.register([("echo".to_string(), echo())]).unwrap();
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_names_sorted() {
        let registry = ObjectRegistry::new();
        registry
            .register([
                ("zeta".to_string(), echo()),
                ("alpha".to_string(), echo()),
            ])
            .unwrap();
        assert_eq!(
            registry.names(),
            vec!["alpha".to_string(), "zeta".to_string()]
        );
    }

    #[test]
    fn test_remove_returns_binding() {
        let registry = ObjectRegistry::new();
        registry.register([("echo".to_string(), echo())]).unwrap();
        let removed = registry.remove("echo").unwrap();
        assert!(removed.is_some());
        assert!(!registry.contains("echo"));
        assert!(registry.remove("echo").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_render() {
        let object = echo();
        assert_eq!(object.render(), json!("<echo>"));
    }
}
