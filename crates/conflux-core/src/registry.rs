//! Action registry seam
//!
//! Actions are the external collaborator the core dispatches work to. The
//! registry is an immutable name-to-action mapping built once at startup and
//! shared read-only across runs; the core never inspects or validates action
//! schemas. Both blocking and async callables are adapted behind one
//! [`Action`] contract.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A registered invocable unit
///
/// Implementations receive the step's resolved argument map (reserved keys
/// already stripped) and return an arbitrary JSON value or fail.
#[async_trait]
pub trait Action: Send + Sync {
    /// Invoke the action with keyword-style arguments
    async fn invoke(&self, args: Map<String, Value>) -> Result<Value, anyhow::Error>;
}

type SyncActionFn = dyn Fn(Map<String, Value>) -> Result<Value, anyhow::Error> + Send + Sync;
type AsyncActionFn =
    dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, anyhow::Error>> + Send + Sync;

struct FnAction {
    func: Box<SyncActionFn>,
}

#[async_trait]
impl Action for FnAction {
    async fn invoke(&self, args: Map<String, Value>) -> Result<Value, anyhow::Error> {
        (self.func)(args)
    }
}

struct AsyncFnAction {
    func: Box<AsyncActionFn>,
}

#[async_trait]
impl Action for AsyncFnAction {
    async fn invoke(&self, args: Map<String, Value>) -> Result<Value, anyhow::Error> {
        (self.func)(args).await
    }
}

/// Immutable mapping from action name to invocable action
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action under the given name, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    /// Register a blocking closure as an action
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Map<String, Value>) -> Result<Value, anyhow::Error> + Send + Sync + 'static,
    {
        self.register(
            name,
            Arc::new(FnAction {
                func: Box::new(func),
            }),
        );
    }

    /// Register an async closure as an action
    pub fn register_async_fn<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(AsyncFnAction {
                func: Box::new(move |args| Box::pin(func(args))),
            }),
        );
    }

    /// Look up an action by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Whether an action with the given name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Sorted list of registered action names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    fn arg_i64(args: &Map<String, Value>, key: &str) -> Result<i64, anyhow::Error> {
        args.get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("missing integer arg {}", key))
    }

    #[tokio::test]
    async fn test_sync_action_invocation() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("add", |args| {
            Ok(json!(arg_i64(&args, "a")? + arg_i64(&args, "b")?))
        });

        let action = registry.get("add").unwrap();
        let mut args = Map::new();
        args.insert("a".to_string(), json!(1));
        args.insert("b".to_string(), json!(2));
        assert_eq!(action.invoke(args).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_async_action_invocation() {
        let mut registry = ActionRegistry::new();
        registry.register_async_fn("delayed_echo", |args| async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(args.get("msg").cloned().unwrap_or(Value::Null))
        });

        let action = registry.get("delayed_echo").unwrap();
        let mut args = Map::new();
        args.insert("msg".to_string(), json!("hi"));
        assert_eq!(action.invoke(args).await.unwrap(), json!("hi"));
    }

    #[test]
    fn test_lookup_and_names() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("b", |_| Ok(Value::Null));
        registry.register_fn("a", |_| Ok(Value::Null));

        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
