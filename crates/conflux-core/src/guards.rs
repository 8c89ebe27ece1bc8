//! Guardrails and policy hooks for flows
//!
//! Executors call registered guards before and after each step, allowing
//! validation or transformation of step inputs and outputs. Any guard may
//! abort the whole run by returning a violation.

use crate::domain::flow::StepId;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A guard violation; stops the run when raised from either hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardError(pub String);

impl GuardError {
    /// Create a violation with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GuardError {}

/// Pre/post hook applied around step execution
///
/// Both hooks default to pass-through; implementations override one or both
/// to validate or transform the data flowing through a step.
pub trait Guard: Send + Sync {
    /// Inspect or transform a step's resolved arguments before execution
    fn pre_step(
        &self,
        _step_id: &StepId,
        _action: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, GuardError> {
        Ok(args)
    }

    /// Inspect or transform a step's result after execution
    fn post_step(
        &self,
        _step_id: &StepId,
        _action: &str,
        _args: &Map<String, Value>,
        result: Value,
    ) -> Result<Value, GuardError> {
        Ok(result)
    }
}

/// Ordered chain of guards
#[derive(Default, Clone)]
pub struct GuardsRegistry {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    /// Append a guard; guards run in registration order
    pub fn register(&mut self, guard: Arc<dyn Guard>) {
        self.guards.push(guard);
    }

    /// Remove a previously registered guard by identity; no-op when absent
    pub fn unregister(&mut self, guard: &Arc<dyn Guard>) {
        self.guards.retain(|g| !Arc::ptr_eq(g, guard));
    }

    /// Number of registered guards
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether no guards are registered
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Fold the argument map through every pre-step hook in order,
    /// short-circuiting on the first violation
    pub fn run_pre(
        &self,
        step_id: &StepId,
        action: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, GuardError> {
        let mut cur = args;
        for guard in &self.guards {
            cur = guard.pre_step(step_id, action, cur)?;
        }
        Ok(cur)
    }

    /// Fold the result through every post-step hook in order,
    /// short-circuiting on the first violation
    pub fn run_post(
        &self,
        step_id: &StepId,
        action: &str,
        args: &Map<String, Value>,
        result: Value,
    ) -> Result<Value, GuardError> {
        let mut cur = result;
        for guard in &self.guards {
            cur = guard.post_step(step_id, action, args, cur)?;
        }
        Ok(cur)
    }
}

impl std::fmt::Debug for GuardsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardsRegistry")
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// Guard that replaces named fields of object results with a placeholder
///
/// Non-object results and absent fields pass through untouched.
pub struct RedactGuard {
    fields: Vec<String>,
    replacement: String,
}

impl RedactGuard {
    /// Redact the given fields with the default `***` placeholder
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            replacement: "***".to_string(),
        }
    }

    /// Use a custom replacement string
    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = replacement.into();
        self
    }
}

impl Guard for RedactGuard {
    fn post_step(
        &self,
        _step_id: &StepId,
        _action: &str,
        _args: &Map<String, Value>,
        result: Value,
    ) -> Result<Value, GuardError> {
        match result {
            Value::Object(map) => Ok(Value::Object(crate::observability::redact(
                map,
                &self.fields,
                &self.replacement,
            ))),
            other => Ok(other),
        }
    }
}
