//! Execution services: executors, argument resolution, and the orchestrator

pub mod local_executor;
pub mod orchestrator;
pub mod process_executor;
pub mod remote_executor;
pub mod step_config;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::flow::{DAGFlow, Step};
use crate::error::FlowError;
use crate::guards::GuardsRegistry;
use crate::registry::ActionRegistry;
use crate::ExecutionResults;

/// Prefix marking a string argument as a reference to a prior step's result
pub const RESULT_REF_PREFIX: &str = "$result.";

/// Anything that can drive a DAG flow to completion
#[async_trait]
pub trait FlowExecutor: Send + Sync {
    /// Execute every step of `flow`, returning the per-step results
    async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError>;
}

/// Resolve `$result.<step>` references in a step's arguments
///
/// Non-string values and strings without the prefix pass through untouched.
/// A reference to a step with no recorded result is an error: dependency
/// ordering guarantees referenced upstream steps have completed, so a miss
/// means the flow wiring is wrong.
pub(crate) fn resolve_step_args(
    step: &Step,
    results: &ExecutionResults,
) -> Result<Map<String, Value>, FlowError> {
    let mut resolved = Map::with_capacity(step.args.len());
    for (key, value) in &step.args {
        let value = match value.as_str().and_then(|s| s.strip_prefix(RESULT_REF_PREFIX)) {
            Some(source) => results
                .get(&crate::domain::flow::StepId(source.to_string()))
                .cloned()
                .ok_or_else(|| FlowError::UnresolvedReference {
                    step_id: step.id.clone(),
                    reference: value.as_str().unwrap_or_default().to_string(),
                })?,
            None => value.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}
