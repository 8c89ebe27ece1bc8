//! Stand-in executor that simulates remote invocation latency
//!
//! Runs the same dependency-ordered dispatch as the local executor but
//! sleeps before every action call, approximating a network round trip.
//! Useful for exercising ordering and concurrency behavior in tests and
//! demos without standing up real remote workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::application::{resolve_step_args, FlowExecutor};
use crate::domain::flow::{DAGFlow, Step, StepId};
use crate::domain::graph::DependencyGraph;
use crate::error::{FlowError, GuardPhase};
use crate::guards::GuardsRegistry;
use crate::registry::ActionRegistry;
use crate::ExecutionResults;

/// Executor that pretends every action lives behind a network hop
#[derive(Debug, Clone)]
pub struct DummyRemoteExecutor {
    max_workers: usize,
    per_call_delay: Duration,
}

impl DummyRemoteExecutor {
    /// Remote stand-in with the given simulated per-call latency
    pub fn new(per_call_delay: Duration) -> Self {
        Self {
            max_workers: super::local_executor::default_worker_count(),
            per_call_delay,
        }
    }

    /// Bound concurrent in-flight calls
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Run a DAG flow, delaying each action call by the configured latency
    pub async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        flow.validate()?;
        info!(flow_id = %flow.id, delay_ms = self.per_call_delay.as_millis() as u64, "remote flow_started");

        let mut graph = DependencyGraph::build(flow);
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set: JoinSet<(StepId, Result<Value, FlowError>)> = JoinSet::new();
        let mut results: ExecutionResults = HashMap::new();
        let mut dispatched_args: HashMap<StepId, Map<String, Value>> = HashMap::new();

        for id in graph.initial_ready(flow) {
            if let Some(step) = flow.step(&id) {
                self.dispatch(
                    step,
                    registry,
                    guards,
                    &results,
                    &mut dispatched_args,
                    &mut join_set,
                    &semaphore,
                )?;
            }
        }

        while let Some(joined) = join_set.join_next().await {
            let (step_id, outcome) = match joined {
                Ok(item) => item,
                Err(join_err) => {
                    join_set.abort_all();
                    return Err(FlowError::PoolBroken(format!(
                        "remote call task failed: {join_err}"
                    )));
                }
            };
            let result = match outcome {
                Ok(value) => value,
                Err(err) => {
                    join_set.abort_all();
                    return Err(err);
                }
            };

            let step = match flow.step(&step_id) {
                Some(step) => step,
                None => {
                    join_set.abort_all();
                    return Err(FlowError::UnknownStep(step_id.0.clone()));
                }
            };
            let args = dispatched_args.remove(&step_id).unwrap_or_default();
            let result = match guards {
                Some(guards) => match guards.run_post(&step_id, &step.action, &args, result) {
                    Ok(value) => value,
                    Err(violation) => {
                        join_set.abort_all();
                        return Err(FlowError::GuardViolation {
                            step_id: step_id.clone(),
                            phase: GuardPhase::Post,
                            cause: violation.0,
                        });
                    }
                },
                None => result,
            };

            results.insert(step_id.clone(), result);
            for ready in graph.mark_complete(&step_id) {
                if let Some(step) = flow.step(&ready) {
                    self.dispatch(
                        step,
                        registry,
                        guards,
                        &results,
                        &mut dispatched_args,
                        &mut join_set,
                        &semaphore,
                    )?;
                }
            }
        }

        if results.len() != graph.total() {
            return Err(FlowError::CycleOrUnreachable(flow.id.0.clone()));
        }
        info!(flow_id = %flow.id, "remote flow_completed");
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        step: &Step,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
        results: &ExecutionResults,
        dispatched_args: &mut HashMap<StepId, Map<String, Value>>,
        join_set: &mut JoinSet<(StepId, Result<Value, FlowError>)>,
        semaphore: &Arc<Semaphore>,
    ) -> Result<(), FlowError> {
        let action = registry
            .get(&step.action)
            .ok_or_else(|| FlowError::ActionNotFound(step.action.clone()))?;
        let mut args = resolve_step_args(step, results)?;
        if let Some(guards) = guards {
            args = guards
                .run_pre(&step.id, &step.action, args)
                .map_err(|e| FlowError::GuardViolation {
                    step_id: step.id.clone(),
                    phase: GuardPhase::Pre,
                    cause: e.0,
                })?;
        }
        dispatched_args.insert(step.id.clone(), args.clone());

        let semaphore = Arc::clone(semaphore);
        let delay = self.per_call_delay;
        let step_id = step.id.clone();
        let action_name = step.action.clone();

        join_set.spawn(async move {
            let outcome = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FlowError::PoolBroken("remote pool closed".to_string()))?;
                tokio::time::sleep(delay).await;
                action
                    .invoke(args)
                    .await
                    .map_err(|cause| FlowError::StepExecution {
                        step_id: step_id.clone(),
                        action: action_name,
                        attempts: 1,
                        cause: cause.to_string(),
                    })
            }
            .await;
            (step_id, outcome)
        });
        Ok(())
    }
}

#[async_trait]
impl FlowExecutor for DummyRemoteExecutor {
    async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        DummyRemoteExecutor::run_dagflow(self, flow, registry, guards).await
    }
}
