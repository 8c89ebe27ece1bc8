//! In-process concurrent executor for DAG flows and state machines
//!
//! Steps run as tasks on the ambient tokio runtime, bounded by a semaphore
//! sized to the worker count. Dependency bookkeeping and result publication
//! happen in a single dispatch loop, so guards and result insertion never
//! race: a step's result only becomes visible to successors after its
//! post-step guards have accepted it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::application::step_config::{RetryPolicy, StepOverrides};
use crate::application::{resolve_step_args, FlowExecutor};
use crate::domain::flow::{DAGFlow, Step, StepId};
use crate::domain::graph::DependencyGraph;
use crate::domain::state_machine::StateMachine;
use crate::error::{FlowError, GuardPhase};
use crate::guards::GuardsRegistry;
use crate::observability::{Observability, TraceId};
use crate::registry::{Action, ActionRegistry};
use crate::ExecutionResults;

/// Worker count heuristic for IO-bound actions
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores + 4).min(32)
}

/// Executes flows on the current tokio runtime
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    max_workers: usize,
    default_retry: RetryPolicy,
    observability: Arc<Observability>,
}

impl LocalExecutor {
    /// Executor with the default worker count and no retries
    pub fn new() -> Self {
        Self::with_max_workers(default_worker_count())
    }

    /// Executor bounded to at most `max_workers` concurrent steps
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            default_retry: RetryPolicy::none(),
            observability: Arc::new(Observability::new()),
        }
    }

    /// Share an observability context instead of the private default
    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.observability = observability;
        self
    }

    /// Retry policy applied to steps that carry no `__retry__` override
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// The tracer and metrics this executor reports into
    pub fn observability(&self) -> &Arc<Observability> {
        &self.observability
    }

    /// Run every step of a DAG flow, honoring dependency order
    ///
    /// Fails closed: the flow is validated before any step is dispatched, so
    /// a cyclic or miswired flow produces no side effects. The first step
    /// failure aborts all in-flight work and surfaces as the run's error.
    pub async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        flow.validate()?;

        let trace_id = self.observability.tracer.start_trace();
        self.observability.tracer.record(
            &trace_id,
            "flow_started",
            json!({"flow_id": flow.id.0, "steps": flow.steps.len()}),
        );
        info!(flow_id = %flow.id, trace_id = %trace_id, steps = flow.steps.len(), "flow_started");

        let mut graph = DependencyGraph::build(flow);
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set: JoinSet<(StepId, Instant, Result<Value, FlowError>)> = JoinSet::new();
        let mut results: ExecutionResults = HashMap::new();
        // Pre-guard argument maps, kept until post-guards have seen them.
        let mut dispatched_args: HashMap<StepId, Map<String, Value>> = HashMap::new();

        for id in graph.initial_ready(flow) {
            if let Some(step) = flow.step(&id) {
                if let Err(err) = self.dispatch(
                    step,
                    registry,
                    guards,
                    &results,
                    &mut dispatched_args,
                    &mut join_set,
                    &semaphore,
                    &trace_id,
                ) {
                    self.record_failure(&trace_id, &err);
                    join_set.abort_all();
                    return Err(err);
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            let (step_id, started, outcome) = match joined {
                Ok(item) => item,
                Err(join_err) => {
                    join_set.abort_all();
                    return Err(FlowError::PoolBroken(format!(
                        "step task failed: {join_err}"
                    )));
                }
            };

            let result = match outcome {
                Ok(value) => value,
                Err(err) => {
                    self.record_failure(&trace_id, &err);
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
                        let err = FlowError::GuardViolation {
                            step_id: step_id.clone(),
                            phase: GuardPhase::Post,
                            cause: violation.0,
                        };
                        self.record_failure(&trace_id, &err);
                        join_set.abort_all();
                        return Err(err);
                    }
                },
                None => result,
            };

            let duration = started.elapsed().as_secs_f64();
            self.observability.metrics.inc("steps_executed", 1);
            self.observability
                .metrics
                .timing("step_duration_seconds", duration);
            self.observability.tracer.record(
                &trace_id,
                "step_completed",
                json!({"step_id": step_id.0, "duration": duration}),
            );
            info!(step_id = %step_id, duration, "step_completed");

            results.insert(step_id.clone(), result);

            for ready in graph.mark_complete(&step_id) {
                if let Some(step) = flow.step(&ready) {
                    if let Err(err) = self.dispatch(
                        step,
                        registry,
                        guards,
                        &results,
                        &mut dispatched_args,
                        &mut join_set,
                        &semaphore,
                        &trace_id,
                    ) {
                        self.record_failure(&trace_id, &err);
                        join_set.abort_all();
                        return Err(err);
                    }
                }
            }
        }

        if results.len() != graph.total() {
            return Err(FlowError::CycleOrUnreachable(flow.id.0.clone()));
        }

        self.observability.tracer.record(
            &trace_id,
            "flow_completed",
            json!({"flow_id": flow.id.0, "steps": results.len()}),
        );
        info!(flow_id = %flow.id, trace_id = %trace_id, "flow_completed");
        Ok(results)
    }

    /// Drive a state machine through a sequence of events
    ///
    /// Each event invokes the current state's action (if any) with
    /// `{"event": ..., "state": ...}` arguments, then follows the state's
    /// transition for that event. An event with no transition ends the run.
    /// Returns the last result produced in each visited state.
    pub async fn run_state_machine(
        &self,
        machine: &StateMachine,
        registry: &ActionRegistry,
        events: &[String],
        guards: Option<&GuardsRegistry>,
    ) -> Result<HashMap<String, Value>, FlowError> {
        let mut current = machine
            .start_state
            .clone()
            .ok_or(FlowError::MissingStartState)?;
        let mut results = HashMap::new();

        for event in events {
            let state = machine
                .state(&current)
                .ok_or_else(|| FlowError::UnknownState(current.clone()))?;

            if let Some(action_name) = &state.action {
                let action = registry
                    .get(action_name)
                    .ok_or_else(|| FlowError::ActionNotFound(action_name.clone()))?;
                let step_id = StepId(current.clone());

                let mut args = Map::new();
                args.insert("event".to_string(), json!(event));
                args.insert("state".to_string(), json!(current));
                if let Some(guards) = guards {
                    args = guards.run_pre(&step_id, action_name, args).map_err(|e| {
                        FlowError::GuardViolation {
                            step_id: step_id.clone(),
                            phase: GuardPhase::Pre,
                            cause: e.0,
                        }
                    })?;
                }

                let result = action.invoke(args.clone()).await.map_err(|cause| {
                    FlowError::StepExecution {
                        step_id: step_id.clone(),
                        action: action_name.clone(),
                        attempts: 1,
                        cause: cause.to_string(),
                    }
                })?;

                let result = match guards {
                    Some(guards) => guards
                        .run_post(&step_id, action_name, &args, result)
                        .map_err(|e| FlowError::GuardViolation {
                            step_id: step_id.clone(),
                            phase: GuardPhase::Post,
                            cause: e.0,
                        })?,
                    None => result,
                };
                results.insert(current.clone(), result);
            }

            match state.on.get(event) {
                Some(next) => {
                    info!(machine_id = %machine.id, from = %current, event = %event, to = %next, "state_transition");
                    current = next.clone();
                }
                None => {
                    warn!(machine_id = %machine.id, state = %current, event = %event, "no transition for event, stopping");
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Resolve, guard, and spawn one ready step
    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        step: &Step,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
        results: &ExecutionResults,
        dispatched_args: &mut HashMap<StepId, Map<String, Value>>,
        join_set: &mut JoinSet<(StepId, Instant, Result<Value, FlowError>)>,
        semaphore: &Arc<Semaphore>,
        trace_id: &TraceId,
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
        let overrides = StepOverrides::extract(&mut args);
        let retry = overrides
            .retry
            .clone()
            .unwrap_or_else(|| self.default_retry.clone());

        self.observability.tracer.record(
            trace_id,
            "step_started",
            json!({"step_id": step.id.0, "action": step.action}),
        );
        info!(step_id = %step.id, action = %step.action, "step_started");

        dispatched_args.insert(step.id.clone(), args.clone());

        let semaphore = Arc::clone(semaphore);
        let observability = Arc::clone(&self.observability);
        let trace_id = trace_id.clone();
        let step_id = step.id.clone();
        let action_name = step.action.clone();
        let timeout = overrides.timeout_secs.zip(overrides.timeout());

        join_set.spawn(async move {
            let started = Instant::now();
            let work = run_with_retry(
                semaphore,
                action,
                args,
                retry,
                step_id.clone(),
                action_name,
                observability,
                trace_id,
            );
            // The timeout window covers queueing for a worker slot too; it
            // is wall-clock time from dispatch, not pure execution time.
            let outcome = match timeout {
                Some((secs, limit)) => match tokio::time::timeout(limit, work).await {
                    Ok(res) => res,
                    Err(_) => Err(FlowError::StepTimeout {
                        step_id: step_id.clone(),
                        timeout_secs: secs,
                    }),
                },
                None => work.await,
            };
            (step_id, started, outcome)
        });

        Ok(())
    }

    fn record_failure(&self, trace_id: &TraceId, err: &FlowError) {
        match err {
            FlowError::StepTimeout {
                step_id,
                timeout_secs,
            } => {
                self.observability.metrics.inc("step_timeouts", 1);
                self.observability.tracer.record(
                    trace_id,
                    "step_timeout",
                    json!({"step_id": step_id.0, "timeout": timeout_secs}),
                );
                warn!(step_id = %step_id, timeout = timeout_secs, "step_timeout");
            }
            other => {
                let step_id = match other {
                    FlowError::StepExecution { step_id, .. }
                    | FlowError::GuardViolation { step_id, .. }
                    | FlowError::UnresolvedReference { step_id, .. } => Some(step_id.0.as_str()),
                    _ => None,
                };
                self.observability.tracer.record(
                    trace_id,
                    "step_failed",
                    json!({"step_id": step_id, "error": other.to_string()}),
                );
                error!(step_id = step_id.unwrap_or("-"), error = %other, "step_failed");
            }
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowExecutor for LocalExecutor {
    async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        LocalExecutor::run_dagflow(self, flow, registry, guards).await
    }
}

/// Bounded-retry invocation; the semaphore permit is held for all attempts
#[allow(clippy::too_many_arguments)]
async fn run_with_retry(
    semaphore: Arc<Semaphore>,
    action: Arc<dyn Action>,
    args: Map<String, Value>,
    policy: RetryPolicy,
    step_id: StepId,
    action_name: String,
    observability: Arc<Observability>,
    trace_id: TraceId,
) -> Result<Value, FlowError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| FlowError::PoolBroken("executor pool closed".to_string()))?;

    let mut backoff = policy.backoff;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if attempt > 1 {
            observability.metrics.inc("step_retries", 1);
            observability.tracer.record(
                &trace_id,
                "step_retry",
                json!({"step_id": step_id.0, "attempt": attempt}),
            );
            info!(step_id = %step_id, attempt, "step_retry");
        }

        match action.invoke(args.clone()).await {
            Ok(value) => return Ok(value),
            Err(cause) => {
                if attempt >= policy.max_attempts {
                    return Err(FlowError::StepExecution {
                        step_id,
                        action: action_name,
                        attempts: attempt,
                        cause: cause.to_string(),
                    });
                }
                tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                backoff *= policy.multiplier;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::dag;
    use crate::guards::{Guard, GuardError};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    fn arithmetic_registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register_fn("add", |args| {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        });
        registry.register_fn("mul", |args| {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a * b))
        });
        registry
    }

    #[tokio::test]
    async fn test_dag_with_result_reference() {
        let flow = dag("arith")
            .step("s1", "add", json!({"a": 1, "b": 2}))
            .step("s2", "mul", json!({"a": "$result.s1", "b": 10}))
            .edge("s1", "s2")
            .build()
            .unwrap();

        let executor = LocalExecutor::new();
        let results = executor
            .run_dagflow(&flow, &arithmetic_registry(), None)
            .await
            .unwrap();

        assert_eq!(results[&StepId::from("s1")], json!(3));
        assert_eq!(results[&StepId::from("s2")], json!(30));
        assert_eq!(executor.observability().metrics.counter("steps_executed"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_steps_run_concurrently() {
        let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ActionRegistry::new();
        {
            let order = Arc::clone(&order);
            registry.register_async_fn("slow", move |args| {
                let order = Arc::clone(&order);
                async move {
                    tokio::time::sleep(Duration::from_millis(350)).await;
                    let name = args["name"].as_str().unwrap_or("?").to_string();
                    order.lock().unwrap().push(name.clone());
                    Ok(json!(name))
                }
            });
        }
        {
            let order = Arc::clone(&order);
            registry.register_fn("join", move |_args| {
                Ok(json!(order.lock().unwrap().clone()))
            });
        }

        let flow = dag("fanin")
            .step("a", "slow", json!({"name": "a"}))
            .step("b", "slow", json!({"name": "b"}))
            .step("c", "join", json!({}))
            .edge("a", "c")
            .edge("b", "c")
            .build()
            .unwrap();

        let start = Instant::now();
        let results = LocalExecutor::with_max_workers(4)
            .run_dagflow(&flow, &registry, None)
            .await
            .unwrap();
        // a and b overlap under paused virtual time.
        assert!(start.elapsed() < Duration::from_millis(700));

        let mut joined: Vec<String> =
            serde_json::from_value(results[&StepId::from("c")].clone()).unwrap();
        joined.sort();
        assert_eq!(joined, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new();
        {
            let attempts = Arc::clone(&attempts);
            registry.register_fn("flaky", move |_args| {
                if attempts.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    anyhow::bail!("transient")
                }
                Ok(json!("ok"))
            });
        }

        let flow = dag("retrying")
            .step(
                "s1",
                "flaky",
                json!({"__retry__": {"max_attempts": 3, "backoff": 0.01, "multiplier": 2.0}}),
            )
            .build()
            .unwrap();

        let executor = LocalExecutor::new();
        let results = executor.run_dagflow(&flow, &registry, None).await.unwrap();
        assert_eq!(results[&StepId::from("s1")], json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(executor.observability().metrics.counter("step_retries"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_counts_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new();
        {
            let attempts = Arc::clone(&attempts);
            registry.register_fn("doomed", move |_args| {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("always fails")
            });
        }

        let flow = dag("doomed")
            .step(
                "s1",
                "doomed",
                json!({"__retry__": {"max_attempts": 4, "backoff": 0.01, "multiplier": 1.0}}),
            )
            .build()
            .unwrap();

        let err = LocalExecutor::new()
            .run_dagflow(&flow, &registry, None)
            .await
            .unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        match err {
            FlowError::StepExecution {
                step_id, attempts, ..
            } => {
                assert_eq!(step_id, StepId::from("s1"));
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let mut registry = ActionRegistry::new();
        registry.register_async_fn("hang", |_args| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!(null))
        });

        let flow = dag("hanging")
            .step("s1", "hang", json!({"__timeout__": 0.2}))
            .build()
            .unwrap();

        let executor = LocalExecutor::new();
        let err = executor.run_dagflow(&flow, &registry, None).await.unwrap_err();
        assert_eq!(
            err,
            FlowError::StepTimeout {
                step_id: StepId::from("s1"),
                timeout_secs: 0.2,
            }
        );
        assert_eq!(executor.observability().metrics.counter("step_timeouts"), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_is_stripped_not_fatal() {
        // Values Duration cannot hold are dropped like any other malformed
        // reserved key; the step still runs to completion.
        let flow = dag("loose")
            .step("s1", "add", json!({"a": 1, "b": 2, "__timeout__": 1e20}))
            .build()
            .unwrap();

        let results = LocalExecutor::new()
            .run_dagflow(&flow, &arithmetic_registry(), None)
            .await
            .unwrap();
        assert_eq!(results[&StepId::from("s1")], json!(3));
    }

    #[tokio::test]
    async fn test_unknown_action_fails_before_running_anything() {
        let flow = dag("missing")
            .step("s1", "nope", json!({}))
            .build()
            .unwrap();

        let err = LocalExecutor::new()
            .run_dagflow(&flow, &ActionRegistry::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::ActionNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_cycle_fails_closed() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut registry = ActionRegistry::new();
        {
            let ran = Arc::clone(&ran);
            registry.register_fn("touch", move |_args| {
                ran.store(true, Ordering::SeqCst);
                Ok(json!(null))
            });
        }

        let flow = dag("cyclic")
            .step("a", "touch", json!({}))
            .step("b", "touch", json!({}))
            .edge("a", "b")
            .edge("b", "a")
            .build()
            .unwrap();

        let err = LocalExecutor::new()
            .run_dagflow(&flow, &registry, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::CycleOrUnreachable(_)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pre_guard_violation_aborts_run() {
        struct Deny;
        impl Guard for Deny {
            fn pre_step(
                &self,
                _step_id: &StepId,
                _action: &str,
                _args: Map<String, Value>,
            ) -> Result<Map<String, Value>, GuardError> {
                Err(GuardError::new("denied"))
            }
        }

        let mut guards = GuardsRegistry::new();
        guards.register(Arc::new(Deny));

        let flow = dag("guarded")
            .step("s1", "add", json!({"a": 1, "b": 1}))
            .build()
            .unwrap();

        let err = LocalExecutor::new()
            .run_dagflow(&flow, &arithmetic_registry(), Some(&guards))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::GuardViolation {
                step_id: StepId::from("s1"),
                phase: GuardPhase::Pre,
                cause: "denied".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_post_guard_result_not_visible_to_successors() {
        struct RejectLarge;
        impl Guard for RejectLarge {
            fn post_step(
                &self,
                _step_id: &StepId,
                _action: &str,
                _args: &Map<String, Value>,
                result: Value,
            ) -> Result<Value, GuardError> {
                if result.as_i64().unwrap_or(0) > 100 {
                    return Err(GuardError::new("result too large"));
                }
                Ok(result)
            }
        }

        let mut guards = GuardsRegistry::new();
        guards.register(Arc::new(RejectLarge));

        let flow = dag("guarded")
            .step("s1", "add", json!({"a": 100, "b": 100}))
            .step("s2", "mul", json!({"a": "$result.s1", "b": 2}))
            .edge("s1", "s2")
            .build()
            .unwrap();

        let err = LocalExecutor::new()
            .run_dagflow(&flow, &arithmetic_registry(), Some(&guards))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FlowError::GuardViolation {
                step_id: StepId::from("s1"),
                phase: GuardPhase::Post,
                cause: "result too large".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_state_machine_drive() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("announce", |args| {
            Ok(json!(format!(
                "{} in {}",
                args["event"].as_str().unwrap_or(""),
                args["state"].as_str().unwrap_or(""),
            )))
        });

        let mut machine = StateMachine::new("door");
        machine
            .add_state(
                crate::domain::state_machine::State::new("closed")
                    .with_action("announce")
                    .on("open", "open"),
            )
            .unwrap();
        machine
            .add_state(
                crate::domain::state_machine::State::new("open")
                    .with_action("announce")
                    .on("close", "closed"),
            )
            .unwrap();

        let events = vec!["open".to_string(), "close".to_string()];
        let results = LocalExecutor::new()
            .run_state_machine(&machine, &registry, &events, None)
            .await
            .unwrap();

        assert_eq!(results["closed"], json!("open in closed"));
        assert_eq!(results["open"], json!("close in open"));
    }

    #[tokio::test]
    async fn test_state_machine_without_start_state() {
        let machine = StateMachine::new("empty");
        let err = LocalExecutor::new()
            .run_state_machine(&machine, &ActionRegistry::new(), &[], None)
            .await
            .unwrap_err();
        assert_eq!(err, FlowError::MissingStartState);
    }

    #[tokio::test]
    async fn test_trace_contains_lifecycle_events() {
        let flow = dag("traced")
            .step("s1", "add", json!({"a": 2, "b": 2}))
            .build()
            .unwrap();

        let executor = LocalExecutor::new();
        executor
            .run_dagflow(&flow, &arithmetic_registry(), None)
            .await
            .unwrap();

        // Single trace per run.
        let tracer = &executor.observability().tracer;
        let trace_id = tracer.trace_ids().into_iter().next().unwrap();
        let events: Vec<String> = tracer
            .get_trace(&trace_id)
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "flow_started",
                "step_started",
                "step_completed",
                "flow_completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_step_failed_event_names_the_step() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("boom", |_args| anyhow::bail!("kaput"));

        let flow = dag("failing")
            .step("s1", "boom", json!({}))
            .build()
            .unwrap();

        let executor = LocalExecutor::new();
        executor
            .run_dagflow(&flow, &registry, None)
            .await
            .unwrap_err();

        let tracer = &executor.observability().tracer;
        let trace_id = tracer.trace_ids().into_iter().next().unwrap();
        let failed = tracer
            .get_trace(&trace_id)
            .unwrap()
            .into_iter()
            .find(|e| e.event == "step_failed")
            .unwrap();
        assert_eq!(failed.fields["step_id"], json!("s1"));
    }
}
