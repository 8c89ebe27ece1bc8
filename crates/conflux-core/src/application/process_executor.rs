//! Executor that runs each step in a separate worker process
//!
//! Actions are addressed by stable registry name rather than by code
//! location: the dispatcher invokes a configured worker program with the
//! action name as the final argument, writes the resolved argument map as
//! JSON on stdin, and reads the JSON result from stdout. The worker program
//! is expected to hold its own [`ActionRegistry`] with the same names; the
//! [`worker_main`] helper implements that side of the protocol.
//!
//! Exit status 0 with a JSON body on stdout is success. A nonzero exit is a
//! step failure carrying the worker's stderr. A worker that cannot be
//! spawned, or dies to a signal, marks the pool broken.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
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

/// Worker count heuristic for process-backed steps
pub fn default_process_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Runs each step as a child process speaking the worker protocol
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    worker_program: PathBuf,
    worker_args: Vec<String>,
    max_workers: usize,
}

impl ProcessExecutor {
    /// Executor invoking `worker_program` once per step
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            worker_args: Vec::new(),
            max_workers: default_process_worker_count(),
        }
    }

    /// Fixed arguments passed before the action name
    pub fn with_worker_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    /// Bound concurrent worker processes
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Run a DAG flow, one child process per step
    ///
    /// Reference resolution and guards run in the dispatcher; only the
    /// action invocation crosses the process boundary, so guards keep
    /// working with process isolation. The `registry` is consulted only to
    /// reject names the dispatcher does not know before spawning anything.
    pub async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        flow.validate()?;
        info!(flow_id = %flow.id, worker = %self.worker_program.display(), "process flow_started");

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
                        "worker task failed: {join_err}"
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
        info!(flow_id = %flow.id, "process flow_completed");
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
        if !registry.contains(&step.action) {
            return Err(FlowError::ActionNotFound(step.action.clone()));
        }
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
        let program = self.worker_program.clone();
        let worker_args = self.worker_args.clone();
        let step_id = step.id.clone();
        let action_name = step.action.clone();

        join_set.spawn(async move {
            let outcome = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| FlowError::PoolBroken("process pool closed".to_string()))?;
                invoke_worker(&program, &worker_args, &step_id, &action_name, args).await
            }
            .await;
            (step_id, outcome)
        });
        Ok(())
    }
}

#[async_trait]
impl FlowExecutor for ProcessExecutor {
    async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        ProcessExecutor::run_dagflow(self, flow, registry, guards).await
    }
}

/// One round of the worker protocol against a fresh child process
async fn invoke_worker(
    program: &PathBuf,
    worker_args: &[String],
    step_id: &StepId,
    action_name: &str,
    args: Map<String, Value>,
) -> Result<Value, FlowError> {
    let payload = serde_json::to_vec(&Value::Object(args))
        .map_err(|e| FlowError::Serialization(e.to_string()))?;

    let mut child = tokio::process::Command::new(program)
        .args(worker_args)
        .arg(action_name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            FlowError::PoolBroken(format!("failed to spawn worker for step {step_id}: {e}"))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A worker that exits before reading its arguments closes the pipe;
        // its exit status below is the authoritative verdict, not the EPIPE.
        if let Err(e) = stdin.write_all(&payload).await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(FlowError::PoolBroken(format!(
                    "failed to write args to worker for {step_id}: {e}"
                )));
            }
        }
        // Closing stdin signals end of input to the worker.
    }

    let output = child.wait_with_output().await.map_err(|e| {
        FlowError::PoolBroken(format!("failed to collect worker output for {step_id}: {e}"))
    })?;

    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            serde_json::from_str(stdout.trim()).map_err(|e| FlowError::StepExecution {
                step_id: step_id.clone(),
                action: action_name.to_string(),
                attempts: 1,
                cause: format!("worker produced invalid JSON: {e}"),
            })
        }
        Some(code) => Err(FlowError::StepExecution {
            step_id: step_id.clone(),
            action: action_name.to_string(),
            attempts: 1,
            cause: format!(
                "worker exited with status {code}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }),
        None => Err(FlowError::PoolBroken(format!(
            "worker for step {step_id} was killed by a signal"
        ))),
    }
}

/// Worker-side half of the protocol
///
/// Call this from the worker binary's `main` with the registry holding the
/// same action names the dispatcher uses. Reads the argument map from
/// stdin, invokes the named action, prints its JSON result on stdout.
pub async fn worker_main(registry: &ActionRegistry) -> std::process::ExitCode {
    use std::io::Read;

    let Some(action_name) = std::env::args().last() else {
        eprintln!("missing action name argument");
        return std::process::ExitCode::FAILURE;
    };
    let Some(action) = registry.get(&action_name) else {
        eprintln!("action {action_name} not found in worker registry");
        return std::process::ExitCode::FAILURE;
    };

    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("failed to read arguments from stdin: {e}");
        return std::process::ExitCode::FAILURE;
    }
    let args: Map<String, Value> = if input.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str(&input) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                eprintln!("arguments must be a JSON object");
                return std::process::ExitCode::FAILURE;
            }
            Err(e) => {
                eprintln!("invalid argument JSON: {e}");
                return std::process::ExitCode::FAILURE;
            }
        }
    };

    match action.invoke(args).await {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(s) => {
                println!("{s}");
                std::process::ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to serialize result: {e}");
                std::process::ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::flow::dag;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;

    fn write_worker_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn echo_registry() -> ActionRegistry {
        // Names only; the script is the real implementation.
        let mut registry = ActionRegistry::new();
        registry.register_fn("echo", |_args| Ok(json!(null)));
        registry.register_fn("fail", |_args| Ok(json!(null)));
        registry
    }

    #[tokio::test]
    async fn test_worker_receives_action_and_args() {
        let dir = tempfile::tempdir().unwrap();
        // Echoes back the action name and the raw argument JSON.
        let script = write_worker_script(
            &dir,
            r#"args=$(cat); printf '{"action":"%s","args":%s}' "$1" "$args""#,
        );

        let flow = dag("proc")
            .step("s1", "echo", json!({"n": 5}))
            .build()
            .unwrap();

        let results = ProcessExecutor::new(&script)
            .run_dagflow(&flow, &echo_registry(), None)
            .await
            .unwrap();
        assert_eq!(
            results[&StepId::from("s1")],
            json!({"action": "echo", "args": {"n": 5}})
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_worker_script(&dir, r#"echo "boom" >&2; exit 3"#);

        let flow = dag("proc")
            .step("s1", "fail", json!({}))
            .build()
            .unwrap();

        let err = ProcessExecutor::new(&script)
            .run_dagflow(&flow, &echo_registry(), None)
            .await
            .unwrap_err();
        match err {
            FlowError::StepExecution { cause, .. } => {
                assert!(cause.contains("status 3"));
                assert!(cause.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_exiting_before_reading_stdin_is_a_step_failure() {
        let dir = tempfile::tempdir().unwrap();
        // Exits without consuming stdin. The argument payload is larger than
        // a pipe buffer, so the dispatcher's write hits a closed pipe; the
        // exit status must still win over the broken pipe.
        let script = write_worker_script(&dir, r#"echo "refused" >&2; exit 7"#);

        let flow = dag("proc")
            .step("s1", "fail", json!({"blob": "x".repeat(1 << 20)}))
            .build()
            .unwrap();

        let err = ProcessExecutor::new(&script)
            .run_dagflow(&flow, &echo_registry(), None)
            .await
            .unwrap_err();
        match err {
            FlowError::StepExecution { cause, .. } => {
                assert!(cause.contains("status 7"));
                assert!(cause.contains("refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unspawnable_worker_breaks_the_pool() {
        let flow = dag("proc")
            .step("s1", "echo", json!({}))
            .build()
            .unwrap();

        let err = ProcessExecutor::new("/nonexistent/worker")
            .run_dagflow(&flow, &echo_registry(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::PoolBroken(_)));
    }

    #[tokio::test]
    async fn test_reference_resolution_happens_in_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        // Prints the args it was given, so s2 sees s1's resolved result.
        let script = write_worker_script(&dir, r#"cat"#);

        let flow = dag("proc")
            .step("s1", "echo", json!({"v": 1}))
            .step("s2", "echo", json!({"from_s1": "$result.s1"}))
            .edge("s1", "s2")
            .build()
            .unwrap();

        let results = ProcessExecutor::new(&script)
            .run_dagflow(&flow, &echo_registry(), None)
            .await
            .unwrap();
        assert_eq!(results[&StepId::from("s2")], json!({"from_s1": {"v": 1}}));
    }
}
