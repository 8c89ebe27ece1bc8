//! Run lifecycle management above the executors
//!
//! The orchestrator assigns a run id per submitted flow, executes it on a
//! background task, and tracks status and results in memory. A
//! [`RunRepository`] can be attached for durable tracking; repository
//! failures are logged and never fail a run, so the in-memory view stays
//! authoritative.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::FlowExecutor;
use crate::domain::flow::DAGFlow;
use crate::domain::repository::RunRepository;
use crate::domain::run::{Run, RunId, RunStatus};
use crate::observability::Observability;
use crate::registry::ActionRegistry;
use crate::ExecutionResults;

/// Tracks submitted flow runs through their lifecycle
pub struct Orchestrator {
    runs: Arc<Mutex<HashMap<RunId, Run>>>,
    handles: Mutex<HashMap<RunId, JoinHandle<()>>>,
    run_repo: Option<Arc<dyn RunRepository>>,
    observability: Arc<Observability>,
}

impl Orchestrator {
    /// Orchestrator with in-memory tracking only
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
            run_repo: None,
            observability: Arc::new(Observability::new()),
        }
    }

    /// Additionally mirror run state into a repository
    pub fn with_run_repository(mut self, repo: Arc<dyn RunRepository>) -> Self {
        self.run_repo = Some(repo);
        self
    }

    /// Share an observability context instead of the private default
    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.observability = observability;
        self
    }

    /// The tracer and metrics this orchestrator reports into
    pub fn observability(&self) -> &Arc<Observability> {
        &self.observability
    }

    /// Submit a flow for execution and return its run id immediately
    ///
    /// Must be called from within a tokio runtime; the flow runs on a
    /// spawned task. Use [`Orchestrator::wait`] to await completion.
    pub fn submit_flow(
        &self,
        flow: DAGFlow,
        executor: Arc<dyn FlowExecutor>,
        registry: Arc<ActionRegistry>,
    ) -> RunId {
        let run_id = RunId::new();
        let flow_id = flow.id.clone();

        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(run_id.clone(), Run::pending(run_id.clone(), flow_id.clone()));
        }

        let runs = Arc::clone(&self.runs);
        let repo = self.run_repo.clone();
        let observability = Arc::clone(&self.observability);
        let task_run_id = run_id.clone();

        let handle = tokio::spawn(async move {
            let run_id = task_run_id;
            let trace_id = observability.tracer.start_trace();
            observability.metrics.inc("orchestrator_runs", 1);
            observability.tracer.record(
                &trace_id,
                "orchestrator_run_started",
                json!({"run_id": run_id.0, "flow_id": flow_id.0}),
            );
            info!(run_id = %run_id, flow_id = %flow_id, "orchestrator_run_started");

            if let Some(repo) = &repo {
                let params = serde_json::to_value(&flow).unwrap_or(json!(null));
                if let Err(e) = repo.create_run(&run_id, &flow_id, params).await {
                    warn!(run_id = %run_id, error = %e, "failed to create run record");
                }
                if let Err(e) = repo.update_status(&run_id, RunStatus::Running).await {
                    warn!(run_id = %run_id, error = %e, "failed to mark run running");
                }
            }
            if let Ok(mut runs) = runs.lock() {
                if let Some(run) = runs.get_mut(&run_id) {
                    run.status = RunStatus::Running;
                }
            }

            match executor.run_dagflow(&flow, &registry, None).await {
                Ok(results) => {
                    if let Some(repo) = &repo {
                        let value = serde_json::to_value(&results).unwrap_or(json!(null));
                        if let Err(e) = repo.save_result(&run_id, value).await {
                            warn!(run_id = %run_id, error = %e, "failed to persist run result");
                        }
                    }
                    if let Ok(mut runs) = runs.lock() {
                        if let Some(run) = runs.get_mut(&run_id) {
                            run.status = RunStatus::Done;
                            run.result = Some(results);
                        }
                    }
                    observability.tracer.record(
                        &trace_id,
                        "orchestrator_run_completed",
                        json!({"run_id": run_id.0}),
                    );
                    info!(run_id = %run_id, "orchestrator_run_completed");
                }
                Err(err) => {
                    if let Some(repo) = &repo {
                        if let Err(e) = repo.fail_run(&run_id, &err.to_string()).await {
                            warn!(run_id = %run_id, error = %e, "failed to persist run failure");
                        }
                    }
                    if let Ok(mut runs) = runs.lock() {
                        if let Some(run) = runs.get_mut(&run_id) {
                            run.status = RunStatus::Failed;
                        }
                    }
                    observability.tracer.record(
                        &trace_id,
                        "orchestrator_run_failed",
                        json!({"run_id": run_id.0, "error": err.to_string()}),
                    );
                    error!(run_id = %run_id, error = %err, "orchestrator_run_failed");
                }
            }
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(run_id.clone(), handle);
        }
        run_id
    }

    /// Current status of a run; `Unknown` when the run id is not tracked
    ///
    /// The in-memory view is authoritative; the repository is consulted
    /// only for runs this orchestrator instance never saw.
    pub async fn get_status(&self, run_id: &RunId) -> RunStatus {
        if let Ok(runs) = self.runs.lock() {
            if let Some(run) = runs.get(run_id) {
                return run.status;
            }
        }
        if let Some(repo) = &self.run_repo {
            if let Ok(Some(status)) = repo.get_status(run_id).await {
                return status;
            }
        }
        RunStatus::Unknown
    }

    /// Results of a completed run; `None` unless the run finished cleanly
    pub async fn get_result(&self, run_id: &RunId) -> Option<ExecutionResults> {
        if let Ok(runs) = self.runs.lock() {
            if let Some(run) = runs.get(run_id) {
                return match run.status {
                    RunStatus::Done => run.result.clone(),
                    _ => None,
                };
            }
        }
        let repo = self.run_repo.as_ref()?;
        match repo.get_status(run_id).await {
            Ok(Some(RunStatus::Done)) => {}
            _ => return None,
        }
        let value = repo.get_result(run_id).await.ok().flatten()?;
        serde_json::from_value(value).ok()
    }

    /// Await completion of a submitted run
    pub async fn wait(&self, run_id: &RunId) {
        let handle = match self.handles.lock() {
            Ok(mut handles) => handles.remove(run_id),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(run_id = %run_id, error = %e, "run task did not complete");
            }
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::*;
    use crate::application::local_executor::LocalExecutor;
    use crate::domain::flow::{dag, StepId};
    use crate::domain::repository::memory::MemoryRunRepository;

    fn registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry.register_fn("add", |args| {
            Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
        });
        registry.register_fn("boom", |_args| anyhow::bail!("no good"));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_successful_run_lifecycle() {
        let repo = Arc::new(MemoryRunRepository::new());
        let orchestrator = Orchestrator::new().with_run_repository(repo.clone());

        let flow = dag("sum")
            .step("s1", "add", json!({"a": 2, "b": 3}))
            .build()
            .unwrap();

        let run_id = orchestrator.submit_flow(
            flow,
            Arc::new(LocalExecutor::new()),
            registry(),
        );
        orchestrator.wait(&run_id).await;

        assert_eq!(orchestrator.get_status(&run_id).await, RunStatus::Done);
        let results = orchestrator.get_result(&run_id).await.unwrap();
        assert_eq!(results[&StepId::from("s1")], json!(5));

        // Repository mirrors the terminal state.
        assert_eq!(
            repo.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Done)
        );
        assert_eq!(
            repo.get_result(&run_id).await.unwrap(),
            Some(json!({"s1": 5}))
        );
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let repo = Arc::new(MemoryRunRepository::new());
        let orchestrator = Orchestrator::new().with_run_repository(repo.clone());

        let flow = dag("broken")
            .step("s1", "boom", json!({}))
            .build()
            .unwrap();

        let run_id = orchestrator.submit_flow(
            flow,
            Arc::new(LocalExecutor::new()),
            registry(),
        );
        orchestrator.wait(&run_id).await;

        assert_eq!(orchestrator.get_status(&run_id).await, RunStatus::Failed);
        assert_eq!(orchestrator.get_result(&run_id).await, None);

        let stored = repo.get_result(&run_id).await.unwrap().unwrap();
        let message = stored["error"].as_str().unwrap();
        assert!(message.contains("no good"));
    }

    #[tokio::test]
    async fn test_unknown_run_id() {
        let orchestrator = Orchestrator::new();
        let ghost = RunId::new();
        assert_eq!(orchestrator.get_status(&ghost).await, RunStatus::Unknown);
        assert_eq!(orchestrator.get_result(&ghost).await, None);
    }

    #[tokio::test]
    async fn test_repository_fallback_for_untracked_run() {
        let repo = Arc::new(MemoryRunRepository::new());
        let first = Orchestrator::new().with_run_repository(repo.clone());

        let flow = dag("sum")
            .step("s1", "add", json!({"a": 1, "b": 1}))
            .build()
            .unwrap();
        let run_id = first.submit_flow(flow, Arc::new(LocalExecutor::new()), registry());
        first.wait(&run_id).await;

        // A fresh orchestrator sharing the repository can still answer.
        let second = Orchestrator::new().with_run_repository(repo);
        assert_eq!(second.get_status(&run_id).await, RunStatus::Done);
        let results = second.get_result(&run_id).await.unwrap();
        assert_eq!(results[&StepId::from("s1")], json!(2));
    }

    #[tokio::test]
    async fn test_orchestrator_runs_metric() {
        let orchestrator = Orchestrator::new();
        let flow = dag("sum")
            .step("s1", "add", json!({"a": 1, "b": 2}))
            .build()
            .unwrap();
        let run_id = orchestrator.submit_flow(flow, Arc::new(LocalExecutor::new()), registry());
        orchestrator.wait(&run_id).await;
        assert_eq!(
            orchestrator.observability().metrics.counter("orchestrator_runs"),
            1
        );
    }
}
