//! Executor that delegates a flow to an Apache Airflow deployment
//!
//! The flow is rendered as a Python DAG file into the configured dags
//! folder, triggered through the Airflow stable REST API, polled until the
//! dag run reaches a terminal state, and each task's `return_value` XCom is
//! fetched back as the step's result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use conflux_core::{
    ActionRegistry, DAGFlow, ExecutionResults, FlowError, FlowExecutor, GuardPhase,
    GuardsRegistry, StepId,
};

use crate::codegen;

const STATE_SUCCESS: &str = "success";
const STATE_FAILED: &str = "failed";

/// Executor backed by an Airflow deployment
#[derive(Debug, Clone)]
pub struct AirflowExecutor {
    base_url: String,
    auth: Option<(String, String)>,
    poll_interval: Duration,
    run_timeout: Duration,
    dags_folder: PathBuf,
    client: Client,
}

impl AirflowExecutor {
    /// Executor against the given Airflow webserver and dags folder
    ///
    /// The dags folder must be the same directory the Airflow scheduler
    /// watches; writing the rendered DAG there is what registers the flow.
    pub fn new(base_url: impl Into<String>, dags_folder: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
            poll_interval: Duration::from_secs(2),
            run_timeout: Duration::from_secs(600),
            dags_folder: dags_folder.into(),
            client: Client::new(),
        }
    }

    /// Authenticate API calls with basic auth
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((user.into(), password.into()));
        self
    }

    /// How often to poll the dag run state
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overall deadline for one dag run
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Render and execute a flow on Airflow
    ///
    /// The local `registry` is consulted only to reject unknown action
    /// names before anything is shipped; the Airflow workers hold the real
    /// implementations under the same names. Pre-step guards run against
    /// the static step arguments at render time; post-step guards run
    /// against the fetched results. `$result` references are resolved
    /// worker-side, so pre-guards see them unresolved.
    pub async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        flow.validate()?;
        for step in &flow.steps {
            if !registry.contains(&step.action) {
                return Err(FlowError::ActionNotFound(step.action.clone()));
            }
        }

        let flow = match guards {
            Some(guards) => {
                let mut guarded = flow.clone();
                for step in &mut guarded.steps {
                    step.args = guards
                        .run_pre(&step.id, &step.action, step.args.clone())
                        .map_err(|e| FlowError::GuardViolation {
                            step_id: step.id.clone(),
                            phase: GuardPhase::Pre,
                            cause: e.0,
                        })?;
                }
                guarded
            }
            None => flow.clone(),
        };

        let dag_id = codegen::dag_id_for(&flow.id.0);
        let source = codegen::render_dag(&flow)?;
        let dag_path = self.dags_folder.join(format!("{dag_id}.py"));
        tokio::fs::write(&dag_path, source).await.map_err(|e| {
            FlowError::PoolBroken(format!(
                "failed to write DAG file {}: {e}",
                dag_path.display()
            ))
        })?;
        info!(dag_id = %dag_id, path = %dag_path.display(), "wrote Airflow DAG file");

        let dag_run_id = self.trigger(&dag_id).await?;
        info!(dag_id = %dag_id, dag_run_id = %dag_run_id, "triggered Airflow dag run");

        self.wait_for_completion(&flow, &dag_id, &dag_run_id).await?;

        let mut results: ExecutionResults = HashMap::new();
        for step in &flow.steps {
            let mut value = self.fetch_xcom(&dag_id, &dag_run_id, &step.id).await?;
            if let Some(guards) = guards {
                value = guards
                    .run_post(&step.id, &step.action, &step.args, value)
                    .map_err(|e| FlowError::GuardViolation {
                        step_id: step.id.clone(),
                        phase: GuardPhase::Post,
                        cause: e.0,
                    })?;
            }
            results.insert(step.id.clone(), value);
        }
        info!(dag_id = %dag_id, steps = results.len(), "Airflow dag run completed");
        Ok(results)
    }

    fn dag_runs_url(&self, dag_id: &str) -> String {
        format!("{}/api/v1/dags/{dag_id}/dagRuns", self.base_url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn trigger(&self, dag_id: &str) -> Result<String, FlowError> {
        let response = self
            .request(self.client.post(self.dag_runs_url(dag_id)))
            .json(&json!({"conf": {}}))
            .send()
            .await
            .map_err(|e| FlowError::PoolBroken(format!("failed to reach Airflow: {e}")))?;
        let body = check_airflow_response(response, "trigger dag run").await?;
        body["dag_run_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                FlowError::PoolBroken("Airflow trigger response missing dag_run_id".to_string())
            })
    }

    async fn wait_for_completion(
        &self,
        flow: &DAGFlow,
        dag_id: &str,
        dag_run_id: &str,
    ) -> Result<(), FlowError> {
        let deadline = Instant::now() + self.run_timeout;
        loop {
            let response = self
                .request(
                    self.client
                        .get(format!("{}/{dag_run_id}", self.dag_runs_url(dag_id))),
                )
                .send()
                .await
                .map_err(|e| FlowError::PoolBroken(format!("failed to reach Airflow: {e}")))?;
            let body = check_airflow_response(response, "poll dag run").await?;
            let state = body["state"].as_str().unwrap_or("");
            debug!(dag_id = %dag_id, dag_run_id = %dag_run_id, state = %state, "polled dag run");

            match state {
                STATE_SUCCESS => return Ok(()),
                STATE_FAILED => return Err(self.failed_run_error(flow, dag_id, dag_run_id).await),
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(FlowError::PoolBroken(format!(
                    "Airflow dag run {dag_run_id} did not finish within {:?}",
                    self.run_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Pin the failure to a task when Airflow will say which one
    async fn failed_run_error(&self, flow: &DAGFlow, dag_id: &str, dag_run_id: &str) -> FlowError {
        let url = format!(
            "{}/{dag_run_id}/taskInstances",
            self.dag_runs_url(dag_id)
        );
        let failed_task = match self.request(self.client.get(url)).send().await {
            Ok(response) => match response.json::<Value>().await {
                Ok(body) => body["task_instances"]
                    .as_array()
                    .and_then(|tasks| {
                        tasks.iter().find(|t| t["state"].as_str() == Some(STATE_FAILED))
                    })
                    .and_then(|t| t["task_id"].as_str().map(str::to_string)),
                Err(_) => None,
            },
            Err(e) => {
                warn!(dag_run_id = %dag_run_id, error = %e, "could not list task instances");
                None
            }
        };

        match failed_task {
            Some(task_id) => {
                let step_id = StepId(task_id);
                let action = flow
                    .step(&step_id)
                    .map(|s| s.action.clone())
                    .unwrap_or_default();
                FlowError::StepExecution {
                    step_id,
                    action,
                    attempts: 1,
                    cause: "Airflow task ended in state failed".to_string(),
                }
            }
            None => FlowError::PoolBroken(format!(
                "Airflow dag run {dag_run_id} failed with no identifiable task"
            )),
        }
    }

    async fn fetch_xcom(
        &self,
        dag_id: &str,
        dag_run_id: &str,
        step_id: &StepId,
    ) -> Result<Value, FlowError> {
        let url = format!(
            "{}/{dag_run_id}/taskInstances/{}/xcomEntries/return_value",
            self.dag_runs_url(dag_id),
            step_id.0,
        );
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(|e| FlowError::PoolBroken(format!("failed to reach Airflow: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            // Task ran but pushed no return value.
            return Ok(Value::Null);
        }
        let body = check_airflow_response(response, "fetch xcom").await?;
        // Airflow serializes XCom values as strings; fall back to the raw
        // string when the payload is not itself JSON.
        match &body["value"] {
            Value::String(s) => Ok(serde_json::from_str(s).unwrap_or(Value::String(s.clone()))),
            other => Ok(other.clone()),
        }
    }
}

async fn check_airflow_response(
    response: reqwest::Response,
    operation: &str,
) -> Result<Value, FlowError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FlowError::PoolBroken(format!(
            "Airflow {operation} returned {status}: {body}"
        )));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| FlowError::PoolBroken(format!("invalid Airflow {operation} response: {e}")))
}

#[async_trait]
impl FlowExecutor for AirflowExecutor {
    async fn run_dagflow(
        &self,
        flow: &DAGFlow,
        registry: &ActionRegistry,
        guards: Option<&GuardsRegistry>,
    ) -> Result<ExecutionResults, FlowError> {
        AirflowExecutor::run_dagflow(self, flow, registry, guards).await
    }
}
