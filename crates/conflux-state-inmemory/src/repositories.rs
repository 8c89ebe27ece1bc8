//! In-memory implementations of the Conflux repository traits

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use conflux_core::domain::repository::{FlowStore, RunRepository, StoredFlow};
use conflux_core::{FlowError, FlowId, RunId, RunStatus};

/// One tracked run record
#[derive(Debug, Clone)]
struct RunRecord {
    flow_id: FlowId,
    status: RunStatus,
    payload: Value,
    result: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory implementation of [`RunRepository`]
///
/// Cloning shares underlying storage, so one repository can be handed to
/// several orchestrators.
#[derive(Clone, Default)]
pub struct InMemoryRunRepository {
    runs: Arc<RwLock<HashMap<String, RunRecord>>>,
}

impl InMemoryRunRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs ever recorded
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Whether no runs have been recorded
    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }

    /// Flow id the run was created for, if the run is known
    pub async fn flow_id(&self, run_id: &RunId) -> Option<FlowId> {
        self.runs
            .read()
            .await
            .get(&run_id.0)
            .map(|r| r.flow_id.clone())
    }

    /// Submission payload recorded at creation, if the run is known
    pub async fn payload(&self, run_id: &RunId) -> Option<Value> {
        self.runs
            .read()
            .await
            .get(&run_id.0)
            .map(|r| r.payload.clone())
    }

    /// Timestamp of the run record's creation
    pub async fn created_at(&self, run_id: &RunId) -> Option<DateTime<Utc>> {
        self.runs.read().await.get(&run_id.0).map(|r| r.created_at)
    }

    /// Timestamp of the last mutation to the run record
    pub async fn updated_at(&self, run_id: &RunId) -> Option<DateTime<Utc>> {
        self.runs.read().await.get(&run_id.0).map(|r| r.updated_at)
    }

    async fn with_record<F>(&self, run_id: &RunId, mutate: F) -> Result<(), FlowError>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| FlowError::Repository(format!("unknown run {run_id}")))?;
        mutate(record);
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create_run(
        &self,
        run_id: &RunId,
        flow_id: &FlowId,
        payload: Value,
    ) -> Result<(), FlowError> {
        debug!(run_id = %run_id, flow_id = %flow_id, "creating run record");
        let now = Utc::now();
        self.runs.write().await.insert(
            run_id.0.clone(),
            RunRecord {
                flow_id: flow_id.clone(),
                status: RunStatus::Pending,
                payload,
                result: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_status(&self, run_id: &RunId, status: RunStatus) -> Result<(), FlowError> {
        debug!(run_id = %run_id, status = %status, "updating run status");
        self.with_record(run_id, |record| record.status = status)
            .await
    }

    async fn save_result(&self, run_id: &RunId, result: Value) -> Result<(), FlowError> {
        debug!(run_id = %run_id, "saving run result");
        self.with_record(run_id, |record| {
            record.result = Some(result);
            record.status = RunStatus::Done;
        })
        .await
    }

    async fn fail_run(&self, run_id: &RunId, error: &str) -> Result<(), FlowError> {
        debug!(run_id = %run_id, error = %error, "marking run failed");
        self.with_record(run_id, |record| {
            record.result = Some(json!({"error": error}));
            record.status = RunStatus::Failed;
        })
        .await
    }

    async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>, FlowError> {
        Ok(self.runs.read().await.get(&run_id.0).map(|r| r.status))
    }

    async fn get_result(&self, run_id: &RunId) -> Result<Option<Value>, FlowError> {
        Ok(self
            .runs
            .read()
            .await
            .get(&run_id.0)
            .and_then(|r| r.result.clone()))
    }
}

impl std::fmt::Debug for InMemoryRunRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRunRepository").finish()
    }
}

/// In-memory implementation of [`FlowStore`]
///
/// DAG flows and state machines share one namespace, keyed by flow id;
/// saving either kind under an existing id replaces the stored definition.
#[derive(Clone, Default)]
pub struct InMemoryFlowStore {
    flows: Arc<RwLock<HashMap<String, StoredFlow>>>,
}

impl InMemoryFlowStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stored flow, sorted
    pub async fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn save_flow(&self, flow: &StoredFlow) -> Result<(), FlowError> {
        debug!(flow_id = %flow.id(), "saving flow definition");
        self.flows
            .write()
            .await
            .insert(flow.id().to_string(), flow.clone());
        Ok(())
    }

    async fn load_flow(&self, flow_id: &str) -> Result<Option<StoredFlow>, FlowError> {
        Ok(self.flows.read().await.get(flow_id).cloned())
    }
}

impl std::fmt::Debug for InMemoryFlowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFlowStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::{dag, StateMachine};

    #[tokio::test]
    async fn test_run_lifecycle() {
        let repo = InMemoryRunRepository::new();
        let run_id = RunId::new();
        let flow_id = FlowId("pipeline".to_string());

        repo.create_run(&run_id, &flow_id, json!({"steps": 2}))
            .await
            .unwrap();
        assert_eq!(
            repo.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Pending)
        );
        assert_eq!(repo.flow_id(&run_id).await, Some(flow_id));

        repo.update_status(&run_id, RunStatus::Running)
            .await
            .unwrap();
        repo.save_result(&run_id, json!({"s1": 3})).await.unwrap();

        assert_eq!(
            repo.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Done)
        );
        assert_eq!(
            repo.get_result(&run_id).await.unwrap(),
            Some(json!({"s1": 3}))
        );
    }

    #[tokio::test]
    async fn test_fail_run_stores_error_payload() {
        let repo = InMemoryRunRepository::new();
        let run_id = RunId::new();
        repo.create_run(&run_id, &FlowId("f".to_string()), json!(null))
            .await
            .unwrap();

        repo.fail_run(&run_id, "step s1 exploded").await.unwrap();

        assert_eq!(
            repo.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Failed)
        );
        assert_eq!(
            repo.get_result(&run_id).await.unwrap(),
            Some(json!({"error": "step s1 exploded"}))
        );
    }

    #[tokio::test]
    async fn test_updating_unknown_run_is_an_error() {
        let repo = InMemoryRunRepository::new();
        let err = repo
            .update_status(&RunId::new(), RunStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Repository(_)));
    }

    #[tokio::test]
    async fn test_flow_store_round_trip_both_kinds() {
        let store = InMemoryFlowStore::new();

        let flow = dag("etl")
            .step("s1", "noop", serde_json::json!({}))
            .build()
            .unwrap();
        store.save_flow(&StoredFlow::Dag(flow.clone())).await.unwrap();

        let machine = StateMachine::new("door");
        store
            .save_flow(&StoredFlow::Machine(machine.clone()))
            .await
            .unwrap();

        assert_eq!(
            store.load_flow("etl").await.unwrap(),
            Some(StoredFlow::Dag(flow))
        );
        assert_eq!(
            store.load_flow("door").await.unwrap(),
            Some(StoredFlow::Machine(machine))
        );
        assert_eq!(store.load_flow("ghost").await.unwrap(), None);
        assert_eq!(store.flow_ids().await, vec!["door", "etl"]);
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let repo = InMemoryRunRepository::new();
        let alias = repo.clone();
        let run_id = RunId::new();
        repo.create_run(&run_id, &FlowId("f".to_string()), json!(null))
            .await
            .unwrap();
        assert_eq!(
            alias.get_status(&run_id).await.unwrap(),
            Some(RunStatus::Pending)
        );
        assert_eq!(alias.len().await, 1);
    }
}
