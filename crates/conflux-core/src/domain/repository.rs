//! Repository traits for the Conflux core
//!
//! Persistence is a pluggable collaborator: the runtime only needs a narrow
//! save/load contract. External crates implement these traits to provide
//! durable backends; in-memory implementations live behind the `testing`
//! feature for use in the core's own tests.

use async_trait::async_trait;
use serde_json::Value;

use super::flow::{DAGFlow, FlowId};
use super::run::{RunId, RunStatus};
use super::state_machine::StateMachine;
use crate::FlowError;

/// Durable sink for orchestrator run metadata and results
///
/// Mirrored state is crash-visible, not crash-recoverable: a restarted
/// process can inspect the last known status and result of a run, but
/// in-flight execution is not resumed.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Record a new run with its flow id and submission payload
    async fn create_run(&self, run_id: &RunId, flow_id: &FlowId, payload: Value)
        -> Result<(), FlowError>;

    /// Update the status of a run
    async fn update_status(&self, run_id: &RunId, status: RunStatus) -> Result<(), FlowError>;

    /// Store the result map and mark the run done
    async fn save_result(&self, run_id: &RunId, result: Value) -> Result<(), FlowError>;

    /// Store the failure reason and mark the run failed
    async fn fail_run(&self, run_id: &RunId, error: &str) -> Result<(), FlowError>;

    /// Fetch the last recorded status, if the run is known
    async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>, FlowError>;

    /// Fetch the stored result payload, if any
    async fn get_result(&self, run_id: &RunId) -> Result<Option<Value>, FlowError>;
}

/// A stored flow definition of either kind
#[derive(Debug, Clone, PartialEq)]
pub enum StoredFlow {
    /// A DAG flow definition
    Dag(DAGFlow),
    /// A state machine definition
    Machine(StateMachine),
}

/// Persistence for flow definitions
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Save a flow definition, replacing any previous version
    async fn save_flow(&self, flow: &StoredFlow) -> Result<(), FlowError>;

    /// Load a flow definition by id
    async fn load_flow(&self, flow_id: &str) -> Result<Option<StoredFlow>, FlowError>;
}

impl StoredFlow {
    /// Id of the stored definition
    pub fn id(&self) -> &str {
        match self {
            StoredFlow::Dag(f) => &f.id.0,
            StoredFlow::Machine(m) => &m.id,
        }
    }
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::DashMap;

    #[derive(Clone)]
    struct RunRecord {
        flow_id: FlowId,
        status: RunStatus,
        #[allow(dead_code)]
        payload: Value,
        result: Option<Value>,
    }

    /// In-memory run repository backed by a concurrent map
    pub struct MemoryRunRepository {
        runs: DashMap<String, RunRecord>,
    }

    impl MemoryRunRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self {
                runs: DashMap::new(),
            }
        }

        /// Flow id recorded for a run, for test assertions
        pub fn flow_id(&self, run_id: &RunId) -> Option<FlowId> {
            self.runs.get(&run_id.0).map(|r| r.flow_id.clone())
        }
    }

    impl Default for MemoryRunRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RunRepository for MemoryRunRepository {
        async fn create_run(
            &self,
            run_id: &RunId,
            flow_id: &FlowId,
            payload: Value,
        ) -> Result<(), FlowError> {
            self.runs.insert(
                run_id.0.clone(),
                RunRecord {
                    flow_id: flow_id.clone(),
                    status: RunStatus::Pending,
                    payload,
                    result: None,
                },
            );
            Ok(())
        }

        async fn update_status(&self, run_id: &RunId, status: RunStatus) -> Result<(), FlowError> {
            match self.runs.get_mut(&run_id.0) {
                Some(mut record) => {
                    record.status = status;
                    Ok(())
                }
                None => Err(FlowError::Repository(format!("unknown run {}", run_id))),
            }
        }

        async fn save_result(&self, run_id: &RunId, result: Value) -> Result<(), FlowError> {
            match self.runs.get_mut(&run_id.0) {
                Some(mut record) => {
                    record.result = Some(result);
                    record.status = RunStatus::Done;
                    Ok(())
                }
                None => Err(FlowError::Repository(format!("unknown run {}", run_id))),
            }
        }

        async fn fail_run(&self, run_id: &RunId, error: &str) -> Result<(), FlowError> {
            match self.runs.get_mut(&run_id.0) {
                Some(mut record) => {
                    record.result = Some(serde_json::json!({ "error": error }));
                    record.status = RunStatus::Failed;
                    Ok(())
                }
                None => Err(FlowError::Repository(format!("unknown run {}", run_id))),
            }
        }

        async fn get_status(&self, run_id: &RunId) -> Result<Option<RunStatus>, FlowError> {
            Ok(self.runs.get(&run_id.0).map(|r| r.status))
        }

        async fn get_result(&self, run_id: &RunId) -> Result<Option<Value>, FlowError> {
            Ok(self.runs.get(&run_id.0).and_then(|r| r.result.clone()))
        }
    }

    /// In-memory flow definition store
    pub struct MemoryFlowStore {
        flows: DashMap<String, StoredFlow>,
    }

    impl MemoryFlowStore {
        /// Create an empty store
        pub fn new() -> Self {
            Self {
                flows: DashMap::new(),
            }
        }
    }

    impl Default for MemoryFlowStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl FlowStore for MemoryFlowStore {
        async fn save_flow(&self, flow: &StoredFlow) -> Result<(), FlowError> {
            self.flows.insert(flow.id().to_string(), flow.clone());
            Ok(())
        }

        async fn load_flow(&self, flow_id: &str) -> Result<Option<StoredFlow>, FlowError> {
            Ok(self.flows.get(flow_id).map(|f| f.clone()))
        }
    }
}
