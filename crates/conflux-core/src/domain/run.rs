use super::flow::FlowId;
use crate::ExecutionResults;
use serde::{Deserialize, Serialize};

/// Opaque identifier of one tracked flow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunId(pub String);

impl RunId {
    /// Issue a fresh run id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a tracked run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Submitted but not yet executing
    Pending,
    /// Currently executing
    Running,
    /// Completed with a full result map
    Done,
    /// Aborted by an error; terminal
    Failed,
    /// The orchestrator has no record of this run
    Unknown,
}

impl RunStatus {
    /// Whether the run can no longer change status
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }

    /// Parse the lowercase wire form used by run repositories
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "done" => RunStatus::Done,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Unknown,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// In-memory record of one run, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct Run {
    /// Id issued at submission
    pub run_id: RunId,
    /// Flow this run executes
    pub flow_id: FlowId,
    /// Current status
    pub status: RunStatus,
    /// Result map, present once status is `Done`
    pub result: Option<ExecutionResults>,
}

impl Run {
    /// Create a pending run record
    pub fn pending(run_id: RunId, flow_id: FlowId) -> Self {
        Self {
            run_id,
            flow_id,
            status: RunStatus::Pending,
            result: None,
        }
    }
}
