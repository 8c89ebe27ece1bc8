//! Error taxonomy of the Conflux runtime

use crate::domain::flow::StepId;
use thiserror::Error;

/// Phase of guard evaluation in which a violation occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// Before the step's action is invoked
    Pre,
    /// After the step's action has produced a result
    Post,
}

impl std::fmt::Display for GuardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardPhase::Pre => write!(f, "pre-step"),
            GuardPhase::Post => write!(f, "post-step"),
        }
    }
}

/// Core error type for the Conflux runtime
///
/// Every variant that relates to a particular step carries the step id so a
/// failed run can be diagnosed without inspecting executor internals. All
/// variants abort the whole run; the only local recovery is the bounded
/// retry layer inside step execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// A step with the same id was already added to the flow
    #[error("Step with id {0} already exists")]
    DuplicateStep(String),

    /// An edge endpoint references a step id that is not part of the flow
    #[error("Unknown step {0}")]
    UnknownStep(String),

    /// The edge relation contains a cycle or an unreachable node
    #[error("Cycle detected or unreachable steps in flow {0}")]
    CycleOrUnreachable(String),

    /// An argument references a step result that has not been produced
    #[error("Step {step_id}: reference {reference} cannot be resolved")]
    UnresolvedReference {
        /// Step whose argument carried the reference
        step_id: StepId,
        /// The offending `$result.` expression
        reference: String,
    },

    /// The action name is absent from the registry
    #[error("Action {0} not found in registry")]
    ActionNotFound(String),

    /// The action failed after exhausting all retry attempts
    #[error("Step {step_id} failed after {attempts} attempt(s) running {action}: {cause}")]
    StepExecution {
        /// Failing step
        step_id: StepId,
        /// Action name that was invoked
        action: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// Message of the last underlying failure
        cause: String,
    },

    /// The step was still running after its declared timeout
    #[error("Step {step_id} timed out after {timeout_secs} seconds")]
    StepTimeout {
        /// Timed-out step
        step_id: StepId,
        /// Declared timeout in seconds
        timeout_secs: f64,
    },

    /// A guard hook vetoed the run
    #[error("Guard {phase} failed for {step_id}: {cause}")]
    GuardViolation {
        /// Step being guarded
        step_id: StepId,
        /// Whether the pre or post hook raised the violation
        phase: GuardPhase,
        /// Violation message from the guard
        cause: String,
    },

    /// The worker pool itself became unusable (process/remote executors)
    #[error("Worker pool broken: {0}")]
    PoolBroken(String),

    /// A state machine has no start state defined
    #[error("No start state defined")]
    MissingStartState,

    /// A transition targeted a state id that does not exist
    #[error("Unknown state {0}")]
    UnknownState(String),

    /// Serialization or deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A repository collaborator failed
    #[error("Repository error: {0}")]
    Repository(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}
