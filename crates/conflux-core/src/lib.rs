//! Conflux Core - lightweight workflow orchestration runtime
//!
//! Conflux executes declarative workflows over a registry of named actions.
//! Two flow shapes are supported: dependency DAGs, where independent steps
//! run concurrently and a step's arguments may reference upstream results,
//! and event-driven state machines. Executors are pluggable behind the
//! [`FlowExecutor`](application::FlowExecutor) trait: in-process, child
//! processes, or a simulated remote backend. An [`Orchestrator`] tracks
//! submitted runs and can mirror their state into a [`RunRepository`].
//!
//! # Example
//!
//! ```rust
//! use conflux_core::{dag, ActionRegistry, LocalExecutor, StepId};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), conflux_core::FlowError> {
//! let mut registry = ActionRegistry::new();
//! registry.register_fn("add", |args| {
//!     Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)))
//! });
//!
//! let flow = dag("sum")
//!     .step("s1", "add", json!({"a": 1, "b": 2}))
//!     .step("s2", "add", json!({"a": "$result.s1", "b": 10}))
//!     .edge("s1", "s2")
//!     .build()?;
//!
//! let results = LocalExecutor::new().run_dagflow(&flow, &registry, None).await?;
//! assert_eq!(results[&StepId::from("s2")], json!(13));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod application;
pub mod domain;
pub mod error;
pub mod guards;
pub mod observability;
pub mod registry;

use std::collections::HashMap;

/// Per-step results of one completed flow run
pub type ExecutionResults = HashMap<domain::flow::StepId, serde_json::Value>;

pub use application::local_executor::{default_worker_count, LocalExecutor};
pub use application::orchestrator::Orchestrator;
pub use application::process_executor::{
    default_process_worker_count, worker_main, ProcessExecutor,
};
pub use application::remote_executor::DummyRemoteExecutor;
pub use application::step_config::{RetryPolicy, StepOverrides, RETRY_KEY, TIMEOUT_KEY};
pub use application::{FlowExecutor, RESULT_REF_PREFIX};
pub use domain::flow::{dag, DAGFlow, FlowBuilder, FlowId, Step, StepId};
pub use domain::graph::DependencyGraph;
pub use domain::repository::{FlowStore, RunRepository, StoredFlow};
pub use domain::run::{Run, RunId, RunStatus};
pub use domain::state_machine::{State, StateMachine};
pub use error::{FlowError, GuardPhase};
pub use guards::{Guard, GuardError, GuardsRegistry, RedactGuard};
pub use observability::{MetricsCollector, Observability, TraceEvent, TraceId, Tracer};
pub use registry::{Action, ActionRegistry};
