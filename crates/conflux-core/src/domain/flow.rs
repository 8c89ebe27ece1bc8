use crate::FlowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a flow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FlowId(pub String);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a step within a flow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub String);

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        StepId(s.to_string())
    }
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A single unit of work in a flow
///
/// `args` values may be plain literals or reference strings of the form
/// `$result.<step_id>`, resolved by executors against the results of
/// already-completed steps. Immutable once added to a flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Unique id of the step within its flow
    pub id: StepId,

    /// Name of the registered action to invoke
    pub action: String,

    /// Keyword-style arguments passed to the action
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Step {
    /// Create a new step
    pub fn new(id: impl Into<StepId>, action: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            args,
        }
    }
}

/// A directed acyclic graph of steps with data-dependency edges
///
/// Built once (directly or via [`FlowBuilder`]) and treated as read-only by
/// executors. Acyclicity is enforced by topological validation which fails
/// closed: a cycle or unreachable node fails the run with no partial silent
/// success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DAGFlow {
    /// Id of the flow
    pub id: FlowId,

    /// The flow version
    #[serde(default = "default_version")]
    pub version: String,

    /// The steps in this flow, in insertion order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Directed edges `(from, to)`; membership matters, order does not
    #[serde(default)]
    pub edges: Vec<(StepId, StepId)>,
}

impl DAGFlow {
    /// Create an empty flow with the default version
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: FlowId(id.into()),
            version: default_version(),
            steps: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a step, failing if a step with the same id already exists
    pub fn add_step(&mut self, step: Step) -> Result<(), FlowError> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(FlowError::DuplicateStep(step.id.0));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Add a directed edge, failing if either endpoint is unknown
    pub fn add_edge(&mut self, from: impl Into<StepId>, to: impl Into<StepId>) -> Result<(), FlowError> {
        let from = from.into();
        let to = to.into();
        if !self.steps.iter().any(|s| s.id == from) {
            return Err(FlowError::UnknownStep(from.0));
        }
        if !self.steps.iter().any(|s| s.id == to) {
            return Err(FlowError::UnknownStep(to.0));
        }
        self.edges.push((from, to));
        Ok(())
    }

    /// Look up a step by id
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Serialize the flow to JSON
    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize a flow from JSON
    pub fn from_json(s: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Validate the flow: unique step ids, known edge endpoints, no cycles
    ///
    /// Executors call this before dispatching anything so a malformed flow
    /// fails before any action side effect occurs.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.id) {
                return Err(FlowError::DuplicateStep(step.id.0.clone()));
            }
        }
        for (from, to) in &self.edges {
            if !seen.contains(from) {
                return Err(FlowError::UnknownStep(from.0.clone()));
            }
            if !seen.contains(to) {
                return Err(FlowError::UnknownStep(to.0.clone()));
            }
        }
        let graph = crate::domain::graph::DependencyGraph::build(self);
        if graph.toposort().len() != self.steps.len() {
            return Err(FlowError::CycleOrUnreachable(self.id.0.clone()));
        }
        Ok(())
    }
}

/// Fluent builder for [`DAGFlow`]
///
/// Example:
/// ```
/// use conflux_core::domain::flow::dag;
/// use serde_json::json;
///
/// let flow = dag("myflow")
///     .step("a", "noop", json!({}))
///     .step("b", "noop", json!({}))
///     .edge("a", "b")
///     .build()
///     .unwrap();
/// assert_eq!(flow.steps.len(), 2);
/// ```
pub struct FlowBuilder {
    flow: DAGFlow,
    error: Option<FlowError>,
}

impl FlowBuilder {
    /// Start a builder for a flow with the given id
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            flow: DAGFlow::new(id),
            error: None,
        }
    }

    /// Set the flow version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.flow.version = version.into();
        self
    }

    /// Add a step; `args` must be a JSON object (or null for no args)
    pub fn step(mut self, id: &str, action: &str, args: Value) -> Self {
        if self.error.is_some() {
            return self;
        }
        let args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                self.error = Some(FlowError::Serialization(format!(
                    "step args must be a JSON object, got: {}",
                    other
                )));
                return self;
            }
        };
        if let Err(e) = self.flow.add_step(Step::new(id, action, args)) {
            self.error = Some(e);
        }
        self
    }

    /// Add an edge between two previously added steps
    pub fn edge(mut self, from: &str, to: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(e) = self.flow.add_edge(from, to) {
            self.error = Some(e);
        }
        self
    }

    /// Finish building, surfacing the first recorded error if any
    pub fn build(self) -> Result<DAGFlow, FlowError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.flow),
        }
    }
}

/// Convenience helper to start a [`FlowBuilder`]
pub fn dag(id: &str) -> FlowBuilder {
    FlowBuilder::new(id)
}
