use crate::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A state in a [`StateMachine`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct State {
    /// Unique id of the state within its machine
    pub id: String,

    /// Optional action invoked when an event is processed in this state
    #[serde(default)]
    pub action: Option<String>,

    /// Event-triggered transitions: event name to next state id
    #[serde(default)]
    pub on: HashMap<String, String>,
}

impl State {
    /// Create a state with no action and no transitions
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: None,
            on: HashMap::new(),
        }
    }

    /// Set the action invoked while in this state
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Add an event-triggered transition
    pub fn on(mut self, event: impl Into<String>, next: impl Into<String>) -> Self {
        self.on.insert(event.into(), next.into());
        self
    }
}

/// An event-driven state machine workflow description
///
/// Built once, then driven by a sequence of external events. Traversal stops
/// when the current state has no transition for the incoming event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateMachine {
    /// Id of the state machine
    pub id: String,

    /// The machine version
    #[serde(default = "default_version")]
    pub version: String,

    /// Id of the state traversal begins in
    #[serde(default)]
    pub start_state: Option<String>,

    /// The states, in insertion order
    #[serde(default)]
    pub states: Vec<State>,
}

impl StateMachine {
    /// Create an empty state machine
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: default_version(),
            start_state: None,
            states: Vec::new(),
        }
    }

    /// Add a state; the first added state becomes the start state unless
    /// one was set explicitly
    pub fn add_state(&mut self, state: State) -> Result<(), FlowError> {
        if self.states.iter().any(|s| s.id == state.id) {
            return Err(FlowError::DuplicateStep(state.id));
        }
        if self.start_state.is_none() {
            self.start_state = Some(state.id.clone());
        }
        self.states.push(state);
        Ok(())
    }

    /// Override the start state
    pub fn set_start_state(&mut self, id: impl Into<String>) -> Result<(), FlowError> {
        let id = id.into();
        if !self.states.iter().any(|s| s.id == id) {
            return Err(FlowError::UnknownState(id));
        }
        self.start_state = Some(id);
        Ok(())
    }

    /// Look up a state by id
    pub fn state(&self, id: &str) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    /// Serialize the machine to JSON
    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize a machine from JSON
    pub fn from_json(s: &str) -> Result<Self, FlowError> {
        Ok(serde_json::from_str(s)?)
    }
}
