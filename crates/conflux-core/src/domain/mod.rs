//! Domain layer: flow descriptions, dependency resolution, run records,
//! and persistence contracts.

/// DAG flow model and fluent builder
pub mod flow;

/// Dependency resolution (Kahn's algorithm)
pub mod graph;

/// Repository traits and in-memory test implementations
pub mod repository;

/// Orchestrator-level run records
pub mod run;

/// Event-driven state machine model
pub mod state_machine;
