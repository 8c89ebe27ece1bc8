//! In-memory state store for Conflux
//!
//! Implements the repository interfaces from conflux-core on top of plain
//! in-process maps. Useful for development, tests, and single-process
//! deployments where durable persistence is not required: state survives
//! for the life of the process and no further.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod repositories;

pub use repositories::{InMemoryFlowStore, InMemoryRunRepository};
