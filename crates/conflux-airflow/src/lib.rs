//! Airflow adapter for Conflux
//!
//! Translates Conflux DAG flows into Apache Airflow DAGs and drives their
//! execution through the Airflow stable REST API. The adapter renders a
//! Python DAG file into the scheduler's dags folder, triggers a dag run,
//! polls it to completion, and collects task results from XCom.
//!
//! Actions are addressed by their registry names; the Airflow workers are
//! expected to carry a `conflux_worker.run_action` callable that dispatches
//! those names to real implementations and resolves `$result` references
//! (including nested field paths) from upstream XCom values.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codegen;
pub mod executor;

pub use codegen::{dag_id_for, render_dag};
pub use executor::AirflowExecutor;
