//! Renders a Conflux DAG flow as an Airflow DAG definition in Python
//!
//! Each step becomes a `PythonOperator` whose callable is the shared
//! `run_action` shim on the Airflow workers. Step arguments are embedded as
//! JSON; `$result.<step>` references (including nested field paths such as
//! `$result.fetch.user.name`, which the shim resolves via XCom pulls) travel
//! through unmodified and are resolved worker-side at task runtime.

use conflux_core::{DAGFlow, FlowError};
use serde_json::Value;

/// Airflow dag_id derived from a flow id
///
/// Airflow only accepts alphanumerics, dashes, dots and underscores;
/// anything else becomes an underscore.
pub fn dag_id_for(flow_id: &str) -> String {
    flow_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Python identifier for a task variable
fn task_var(step_id: &str) -> String {
    let mut var = String::from("task_");
    for c in step_id.chars() {
        var.push(if c.is_ascii_alphanumeric() { c } else { '_' });
    }
    var
}

/// Render the complete Python source for a flow's Airflow DAG
///
/// Steps are emitted in topological order and wired with `>>` dependency
/// statements, one per edge.
pub fn render_dag(flow: &DAGFlow) -> Result<String, FlowError> {
    flow.validate()?;
    let graph = conflux_core::DependencyGraph::build(flow);
    let order = graph.toposort();
    if order.len() != flow.steps.len() {
        return Err(FlowError::CycleOrUnreachable(flow.id.0.clone()));
    }

    let dag_id = dag_id_for(&flow.id.0);
    let mut src = String::new();
    src.push_str("from datetime import datetime\n\n");
    src.push_str("from airflow import DAG\n");
    src.push_str("from airflow.operators.python import PythonOperator\n\n");
    src.push_str("from conflux_worker import run_action\n\n");
    src.push_str(&format!(
        "with DAG(\n    dag_id={dag_id:?},\n    description={desc:?},\n    start_date=datetime(2024, 1, 1),\n    schedule=None,\n    catchup=False,\n) as dag:\n",
        dag_id = dag_id,
        desc = format!("Conflux flow {} v{}", flow.id.0, flow.version),
    ));

    for step_id in &order {
        let step = flow
            .step(step_id)
            .ok_or_else(|| FlowError::UnknownStep(step_id.0.clone()))?;
        let args = serde_json::to_string(&Value::Object(step.args.clone()))?;
        src.push_str(&format!(
            "    {var} = PythonOperator(\n        task_id={task_id:?},\n        python_callable=run_action,\n        op_kwargs={{\"action\": {action:?}, \"args\": {args}}},\n    )\n",
            var = task_var(&step_id.0),
            task_id = step_id.0,
            action = step.action,
            args = args,
        ));
    }

    if !flow.edges.is_empty() {
        src.push('\n');
        for (from, to) in &flow.edges {
            src.push_str(&format!(
                "    {} >> {}\n",
                task_var(&from.0),
                task_var(&to.0)
            ));
        }
    }

    Ok(src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conflux_core::dag;
    use serde_json::json;

    #[test]
    fn test_dag_id_sanitization() {
        assert_eq!(dag_id_for("order pipeline #2"), "order_pipeline__2");
        assert_eq!(dag_id_for("etl-v1.2_final"), "etl-v1.2_final");
    }

    #[test]
    fn test_rendered_dag_contains_tasks_and_edges() {
        let flow = dag("order pipeline")
            .step("fetch", "fetch_order", json!({"user": "ada"}))
            .step("total", "sum_items", json!({"order": "$result.fetch"}))
            .edge("fetch", "total")
            .build()
            .unwrap();

        let src = render_dag(&flow).unwrap();
        assert!(src.contains(r#"dag_id="order_pipeline""#));
        assert!(src.contains(r#"task_id="fetch""#));
        assert!(src.contains(r#""action": "sum_items""#));
        // References ship as-is for worker-side resolution.
        assert!(src.contains(r#""order":"$result.fetch""#));
        assert!(src.contains("task_fetch >> task_total"));
        // Upstream tasks are defined before downstream ones.
        assert!(src.find("task_fetch =").unwrap() < src.find("task_total =").unwrap());
    }

    #[test]
    fn test_cyclic_flow_is_rejected() {
        let flow = dag("cyclic")
            .step("a", "noop", json!({}))
            .step("b", "noop", json!({}))
            .edge("a", "b")
            .edge("b", "a")
            .build()
            .unwrap();
        assert!(matches!(
            render_dag(&flow),
            Err(FlowError::CycleOrUnreachable(_))
        ));
    }
}
