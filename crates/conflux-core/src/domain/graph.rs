//! Dependency resolution for DAG flows
//!
//! Kahn's algorithm split into the two shapes executors need: a full
//! topological sort for upfront fail-closed validation, and an incremental
//! in-degree tracker that releases dependents one completion at a time.

use super::flow::{DAGFlow, StepId};
use std::collections::HashMap;

/// In-degree/successor view of a flow's edge relation
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    indegree: HashMap<StepId, usize>,
    successors: HashMap<StepId, Vec<StepId>>,
    total: usize,
    completed: usize,
}

impl DependencyGraph {
    /// Build the graph from a flow's steps and edges
    pub fn build(flow: &DAGFlow) -> Self {
        let mut indegree: HashMap<StepId, usize> = HashMap::with_capacity(flow.steps.len());
        let mut successors: HashMap<StepId, Vec<StepId>> =
            HashMap::with_capacity(flow.steps.len());
        for step in &flow.steps {
            indegree.insert(step.id.clone(), 0);
            successors.insert(step.id.clone(), Vec::new());
        }
        for (from, to) in &flow.edges {
            if let Some(succs) = successors.get_mut(from) {
                succs.push(to.clone());
            }
            if let Some(deg) = indegree.get_mut(to) {
                *deg += 1;
            }
        }
        Self {
            total: flow.steps.len(),
            indegree,
            successors,
            completed: 0,
        }
    }

    /// Steps with no unfinished predecessors, in flow insertion order
    pub fn initial_ready(&self, flow: &DAGFlow) -> Vec<StepId> {
        flow.steps
            .iter()
            .filter(|s| self.indegree.get(&s.id) == Some(&0))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Record a completion and return the dependents that just became ready
    pub fn mark_complete(&mut self, id: &StepId) -> Vec<StepId> {
        self.completed += 1;
        let mut newly_ready = Vec::new();
        if let Some(succs) = self.successors.get(id) {
            for succ in succs.clone() {
                if let Some(deg) = self.indegree.get_mut(&succ) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        newly_ready.push(succ);
                    }
                }
            }
        }
        newly_ready
    }

    /// Total number of steps in the flow
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether every step has been recorded complete
    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }

    /// Full Kahn topological sort
    ///
    /// Returns fewer ids than `total()` when the edge relation contains a
    /// cycle; callers treat that as a fail-closed graph error.
    pub fn toposort(&self) -> Vec<StepId> {
        let mut indegree = self.indegree.clone();
        let mut queue: Vec<StepId> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        queue.sort();

        let mut order = Vec::with_capacity(self.total);
        while let Some(id) = queue.pop() {
            if let Some(succs) = self.successors.get(&id) {
                for succ in succs {
                    if let Some(deg) = indegree.get_mut(succ) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push(succ.clone());
                        }
                    }
                }
            }
            order.push(id);
        }
        order
    }
}
