//! Dependency graph over a freshly decomposed batch of subtasks.
//!
//! The decomposer receives sibling dependencies as zero-based indices from an
//! untrusted model response. `SubtaskGraph` turns them into a DAG, dropping
//! any edge that is a self reference, points outside the batch, or would
//! close a cycle. The graph only lives for the duration of one decomposition;
//! afterwards dependencies exist solely as declarations in task bodies.

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Why an edge from the model output was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    SelfReference,
    OutOfRange,
    Cycle,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::SelfReference => write!(f, "self reference"),
            DropReason::OutOfRange => write!(f, "index out of range"),
            DropReason::Cycle => write!(f, "would create a cycle"),
        }
    }
}

/// A discarded `depends_on` entry: subtask `task` declared `depends_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedEdge {
    pub task: usize,
    pub depends_on: i64,
    pub reason: DropReason,
}

/// Validated dependency graph. Edge `a -> b` means `b` depends on `a`.
pub struct SubtaskGraph {
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
    dropped: Vec<DroppedEdge>,
}

impl SubtaskGraph {
    /// Build from per-subtask dependency lists, in subtask order.
    pub fn build(depends_on: &[Vec<i64>]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..depends_on.len()).map(|i| graph.add_node(i)).collect();
        let mut dropped = Vec::new();

        for (task, deps) in depends_on.iter().enumerate() {
            for &dep in deps {
                let reason = match usize::try_from(dep) {
                    Ok(d) if d == task => Some(DropReason::SelfReference),
                    Ok(d) if d < nodes.len() => None,
                    _ => Some(DropReason::OutOfRange),
                };
                if let Some(reason) = reason {
                    dropped.push(DroppedEdge {
                        task,
                        depends_on: dep,
                        reason,
                    });
                    continue;
                }

                let from = nodes[dep as usize];
                let to = nodes[task];
                if graph.find_edge(from, to).is_some() {
                    continue;
                }

                let edge = graph.add_edge(from, to, ());
                if is_cyclic_directed(&graph) {
                    graph.remove_edge(edge);
                    dropped.push(DroppedEdge {
                        task,
                        depends_on: dep,
                        reason: DropReason::Cycle,
                    });
                }
            }
        }

        Self {
            graph,
            nodes,
            dropped,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dropped(&self) -> &[DroppedEdge] {
        &self.dropped
    }

    /// Sibling indices `task` depends on, ascending.
    pub fn dependencies(&self, task: usize) -> Vec<usize> {
        let Some(&node) = self.nodes.get(task) else {
            return Vec::new();
        };
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Subtasks with no dependencies; these are ready immediately.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.dependencies(i).is_empty())
            .collect()
    }

    /// A dependency-respecting order of subtask indices.
    pub fn topological_order(&self) -> Vec<usize> {
        match toposort(&self.graph, None) {
            Ok(order) => order
                .into_iter()
                .filter_map(|n| self.graph.node_weight(n).copied())
                .collect(),
            Err(_) => (0..self.len()).collect(),
        }
    }
}
