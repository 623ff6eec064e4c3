//! Stage planning
//!
//! [`create_plan`] turns a graph into an ordered list of [`Stage`]s using a
//! Kahn-style topological layering. Stage *k* holds every node whose
//! dependencies are all placed in stages `0..k`, so mutually independent
//! nodes share a stage and may run concurrently.
//!
//! ```text
//!        ┌──▶ B ──┐
//!   A ───┤        ├──▶ D        stages: [A] [B, C] [D]
//!        └──▶ C ──┘
//! ```
//!
//! Folded nodes (tagged [`FOLDED_TAG`](crate::graph::FOLDED_TAG)) never join
//! a static stage. Each one gets a [`Stage::Folded`] right after the static
//! stage of its layer, because its body is a cycle that needs its own
//! interpreter. Cycles are expected to be folded beforehand with
//! [`condense`]; a cycle that reaches the planner is reported as
//! [`GraphError::Plan`] instead of looping.
//!
//! Tie-breaking follows declaration order, so the plan is deterministic for
//! a given node and edge ordering.

mod condense;

pub use condense::{condense, SCC_PREFIX};

use crate::error::{GraphError, Result};
use crate::graph::{Edge, GraphDescriptor, NodeDescriptor, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One edge as seen from the plan, enough to route values without the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "out")]
    pub out_port: String,
    #[serde(rename = "in")]
    pub in_port: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl From<&Edge> for Dependency {
    fn from(edge: &Edge) -> Self {
        Self {
            from: edge.from.clone(),
            to: edge.to.clone(),
            out_port: edge.out_port.clone(),
            in_port: edge.in_port.clone(),
            optional: edge.optional,
        }
    }
}

/// A planned node with its resolved neighbourhood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNodeInfo {
    pub node: NodeDescriptor,
    pub upstream: Vec<Dependency>,
    pub downstream: Vec<Dependency>,
}

/// Scheduling unit of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Stage {
    /// Independent nodes, runnable in any order or concurrently
    Static { nodes: Vec<PlanNodeInfo> },
    /// A single folded node, executed atomically by a folded interpreter
    Folded { node: PlanNodeInfo },
}

impl Stage {
    pub fn nodes(&self) -> Vec<&PlanNodeInfo> {
        match self {
            Stage::Static { nodes } => nodes.iter().collect(),
            Stage::Folded { node } => vec![node],
        }
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes().into_iter().map(|info| info.node.id.as_str()).collect()
    }

    pub fn is_folded(&self) -> bool {
        matches!(self, Stage::Folded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub stages: Vec<Stage>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Index of the stage holding `id`.
    pub fn stage_of(&self, id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.nodes().iter().any(|info| info.node.id == id))
    }

    pub fn node_ids(&self) -> Vec<Vec<&str>> {
        self.stages.iter().map(Stage::node_ids).collect()
    }
}

/// Plan `graph` into stages.
///
/// Runs in O(V + E). Edges with a missing endpoint are ignored, self-loops
/// count as satisfied, and when node ids repeat the first declaration wins.
pub fn create_plan(graph: &GraphDescriptor) -> Result<ExecutionPlan> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(graph.nodes.len());
    let mut order: Vec<&NodeDescriptor> = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        if !index.contains_key(node.id.as_str()) {
            index.insert(node.id.as_str(), order.len());
            order.push(node);
        } else {
            tracing::trace!(node = %node.id, "duplicate node id ignored by planner");
        }
    }

    let mut upstream: Vec<Vec<Dependency>> = vec![Vec::new(); order.len()];
    let mut downstream: Vec<Vec<Dependency>> = vec![Vec::new(); order.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    let mut in_degree: Vec<usize> = vec![0; order.len()];

    for edge in &graph.edges {
        let (from, to) = match (index.get(edge.from.as_str()), index.get(edge.to.as_str())) {
            (Some(&from), Some(&to)) => (from, to),
            _ => {
                tracing::trace!(from = %edge.from, to = %edge.to, "edge with missing endpoint ignored");
                continue;
            }
        };
        if from == to {
            continue;
        }
        let dependency = Dependency::from(edge);
        upstream[to].push(dependency.clone());
        downstream[from].push(dependency);
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let info = |i: usize, upstream: &mut Vec<Vec<Dependency>>, downstream: &mut Vec<Vec<Dependency>>| {
        PlanNodeInfo {
            node: order[i].clone(),
            upstream: std::mem::take(&mut upstream[i]),
            downstream: std::mem::take(&mut downstream[i]),
        }
    };

    let mut stages = Vec::new();
    let mut placed = 0usize;
    let mut frontier: Vec<usize> = (0..order.len()).filter(|&i| in_degree[i] == 0).collect();

    while !frontier.is_empty() {
        frontier.sort_unstable();
        let mut next = Vec::new();
        for &i in &frontier {
            for &succ in &successors[i] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    next.push(succ);
                }
            }
        }

        let (folded, ordinary): (Vec<usize>, Vec<usize>) =
            frontier.iter().partition(|&&i| order[i].is_folded());
        if !ordinary.is_empty() {
            let nodes = ordinary
                .into_iter()
                .map(|i| info(i, &mut upstream, &mut downstream))
                .collect();
            stages.push(Stage::Static { nodes });
        }
        for i in folded {
            stages.push(Stage::Folded {
                node: info(i, &mut upstream, &mut downstream),
            });
        }

        placed += frontier.len();
        frontier = next;
    }

    if placed < order.len() {
        let nodes: Vec<String> = (0..order.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| order[i].id.clone())
            .collect();
        tracing::debug!(unplaced = nodes.len(), "plan stopped at a cycle");
        return Err(GraphError::Plan { nodes });
    }

    tracing::debug!(stages = stages.len(), nodes = placed, "created execution plan");
    Ok(ExecutionPlan { stages })
}
