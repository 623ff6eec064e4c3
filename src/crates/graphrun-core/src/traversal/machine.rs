use super::state::EdgeState;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, GraphDescriptor, InputValues, NodeDescriptor, OutputValues, ERROR_PORT};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Source id of the synthetic edges that start a traversal at entry nodes
pub const ENTRY_SOURCE: &str = "$entry";

/// One node reached by the traversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalResult {
    pub descriptor: NodeDescriptor,
    /// Node configuration overlaid with values available on its edges
    pub inputs: InputValues,
    /// Required in-ports with no value yet
    pub missing_inputs: Vec<String>,
    /// Edge whose arrival produced this result
    pub current: Edge,
    /// The node must not run now; it is revisited when more values arrive
    pub skip: bool,
    /// Filled in by the caller once the node ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputValues>,
}

/// Everything needed to continue a traversal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub opportunities: VecDeque<Edge>,
    pub edges: EdgeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<TraversalResult>,
}

/// Cursor over one activation of a graph
#[derive(Debug, Clone)]
pub struct TraversalMachine {
    graph: Arc<GraphDescriptor>,
    index: HashMap<String, usize>,
    state: MachineState,
}

impl TraversalMachine {
    /// Start at the graph's entry nodes, in declaration order.
    pub fn new(graph: Arc<GraphDescriptor>) -> Self {
        let opportunities = graph
            .entries()
            .into_iter()
            .map(|node| Edge::control(ENTRY_SOURCE, node.id.clone()))
            .collect();
        Self::from_state(
            graph,
            MachineState {
                opportunities,
                ..MachineState::default()
            },
        )
    }

    /// Continue from a captured state.
    pub fn from_state(graph: Arc<GraphDescriptor>, state: MachineState) -> Self {
        let mut index = HashMap::with_capacity(graph.nodes.len());
        for (i, node) in graph.nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }
        Self { graph, index, state }
    }

    pub fn graph(&self) -> &Arc<GraphDescriptor> {
        &self.graph
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// The result handed out by the last `next_result`, if still open.
    pub fn current(&self) -> Option<&TraversalResult> {
        self.state.current.as_ref()
    }

    /// Record the outputs of the current node.
    pub fn provide_outputs(&mut self, outputs: OutputValues) -> Result<()> {
        match self.state.current.as_mut() {
            Some(current) if !current.skip => {
                current.outputs = Some(outputs);
                Ok(())
            }
            Some(current) => Err(GraphError::integrity(format!(
                "outputs provided for skipped node '{}'",
                current.descriptor.id
            ))),
            None => Err(GraphError::integrity("outputs provided with no current node")),
        }
    }

    /// Settle the current node and move to the next reachable one.
    ///
    /// Returns `Ok(None)` once no edge has anything left to deliver. Fails
    /// with [`GraphError::UnhandledNodeError`] when the node just completed
    /// produced `$error` and has no `$error` edge to route it.
    pub fn next_result(&mut self) -> Result<Option<TraversalResult>> {
        if let Some(mut current) = self.state.current.take() {
            if let Some(outputs) = current.outputs.take() {
                self.complete(&current, outputs)?;
            }
        }

        while let Some(edge) = self.state.opportunities.pop_front() {
            let Some(&position) = self.index.get(&edge.to) else {
                tracing::trace!(from = %edge.from, to = %edge.to, "edge to missing node dropped");
                continue;
            };
            let descriptor = self.graph.nodes[position].clone();

            let mut inputs = descriptor.configuration.clone();
            inputs.extend(self.state.edges.available_inputs(&descriptor.id));
            let missing_inputs = self.missing_inputs(&descriptor, &inputs);

            let result = TraversalResult {
                skip: !missing_inputs.is_empty(),
                descriptor,
                inputs,
                missing_inputs,
                current: edge,
                outputs: None,
            };
            self.state.current = Some(result.clone());
            return Ok(Some(result));
        }
        Ok(None)
    }

    fn missing_inputs(&self, node: &NodeDescriptor, inputs: &InputValues) -> Vec<String> {
        let mut required: Vec<String> = Vec::new();
        for edge in self.graph.incoming(&node.id) {
            if edge.is_required()
                && self.index.contains_key(&edge.from)
                && !required.contains(&edge.in_port)
            {
                required.push(edge.in_port.clone());
            }
        }
        required.retain(|port| !inputs.contains_key(port));
        required
    }

    fn complete(&mut self, result: &TraversalResult, outputs: OutputValues) -> Result<()> {
        let id = &result.descriptor.id;
        self.state.edges.use_inputs(id, &result.inputs);

        let outgoing: Vec<&Edge> = self.graph.outgoing(id).collect();
        if let Some(error) = outputs.get(ERROR_PORT) {
            if !outgoing.iter().any(|e| e.out_port == ERROR_PORT) {
                return Err(GraphError::UnhandledNodeError {
                    node: id.clone(),
                    error: error.clone(),
                });
            }
        }

        self.state.edges.wire_outputs(outgoing.iter().copied(), &outputs);
        for edge in outgoing {
            if edge.out_port.is_empty() || edge.is_wildcard() || outputs.contains_key(&edge.out_port) {
                self.state.opportunities.push_back(edge.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(value: serde_json::Value) -> OutputValues {
        value.as_object().cloned().unwrap()
    }

    fn machine(graph: GraphDescriptor) -> TraversalMachine {
        TraversalMachine::new(Arc::new(graph))
    }

    #[test]
    fn test_walks_chain_and_forwards_values() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_edge(Edge::new("a", "x", "b", "y")),
        );

        let a = m.next_result().unwrap().unwrap();
        assert_eq!(a.descriptor.id, "a");
        assert_eq!(a.current.from, ENTRY_SOURCE);
        assert!(!a.skip);
        m.provide_outputs(values(json!({"x": 5}))).unwrap();

        let b = m.next_result().unwrap().unwrap();
        assert_eq!(b.descriptor.id, "b");
        assert_eq!(b.inputs, values(json!({"y": 5})));
        m.provide_outputs(OutputValues::new()).unwrap();

        assert!(m.next_result().unwrap().is_none());
    }

    #[test]
    fn test_configuration_counts_as_input() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work").with_configuration("z", json!(1)))
                .with_edge(Edge::control("a", "b"))
                .with_edge(Edge::new("a", "x", "b", "z")),
        );
        m.next_result().unwrap();
        m.provide_outputs(OutputValues::new()).unwrap();

        let b = m.next_result().unwrap().unwrap();
        assert!(!b.skip);
        assert_eq!(b.inputs, values(json!({"z": 1})));
    }

    #[test]
    fn test_diamond_skips_until_both_inputs_arrive() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_node(NodeDescriptor::new("c", "work"))
                .with_node(NodeDescriptor::new("d", "work"))
                .with_edge(Edge::new("a", "x", "b", "x"))
                .with_edge(Edge::new("a", "x", "c", "x"))
                .with_edge(Edge::new("b", "x", "d", "left"))
                .with_edge(Edge::new("c", "x", "d", "right")),
        );
        let mut trace = Vec::new();
        while let Some(result) = m.next_result().unwrap() {
            trace.push((result.descriptor.id.clone(), result.skip));
            if !result.skip {
                m.provide_outputs(values(json!({"x": 1}))).unwrap();
            }
        }
        assert_eq!(
            trace,
            vec![
                ("a".into(), false),
                ("b".into(), false),
                ("c".into(), false),
                ("d".into(), true),
                ("d".into(), false),
            ]
        );
    }

    #[test]
    fn test_skipped_node_reports_missing_ports() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_edge(Edge::new("a", "x", "b", "x"))
                .with_edge(Edge::new("a", "y", "b", "y"))
                .with_edge(Edge::new("a", "z", "b", "z").optional()),
        );
        m.next_result().unwrap();
        m.provide_outputs(values(json!({"x": 1}))).unwrap();
        let b = m.next_result().unwrap().unwrap();
        assert!(b.skip);
        assert_eq!(b.missing_inputs, vec!["y".to_string()]);
        assert!(m.provide_outputs(OutputValues::new()).is_err());
    }

    #[test]
    fn test_unhandled_error_is_raised() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_edge(Edge::new("a", "x", "b", "x")),
        );
        m.next_result().unwrap();
        m.provide_outputs(values(json!({"$error": "bad"}))).unwrap();
        match m.next_result() {
            Err(GraphError::UnhandledNodeError { node, error }) => {
                assert_eq!(node, "a");
                assert_eq!(error, json!("bad"));
            }
            other => panic!("expected unhandled error, got {other:?}"),
        }
    }

    #[test]
    fn test_handled_error_is_routed() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("catch", "work"))
                .with_edge(Edge::new("a", "$error", "catch", "error")),
        );
        m.next_result().unwrap();
        m.provide_outputs(values(json!({"$error": {"message": "bad"}}))).unwrap();
        let catch = m.next_result().unwrap().unwrap();
        assert_eq!(catch.descriptor.id, "catch");
        assert_eq!(catch.inputs["error"]["message"], "bad");
    }

    #[test]
    fn test_loop_with_constant_edge() {
        // counter loops on itself through `again`, reading `limit` from a constant edge
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("limit", "work"))
                .with_node(NodeDescriptor::new("counter", "work"))
                .with_edge(Edge::new("limit", "value", "counter", "limit").constant())
                .with_edge(Edge::new("counter", "again", "counter", "n").optional()),
        );
        m.next_result().unwrap();
        m.provide_outputs(values(json!({"value": 3}))).unwrap();

        let mut runs = 0;
        while let Some(result) = m.next_result().unwrap() {
            assert_eq!(result.inputs["limit"], 3);
            runs += 1;
            let n = result.inputs.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            if n + 1 < 3 {
                m.provide_outputs(values(json!({"again": n + 1}))).unwrap();
            } else {
                m.provide_outputs(OutputValues::new()).unwrap();
            }
        }
        assert_eq!(runs, 3);
    }

    #[test]
    fn test_dangling_edges_are_tolerated() {
        let mut m = machine(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_edge(Edge::new("ghost", "x", "b", "x"))
                .with_edge(Edge::new("a", "x", "nowhere", "x"))
                .with_edge(Edge::control("a", "b")),
        );
        let a = m.next_result().unwrap().unwrap();
        assert_eq!(a.descriptor.id, "a");
        m.provide_outputs(values(json!({"x": 1}))).unwrap();
        let b = m.next_result().unwrap().unwrap();
        assert_eq!(b.descriptor.id, "b");
        assert!(!b.skip);
        m.provide_outputs(OutputValues::new()).unwrap();
        assert!(m.next_result().unwrap().is_none());
    }

    #[test]
    fn test_state_round_trip_continues() {
        let graph = Arc::new(
            GraphDescriptor::new()
                .with_node(NodeDescriptor::new("a", "work"))
                .with_node(NodeDescriptor::new("b", "work"))
                .with_edge(Edge::new("a", "x", "b", "x")),
        );
        let mut m = TraversalMachine::new(graph.clone());
        m.next_result().unwrap();
        m.provide_outputs(values(json!({"x": "hi"}))).unwrap();

        let json = serde_json::to_string(m.state()).unwrap();
        let state: MachineState = serde_json::from_str(&json).unwrap();
        let mut resumed = TraversalMachine::from_state(graph, state);
        let b = resumed.next_result().unwrap().unwrap();
        assert_eq!(b.inputs["x"], "hi");
    }
}
