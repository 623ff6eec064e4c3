//! Per-edge value bookkeeping for one traversal.

use crate::graph::{Edge, InputValues, NodeId, OutputValues};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

/// Values delivered along edges and not yet consumed.
///
/// Ordinary values queue per `(destination, in-port)` and are consumed when
/// the destination runs. Values arriving on constant edges are kept per port
/// and stay available across repeated runs of the destination; a newer
/// delivery replaces the older one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeState {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    queues: BTreeMap<NodeId, BTreeMap<String, VecDeque<Value>>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    constants: BTreeMap<NodeId, BTreeMap<String, Value>>,
}

impl EdgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `outputs` along `edges` (all leaving the same node).
    ///
    /// Wildcard edges forward every value under its own name, control edges
    /// deliver nothing, and `null` values are dropped.
    pub fn wire_outputs<'a>(&mut self, edges: impl IntoIterator<Item = &'a Edge>, outputs: &OutputValues) {
        for edge in edges {
            if edge.is_wildcard() {
                for (port, value) in outputs {
                    self.deliver(&edge.to, port, value, edge.constant);
                }
            } else if !edge.is_control() {
                if let Some(value) = outputs.get(&edge.out_port) {
                    self.deliver(&edge.to, &edge.in_port, value, edge.constant);
                }
            }
        }
    }

    /// Values currently available to `node`: constants first, queued values on top.
    pub fn available_inputs(&self, node: &str) -> InputValues {
        let mut inputs = InputValues::new();
        if let Some(constants) = self.constants.get(node) {
            for (port, value) in constants {
                inputs.insert(port.clone(), value.clone());
            }
        }
        if let Some(queues) = self.queues.get(node) {
            for (port, queue) in queues {
                if let Some(value) = queue.front() {
                    inputs.insert(port.clone(), value.clone());
                }
            }
        }
        inputs
    }

    /// Consume the queued values `node` just ran with.
    pub fn use_inputs(&mut self, node: &str, inputs: &InputValues) {
        let Some(queues) = self.queues.get_mut(node) else {
            return;
        };
        for port in inputs.keys() {
            if let Some(queue) = queues.get_mut(port) {
                queue.pop_front();
                if queue.is_empty() {
                    queues.remove(port);
                }
            }
        }
        if queues.is_empty() {
            self.queues.remove(node);
        }
    }

    /// Number of queued, not yet consumed values.
    pub fn pending(&self) -> usize {
        self.queues
            .values()
            .flat_map(|ports| ports.values())
            .map(VecDeque::len)
            .sum()
    }

    fn deliver(&mut self, to: &str, port: &str, value: &Value, constant: bool) {
        if value.is_null() {
            return;
        }
        if constant {
            self.constants
                .entry(to.to_string())
                .or_default()
                .insert(port.to_string(), value.clone());
        } else {
            self.queues
                .entry(to.to_string())
                .or_default()
                .entry(port.to_string())
                .or_default()
                .push_back(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(value: Value) -> OutputValues {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_named_port_queues_in_order() {
        let mut state = EdgeState::new();
        let edge = Edge::new("a", "x", "b", "y");
        state.wire_outputs([&edge], &outputs(json!({"x": 1, "z": 9})));
        state.wire_outputs([&edge], &outputs(json!({"x": 2})));

        let inputs = state.available_inputs("b");
        assert_eq!(inputs, outputs(json!({"y": 1})));
        state.use_inputs("b", &inputs);
        assert_eq!(state.available_inputs("b"), outputs(json!({"y": 2})));
        state.use_inputs("b", &outputs(json!({"y": 2})));
        assert_eq!(state.pending(), 0);
    }

    #[test]
    fn test_wildcard_and_control() {
        let mut state = EdgeState::new();
        let wildcard = Edge::wildcard("a", "b");
        let control = Edge::control("a", "c");
        state.wire_outputs([&wildcard, &control], &outputs(json!({"p": 1, "q": "two"})));

        assert_eq!(state.available_inputs("b"), outputs(json!({"p": 1, "q": "two"})));
        assert!(state.available_inputs("c").is_empty());
    }

    #[test]
    fn test_constant_survives_consumption_and_is_replaced() {
        let mut state = EdgeState::new();
        let edge = Edge::new("a", "x", "b", "y").constant();
        state.wire_outputs([&edge], &outputs(json!({"x": 1})));

        let inputs = state.available_inputs("b");
        state.use_inputs("b", &inputs);
        assert_eq!(state.available_inputs("b"), outputs(json!({"y": 1})));

        state.wire_outputs([&edge], &outputs(json!({"x": 3})));
        assert_eq!(state.available_inputs("b"), outputs(json!({"y": 3})));
    }

    #[test]
    fn test_null_values_are_not_delivered() {
        let mut state = EdgeState::new();
        let edge = Edge::new("a", "x", "b", "y");
        state.wire_outputs([&edge], &outputs(json!({"x": null})));
        assert_eq!(state.pending(), 0);
    }
}
