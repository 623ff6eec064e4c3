//! Graph documents: nodes, edges and declared sub-graphs
//!
//! A [`GraphDescriptor`] is the wire and storage format consumed by the
//! planner and the runner. It is treated as immutable while a run is in
//! progress; editors work on a copy and publish a new revision.
//!
//! ```text
//! nodes:  [{ id, type, configuration, metadata }]
//! edges:  [{ from, out, to, in, constant?, optional? }]
//! graphs: { name: GraphDescriptor }      (one level deep)
//! ```
//!
//! Two port names are special:
//!
//! - [`WILDCARD_PORT`] (`"*"`) as an out-port forwards every output value
//!   under its own name.
//! - [`CONTROL_PORT`] (`""`) carries no value; the edge only orders the
//!   destination after the source.
//!
//! Edges that point at missing nodes are tolerated everywhere except
//! [`GraphDescriptor::validate`], so partially edited graphs still plan and run.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Node identifier, unique within one graph
pub type NodeId = String;

/// Values flowing into a node, keyed by in-port
pub type InputValues = Map<String, Value>;

/// Values produced by a node, keyed by out-port
pub type OutputValues = Map<String, Value>;

pub const WILDCARD_PORT: &str = "*";
pub const CONTROL_PORT: &str = "";
/// Out-port carrying a node failure
pub const ERROR_PORT: &str = "$error";
/// Metadata tag marking a node that stands in for a folded cycle
pub const FOLDED_TAG: &str = "folded";
pub const INPUT_NODE_TYPE: &str = "input";
pub const OUTPUT_NODE_TYPE: &str = "output";
/// Node types starting with this prefix invoke the declared sub-graph of that name
pub const SUBGRAPH_PREFIX: char = '#';

/// Display metadata attached to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// How the runtime has to treat a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Dispatched through the handler registry
    Ordinary,
    /// Opaque stand-in for a strongly-connected component
    Folded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configuration: InputValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NodeMetadata>,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            configuration: Map::new(),
            metadata: None,
        }
    }

    pub fn with_configuration(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(NodeMetadata::default).title = Some(title.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(NodeMetadata::default)
            .tags
            .push(tag.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata
            .as_ref()
            .map(|m| m.tags.iter().any(|t| t == tag))
            .unwrap_or(false)
    }

    pub fn kind(&self) -> NodeKind {
        if self.has_tag(FOLDED_TAG) {
            NodeKind::Folded
        } else {
            NodeKind::Ordinary
        }
    }

    pub fn is_folded(&self) -> bool {
        self.kind() == NodeKind::Folded
    }

    /// Name of the declared sub-graph this node invokes, for `#name` types.
    pub fn subgraph_ref(&self) -> Option<&str> {
        self.node_type
            .strip_prefix(SUBGRAPH_PREFIX)
            .filter(|name| !name.is_empty())
    }
}

/// Directed value binding from `from.out` to `to.in`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(rename = "out", default)]
    pub out_port: String,
    #[serde(rename = "in", default)]
    pub in_port: String,
    /// Value stays available to the destination after it has been consumed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub constant: bool,
    /// Destination may run without a value on this edge
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl Edge {
    pub fn new(
        from: impl Into<NodeId>,
        out_port: impl Into<String>,
        to: impl Into<NodeId>,
        in_port: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            out_port: out_port.into(),
            in_port: in_port.into(),
            constant: false,
            optional: false,
        }
    }

    /// Ordering-only edge
    pub fn control(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self::new(from, CONTROL_PORT, to, CONTROL_PORT)
    }

    /// Edge forwarding every output of `from`
    pub fn wildcard(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self::new(from, WILDCARD_PORT, to, WILDCARD_PORT)
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.out_port == WILDCARD_PORT
    }

    pub fn is_control(&self) -> bool {
        !self.is_wildcard() && (self.out_port.is_empty() || self.in_port.is_empty())
    }

    /// Whether the destination cannot run until this edge delivers.
    pub fn is_required(&self) -> bool {
        !self.optional && !self.is_wildcard() && !self.is_control() && self.in_port != WILDCARD_PORT
    }
}

/// A graph document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Declared sub-graphs, invoked by `#name` node types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphs: Option<BTreeMap<String, GraphDescriptor>>,
    /// Bound arguments; they override caller inputs in `run_once`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<InputValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl GraphDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_subgraph(mut self, name: impl Into<String>, graph: GraphDescriptor) -> Self {
        self.graphs
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), graph);
        self
    }

    pub fn with_args(mut self, args: InputValues) -> Self {
        self.args = Some(args);
        self
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Load a document, picking YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&source),
            _ => Self::from_json_str(&source),
        }
    }

    /// First node declared with `id`.
    pub fn node(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Nodes with no incoming edges, in declaration order.
    ///
    /// Edges coming from undeclared nodes do not count.
    pub fn entries(&self) -> Vec<&NodeDescriptor> {
        let declared: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let targets: HashSet<&str> = self
            .edges
            .iter()
            .filter(|e| declared.contains(e.from.as_str()))
            .map(|e| e.to.as_str())
            .collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .collect()
    }

    pub fn subgraph(&self, name: &str) -> Option<&GraphDescriptor> {
        self.graphs.as_ref().and_then(|g| g.get(name))
    }

    /// Every structural problem in the document, including declared sub-graphs.
    pub fn validation_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        self.collect_issues("", &mut issues);
        if let Some(graphs) = &self.graphs {
            for (name, graph) in graphs {
                if graph.graphs.as_ref().map(|g| !g.is_empty()).unwrap_or(false) {
                    issues.push(format!(
                        "sub-graph '{}' declares nested sub-graphs, only one level is allowed",
                        name
                    ));
                }
                graph.collect_issues(&format!("sub-graph '{}': ", name), &mut issues);
            }
        }
        for node in &self.nodes {
            if let Some(name) = node.subgraph_ref() {
                if self.subgraph(name).is_none() {
                    issues.push(format!("node '{}' invokes undeclared graph '{}'", node.id, name));
                }
            }
        }
        issues
    }

    /// Fail with [`GraphError::Validation`] if the document has any issue.
    pub fn validate(&self) -> Result<()> {
        let issues = self.validation_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(GraphError::validation(issues.join("; ")))
        }
    }

    fn collect_issues(&self, prefix: &str, issues: &mut Vec<String>) {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                issues.push(format!("{}duplicate node id '{}'", prefix, node.id));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint.as_str()) {
                    issues.push(format!(
                        "{}edge {} -> {} references missing node '{}'",
                        prefix, edge.from, edge.to, endpoint
                    ));
                }
            }
        }
    }
}
