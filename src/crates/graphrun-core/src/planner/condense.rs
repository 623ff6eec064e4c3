//! Cycle folding
//!
//! [`condense`] replaces every strongly-connected component of a graph with
//! a single folded node whose body becomes a declared sub-graph. After
//! condensation the top-level graph is acyclic and can be planned; the body
//! is run by a traversal frame, which handles the cycle one step at a time.
//!
//! ```text
//!   in ─▶ a ⇄ b ─▶ out         in ─▶ scc_0 ─▶ out
//!                       ==>
//!                              graphs.scc_0: input ─▶ a ⇄ b ─▶ output
//! ```

use crate::graph::{
    Edge, GraphDescriptor, NodeDescriptor, NodeMetadata, FOLDED_TAG, INPUT_NODE_TYPE,
    OUTPUT_NODE_TYPE, SUBGRAPH_PREFIX,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Id prefix of folded component nodes
pub const SCC_PREFIX: &str = "scc_";

const UNVISITED: usize = usize::MAX;

/// Fold each strongly-connected component of `graph` into one node.
///
/// Components are numbered in the declaration order of their first member.
/// A node with a self-loop is a component on its own. When the graph has no
/// cycle it is returned unchanged.
pub fn condense(graph: &GraphDescriptor) -> GraphDescriptor {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, node) in graph.nodes.iter().enumerate() {
        index.entry(node.id.as_str()).or_insert(i);
    }

    let mut adjacency = vec![Vec::new(); graph.nodes.len()];
    for edge in &graph.edges {
        if let (Some(&from), Some(&to)) = (index.get(edge.from.as_str()), index.get(edge.to.as_str())) {
            adjacency[from].push(to);
        }
    }

    let mut components: Vec<Vec<usize>> = strongly_connected(&adjacency)
        .into_iter()
        .filter(|c| c.len() > 1 || adjacency[c[0]].contains(&c[0]))
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    if components.is_empty() {
        return graph.clone();
    }
    components.sort_unstable_by_key(|c| c[0]);

    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (k, component) in components.iter().enumerate() {
        for &member in component {
            owner.insert(graph.nodes[member].id.as_str(), k);
        }
    }
    let names: Vec<String> = (0..components.len()).map(|k| format!("{SCC_PREFIX}{k}")).collect();

    // Boundary node ids of each body, renamed away from member ids.
    let boundaries: Vec<(String, String)> = components
        .iter()
        .map(|component| {
            let taken: HashSet<&str> = component.iter().map(|&m| graph.nodes[m].id.as_str()).collect();
            (unused_id("input", &taken), unused_id("output", &taken))
        })
        .collect();

    let mut bodies: Vec<GraphDescriptor> = components
        .iter()
        .zip(&names)
        .zip(&boundaries)
        .map(|((component, name), (input, output))| {
            let mut body = GraphDescriptor::new().with_title(format!("SCC {name}"));
            body.description = Some(format!(
                "Body of the strongly connected component folded into \"{name}\""
            ));
            body.nodes.push(NodeDescriptor::new(input.clone(), INPUT_NODE_TYPE));
            body.nodes
                .extend(component.iter().map(|&m| graph.nodes[m].clone()));
            body.nodes.push(NodeDescriptor::new(output.clone(), OUTPUT_NODE_TYPE));
            body
        })
        .collect();

    let mut edges = Vec::with_capacity(graph.edges.len());
    let mut seen_outer = HashSet::new();
    let mut seen_inner: Vec<HashSet<Edge>> = vec![HashSet::new(); components.len()];
    let mut push_inner = |k: usize, edge: Edge, bodies: &mut Vec<GraphDescriptor>| {
        if seen_inner[k].insert(edge.clone()) {
            bodies[k].edges.push(edge);
        }
    };

    for edge in &graph.edges {
        let source = owner.get(edge.from.as_str()).copied();
        let target = owner.get(edge.to.as_str()).copied();
        match (source, target) {
            (Some(s), Some(t)) if s == t => {
                push_inner(s, edge.clone(), &mut bodies);
                continue;
            }
            (None, None) => {
                edges.push(edge.clone());
                continue;
            }
            _ => {}
        }

        let mut outer = edge.clone();
        if let Some(s) = source {
            outer.from = names[s].clone();
            let mut inner = Edge::new(
                edge.from.clone(),
                edge.out_port.clone(),
                boundaries[s].1.clone(),
                edge.out_port.clone(),
            );
            inner.optional = edge.optional;
            push_inner(s, inner, &mut bodies);
        }
        if let Some(t) = target {
            outer.to = names[t].clone();
            let mut inner = Edge::new(
                boundaries[t].0.clone(),
                edge.in_port.clone(),
                edge.to.clone(),
                edge.in_port.clone(),
            );
            inner.constant = edge.constant;
            inner.optional = edge.optional;
            push_inner(t, inner, &mut bodies);
        }
        if seen_outer.insert(outer.clone()) {
            edges.push(outer);
        }
    }

    let mut nodes = Vec::with_capacity(graph.nodes.len());
    let mut emitted = vec![false; components.len()];
    for node in &graph.nodes {
        match owner.get(node.id.as_str()) {
            None => nodes.push(node.clone()),
            Some(&k) if !emitted[k] => {
                emitted[k] = true;
                nodes.push(folded_node(&names[k]));
            }
            Some(_) => {}
        }
    }

    let mut graphs = graph.graphs.clone().unwrap_or_else(BTreeMap::new);
    for (name, body) in names.iter().zip(bodies) {
        graphs.insert(name.clone(), body);
    }

    tracing::debug!(components = names.len(), "folded strongly connected components");
    GraphDescriptor {
        nodes,
        edges,
        graphs: Some(graphs),
        ..graph.clone()
    }
}

fn folded_node(name: &str) -> NodeDescriptor {
    let mut node = NodeDescriptor::new(name, format!("{SUBGRAPH_PREFIX}{name}"));
    node.metadata = Some(NodeMetadata {
        title: Some(format!("Subgraph \"{name}\"")),
        description: None,
        tags: vec![FOLDED_TAG.to_string()],
    });
    node
}

/// Tarjan's algorithm with an explicit call stack.
fn strongly_connected(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut call: Vec<(usize, usize)> = Vec::new();
    let mut next = 0;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if frame.1 < adjacency[v].len() {
                let w = adjacency[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

fn unused_id(base: &str, taken: &HashSet<&str>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|id| !taken.contains(id.as_str()))
        .unwrap_or_else(|| base.to_string())
}
