//! Invocation stack
//!
//! Every open graph activation (the root run plus any nested sub-graph run
//! still in progress) owns one [`Frame`]. A frame counts the traversal
//! results it has produced; the list of those counters from root to top is
//! the *path* that tags every run event.
//!
//! ```text
//! frames[0]  root        invocation 4   node "summarize"
//! frames[1]  #scc_0      invocation 2   node "ask"        path = [4, 2]
//! ```
//!
//! Frames are identified by position only. [`InvocationStack::state`]
//! captures a [`StackSnapshot`] that can be stored, moved to another
//! process, and turned back into an equivalent stack with
//! [`InvocationStack::from_snapshot`]; the rebuilt stack produces the same
//! paths the original would have.

use crate::error::{GraphError, Result};
use crate::graph::{GraphDescriptor, InputValues, NodeId};
use crate::traversal::{MachineState, TraversalResult};
use serde::{Deserialize, Serialize};

/// Which graph a frame is running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GraphRef {
    /// The graph the runner was started with
    Root,
    /// A sub-graph declared in the root graph's `graphs` map
    Declared { name: String },
    /// A graph handed over by a handler at run time
    Inline { graph: Box<GraphDescriptor> },
}

/// One activation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub graph: GraphRef,
    /// Node currently executing in this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Ordinal of the latest traversal result in this frame, 0 before the first
    pub invocation: usize,
    /// Traversal state captured when `node` started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineState>,
    /// Arguments the frame was invoked with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<InputValues>,
}

impl Frame {
    pub fn new(graph: GraphRef, args: Option<InputValues>) -> Self {
        Self {
            graph,
            node: None,
            invocation: 0,
            machine: None,
            args,
        }
    }
}

/// Serializable copy of all open frames, root first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSnapshot {
    pub frames: Vec<Frame>,
}

impl StackSnapshot {
    pub fn path(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.invocation).collect()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Check the nesting rules a resumable snapshot has to follow.
    ///
    /// Only the root frame may use [`GraphRef::Root`], every frame must carry
    /// its traversal state, and every frame below the top must be executing
    /// the node that opened the frame above it.
    pub fn check(&self) -> Result<()> {
        if self.frames.is_empty() {
            return Err(GraphError::integrity("snapshot has no frames"));
        }
        for (depth, frame) in self.frames.iter().enumerate() {
            let is_root_ref = matches!(frame.graph, GraphRef::Root);
            if (depth == 0) != is_root_ref {
                return Err(GraphError::integrity(format!(
                    "frame {} has graph reference {:?}",
                    depth, frame.graph
                )));
            }
            let machine = frame.machine.as_ref().ok_or_else(|| {
                GraphError::integrity(format!("frame {} has no traversal state", depth))
            })?;
            let Some(node) = frame.node.as_ref() else {
                return Err(GraphError::integrity(format!("frame {} is not executing a node", depth)));
            };
            let current = machine.current.as_ref().map(|c| &c.descriptor.id);
            if current != Some(node) {
                return Err(GraphError::integrity(format!(
                    "frame {} runs '{}' but its traversal state is at {:?}",
                    depth, node, current
                )));
            }
            if frame.invocation == 0 {
                return Err(GraphError::integrity(format!(
                    "frame {} executes '{}' before any invocation",
                    depth, node
                )));
            }
        }
        Ok(())
    }
}

/// Explicit stack of open frames
#[derive(Debug, Clone, Default)]
pub struct InvocationStack {
    frames: Vec<Frame>,
}

impl InvocationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a stack from a snapshot, rejecting inconsistent nesting.
    pub fn from_snapshot(snapshot: StackSnapshot) -> Result<Self> {
        snapshot.check()?;
        Ok(Self {
            frames: snapshot.frames,
        })
    }

    /// Open a frame for a graph activation.
    pub fn on_graph_start(&mut self, graph: GraphRef, args: Option<InputValues>) {
        self.frames.push(Frame::new(graph, args));
    }

    /// Count one more traversal result in the top frame and return its ordinal.
    pub fn next_invocation(&mut self) -> Result<usize> {
        let top = self.top_mut()?;
        top.invocation += 1;
        Ok(top.invocation)
    }

    /// Record the node the top frame starts executing.
    pub fn on_node_start(&mut self, result: &TraversalResult, machine: MachineState) -> Result<()> {
        let top = self.top_mut()?;
        top.node = Some(result.descriptor.id.clone());
        top.machine = Some(machine);
        Ok(())
    }

    pub fn on_node_end(&mut self) -> Result<()> {
        let top = self.top_mut()?;
        top.node = None;
        top.machine = None;
        Ok(())
    }

    /// Close the top frame.
    pub fn on_graph_end(&mut self) -> Result<Frame> {
        self.frames
            .pop()
            .ok_or_else(|| GraphError::integrity("graph ended with no open frame"))
    }

    pub fn state(&self) -> StackSnapshot {
        StackSnapshot {
            frames: self.frames.clone(),
        }
    }

    /// Invocation ordinals from root to top.
    pub fn path(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.invocation).collect()
    }

    /// Path of the frame below the top, used for graph start and end events.
    pub fn parent_path(&self) -> Vec<usize> {
        let mut path = self.path();
        path.pop();
        path
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn top_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| GraphError::integrity("no open frame"))
    }
}
