//! Events yielded by the runner.

use crate::graph::{InputValues, NodeDescriptor, NodeId, OutputValues};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One observable step of a run, attributed to a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Invocation ordinals from the root frame to the frame that produced the event
    pub path: Vec<usize>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEventKind {
    /// A graph activation opened
    GraphStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        depth: usize,
    },
    /// A graph activation closed
    GraphEnd,
    NodeStart {
        node: NodeDescriptor,
        inputs: InputValues,
    },
    /// Node reached before its required inputs arrived; not run
    Skip {
        node: NodeDescriptor,
        inputs: InputValues,
        missing_inputs: Vec<String>,
    },
    /// The run is suspended until the consumer provides values
    Input {
        node: NodeDescriptor,
        inputs: InputValues,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
        /// Raised by a handler (or a nested graph) rather than an input node
        bubbled: bool,
    },
    /// An output node received values
    Output {
        node: NodeDescriptor,
        outputs: OutputValues,
    },
    NodeEnd {
        node: NodeDescriptor,
        inputs: InputValues,
        outputs: OutputValues,
    },
    /// Terminal failure
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<NodeId>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    /// Terminal marker after cancellation
    Aborted,
    /// Terminal marker after a complete run
    End,
}

impl RunEvent {
    pub fn new(path: Vec<usize>, kind: RunEventKind) -> Self {
        Self {
            path,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Whether no event follows this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            RunEventKind::Error { .. } | RunEventKind::Aborted | RunEventKind::End
        )
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, RunEventKind::Input { .. })
    }

    /// Node the event is about, if any.
    pub fn node_id(&self) -> Option<&str> {
        match &self.kind {
            RunEventKind::NodeStart { node, .. }
            | RunEventKind::Skip { node, .. }
            | RunEventKind::Input { node, .. }
            | RunEventKind::Output { node, .. }
            | RunEventKind::NodeEnd { node, .. } => Some(node.id.as_str()),
            RunEventKind::Error { node, .. } => node.as_deref(),
            _ => None,
        }
    }

    /// Short name of the event kind, as used on the wire.
    pub fn name(&self) -> &'static str {
        match self.kind {
            RunEventKind::GraphStart { .. } => "graphstart",
            RunEventKind::GraphEnd => "graphend",
            RunEventKind::NodeStart { .. } => "nodestart",
            RunEventKind::Skip { .. } => "skip",
            RunEventKind::Input { .. } => "input",
            RunEventKind::Output { .. } => "output",
            RunEventKind::NodeEnd { .. } => "nodeend",
            RunEventKind::Error { .. } => "error",
            RunEventKind::Aborted => "aborted",
            RunEventKind::End => "end",
        }
    }
}
