//! Error types for planning and running graphs
//!
//! All fallible operations in this crate return [`Result`], an alias over
//! [`GraphError`]. The variants follow how far a failure reaches:
//!
//! ```text
//! GraphError
//! ├── Validation          - malformed graph document (opt-in check)
//! ├── Plan                - cycle that was not folded before planning
//! ├── MissingHandler      - no handler for a node type (terminal)
//! ├── UnknownGraph        - sub-graph reference that does not resolve (terminal)
//! ├── UnhandledNodeError  - `$error` output nobody consumed (terminal)
//! ├── InputTimeout        - input request expired before an answer
//! ├── Cancelled           - abort signal observed
//! ├── Integrity           - inconsistent stack or snapshot (programming error)
//! ├── MaxStepsExceeded    - runaway traversal
//! ├── Orchestration       - illegal lifecycle transition in the static orchestrator
//! ├── Configuration       - bad run configuration
//! ├── Checkpoint          - snapshot persistence failure
//! └── Serialization/Yaml/Io
//! ```
//!
//! Node-level failures never show up here directly: a failing handler is
//! turned into an `$error` output on that node, and only becomes a
//! [`GraphError::UnhandledNodeError`] if the graph has no edge consuming it.
//!
//! ```rust
//! use graphrun_core::error::GraphError;
//!
//! fn describe(err: &GraphError) -> &'static str {
//!     match err {
//!         GraphError::MissingHandler { .. } | GraphError::Integrity(_) => "fatal",
//!         GraphError::UnhandledNodeError { .. } => "node failed",
//!         GraphError::Cancelled => "cancelled",
//!         _ => "other",
//!     }
//! }
//!
//! assert_eq!(describe(&GraphError::Cancelled), "cancelled");
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the planner, the traversal machine and the runner
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph document is structurally invalid
    ///
    /// Only produced by [`GraphDescriptor::validate`](crate::graph::GraphDescriptor::validate)
    /// and document loading; planning and running tolerate dangling edges.
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Dependency layering could not place every node
    ///
    /// The listed nodes sit on (or behind) a cycle that was not folded into
    /// a single node beforehand. Run [`condense`](crate::planner::condense)
    /// first.
    #[error("Unable to plan graph, unresolved cycle through: {}", nodes.join(", "))]
    Plan {
        /// Nodes left unplaced, in declaration order
        nodes: Vec<String>,
    },

    /// No handler registered for a node type
    #[error("No handler for node type '{node_type}' (node '{node}')")]
    MissingHandler { node: String, node_type: String },

    /// A node refers to a sub-graph the document does not declare
    #[error("Node '{node}' refers to unknown graph '{graph}'")]
    UnknownGraph { node: String, graph: String },

    /// A node produced `$error` and no edge consumes it
    #[error("Node '{node}' failed: {}", error_message(.error))]
    UnhandledNodeError {
        node: String,
        /// The `$error` payload as produced by the node
        error: Value,
    },

    /// Input request was not answered before its deadline
    #[error("Input for node '{node}' timed out after {duration_ms}ms")]
    InputTimeout { node: String, duration_ms: u64 },

    /// Run was aborted through its abort signal
    #[error("Run cancelled")]
    Cancelled,

    /// Invocation stack or snapshot is inconsistent
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Traversal exceeded the configured step budget
    #[error("Run exceeded {max_steps} steps")]
    MaxStepsExceeded { max_steps: usize },

    /// Static orchestrator rejected an operation
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] graphrun_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }

    pub fn missing_handler(node: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self::MissingHandler {
            node: node.into(),
            node_type: node_type.into(),
        }
    }

    /// Node the failure is attributed to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::MissingHandler { node, .. }
            | Self::UnknownGraph { node, .. }
            | Self::UnhandledNodeError { node, .. }
            | Self::InputTimeout { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Whether the error ends a run's event sequence.
    ///
    /// `UnhandledNodeError` is terminal for the run but can be turned back into
    /// an `$error` output by [`run_once`](crate::run::run_once), which does the
    /// same for every other non-cancellation failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnhandledNodeError { .. })
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => s.clone(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unhandled_error_message() {
        let err = GraphError::UnhandledNodeError {
            node: "fetch".into(),
            error: json!({"kind": "error", "message": "boom"}),
        };
        assert_eq!(err.to_string(), "Node 'fetch' failed: boom");
        assert!(!err.is_fatal());

        let err = GraphError::UnhandledNodeError {
            node: "fetch".into(),
            error: json!("plain"),
        };
        assert_eq!(err.to_string(), "Node 'fetch' failed: plain");
    }

    #[test]
    fn test_plan_error_lists_nodes() {
        let err = GraphError::Plan {
            nodes: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Unable to plan graph, unresolved cycle through: a, b");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_handler_helper() {
        let err = GraphError::missing_handler("n1", "fetch");
        assert!(matches!(err, GraphError::MissingHandler { ref node_type, .. } if node_type == "fetch"));
    }
}
