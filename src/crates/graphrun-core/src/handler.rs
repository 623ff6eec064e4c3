//! Node handlers and the registry the runner dispatches through
//!
//! The runner does not know what a node computes. For every node that is not
//! an input, output or sub-graph node it looks up a [`NodeHandler`] by the
//! node's type in a [`HandlerRegistry`] and awaits it. Registries are plain
//! values passed into the runner; there is no global registration.
//!
//! ```rust,ignore
//! use graphrun_core::handler::{HandlerOutput, HandlerRegistry};
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("uppercase", |inputs, _ctx| {
//!     Box::pin(async move {
//!         let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or_default();
//!         Ok(HandlerOutput::json(json!({"text": text.to_uppercase()})))
//!     })
//! });
//! ```
//!
//! A handler that needs more input than its edges deliver can ask for it
//! with [`NodeHandlerContext::request_input`]. The runner surfaces the
//! request as a *bubbled* input event and suspends until the consumer
//! answers, exactly like an input node.

use crate::graph::{GraphDescriptor, InputValues, NodeDescriptor, NodeId, OutputValues, ERROR_PORT};
use crate::signal::AbortSignal;
use crate::stack::StackSnapshot;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Boxed future returned by handlers
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = std::result::Result<HandlerOutput, HandlerError>> + Send>>;

/// What a handler hands back to the runner
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    /// The node's output values
    Values(OutputValues),
    /// Run another graph nested under this node; its first output becomes
    /// this node's output
    Invoke(GraphInvocation),
}

impl HandlerOutput {
    /// Outputs from a JSON value: objects are used as-is, `null` means no
    /// outputs, anything else is returned under `value`.
    pub fn json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Values(map),
            Value::Null => Self::Values(OutputValues::new()),
            other => {
                let mut map = OutputValues::new();
                map.insert("value".into(), other);
                Self::Values(map)
            }
        }
    }
}

impl From<OutputValues> for HandlerOutput {
    fn from(values: OutputValues) -> Self {
        Self::Values(values)
    }
}

/// A graph to run nested under the invoking node
#[derive(Debug, Clone, PartialEq)]
pub struct GraphInvocation {
    pub graph: GraphDescriptor,
    pub inputs: InputValues,
}

/// Why a bubbled input request did not produce values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputRequestError {
    #[error("no consumer can answer input requests for node '{node}'")]
    NoHandler { node: NodeId },

    #[error("input request for node '{node}' timed out after {duration_ms}ms")]
    Timeout { node: NodeId, duration_ms: u64 },

    #[error("input request for node '{node}' was not answered")]
    Unanswered { node: NodeId },

    #[error("run was cancelled while node '{node}' waited for input")]
    Cancelled { node: NodeId },
}

/// Failure of a handler invocation
///
/// Never aborts the run by itself: the runner converts it into an `$error`
/// output on the failing node.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid input '{port}': {reason}")]
    InvalidInput { port: String, reason: String },

    #[error(transparent)]
    Input(#[from] InputRequestError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_input(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            port: port.into(),
            reason: reason.into(),
        }
    }
}

/// Outputs marking `node` as failed with `message`.
pub fn error_outputs(node: &str, message: impl Into<String>) -> OutputValues {
    let mut outputs = OutputValues::new();
    outputs.insert(
        ERROR_PORT.to_string(),
        json!({"kind": "error", "message": message.into(), "node": node}),
    );
    outputs
}

/// Whether outputs carry an error marker.
pub fn is_error(outputs: &OutputValues) -> bool {
    outputs.contains_key(ERROR_PORT)
}

/// Executes nodes of one type
pub trait NodeHandler: Send + Sync {
    fn invoke(&self, inputs: InputValues, context: NodeHandlerContext) -> HandlerFuture;
}

impl<F> NodeHandler for F
where
    F: Fn(InputValues, NodeHandlerContext) -> HandlerFuture + Send + Sync,
{
    fn invoke(&self, inputs: InputValues, context: NodeHandlerContext) -> HandlerFuture {
        self(inputs, context)
    }
}

/// Input request travelling from a handler to the runner
pub(crate) struct InputRequest {
    pub schema: Value,
    pub reply: oneshot::Sender<std::result::Result<InputValues, InputRequestError>>,
}

/// Everything a handler may look at while it runs
#[derive(Clone)]
pub struct NodeHandlerContext {
    pub descriptor: NodeDescriptor,
    /// Graph the node belongs to
    pub graph: Arc<GraphDescriptor>,
    /// Path of this invocation
    pub path: Vec<usize>,
    /// Invocation stack at dispatch time
    pub stack: StackSnapshot,
    /// Registry the node was dispatched from, for handlers composing others
    pub registry: Arc<HandlerRegistry>,
    pub signal: AbortSignal,
    requests: Option<mpsc::UnboundedSender<InputRequest>>,
}

impl NodeHandlerContext {
    /// Context with no interactive consumer; input requests fail immediately.
    pub fn detached(
        descriptor: NodeDescriptor,
        graph: Arc<GraphDescriptor>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            descriptor,
            graph,
            path: Vec::new(),
            stack: StackSnapshot::default(),
            registry,
            signal: AbortSignal::new(),
            requests: None,
        }
    }

    pub(crate) fn with_requests(mut self, requests: mpsc::UnboundedSender<InputRequest>) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn with_path(mut self, path: Vec<usize>, stack: StackSnapshot) -> Self {
        self.path = path;
        self.stack = stack;
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Ask the consumer for values described by `schema` (bubbled input).
    pub async fn request_input(
        &self,
        schema: Value,
    ) -> std::result::Result<InputValues, InputRequestError> {
        let node = self.descriptor.id.clone();
        let Some(requests) = &self.requests else {
            return Err(InputRequestError::NoHandler { node });
        };
        let (reply, answer) = oneshot::channel();
        requests
            .send(InputRequest { schema, reply })
            .map_err(|_| InputRequestError::NoHandler { node: node.clone() })?;
        answer
            .await
            .map_err(|_| InputRequestError::Unanswered { node })?
    }
}

impl fmt::Debug for NodeHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandlerContext")
            .field("node", &self.descriptor.id)
            .field("path", &self.path)
            .field("interactive", &self.requests.is_some())
            .finish()
    }
}

/// Named group of handlers registered together
#[derive(Clone, Default)]
pub struct Kit {
    pub name: String,
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl Kit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler<F>(mut self, node_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(InputValues, NodeHandlerContext) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(node_type.into(), Arc::new(handler));
        self
    }
}

/// Node type to handler mapping handed to a runner
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    kits: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure handler; replaces an earlier handler of the same type.
    pub fn register<F>(&mut self, node_type: impl Into<String>, handler: F)
    where
        F: Fn(InputValues, NodeHandlerContext) -> HandlerFuture + Send + Sync + 'static,
    {
        self.handlers.insert(node_type.into(), Arc::new(handler));
    }

    pub fn register_handler(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Add every handler of `kit`; later kits override earlier ones.
    pub fn add_kit(&mut self, kit: Kit) {
        self.handlers.extend(kit.handlers);
        self.kits.push(kit.name);
    }

    pub fn with_kit(mut self, kit: Kit) -> Self {
        self.add_kit(kit);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// Registered node types, sorted
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Names of the kits added so far, in order
    pub fn kits(&self) -> &[String] {
        &self.kits
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn NodeHandler>)> {
        self.handlers.iter().map(|(t, h)| (t.as_str(), h))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .field("kits", &self.kits)
            .finish()
    }
}
