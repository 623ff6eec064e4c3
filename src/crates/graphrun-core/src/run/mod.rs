//! Running graphs
//!
//! ```text
//!            ┌──────────────── Runner ────────────────┐
//!  next() ──▶│ InvocationStack  [root ▸ #sub ▸ inline] │──▶ RunEvent
//!            │ TraversalMachine per frame              │
//!            │ HandlerRegistry ──▶ NodeHandler futures │
//!            └─────────────────────────────────────────┘
//! ```
//!
//! [`Runner`] is the resumable, event-producing cursor. [`run_once`] drives a
//! runner to its first output with every input answered from the provided
//! values, which is how sub-graphs are invoked as plain functions.
//! [`SecretInterceptor`] wraps a registry so secret values never appear in
//! events or snapshots.

mod event;
mod interception;
mod runner;

pub use event::{RunEvent, RunEventKind};
pub use interception::{SecretInterceptor, SECRET_PREFIX};
pub use runner::Runner;

use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::{GraphDescriptor, InputValues, OutputValues, ERROR_PORT};
use crate::handler::{error_outputs, HandlerRegistry};
use std::sync::Arc;

/// Run `graph` until its first output, answering every input with `inputs`.
///
/// Graph-level `args` are merged over `inputs`. Failures during the run
/// (unhandled node errors, missing handlers or graphs, timeouts, the step
/// budget) come back as `{"$error": ...}` instead of an `Err`. Only
/// cancellation and integrity errors propagate. A graph that ends without
/// reaching an output returns no values.
pub async fn run_once(
    graph: impl Into<Arc<GraphDescriptor>>,
    registry: impl Into<Arc<HandlerRegistry>>,
    inputs: InputValues,
) -> Result<OutputValues> {
    run_once_with_config(graph, registry, inputs, RunConfig::default()).await
}

/// [`run_once`] with explicit limits; interactivity is always off.
pub async fn run_once_with_config(
    graph: impl Into<Arc<GraphDescriptor>>,
    registry: impl Into<Arc<HandlerRegistry>>,
    inputs: InputValues,
    config: RunConfig,
) -> Result<OutputValues> {
    let graph = graph.into();
    let args = runner::bind_args(&graph, inputs);
    let config = config
        .with_interactive(false)
        .with_stop_at_first_output(true);
    let mut runner = Runner::new(graph, registry, config);

    while let Some(event) = runner.next().await {
        match event.kind {
            RunEventKind::Input { .. } => runner.provide_inputs(args.clone())?,
            RunEventKind::Output { outputs, .. } => return Ok(outputs),
            _ => {}
        }
    }

    match runner.take_failure() {
        Some(GraphError::UnhandledNodeError { error, .. }) => {
            let mut outputs = OutputValues::new();
            outputs.insert(ERROR_PORT.to_string(), error);
            Ok(outputs)
        }
        Some(error @ (GraphError::Cancelled | GraphError::Integrity(_))) => Err(error),
        Some(error) => {
            let node = error.node().unwrap_or_default().to_string();
            tracing::debug!(node = %node, error = %error, "run failed, returning error outputs");
            Ok(error_outputs(&node, error.to_string()))
        }
        None => Ok(OutputValues::new()),
    }
}
