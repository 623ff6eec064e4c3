//! # graphrun-core - Graph execution and scheduling
//!
//! Runs directed graphs of typed nodes connected by port-to-port edges.
//! Two complementary engines share one graph model:
//!
//! - **Traversal** - [`Runner`] follows edges one node at a time, the way
//!   values become available. It handles cycles natively, suspends at input
//!   boundaries, and can be snapshotted and resumed at any suspension.
//! - **Staged execution** - [`create_plan`] layers an acyclic graph into
//!   stages of independent nodes; the [`Orchestrator`] tracks each node's
//!   lifecycle over that plan and the [`PlanExecutor`] runs each stage
//!   concurrently. Cycles are first folded into single nodes by
//!   [`condense`] and executed by a [`FoldedInterpreter`].
//!
//! ## Core Concepts
//!
//! ### Graphs
//!
//! A [`GraphDescriptor`] is a plain serde document (JSON or YAML):
//!
//! ```json
//! {
//!   "nodes": [
//!     {"id": "in", "type": "input"},
//!     {"id": "upper", "type": "uppercase"},
//!     {"id": "out", "type": "output"}
//!   ],
//!   "edges": [
//!     {"from": "in", "out": "text", "to": "upper", "in": "text"},
//!     {"from": "upper", "out": "text", "to": "out", "in": "text"}
//!   ]
//! }
//! ```
//!
//! `out: "*"` forwards every output, an empty port name makes an
//! ordering-only control edge, and `constant: true` keeps a value available
//! for every later activation of the destination. Nodes of type `#name`
//! invoke the declared sub-graph `name`.
//!
//! ### Handlers
//!
//! The engine knows only three node types itself: `input`, `output` and
//! sub-graph references. Everything else is dispatched through a
//! [`HandlerRegistry`] keyed by node type.
//!
//! ### Events and paths
//!
//! Every [`RunEvent`] carries a *path*: the invocation ordinal of each open
//! graph activation, from the root down. `[3, 1]` is the first node run by
//! the sub-graph that the root's third node invoked.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graphrun_core::{GraphDescriptor, HandlerOutput, HandlerRegistry, RunConfig, Runner, RunEventKind};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), graphrun_core::GraphError> {
//!     let graph = GraphDescriptor::from_file("graph.json")?;
//!     let mut registry = HandlerRegistry::new();
//!     registry.register("uppercase", |inputs, _ctx| {
//!         Box::pin(async move {
//!             let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or_default();
//!             Ok(HandlerOutput::json(json!({"text": text.to_uppercase()})))
//!         })
//!     });
//!
//!     let mut runner = Runner::new(graph, registry, RunConfig::default());
//!     while let Some(event) = runner.next().await {
//!         match &event.kind {
//!             RunEventKind::Input { .. } => {
//!                 runner.provide_inputs(json!({"text": "hello"}).as_object().cloned().unwrap())?;
//!             }
//!             RunEventKind::Output { outputs, .. } => println!("{:?}", outputs),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`graph`] - graph documents, nodes, edges, validation
//! - [`planner`] - stage planning and cycle condensation
//! - [`traversal`] - the edge-following state machine
//! - [`stack`] - invocation stack and resumable snapshots
//! - [`handler`] - node handlers, kits and the registry
//! - [`run`] - the runner, its events, `run_once`, secret interception
//! - [`orchestrator`] / [`executor`] - staged execution
//! - [`config`] - run limits loaded from YAML or TOML
//! - [`error`] - [`GraphError`]

pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handler;
pub mod orchestrator;
pub mod planner;
pub mod run;
pub mod signal;
pub mod stack;
pub mod traversal;

pub use config::RunConfig;
pub use error::{GraphError, Result};
pub use executor::{ExecutionReport, FoldedInterpreter, PlanExecutor, TraversalInterpreter};
pub use graph::{
    Edge, GraphDescriptor, InputValues, NodeDescriptor, NodeId, NodeKind, NodeMetadata,
    OutputValues,
};
pub use handler::{
    GraphInvocation, HandlerError, HandlerOutput, HandlerRegistry, InputRequestError, Kit,
    NodeHandler, NodeHandlerContext,
};
pub use orchestrator::{
    NodeLifecycleState, Orchestrator, OrchestratorObserver, OrchestratorProgress, Task,
};
pub use planner::{condense, create_plan, Dependency, ExecutionPlan, PlanNodeInfo, Stage};
pub use run::{run_once, run_once_with_config, RunEvent, RunEventKind, Runner, SecretInterceptor};
pub use signal::AbortSignal;
pub use stack::{GraphRef, InvocationStack, StackSnapshot};
pub use traversal::{TraversalMachine, TraversalResult};
