//! Plan-driven execution
//!
//! [`PlanExecutor`] runs a graph stage by stage on top of an
//! [`Orchestrator`]: every ready node of a static stage is started at once
//! and their results are handed to the orchestrator only after the whole
//! stage has returned, so nodes of one stage never observe each other.
//! A folded stage holds a single node whose body is a cycle; it is handed
//! to a [`FoldedInterpreter`], by default [`TraversalInterpreter`], which
//! runs the body with the traversal [`Runner`](crate::run::Runner).
//!
//! ```text
//!   stage 0: [input]            ──▶ join_all ──▶ provide_outputs
//!   stage 1: [fetch, parse]     ──▶ join_all ──▶ provide_outputs
//!   stage 2: folded scc_0       ──▶ interpreter
//!   stage 3: [output]
//! ```

use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::{
    GraphDescriptor, InputValues, NodeId, OutputValues, INPUT_NODE_TYPE, OUTPUT_NODE_TYPE,
};
use crate::handler::{error_outputs, HandlerOutput, HandlerRegistry, NodeHandlerContext};
use crate::orchestrator::{NodeLifecycleState, Orchestrator, OrchestratorProgress, Task};
use crate::planner::create_plan;
use crate::run::run_once_with_config;
use crate::signal::AbortSignal;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Executes the body of a folded node
#[async_trait]
pub trait FoldedInterpreter: Send + Sync {
    async fn interpret(
        &self,
        graph: &GraphDescriptor,
        task: Task,
        registry: Arc<HandlerRegistry>,
    ) -> Result<OutputValues>;
}

/// Runs a folded body to its first output with the traversal runner
#[derive(Debug, Clone, Default)]
pub struct TraversalInterpreter {
    config: RunConfig,
}

impl TraversalInterpreter {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FoldedInterpreter for TraversalInterpreter {
    async fn interpret(
        &self,
        graph: &GraphDescriptor,
        task: Task,
        registry: Arc<HandlerRegistry>,
    ) -> Result<OutputValues> {
        let name = task
            .node
            .subgraph_ref()
            .map(str::to_string)
            .unwrap_or_else(|| task.node.id.clone());
        let body = graph.subgraph(&name).ok_or_else(|| GraphError::UnknownGraph {
            node: task.node.id.clone(),
            graph: name.clone(),
        })?;
        tracing::debug!(node = %task.node.id, graph = %name, "interpreting folded node");
        run_once_with_config(
            with_declared(body, graph),
            registry,
            task.inputs,
            self.config.clone(),
        )
        .await
    }
}

/// What a plan execution produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Values reaching output nodes, in completion order
    pub outputs: Vec<OutputValues>,
    /// Outputs of every node that ran
    pub node_outputs: BTreeMap<NodeId, OutputValues>,
    /// Final lifecycle state of every node, in plan order
    pub states: Vec<(NodeId, NodeLifecycleState)>,
    pub progress: Option<OrchestratorProgress>,
}

impl ExecutionReport {
    pub fn state_of(&self, id: &str) -> Option<NodeLifecycleState> {
        self.states.iter().find(|(node, _)| node == id).map(|(_, s)| *s)
    }
}

pub struct PlanExecutor {
    graph: Arc<GraphDescriptor>,
    registry: Arc<HandlerRegistry>,
    interpreter: Arc<dyn FoldedInterpreter>,
    config: RunConfig,
    signal: AbortSignal,
}

impl PlanExecutor {
    pub fn new(
        graph: impl Into<Arc<GraphDescriptor>>,
        registry: impl Into<Arc<HandlerRegistry>>,
    ) -> Self {
        Self {
            graph: graph.into(),
            registry: registry.into(),
            interpreter: Arc::new(TraversalInterpreter::default()),
            config: RunConfig::default(),
            signal: AbortSignal::new(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn FoldedInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Limits used for nested graphs and the default interpreter.
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.interpreter = Arc::new(TraversalInterpreter::new(config.clone()));
        self.config = config;
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Run the whole plan; input nodes receive `inputs` merged with the
    /// graph's bound arguments.
    pub async fn run(&self, inputs: InputValues) -> Result<ExecutionReport> {
        self.check_handlers()?;
        let plan = create_plan(&self.graph)?;
        let folded: Vec<bool> = plan.stages.iter().map(|s| s.is_folded()).collect();
        let mut orchestrator = Orchestrator::new(plan);

        let mut args = inputs;
        if let Some(bound) = &self.graph.args {
            args.extend(bound.clone());
        }

        let mut report = ExecutionReport::default();
        loop {
            self.signal.check()?;
            let tasks = orchestrator.current_tasks()?;
            if tasks.is_empty() {
                break;
            }
            let stage = orchestrator.current_stage();
            let is_folded = folded.get(stage).copied().unwrap_or(false);
            for task in &tasks {
                orchestrator.set_working(&task.node.id)?;
            }
            tracing::debug!(stage, tasks = tasks.len(), folded = is_folded, "running stage");

            let results = join_all(
                tasks
                    .into_iter()
                    .map(|task| self.execute(task, is_folded, &args)),
            )
            .await;

            for (id, is_output, outputs) in results {
                if is_output {
                    report.outputs.push(outputs.clone());
                }
                report.node_outputs.insert(id.clone(), outputs.clone());
                orchestrator.provide_outputs(&id, outputs)?;
            }
        }

        report.states = orchestrator
            .state()
            .into_iter()
            .map(|(id, info)| (id, info.state))
            .collect();
        report.progress = Some(orchestrator.progress());
        Ok(report)
    }

    async fn execute(&self, task: Task, folded: bool, args: &InputValues) -> (NodeId, bool, OutputValues) {
        let id = task.node.id.clone();
        let node_type = task.node.node_type.clone();

        if folded || task.node.is_folded() {
            let outputs = self
                .interpreter
                .interpret(&self.graph, task, self.registry.clone())
                .await
                .unwrap_or_else(|e| self.node_failed(&id, e));
            return (id, false, outputs);
        }

        match node_type.as_str() {
            INPUT_NODE_TYPE => (id, false, args.clone()),
            OUTPUT_NODE_TYPE => (id, true, task.inputs),
            _ => {
                let outputs = match task.node.subgraph_ref() {
                    Some(_) => self
                        .interpreter
                        .interpret(&self.graph, task, self.registry.clone())
                        .await
                        .unwrap_or_else(|e| self.node_failed(&id, e)),
                    None => self.invoke_handler(task).await,
                };
                (id, false, outputs)
            }
        }
    }

    async fn invoke_handler(&self, task: Task) -> OutputValues {
        let id = task.node.id.clone();
        let Some(handler) = self.registry.get(&task.node.node_type) else {
            return error_outputs(&id, format!("No handler for node type '{}'", task.node.node_type));
        };
        let context = NodeHandlerContext::detached(task.node, self.graph.clone(), self.registry.clone())
            .with_signal(self.signal.clone());

        match handler.invoke(task.inputs, context).await {
            Ok(HandlerOutput::Values(outputs)) => outputs,
            Ok(HandlerOutput::Invoke(invocation)) => {
                let graph = with_declared(&invocation.graph, &self.graph);
                run_once_with_config(graph, self.registry.clone(), invocation.inputs, self.config.clone())
                    .await
                    .unwrap_or_else(|e| self.node_failed(&id, e))
            }
            Err(error) => {
                tracing::warn!(node = %id, error = %error, "handler failed");
                error_outputs(&id, error.to_string())
            }
        }
    }

    fn node_failed(&self, id: &str, error: GraphError) -> OutputValues {
        tracing::warn!(node = %id, error = %error, "nested graph failed");
        error_outputs(id, error.to_string())
    }

    fn check_handlers(&self) -> Result<()> {
        for node in &self.graph.nodes {
            let special = node.node_type == INPUT_NODE_TYPE
                || node.node_type == OUTPUT_NODE_TYPE
                || node.subgraph_ref().is_some()
                || node.is_folded();
            if !special && !self.registry.contains(&node.node_type) {
                return Err(GraphError::missing_handler(&node.id, &node.node_type));
            }
        }
        Ok(())
    }
}

/// `body` with the declared graphs of `root` it does not declare itself.
fn with_declared(body: &GraphDescriptor, root: &GraphDescriptor) -> GraphDescriptor {
    let mut graph = body.clone();
    if let Some(declared) = &root.graphs {
        let graphs = graph.graphs.get_or_insert_with(BTreeMap::new);
        for (name, sub) in declared {
            graphs.entry(name.clone()).or_insert_with(|| sub.clone());
        }
    }
    graph
}
