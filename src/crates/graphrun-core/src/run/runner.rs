use super::event::{RunEvent, RunEventKind};
use crate::config::RunConfig;
use crate::error::{GraphError, Result};
use crate::graph::{
    GraphDescriptor, InputValues, NodeId, OutputValues, ERROR_PORT, INPUT_NODE_TYPE, OUTPUT_NODE_TYPE,
};
use crate::handler::{
    error_outputs, GraphInvocation, HandlerError, HandlerFuture, HandlerOutput, HandlerRegistry,
    InputRequest, InputRequestError, NodeHandler, NodeHandlerContext,
};
use crate::signal::AbortSignal;
use crate::stack::{GraphRef, InvocationStack, StackSnapshot};
use crate::traversal::{TraversalMachine, TraversalResult};
use futures::Stream;
use graphrun_checkpoint::{CheckpointRecord, CheckpointSaver};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Pull-driven traversal of a graph and every graph it invokes.
///
/// ```text
///   next() ─▶ GraphStart ─▶ NodeStart ─▶ Input ┄┄ provide_inputs() ┄┄▶ NodeEnd ─▶ ... ─▶ End
/// ```
///
/// Each call to [`Runner::next`] advances until at least one event is
/// available. Nothing runs between calls. The run suspends at input nodes
/// and at bubbled input requests until [`Runner::provide_inputs`] answers;
/// [`Runner::state`] captures the invocation stack at any suspension so a
/// new runner can [`resume`](Runner::resume) it later.
///
/// Nested activations (declared `#name` sub-graphs, folded nodes, and graphs
/// returned by handlers through [`HandlerOutput::Invoke`]) are frames on an
/// explicit stack rather than recursive calls, so their state is part of the
/// snapshot too.
pub struct Runner {
    root: Arc<GraphDescriptor>,
    registry: Arc<HandlerRegistry>,
    config: RunConfig,
    signal: AbortSignal,
    stack: InvocationStack,
    frames: Vec<ActiveFrame>,
    outbox: VecDeque<RunEvent>,
    phase: Phase,
    steps: usize,
    preloaded: Option<InputValues>,
    failure: Option<GraphError>,
    checkpoints: Option<Checkpoints>,
}

/// Runtime side of a stack frame
struct ActiveFrame {
    graph: Arc<GraphDescriptor>,
    machine: TraversalMachine,
    args: Option<InputValues>,
}

struct Checkpoints {
    saver: Arc<dyn CheckpointSaver>,
    run_id: String,
    /// Last saved step; read from the saver before the first save
    step: Option<u64>,
    /// Set when a suspension happened and has not been saved yet
    due: Option<bool>,
}

enum Phase {
    NotStarted,
    Traversing,
    /// Resumed from a snapshot; the top frame's current node runs again
    Redispatch,
    Dispatching(PendingHandler),
    AwaitingInput(PendingInput),
    Finished,
}

struct PendingHandler {
    node: NodeId,
    future: HandlerFuture,
    requests: mpsc::UnboundedReceiver<InputRequest>,
    requests_open: bool,
}

struct PendingInput {
    node: NodeId,
    deadline: Option<Instant>,
    reply: Option<(InputValues, Instant)>,
    source: InputSource,
}

enum InputSource {
    /// Input node of the root graph
    Node,
    /// Input node of a nested graph whose arguments lacked required values
    NestedNode { args: InputValues },
    /// Handler waiting in `request_input`
    Handler {
        handler: Box<PendingHandler>,
        reply: oneshot::Sender<std::result::Result<InputValues, InputRequestError>>,
    },
}

enum Answer {
    Values(InputValues),
    NoReply,
    TimedOut,
}

enum Driven {
    Done(std::result::Result<HandlerOutput, HandlerError>),
    Request(InputRequest),
}

impl Runner {
    pub fn new(
        graph: impl Into<Arc<GraphDescriptor>>,
        registry: impl Into<Arc<HandlerRegistry>>,
        config: RunConfig,
    ) -> Self {
        Self {
            root: graph.into(),
            registry: registry.into(),
            config,
            signal: AbortSignal::new(),
            stack: InvocationStack::new(),
            frames: Vec::new(),
            outbox: VecDeque::new(),
            phase: Phase::NotStarted,
            steps: 0,
            preloaded: None,
            failure: None,
            checkpoints: None,
        }
    }

    /// Continue a run from a snapshot taken at a suspension point.
    ///
    /// The node that was executing in the top frame is dispatched again: an
    /// input node asks for its values again (or takes values passed to
    /// [`provide_inputs`](Runner::provide_inputs) before the first `next`),
    /// a handler node is invoked again from scratch.
    pub fn resume(
        graph: impl Into<Arc<GraphDescriptor>>,
        registry: impl Into<Arc<HandlerRegistry>>,
        config: RunConfig,
        snapshot: StackSnapshot,
    ) -> Result<Self> {
        let mut runner = Self::new(graph, registry, config);
        let stack = InvocationStack::from_snapshot(snapshot)?;

        let mut parent: Option<Arc<GraphDescriptor>> = None;
        for frame in stack.frames() {
            let graph = match &frame.graph {
                GraphRef::Root => runner.root.clone(),
                GraphRef::Declared { name } => runner
                    .declared_graph(parent.as_deref(), name)
                    .ok_or_else(|| {
                        GraphError::integrity(format!("snapshot refers to unknown graph '{}'", name))
                    })?,
                GraphRef::Inline { graph } => Arc::new((**graph).clone()),
            };
            let state = frame
                .machine
                .clone()
                .ok_or_else(|| GraphError::integrity("snapshot frame without traversal state"))?;
            runner.frames.push(ActiveFrame {
                graph: graph.clone(),
                machine: TraversalMachine::from_state(graph.clone(), state),
                args: frame.args.clone(),
            });
            parent = Some(graph);
        }

        runner.steps = stack.frames().iter().map(|f| f.invocation).sum();
        runner.stack = stack;
        runner.phase = Phase::Redispatch;
        tracing::debug!(path = ?runner.stack.path(), "resuming run from snapshot");
        Ok(runner)
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Save the invocation stack to `saver` at every input suspension.
    pub fn with_checkpointer(
        mut self,
        saver: Arc<dyn CheckpointSaver>,
        run_id: impl Into<String>,
    ) -> Self {
        self.checkpoints = Some(Checkpoints {
            saver,
            run_id: run_id.into(),
            step: None,
            due: None,
        });
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Snapshot of the invocation stack.
    pub fn state(&self) -> StackSnapshot {
        self.stack.state()
    }

    pub fn is_waiting_for_input(&self) -> bool {
        matches!(self.phase, Phase::AwaitingInput(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished) && self.outbox.is_empty()
    }

    /// The error that ended the run, if it failed.
    pub fn failure(&self) -> Option<&GraphError> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<GraphError> {
        self.failure.take()
    }

    /// Answer the pending input request.
    ///
    /// A resumed runner whose top node is an input node also accepts values
    /// before its first `next`.
    pub fn provide_inputs(&mut self, inputs: InputValues) -> Result<()> {
        let top_is_input = self.current_is_input();
        match &mut self.phase {
            Phase::AwaitingInput(pending) => {
                pending.reply = Some((inputs, Instant::now()));
                Ok(())
            }
            Phase::Redispatch if top_is_input => {
                self.preloaded = Some(inputs);
                Ok(())
            }
            _ => Err(GraphError::integrity("runner is not waiting for input")),
        }
    }

    /// Produce the next event, or `None` after the terminal event.
    pub async fn next(&mut self) -> Option<RunEvent> {
        loop {
            if let Err(error) = self.flush_checkpoint().await {
                self.fail(error);
            }
            if let Some(event) = self.outbox.pop_front() {
                return Some(event);
            }
            if matches!(self.phase, Phase::Finished) {
                return None;
            }
            if let Err(error) = self.advance().await {
                self.fail(error);
            }
        }
    }

    /// Turn the runner into a stream, answering input events with `respond`.
    ///
    /// `respond` returning `None` leaves the request unanswered.
    pub fn into_stream<F>(self, mut respond: F) -> impl Stream<Item = RunEvent>
    where
        F: FnMut(&RunEvent) -> Option<InputValues>,
    {
        let mut runner = self;
        async_stream::stream! {
            while let Some(event) = runner.next().await {
                let answer = if event.is_input() { respond(&event) } else { None };
                yield event;
                if let Some(values) = answer {
                    if let Err(error) = runner.provide_inputs(values) {
                        tracing::warn!(error = %error, "input answer rejected");
                    }
                }
            }
        }
    }

    async fn advance(&mut self) -> Result<()> {
        if self.signal.is_aborted() {
            self.abort();
            return Ok(());
        }
        match std::mem::replace(&mut self.phase, Phase::Traversing) {
            Phase::NotStarted => {
                let graph = self.root.clone();
                self.open_frame(GraphRef::Root, graph, None);
                Ok(())
            }
            Phase::Traversing => self.step(),
            Phase::Redispatch => {
                let result = self
                    .frames
                    .last()
                    .and_then(|f| f.machine.current().cloned())
                    .ok_or_else(|| GraphError::integrity("resumed frame has no current node"))?;
                self.dispatch(result)
            }
            Phase::Dispatching(pending) => self.drive(pending).await,
            Phase::AwaitingInput(pending) => self.resolve_input(pending).await,
            Phase::Finished => {
                self.phase = Phase::Finished;
                Ok(())
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        let nested = self.frames.len() > 1;
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| GraphError::integrity("traversal with no open frame"))?;

        let result = match frame.machine.next_result() {
            Ok(Some(result)) => result,
            Ok(None) => return self.close_frame(None),
            Err(GraphError::UnhandledNodeError { node, error }) if nested => {
                tracing::debug!(node = %node, "nested graph failed, reporting to invoking node");
                let mut outputs = OutputValues::new();
                outputs.insert(ERROR_PORT.to_string(), error);
                return self.close_frame(Some(outputs));
            }
            Err(error) => return Err(error),
        };
        let machine_state = frame.machine.state().clone();

        self.steps += 1;
        if self.steps > self.config.max_steps {
            return Err(GraphError::MaxStepsExceeded {
                max_steps: self.config.max_steps,
            });
        }
        self.stack.next_invocation()?;

        if result.skip {
            self.emit(RunEventKind::Skip {
                node: result.descriptor,
                inputs: result.inputs,
                missing_inputs: result.missing_inputs,
            });
            return Ok(());
        }

        self.stack.on_node_start(&result, machine_state)?;
        self.emit(RunEventKind::NodeStart {
            node: result.descriptor.clone(),
            inputs: result.inputs.clone(),
        });
        self.dispatch(result)
    }

    fn dispatch(&mut self, result: TraversalResult) -> Result<()> {
        self.signal.check()?;
        let node_type = result.descriptor.node_type.clone();
        match node_type.as_str() {
            INPUT_NODE_TYPE => self.suspend_at_input(result),
            OUTPUT_NODE_TYPE => self.reach_output(result),
            _ => {
                if let Some(name) = result.descriptor.subgraph_ref() {
                    let name = name.to_string();
                    return self.open_declared(result, &name);
                }
                if result.descriptor.is_folded() {
                    let name = result.descriptor.id.clone();
                    return self.open_declared(result, &name);
                }
                let handler = self.registry.get(&node_type).ok_or_else(|| {
                    GraphError::missing_handler(&result.descriptor.id, &node_type)
                })?;
                self.start_handler(result, handler);
                Ok(())
            }
        }
    }

    fn suspend_at_input(&mut self, result: TraversalResult) -> Result<()> {
        if let Some(values) = self.preloaded.take() {
            if self.frames.len() <= 1 {
                return self.complete_node(values);
            }
            // Nested input nodes see their invocation arguments under the answer.
            let mut args = self
                .frames
                .last()
                .and_then(|f| f.args.clone())
                .unwrap_or_default();
            args.extend(values);
            return self.complete_node(args);
        }

        let TraversalResult {
            descriptor, inputs, ..
        } = result;
        let schema = descriptor.configuration.get("schema").cloned();
        let id = descriptor.id.clone();

        if self.frames.len() <= 1 {
            self.emit(RunEventKind::Input {
                node: descriptor,
                inputs,
                schema,
                bubbled: false,
            });
            self.suspend(id, InputSource::Node, false);
            return Ok(());
        }

        let args = self
            .frames
            .last()
            .and_then(|f| f.args.clone())
            .unwrap_or_default();
        let missing = missing_required(schema.as_ref(), &args);
        if missing.is_empty() {
            return self.complete_node(args);
        }

        tracing::debug!(node = %id, missing = ?missing, "nested input bubbling up");
        self.emit(RunEventKind::Input {
            node: descriptor,
            inputs,
            schema,
            bubbled: true,
        });
        self.suspend(id, InputSource::NestedNode { args }, true);
        Ok(())
    }

    fn reach_output(&mut self, result: TraversalResult) -> Result<()> {
        let outputs = result.inputs;
        if self.frames.len() > 1 {
            self.complete_node(OutputValues::new())?;
            return self.close_frame(Some(outputs));
        }

        self.emit(RunEventKind::Output {
            node: result.descriptor,
            outputs,
        });
        self.complete_node(OutputValues::new())?;
        if self.config.stop_at_first_output {
            self.finish();
        }
        Ok(())
    }

    fn open_declared(&mut self, result: TraversalResult, name: &str) -> Result<()> {
        let current = self.frames.last().map(|f| f.graph.clone());
        let graph = self
            .declared_graph(current.as_deref(), name)
            .ok_or_else(|| GraphError::UnknownGraph {
                node: result.descriptor.id.clone(),
                graph: name.to_string(),
            })?;
        let args = bind_args(&graph, result.inputs);
        self.open_frame(
            GraphRef::Declared {
                name: name.to_string(),
            },
            graph,
            Some(args),
        );
        Ok(())
    }

    fn open_inline(&mut self, invocation: GraphInvocation) {
        let args = bind_args(&invocation.graph, invocation.inputs);
        let reference = GraphRef::Inline {
            graph: Box::new(invocation.graph.clone()),
        };
        self.open_frame(reference, Arc::new(invocation.graph), Some(args));
    }

    fn open_frame(
        &mut self,
        reference: GraphRef,
        graph: Arc<GraphDescriptor>,
        args: Option<InputValues>,
    ) {
        self.emit(RunEventKind::GraphStart {
            title: graph.title.clone(),
            depth: self.frames.len(),
        });
        self.stack.on_graph_start(reference, args.clone());
        self.frames.push(ActiveFrame {
            machine: TraversalMachine::new(graph.clone()),
            graph,
            args,
        });
        self.phase = Phase::Traversing;
    }

    /// Close the top frame; the invoking node receives `outputs` as its own.
    fn close_frame(&mut self, outputs: Option<OutputValues>) -> Result<()> {
        self.frames.pop();
        self.stack.on_graph_end()?;
        self.emit(RunEventKind::GraphEnd);
        if self.frames.is_empty() {
            self.emit(RunEventKind::End);
            self.phase = Phase::Finished;
            return Ok(());
        }
        self.complete_node(outputs.unwrap_or_default())
    }

    fn complete_node(&mut self, outputs: OutputValues) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| GraphError::integrity("node completed with no open frame"))?;
        let current = frame
            .machine
            .current()
            .cloned()
            .ok_or_else(|| GraphError::integrity("node completed with no current node"))?;
        frame.machine.provide_outputs(outputs.clone())?;
        self.stack.on_node_end()?;
        self.emit(RunEventKind::NodeEnd {
            node: current.descriptor,
            inputs: current.inputs,
            outputs,
        });
        self.phase = Phase::Traversing;
        Ok(())
    }

    fn start_handler(&mut self, result: TraversalResult, handler: Arc<dyn NodeHandler>) {
        let graph = self
            .frames
            .last()
            .map(|f| f.graph.clone())
            .unwrap_or_else(|| self.root.clone());
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let mut context =
            NodeHandlerContext::detached(result.descriptor.clone(), graph, self.registry.clone())
                .with_path(self.stack.path(), self.stack.state())
                .with_signal(self.signal.clone());
        if self.config.interactive {
            context = context.with_requests(requests_tx);
        }

        self.phase = Phase::Dispatching(PendingHandler {
            node: result.descriptor.id,
            future: handler.invoke(result.inputs, context),
            requests,
            requests_open: true,
        });
    }

    async fn drive(&mut self, mut pending: PendingHandler) -> Result<()> {
        let driven = loop {
            if !pending.requests_open {
                break Driven::Done((&mut pending.future).await);
            }
            tokio::select! {
                biased;
                request = pending.requests.recv() => match request {
                    Some(request) => break Driven::Request(request),
                    None => pending.requests_open = false,
                },
                result = &mut pending.future => break Driven::Done(result),
            }
        };

        match driven {
            Driven::Done(Ok(HandlerOutput::Values(outputs))) => self.complete_node(outputs),
            Driven::Done(Ok(HandlerOutput::Invoke(invocation))) => {
                tracing::debug!(node = %pending.node, "handler invoked a nested graph");
                self.open_inline(invocation);
                Ok(())
            }
            Driven::Done(Err(error)) => {
                tracing::warn!(node = %pending.node, error = %error, "handler failed");
                let outputs = error_outputs(&pending.node, error.to_string());
                self.complete_node(outputs)
            }
            Driven::Request(request) => {
                let (descriptor, inputs) = self
                    .frames
                    .last()
                    .and_then(|f| f.machine.current())
                    .map(|c| (c.descriptor.clone(), c.inputs.clone()))
                    .ok_or_else(|| GraphError::integrity("input request with no current node"))?;
                self.emit(RunEventKind::Input {
                    node: descriptor,
                    inputs,
                    schema: Some(request.schema),
                    bubbled: true,
                });
                let id = pending.node.clone();
                let source = InputSource::Handler {
                    handler: Box::new(pending),
                    reply: request.reply,
                };
                self.suspend(id, source, true);
                Ok(())
            }
        }
    }

    async fn resolve_input(&mut self, pending: PendingInput) -> Result<()> {
        let PendingInput {
            node,
            deadline,
            reply,
            source,
        } = pending;

        let answer = match (reply, deadline) {
            (Some((_, answered)), Some(deadline)) if answered > deadline => Answer::TimedOut,
            (Some((values, _)), _) => Answer::Values(values),
            (None, Some(deadline)) => {
                tokio::time::sleep_until(deadline).await;
                Answer::TimedOut
            }
            (None, None) => Answer::NoReply,
        };
        let duration_ms = self.config.input_timeout_ms.unwrap_or_default();

        match source {
            InputSource::Handler { handler, reply } => {
                let answer = match answer {
                    Answer::Values(values) => Ok(values),
                    Answer::NoReply => Err(InputRequestError::Unanswered { node: node.clone() }),
                    Answer::TimedOut => Err(InputRequestError::Timeout {
                        node: node.clone(),
                        duration_ms,
                    }),
                };
                if reply.send(answer).is_err() {
                    tracing::debug!(node = %node, "handler stopped waiting for input");
                }
                self.phase = Phase::Dispatching(*handler);
                Ok(())
            }
            InputSource::Node => match answer {
                Answer::Values(values) => self.complete_node(values),
                Answer::NoReply => self.complete_node(InputValues::new()),
                Answer::TimedOut => Err(GraphError::InputTimeout { node, duration_ms }),
            },
            InputSource::NestedNode { mut args } => match answer {
                Answer::Values(values) => {
                    args.extend(values);
                    self.complete_node(args)
                }
                Answer::NoReply => self.complete_node(args),
                Answer::TimedOut => Err(GraphError::InputTimeout { node, duration_ms }),
            },
        }
    }

    fn suspend(&mut self, node: NodeId, source: InputSource, bubbled: bool) {
        if let Some(checkpoints) = self.checkpoints.as_mut() {
            checkpoints.due = Some(bubbled);
        }
        self.phase = Phase::AwaitingInput(PendingInput {
            node,
            deadline: self.config.input_timeout().map(|t| Instant::now() + t),
            reply: None,
            source,
        });
    }

    async fn flush_checkpoint(&mut self) -> Result<()> {
        let Some(checkpoints) = self.checkpoints.as_mut() else {
            return Ok(());
        };
        let Some(bubbled) = checkpoints.due.take() else {
            return Ok(());
        };

        let last = match checkpoints.step {
            Some(step) => step,
            None => checkpoints
                .saver
                .latest(&checkpoints.run_id)
                .await?
                .map(|record| record.step)
                .unwrap_or(0),
        };
        let step = last + 1;
        checkpoints.step = Some(step);

        let snapshot = self.stack.state();
        let node = self
            .stack
            .top()
            .and_then(|f| f.node.clone())
            .unwrap_or_default();
        let record = CheckpointRecord::new(checkpoints.run_id.clone(), step, &snapshot)?
            .with_metadata("node", node)
            .with_metadata("bubbled", bubbled.to_string());
        let id = checkpoints.saver.put(record).await?;
        tracing::debug!(checkpoint = %id, step, "saved run checkpoint");
        Ok(())
    }

    fn declared_graph(
        &self,
        current: Option<&GraphDescriptor>,
        name: &str,
    ) -> Option<Arc<GraphDescriptor>> {
        current
            .and_then(|g| g.subgraph(name))
            .or_else(|| self.root.subgraph(name))
            .map(|g| Arc::new(g.clone()))
    }

    fn current_is_input(&self) -> bool {
        self.frames
            .last()
            .and_then(|f| f.machine.current())
            .map(|c| c.descriptor.node_type == INPUT_NODE_TYPE)
            .unwrap_or(false)
    }

    fn emit(&mut self, kind: RunEventKind) {
        self.outbox.push_back(RunEvent::new(self.stack.path(), kind));
    }

    fn finish(&mut self) {
        while self.stack.on_graph_end().is_ok() {}
        self.frames.clear();
        self.emit(RunEventKind::End);
        self.phase = Phase::Finished;
    }

    fn abort(&mut self) {
        tracing::debug!(path = ?self.stack.path(), "run aborted");
        if let Phase::AwaitingInput(pending) = std::mem::replace(&mut self.phase, Phase::Finished) {
            if let InputSource::Handler { reply, .. } = pending.source {
                let _ = reply.send(Err(InputRequestError::Cancelled { node: pending.node }));
            }
        }
        self.failure = Some(GraphError::Cancelled);
        self.emit(RunEventKind::Aborted);
    }

    fn fail(&mut self, error: GraphError) {
        tracing::error!(error = %error, path = ?self.stack.path(), "run failed");
        let (node, payload) = match &error {
            GraphError::UnhandledNodeError { node, error } => {
                (Some(node.clone()), Some(error.clone()))
            }
            GraphError::MissingHandler { node, .. }
            | GraphError::UnknownGraph { node, .. }
            | GraphError::InputTimeout { node, .. } => (Some(node.clone()), None),
            _ => (self.stack.top().and_then(|f| f.node.clone()), None),
        };
        self.emit(RunEventKind::Error {
            node,
            message: error.to_string(),
            error: payload,
        });
        self.failure = Some(error);
        self.phase = Phase::Finished;
    }
}

/// Merge a graph's bound arguments over caller inputs.
pub(crate) fn bind_args(graph: &GraphDescriptor, mut inputs: InputValues) -> InputValues {
    if let Some(bound) = &graph.args {
        inputs.extend(bound.clone());
    }
    inputs
}

/// Properties a JSON schema lists as `required` that `values` lacks.
fn missing_required(schema: Option<&Value>, values: &InputValues) -> Vec<String> {
    schema
        .and_then(|s| s.get("required"))
        .and_then(Value::as_array)
        .map(|required| {
            required
                .iter()
                .filter_map(Value::as_str)
                .filter(|key| !values.contains_key(*key))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
