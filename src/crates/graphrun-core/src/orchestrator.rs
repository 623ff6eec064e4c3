//! Stage-by-stage orchestration of an [`ExecutionPlan`]
//!
//! Where the [`Runner`](crate::run::Runner) walks edges one node at a time,
//! the [`Orchestrator`] tracks every node of a plan through its lifecycle
//! and hands out whole stages of work. It never invokes anything itself;
//! the caller (see [`PlanExecutor`](crate::executor::PlanExecutor)) runs the
//! [`Task`]s and reports back with [`Orchestrator::provide_outputs`].
//!
//! ```text
//!   inactive ──▶ ready ──▶ working ⇄ waiting
//!                  │          │
//!                  │          ├──▶ succeeded
//!                  │          ├──▶ failed ─────┐
//!                  │          └──▶ interrupted ┤ skip downstream
//!                  └──────────────▶ skipped ◀──┘
//! ```
//!
//! A node whose upstream failed or was skipped, or whose upstream did not
//! produce a value it depends on, is skipped rather than run. Skips spread
//! downstream, and a node whose whole downstream ended without it is skipped
//! too, so a run settles as soon as nothing useful is left to do.

use crate::error::{GraphError, Result};
use crate::graph::{InputValues, NodeDescriptor, NodeId, OutputValues, ERROR_PORT, WILDCARD_PORT};
use crate::planner::{Dependency, ExecutionPlan, PlanNodeInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLifecycleState {
    Inactive,
    Ready,
    Working,
    Waiting,
    Succeeded,
    Failed,
    Skipped,
    Interrupted,
}

impl NodeLifecycleState {
    /// The node will not change without a restart.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Interrupted
        )
    }

    /// The node is being executed right now.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Working | Self::Waiting)
    }

    fn is_workable(self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Interrupted
                | Self::Ready
                | Self::Working
                | Self::Waiting
        )
    }

    fn is_restartable(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Succeeded | Self::Failed | Self::Interrupted
        )
    }

    fn has_outputs(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for NodeLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inactive => "inactive",
            Self::Ready => "ready",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Overall progress of an orchestrated run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorProgress {
    /// Nothing has completed in the first stage yet
    Initial,
    /// The current stage still has ready or running nodes
    Working,
    /// A new stage just became current
    Advanced,
    /// The last stage is complete
    Finished,
}

/// A node to invoke, with the inputs collected for it
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub node: NodeDescriptor,
    pub inputs: InputValues,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationNodeInfo {
    pub node: NodeDescriptor,
    pub state: NodeLifecycleState,
}

/// Everything the orchestrator knows about one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node: NodeDescriptor,
    pub state: NodeLifecycleState,
    pub stage: usize,
    pub inputs: Option<InputValues>,
    pub outputs: Option<OutputValues>,
}

/// Notified on every lifecycle transition
pub trait OrchestratorObserver: Send + Sync {
    fn state_changed(&self, _state: NodeLifecycleState, _info: &PlanNodeInfo) {}

    /// Transitions made by the orchestrator itself rather than requested by
    /// the caller; `error` is the node's `$error` output, if any.
    fn changed_by_orchestrator(&self, _id: &str, _state: NodeLifecycleState, _error: Option<&Value>) {}
}

#[derive(Debug, Clone)]
struct NodeInternalState {
    plan: PlanNodeInfo,
    stage: usize,
    state: NodeLifecycleState,
    inputs: Option<InputValues>,
    outputs: Option<OutputValues>,
}

enum Advancement {
    Done,
    More,
}

pub struct Orchestrator {
    plan: ExecutionPlan,
    /// In plan order
    nodes: Vec<NodeInternalState>,
    index: HashMap<NodeId, usize>,
    current_stage: usize,
    progress: OrchestratorProgress,
    observer: Option<Arc<dyn OrchestratorObserver>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.plan.len())
            .field("current_stage", &self.current_stage)
            .field("progress", &self.progress)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(plan: ExecutionPlan) -> Self {
        let mut orchestrator = Self {
            plan,
            nodes: Vec::new(),
            index: HashMap::new(),
            current_stage: 0,
            progress: OrchestratorProgress::Initial,
            observer: None,
        };
        orchestrator.reset();
        orchestrator
    }

    pub fn with_observer(mut self, observer: Arc<dyn OrchestratorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn progress(&self) -> OrchestratorProgress {
        self.progress
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    /// Some node is working or waiting.
    pub fn working(&self) -> bool {
        self.nodes.iter().any(|n| n.state.is_in_progress())
    }

    /// Some node failed or was interrupted.
    pub fn failed(&self) -> bool {
        self.nodes.iter().any(|n| {
            matches!(
                n.state,
                NodeLifecycleState::Failed | NodeLifecycleState::Interrupted
            )
        })
    }

    /// Back to the initial state: the first stage ready with empty inputs.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.reset_at_stage(0);
    }

    fn reset_at_stage(&mut self, starting: usize) {
        for (offset, stage) in self.plan.stages.iter().enumerate().skip(starting) {
            let first = offset == starting;
            for info in stage.nodes() {
                let position = self.index.get(&info.node.id).copied();
                let existing = position.map(|i| &self.nodes[i]);

                let inputs = if first {
                    Some(existing.and_then(|n| n.inputs.clone()).unwrap_or_default())
                } else {
                    None
                };
                let previous = existing
                    .map(|n| n.state)
                    .unwrap_or(NodeLifecycleState::Inactive);
                let state = if previous.is_in_progress() {
                    previous
                } else if first {
                    NodeLifecycleState::Ready
                } else {
                    NodeLifecycleState::Inactive
                };

                let entry = NodeInternalState {
                    plan: info.clone(),
                    stage: offset,
                    state,
                    inputs,
                    outputs: None,
                };
                match position {
                    Some(i) => self.nodes[i] = entry,
                    None => {
                        self.index.insert(info.node.id.clone(), self.nodes.len());
                        self.nodes.push(entry);
                    }
                }
                if let Some(observer) = &self.observer {
                    observer.state_changed(state, info);
                }
            }
        }
        self.current_stage = starting;
        self.progress = if starting == 0 {
            OrchestratorProgress::Initial
        } else {
            OrchestratorProgress::Advanced
        };
        tracing::debug!(stage = starting, "orchestrator reset");
    }

    /// Discard everything from `stage` on and make it current again.
    pub fn restart_at_stage(&mut self, stage: usize) -> Result<()> {
        if stage > self.current_stage {
            return Err(GraphError::orchestration(format!(
                "Stage {} is beyond the current stage",
                stage
            )));
        }
        self.reset_at_stage(stage);
        Ok(())
    }

    /// Make `id` ready again, keeping what its stage siblings produced.
    pub fn restart_at_node(&mut self, id: &str) -> Result<()> {
        let position = self.position(id).map_err(|_| {
            GraphError::orchestration(format!("Unable to restart at node \"{}\": node not found", id))
        })?;
        let state = self.nodes[position].state;
        if !state.is_restartable() {
            return Err(GraphError::orchestration(format!(
                "Unable to restart at a node \"{}\": node state is \"{}\"",
                id, state
            )));
        }
        let stage = self.nodes[position].stage;

        let mut saved: Vec<(NodeId, OutputValues)> = Vec::new();
        if let Some(planned) = self.plan.stages.get(stage) {
            for info in planned.nodes() {
                if info.node.id == id {
                    continue;
                }
                let sibling = self.position(&info.node.id)?;
                if let Some(outputs) = &self.nodes[sibling].outputs {
                    saved.push((info.node.id.clone(), outputs.clone()));
                }
            }
        }

        self.restart_at_stage(stage)?;
        for (sibling, outputs) in saved {
            self.provide_outputs(&sibling, outputs)?;
        }

        // re-providing siblings may have skipped the restarted node
        let position = self.position(id)?;
        self.update_state(position, NodeLifecycleState::Ready, false);
        self.current_stage = stage;
        self.progress = if stage == 0 {
            OrchestratorProgress::Initial
        } else {
            OrchestratorProgress::Advanced
        };
        Ok(())
    }

    pub fn set_working(&mut self, id: &str) -> Result<()> {
        let position = self.transition_target(id, "working")?;
        let state = self.nodes[position].state;
        if state == NodeLifecycleState::Working {
            return Ok(());
        }
        if !state.is_workable() {
            return Err(GraphError::orchestration(format!(
                "Unable to set node \"{}\" to working: not ready nor waiting",
                id
            )));
        }
        self.update_state(position, NodeLifecycleState::Working, true);
        Ok(())
    }

    pub fn set_waiting(&mut self, id: &str) -> Result<()> {
        let position = self.transition_target(id, "waiting")?;
        let state = self.nodes[position].state;
        if state == NodeLifecycleState::Waiting {
            return Ok(());
        }
        if state != NodeLifecycleState::Working {
            return Err(GraphError::orchestration(format!(
                "Unable to set node \"{}\" to waiting: not working",
                id
            )));
        }
        self.update_state(position, NodeLifecycleState::Waiting, true);
        Ok(())
    }

    /// Stop a working or waiting node; everything downstream is skipped.
    pub fn set_interrupted(&mut self, id: &str) -> Result<()> {
        let position = self.transition_target(id, "interrupted")?;
        let state = self.nodes[position].state;
        if state == NodeLifecycleState::Interrupted {
            return Ok(());
        }
        if !state.is_in_progress() {
            return Err(GraphError::orchestration(format!(
                "Unable to set node \"{}\" to interrupted: not working or waiting",
                id
            )));
        }
        self.update_state(position, NodeLifecycleState::Interrupted, true);
        self.propagate_skip(position)
    }

    /// Node and lifecycle state of every planned node, in plan order.
    pub fn state(&self) -> Vec<(NodeId, OrchestrationNodeInfo)> {
        self.nodes
            .iter()
            .map(|n| {
                (
                    n.plan.node.id.clone(),
                    OrchestrationNodeInfo {
                        node: n.plan.node.clone(),
                        state: n.state,
                    },
                )
            })
            .collect()
    }

    /// Lifecycle state of one node.
    pub fn node_state(&self, id: &str) -> Option<NodeLifecycleState> {
        self.index.get(id).map(|&i| self.nodes[i].state)
    }

    /// Full record of every planned node, in plan order.
    pub fn full_state(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .map(|n| NodeRecord {
                node: n.plan.node.clone(),
                state: n.state,
                stage: n.stage,
                inputs: n.inputs.clone(),
                outputs: n.outputs.clone(),
            })
            .collect()
    }

    /// Task for `id` with whatever inputs it currently holds.
    pub fn task_from_id(&self, id: &str) -> Result<Task> {
        let node = self
            .index
            .get(id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| GraphError::orchestration(format!("Unknown node id \"{}\"", id)))?;
        let inputs = node
            .inputs
            .clone()
            .ok_or_else(|| GraphError::orchestration("Node has no inputs"))?;
        Ok(Task {
            node: node.plan.node.clone(),
            inputs,
        })
    }

    /// Ready nodes of the current stage.
    pub fn current_tasks(&self) -> Result<Vec<Task>> {
        let Some(stage) = self.plan.stages.get(self.current_stage) else {
            return Ok(Vec::new());
        };
        let mut tasks = Vec::new();
        for info in stage.nodes() {
            let position = self.index.get(&info.node.id).copied().ok_or_else(|| {
                GraphError::orchestration(format!(
                    "While getting current tasks, node \"{}\" was not found",
                    info.node.id
                ))
            })?;
            let node = &self.nodes[position];
            if node.state == NodeLifecycleState::Ready {
                tasks.push(Task {
                    node: info.node.clone(),
                    inputs: node.inputs.clone().unwrap_or_default(),
                });
            }
        }
        Ok(tasks)
    }

    /// Record what node `id` produced and move the run forward.
    ///
    /// Outputs carrying `$error` fail the node. Results for nodes of an
    /// earlier stage are still recorded: a late failure changes nothing
    /// else, a late success re-evaluates the stages after it.
    pub fn provide_outputs(&mut self, id: &str, outputs: OutputValues) -> Result<OrchestratorProgress> {
        let position = self.position(id).map_err(|_| {
            GraphError::orchestration(format!(
                "While providing outputs, couldn't get state for node \"{}\"",
                id
            ))
        })?;
        let stage = self.nodes[position].stage;
        let earlier_stage = stage < self.current_stage;
        if stage > self.current_stage {
            return Err(GraphError::orchestration("Can't provide outputs to later stages"));
        }
        if self.nodes[position].state == NodeLifecycleState::Waiting {
            return Err(GraphError::orchestration(
                "Can't provide outputs while the node is waiting for input",
            ));
        }

        let failed = outputs.contains_key(ERROR_PORT);
        self.nodes[position].outputs = Some(outputs);
        if failed {
            self.update_state(position, NodeLifecycleState::Failed, false);
            if earlier_stage {
                return Ok(self.progress);
            }
            self.propagate_skip(position)?;
        } else {
            self.update_state(position, NodeLifecycleState::Succeeded, false);
            if earlier_stage {
                self.current_stage = stage;
            }
        }

        loop {
            if let Advancement::Done = self.try_advancing_stage()? {
                break;
            }
            if !self.current_tasks()?.is_empty() {
                break;
            }
        }
        tracing::debug!(node = %id, progress = ?self.progress, stage = self.current_stage, "outputs recorded");
        Ok(self.progress)
    }

    /// Carry results over from an orchestrator built for an earlier version
    /// of the same graph.
    ///
    /// Nodes are matched in plan order until the first difference. Matching
    /// nodes with results get them re-provided; others take the old state.
    /// When not even the first node matches, it becomes interrupted so a
    /// resumed run does not continue on a changed topology.
    pub fn update_from(&mut self, old: &Orchestrator) -> Result<()> {
        if old.nodes.is_empty() {
            return Ok(());
        }
        for index in 0..self.nodes.len() {
            let id = self.nodes[index].plan.node.id.clone();
            match old.nodes.get(index) {
                Some(previous) if previous.plan.node.id == id => {
                    match &previous.outputs {
                        Some(outputs) if previous.state.has_outputs() => {
                            self.provide_outputs(&id, outputs.clone())?;
                        }
                        _ => self.nodes[index].state = previous.state,
                    }
                }
                _ => {
                    if index == 0 {
                        self.nodes[index].state = NodeLifecycleState::Interrupted;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn propagate_skip(&mut self, origin: usize) -> Result<()> {
        let mut queue = VecDeque::from([origin]);
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(current) = queue.pop_front() {
            let targets: Vec<NodeId> = self.nodes[current]
                .plan
                .downstream
                .iter()
                .map(|dep| dep.to.clone())
                .collect();
            for target in targets {
                if visited.contains(&target) {
                    continue;
                }
                let position = self.position(&target).map_err(|_| {
                    GraphError::orchestration(
                        "While trying to propagate skip downstream, failed to retrieve target state",
                    )
                })?;
                if !self.nodes[position].state.is_terminal() {
                    queue.push_back(position);
                    self.update_state(position, NodeLifecycleState::Skipped, false);
                }
                visited.insert(target);
            }
        }

        // settle nodes whose whole downstream already ended
        let mut changed = true;
        while changed {
            changed = false;
            for position in 0..self.nodes.len() {
                let node = &self.nodes[position];
                if node.state.is_terminal()
                    || node.state.is_in_progress()
                    || node.plan.downstream.is_empty()
                {
                    continue;
                }
                let mut all_terminal = true;
                for dep in &node.plan.downstream {
                    let target = self.index.get(&dep.to).copied().ok_or_else(|| {
                        GraphError::orchestration(
                            "While trying to settle state, failed to retrieve target state",
                        )
                    })?;
                    if !self.nodes[target].state.is_terminal() {
                        all_terminal = false;
                        break;
                    }
                }
                if all_terminal {
                    self.update_state(position, NodeLifecycleState::Skipped, false);
                    changed = true;
                }
            }
        }
        Ok(())
    }

    fn try_advancing_stage(&mut self) -> Result<Advancement> {
        let stage = self.plan.stages.get(self.current_stage).ok_or_else(|| {
            GraphError::orchestration("While trying to advance stage, failed to retrieve current stage")
        })?;

        let mut in_progress = false;
        let mut complete = true;
        for info in stage.nodes() {
            match self.index.get(&info.node.id).map(|&i| self.nodes[i].state) {
                Some(state) if state.is_in_progress() => {
                    in_progress = true;
                    complete = false;
                    break;
                }
                Some(NodeLifecycleState::Ready) | None => {
                    complete = false;
                    break;
                }
                Some(_) => {}
            }
        }
        if !complete {
            self.progress = OrchestratorProgress::Working;
            return Ok(if in_progress {
                Advancement::Done
            } else {
                Advancement::More
            });
        }

        let next = self.current_stage + 1;
        let Some(next_stage) = self.plan.stages.get(next) else {
            self.progress = OrchestratorProgress::Finished;
            return Ok(Advancement::Done);
        };

        let infos: Vec<PlanNodeInfo> = next_stage.nodes().into_iter().cloned().collect();
        for info in infos {
            let position = self.position(&info.node.id).map_err(|_| {
                GraphError::orchestration("While trying to advance stage, failed to retrieve current state")
            })?;
            match self.collect_inputs(&info)? {
                Some(inputs) => {
                    self.update_state(position, NodeLifecycleState::Ready, false);
                    self.nodes[position].inputs = Some(inputs);
                }
                None => {
                    self.update_state(position, NodeLifecycleState::Skipped, false);
                    self.propagate_skip(position)?;
                }
            }
        }
        self.current_stage = next;
        self.progress = OrchestratorProgress::Advanced;
        Ok(Advancement::More)
    }

    /// Inputs for `info` from its upstream results, or `None` if it must be
    /// skipped.
    fn collect_inputs(&self, info: &PlanNodeInfo) -> Result<Option<InputValues>> {
        let mut inputs = InputValues::new();
        for dep in &info.upstream {
            let from = self.index.get(&dep.from).map(|&i| &self.nodes[i]).ok_or_else(|| {
                GraphError::orchestration("While trying to advance stage, failed to retrieve upstream state")
            })?;
            match from.state {
                NodeLifecycleState::Inactive => {
                    return Err(GraphError::orchestration(format!(
                        "While trying to advance stage, found node {} with unresolved dependencies",
                        dep.from
                    )))
                }
                NodeLifecycleState::Ready => {
                    return Err(GraphError::orchestration(format!(
                        "While trying to advance stage, found node {} what was not yet invoked",
                        dep.from
                    )))
                }
                NodeLifecycleState::Skipped | NodeLifecycleState::Failed => return Ok(None),
                _ => {}
            }

            let outputs = from.outputs.as_ref();
            if dep.out_port == WILDCARD_PORT {
                if let Some(outputs) = outputs {
                    inputs.extend(outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                continue;
            }
            if !carries_data(dep) {
                continue;
            }
            match outputs.and_then(|o| o.get(&dep.out_port)).filter(|v| !v.is_null()) {
                Some(value) => {
                    inputs.insert(dep.in_port.clone(), value.clone());
                }
                None if dep.optional => {}
                None => return Ok(None),
            }
        }
        Ok(Some(inputs))
    }

    fn update_state(&mut self, position: usize, state: NodeLifecycleState, by_consumer: bool) {
        let node = &mut self.nodes[position];
        node.state = state;
        if let Some(observer) = &self.observer {
            observer.state_changed(state, &node.plan);
            if !by_consumer {
                let error = node.outputs.as_ref().and_then(|o| o.get(ERROR_PORT));
                observer.changed_by_orchestrator(&node.plan.node.id, state, error);
            }
        }
    }

    fn transition_target(&self, id: &str, target: &str) -> Result<usize> {
        self.position(id).map_err(|_| {
            GraphError::orchestration(format!(
                "Unable to set node \"{}\" to {}: node not found",
                id, target
            ))
        })
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::orchestration(format!("node \"{}\" not found", id)))
    }
}

/// Control edges only order execution; they route no value.
fn carries_data(dep: &Dependency) -> bool {
    !dep.out_port.is_empty() && !dep.in_port.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, GraphDescriptor, NodeDescriptor};
    use crate::planner::create_plan;
    use serde_json::json;
    use std::sync::Mutex;

    fn outputs(value: Value) -> OutputValues {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_control_edge_needs_no_value() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("a", "work"))
            .with_node(NodeDescriptor::new("b", "work"))
            .with_edge(Edge::control("a", "b"));
        let mut o = Orchestrator::new(create_plan(&graph).unwrap());
        assert_eq!(
            o.provide_outputs("a", OutputValues::new()).unwrap(),
            OrchestratorProgress::Advanced
        );
        assert_eq!(o.node_state("b"), Some(NodeLifecycleState::Ready));
    }

    #[test]
    fn test_wildcard_edge_forwards_everything() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("a", "work"))
            .with_node(NodeDescriptor::new("b", "work"))
            .with_edge(Edge::wildcard("a", "b"));
        let mut o = Orchestrator::new(create_plan(&graph).unwrap());
        o.provide_outputs("a", outputs(json!({"x": 1, "y": 2}))).unwrap();
        let task = o.task_from_id("b").unwrap();
        assert_eq!(task.inputs, outputs(json!({"x": 1, "y": 2})));
    }

    #[test]
    fn test_optional_dependency_may_be_missing() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("a", "work"))
            .with_node(NodeDescriptor::new("b", "work"))
            .with_edge(Edge::new("a", "hint", "b", "hint").optional())
            .with_edge(Edge::new("a", "text", "b", "text"));
        let mut o = Orchestrator::new(create_plan(&graph).unwrap());
        o.provide_outputs("a", outputs(json!({"text": "hi"}))).unwrap();
        assert_eq!(o.node_state("b"), Some(NodeLifecycleState::Ready));
        assert_eq!(o.task_from_id("b").unwrap().inputs, outputs(json!({"text": "hi"})));
    }

    #[test]
    fn test_observer_sees_orchestrator_transitions() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(String, NodeLifecycleState, bool)>>);
        impl OrchestratorObserver for Recorder {
            fn changed_by_orchestrator(&self, id: &str, state: NodeLifecycleState, error: Option<&Value>) {
                self.0.lock().unwrap().push((id.to_string(), state, error.is_some()));
            }
        }

        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("a", "work"))
            .with_node(NodeDescriptor::new("b", "work"))
            .with_edge(Edge::new("a", "out", "b", "in"));
        let recorder = Arc::new(Recorder::default());
        let mut o = Orchestrator::new(create_plan(&graph).unwrap()).with_observer(recorder.clone());
        o.provide_outputs("a", outputs(json!({"$error": "boom"}))).unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen[0], ("a".to_string(), NodeLifecycleState::Failed, true));
        assert_eq!(seen[1], ("b".to_string(), NodeLifecycleState::Skipped, false));
    }

    #[test]
    fn test_state_display_matches_serde() {
        assert_eq!(NodeLifecycleState::Interrupted.to_string(), "interrupted");
        assert_eq!(
            serde_json::to_value(NodeLifecycleState::Waiting).unwrap(),
            json!("waiting")
        );
    }
}
