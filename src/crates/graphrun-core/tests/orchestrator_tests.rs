//! Lifecycle tracking of the stage orchestrator over small fixture graphs.

use graphrun_core::{
    create_plan, Edge, GraphDescriptor, NodeDescriptor, NodeLifecycleState, Orchestrator,
    OrchestratorProgress, OutputValues,
};
use serde_json::{json, Value};

use NodeLifecycleState::{Failed, Inactive, Interrupted, Ready, Skipped, Succeeded, Waiting, Working};

fn graph(nodes: &[(&str, &str)], edges: &[(&str, &str, &str, &str)]) -> GraphDescriptor {
    let mut graph = GraphDescriptor::new();
    for (id, node_type) in nodes {
        graph = graph.with_node(NodeDescriptor::new(*id, *node_type));
    }
    for (from, out, to, input) in edges {
        graph = graph.with_edge(Edge::new(*from, *out, *to, *input));
    }
    graph
}

fn diamond() -> GraphDescriptor {
    graph(
        &[
            ("input", "input"),
            ("left-channel", "process"),
            ("right-channel", "process"),
            ("mixer", "mix"),
        ],
        &[
            ("input", "left", "left-channel", "signal"),
            ("input", "right", "right-channel", "signal"),
            ("left-channel", "processed", "mixer", "left"),
            ("right-channel", "processed", "mixer", "right"),
        ],
    )
}

fn router() -> GraphDescriptor {
    graph(
        &[
            ("choose-path", "sign"),
            ("left-path", "path"),
            ("right-path", "path"),
            ("treasure", "item"),
            ("dragon", "item"),
        ],
        &[
            ("choose-path", "left", "left-path", "travel"),
            ("choose-path", "right", "right-path", "travel"),
            ("left-path", "arrive", "treasure", "encounter"),
            ("right-path", "arrive", "dragon", "encounter"),
        ],
    )
}

fn zig_zag() -> GraphDescriptor {
    graph(
        &[
            ("a", "walk"),
            ("b", "walk"),
            ("c", "walk"),
            ("d", "walk"),
            ("e", "walk"),
            ("f", "walk"),
        ],
        &[
            ("a", "context", "b", "context"),
            ("b", "context", "c", "context"),
            ("d", "context", "c", "context"),
            ("d", "context", "e", "context"),
            ("e", "context", "f", "context"),
        ],
    )
}

fn converge() -> GraphDescriptor {
    graph(
        &[
            ("start-a", "start"),
            ("start-b", "start"),
            ("start-c", "start"),
            ("end", "converge"),
        ],
        &[
            ("start-a", "context", "end", "in-1"),
            ("start-b", "context", "end", "in-2"),
            ("start-c", "context", "end", "in-3"),
        ],
    )
}

fn simple_sequence() -> GraphDescriptor {
    graph(
        &[("a", "work"), ("b", "work"), ("c", "work"), ("d", "work")],
        &[
            ("a", "context", "b", "context"),
            ("b", "context", "c", "context"),
            ("c", "context", "d", "context"),
        ],
    )
}

fn orchestrator(graph: &GraphDescriptor) -> Orchestrator {
    Orchestrator::new(create_plan(graph).unwrap())
}

fn outputs(value: Value) -> OutputValues {
    value.as_object().cloned().unwrap_or_default()
}

fn assert_tasks(o: &Orchestrator, expected: &[&str]) {
    let tasks = o.current_tasks().unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.node.id.as_str()).collect();
    assert_eq!(ids, expected);
}

fn assert_states(o: &Orchestrator, expected: &[(&str, NodeLifecycleState)]) {
    let state = o.state();
    assert_eq!(state.len(), expected.len());
    for (id, lifecycle) in expected {
        assert_eq!(o.node_state(id), Some(*lifecycle), "state of {}", id);
    }
}

mod advancing_stages {
    use super::*;

    #[test]
    fn diamond_runs_to_the_end() {
        let mut o = orchestrator(&diamond());
        assert_tasks(&o, &["input"]);
        assert_eq!(o.progress(), OrchestratorProgress::Initial);

        let progress = o
            .provide_outputs("input", outputs(json!({"left": "left-audio", "right": "right-audio"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["left-channel", "right-channel"]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Ready),
                ("right-channel", Ready),
                ("mixer", Inactive),
            ],
        );

        let progress = o
            .provide_outputs("left-channel", outputs(json!({"processed": "processed-left-audio"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Working);
        assert_tasks(&o, &["right-channel"]);

        let progress = o
            .provide_outputs("right-channel", outputs(json!({"processed": "processed-right-audio"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["mixer"]);
        let task = o.task_from_id("mixer").unwrap();
        assert_eq!(
            task.inputs,
            outputs(json!({"left": "processed-left-audio", "right": "processed-right-audio"}))
        );

        let progress = o
            .provide_outputs("mixer", outputs(json!({"result": "mixed-audio"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Succeeded),
                ("right-channel", Succeeded),
                ("mixer", Succeeded),
            ],
        );
    }

    #[test]
    fn missing_input_skips_everything_downstream() {
        let mut o = orchestrator(&diamond());
        let progress = o
            .provide_outputs("input", outputs(json!({"left": "left-audio"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Skipped),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
    }

    #[test]
    fn error_at_the_diverge_point() {
        let mut o = orchestrator(&diamond());
        let progress = o
            .provide_outputs("input", outputs(json!({"$error": "Unable to get input"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("input", Failed),
                ("left-channel", Skipped),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
        assert!(o.failed());
    }

    #[test]
    fn error_at_the_converge_point() {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "l", "right": "r"})))
            .unwrap();
        let progress = o
            .provide_outputs("left-channel", outputs(json!({"$error": "Unable to process"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Failed),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
    }

    #[test]
    fn null_values_count_as_missing() {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "l", "right": null})))
            .unwrap();
        assert_eq!(o.node_state("right-channel"), Some(Skipped));
    }
}

mod skip_propagation {
    use super::*;

    #[test]
    fn router_takes_one_path() {
        let mut o = orchestrator(&router());
        assert_tasks(&o, &["choose-path"]);

        let progress = o
            .provide_outputs("choose-path", outputs(json!({"left": "left"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["left-path"]);
        assert_states(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Ready),
                ("right-path", Skipped),
                ("treasure", Inactive),
                ("dragon", Skipped),
            ],
        );

        let progress = o
            .provide_outputs("left-path", outputs(json!({"arrive": "treasure"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["treasure"]);

        let progress = o
            .provide_outputs("treasure", outputs(json!({"result": "treasure"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_states(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Succeeded),
                ("right-path", Skipped),
                ("treasure", Succeeded),
                ("dragon", Skipped),
            ],
        );
    }

    #[test]
    fn zig_zag_skips_only_the_failed_branch() {
        let mut o = orchestrator(&zig_zag());
        assert_tasks(&o, &["a", "d"]);

        let progress = o
            .provide_outputs("a", outputs(json!({"context": "context"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Working);
        assert_tasks(&o, &["d"]);

        let progress = o
            .provide_outputs("d", outputs(json!({"context": "context"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["b", "e"]);

        let progress = o
            .provide_outputs("b", outputs(json!({"$error": "failure"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Working);
        assert_tasks(&o, &["e"]);
        assert_states(
            &o,
            &[
                ("a", Succeeded),
                ("b", Failed),
                ("c", Skipped),
                ("d", Succeeded),
                ("e", Ready),
                ("f", Inactive),
            ],
        );

        let progress = o
            .provide_outputs("e", outputs(json!({"context": "context"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["f"]);
        assert_states(
            &o,
            &[
                ("a", Succeeded),
                ("b", Failed),
                ("c", Skipped),
                ("d", Succeeded),
                ("e", Succeeded),
                ("f", Ready),
            ],
        );
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn unknown_nodes_are_rejected() {
        let mut o = orchestrator(&router());
        assert!(o.set_working("non-existing").is_err());
        assert!(o.set_waiting("non-existing").is_err());
        assert!(o.set_interrupted("non-existing").is_err());
        assert!(o.task_from_id("non-existing").is_err());
        assert!(o.provide_outputs("non-existing", OutputValues::new()).is_err());
    }

    #[test]
    fn transitions_outside_the_lifecycle_are_rejected() {
        let mut o = orchestrator(&router());
        assert!(o.set_working("left-path").is_err());
        assert!(o.set_waiting("left-path").is_err());
        assert!(o.set_interrupted("choose-path").is_err());
        assert!(o
            .provide_outputs("treasure", outputs(json!({"result": 1})))
            .is_err());
    }

    #[test]
    fn follows_the_lifecycle() {
        let mut o = orchestrator(&router());
        o.set_working("choose-path").unwrap();
        assert!(o.working());
        assert_tasks(&o, &[]);
        o.set_waiting("choose-path").unwrap();
        assert_tasks(&o, &[]);

        assert!(o
            .provide_outputs("choose-path", outputs(json!({"left": "left"})))
            .is_err());
        assert_tasks(&o, &[]);

        o.set_working("choose-path").unwrap();
        let progress = o
            .provide_outputs("choose-path", outputs(json!({"left": "left"})))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_tasks(&o, &["left-path"]);

        o.set_working("left-path").unwrap();
        o.set_interrupted("left-path").unwrap();
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Interrupted),
                ("right-path", Skipped),
                ("treasure", Skipped),
                ("dragon", Skipped),
            ],
        );
        assert!(o.failed());
        assert!(!o.working());
    }

    #[test]
    fn repeated_transitions_are_idempotent() {
        let mut o = orchestrator(&router());
        o.set_working("choose-path").unwrap();
        o.set_working("choose-path").unwrap();
        o.set_waiting("choose-path").unwrap();
        o.set_waiting("choose-path").unwrap();
        assert_eq!(o.node_state("choose-path"), Some(Waiting));
    }
}

mod failures {
    use super::*;

    #[test]
    fn late_failure_in_the_same_stage_is_recorded() {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "l", "right": "r"})))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Advanced);

        o.provide_outputs("left-channel", outputs(json!({"$error": "Failed left channel"})))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Finished);

        o.provide_outputs("right-channel", outputs(json!({"$error": "Failed right channel"})))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Finished);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Failed),
                ("right-channel", Failed),
                ("mixer", Skipped),
            ],
        );
    }

    #[test]
    fn late_success_after_failure_is_recorded() {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "l", "right": "r"})))
            .unwrap();
        o.provide_outputs("left-channel", outputs(json!({"$error": "Failed left channel"})))
            .unwrap();

        o.provide_outputs("right-channel", outputs(json!({"processed": "r"})))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Finished);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Failed),
                ("right-channel", Succeeded),
                ("mixer", Skipped),
            ],
        );
    }
}

mod restart {
    use super::*;

    fn diamond_at_mixer() -> Orchestrator {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "l", "right": "r"})))
            .unwrap();
        o.provide_outputs("left-channel", outputs(json!({"processed": "pl"})))
            .unwrap();
        o.provide_outputs("right-channel", outputs(json!({"processed": "pr"})))
            .unwrap();
        assert_tasks(&o, &["mixer"]);
        o
    }

    #[test]
    fn restart_at_node_keeps_sibling_results() {
        let mut o = diamond_at_mixer();

        o.restart_at_node("left-channel").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Advanced);
        assert_tasks(&o, &["left-channel"]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Ready),
                ("right-channel", Succeeded),
                ("mixer", Inactive),
            ],
        );
        assert_eq!(
            o.task_from_id("left-channel").unwrap().inputs,
            outputs(json!({"signal": "l"}))
        );

        o.restart_at_node("right-channel").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Advanced);
        assert_tasks(&o, &["left-channel", "right-channel"]);

        // restarting a ready node changes nothing
        o.restart_at_node("right-channel").unwrap();
        o.restart_at_node("left-channel").unwrap();
        assert_tasks(&o, &["left-channel", "right-channel"]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Ready),
                ("right-channel", Ready),
                ("mixer", Inactive),
            ],
        );

        o.restart_at_node("input").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Initial);
        assert_tasks(&o, &["input"]);
        assert_states(
            &o,
            &[
                ("input", Ready),
                ("left-channel", Inactive),
                ("right-channel", Inactive),
                ("mixer", Inactive),
            ],
        );
    }

    #[test]
    fn restart_rejects_unknown_and_inactive_nodes() {
        let mut o = orchestrator(&diamond());
        assert!(o.restart_at_node("nope").is_err());
        assert!(o.restart_at_node("mixer").is_err());
        assert!(o.restart_at_stage(2).is_err());
    }

    #[test]
    fn converge_graph_restarts_at_the_successful_node() {
        let mut o = orchestrator(&converge());
        o.provide_outputs("start-a", outputs(json!({"$error": "a fail"})))
            .unwrap();
        o.provide_outputs("start-b", outputs(json!({"$error": "b fail"})))
            .unwrap();
        o.provide_outputs("start-c", outputs(json!({"context": "c success"})))
            .unwrap();
        assert_tasks(&o, &[]);
        assert_states(
            &o,
            &[
                ("start-a", Failed),
                ("start-b", Failed),
                ("start-c", Succeeded),
                ("end", Skipped),
            ],
        );

        o.restart_at_node("start-c").unwrap();
        assert_tasks(&o, &["start-c"]);
        assert_states(
            &o,
            &[
                ("start-a", Failed),
                ("start-b", Failed),
                ("start-c", Ready),
                ("end", Skipped),
            ],
        );
    }

    #[test]
    fn sequential_restart_resets_later_stages() {
        let mut o = orchestrator(&simple_sequence());
        for id in ["a", "b", "c", "d"] {
            o.provide_outputs(id, outputs(json!({"context": id}))).unwrap();
        }
        assert_eq!(o.progress(), OrchestratorProgress::Finished);

        o.restart_at_node("c").unwrap();
        assert_states(
            &o,
            &[("a", Succeeded), ("b", Succeeded), ("c", Ready), ("d", Inactive)],
        );

        o.restart_at_node("b").unwrap();
        assert_states(
            &o,
            &[("a", Succeeded), ("b", Ready), ("c", Inactive), ("d", Inactive)],
        );
    }
}

mod carried_over_runs {
    use super::*;

    fn diamond_after_input() -> Orchestrator {
        let mut o = orchestrator(&diamond());
        o.provide_outputs("input", outputs(json!({"left": "left-audio", "right": "right-audio"})))
            .unwrap();
        assert_tasks(&o, &["left-channel", "right-channel"]);
        o
    }

    #[test]
    fn restart_while_a_sibling_is_working_then_sibling_finishes_first() {
        let previous = diamond_after_input();
        let mut o = orchestrator(&diamond());
        o.update_from(&previous).unwrap();

        o.set_working("left-channel").unwrap();
        assert_tasks(&o, &["right-channel"]);
        o.provide_outputs("right-channel", outputs(json!({"$error": "Right Audio Failed"})))
            .unwrap();
        assert_tasks(&o, &[]);
        assert_eq!(o.progress(), OrchestratorProgress::Working);

        o.restart_at_node("right-channel").unwrap();
        assert_tasks(&o, &["right-channel"]);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Working),
                ("right-channel", Ready),
                ("mixer", Inactive),
            ],
        );

        o.set_working("right-channel").unwrap();
        o.provide_outputs("left-channel", outputs(json!({"processed": "Left Audio"})))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Working);
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Succeeded),
                ("right-channel", Working),
                ("mixer", Inactive),
            ],
        );

        o.provide_outputs("right-channel", outputs(json!({"processed": "Right Audio"})))
            .unwrap();
        assert_tasks(&o, &["mixer"]);
    }

    #[test]
    fn restart_while_a_sibling_is_working_then_restarted_finishes_first() {
        let previous = diamond_after_input();
        let mut o = orchestrator(&diamond());
        o.update_from(&previous).unwrap();

        o.set_working("left-channel").unwrap();
        o.provide_outputs("right-channel", outputs(json!({"$error": "Right Audio Failed"})))
            .unwrap();
        o.restart_at_node("right-channel").unwrap();
        o.set_working("right-channel").unwrap();
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Working),
                ("right-channel", Working),
                ("mixer", Inactive),
            ],
        );

        o.provide_outputs("right-channel", outputs(json!({"processed": "Right Audio"})))
            .unwrap();
        assert_tasks(&o, &[]);

        o.provide_outputs("left-channel", outputs(json!({"processed": "Left Audio"})))
            .unwrap();
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Succeeded),
                ("right-channel", Succeeded),
                ("mixer", Ready),
            ],
        );
        assert_tasks(&o, &["mixer"]);
    }

    #[test]
    fn restart_keeps_a_waiting_sibling_waiting() {
        let previous = diamond_after_input();
        let mut o = orchestrator(&diamond());
        o.update_from(&previous).unwrap();

        o.provide_outputs("right-channel", outputs(json!({"processed": "Right Audio"})))
            .unwrap();
        o.set_working("left-channel").unwrap();
        o.set_waiting("left-channel").unwrap();
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Waiting),
                ("right-channel", Succeeded),
                ("mixer", Inactive),
            ],
        );

        o.restart_at_node("right-channel").unwrap();
        assert_states(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Waiting),
                ("right-channel", Ready),
                ("mixer", Inactive),
            ],
        );
    }

    #[test]
    fn changed_topology_interrupts_the_first_node() {
        let previous = diamond_after_input();
        let mut o = orchestrator(&router());
        o.update_from(&previous).unwrap();
        assert_eq!(o.node_state("choose-path"), Some(Interrupted));
        assert_tasks(&o, &[]);
    }

    #[test]
    fn fresh_orchestrator_carries_nothing_from_an_empty_one() {
        let empty = orchestrator(&GraphDescriptor::new());
        let mut o = orchestrator(&diamond());
        o.update_from(&empty).unwrap();
        assert_tasks(&o, &["input"]);
    }
}

mod rerun_at_will {
    use super::*;

    #[test]
    fn nodes_of_a_finished_stage_can_be_rerun_individually() {
        let mut o = orchestrator(&converge());
        o.provide_outputs("start-a", outputs(json!({"$error": "a fail"})))
            .unwrap();
        o.provide_outputs("start-b", outputs(json!({"$error": "b fail"})))
            .unwrap();
        o.provide_outputs("start-c", outputs(json!({"context": "c success"})))
            .unwrap();

        o.provide_outputs("start-c", outputs(json!({"context": "c another success"})))
            .unwrap();
        assert_states(
            &o,
            &[
                ("start-a", Failed),
                ("start-b", Failed),
                ("start-c", Succeeded),
                ("end", Skipped),
            ],
        );
        assert_eq!(o.progress(), OrchestratorProgress::Finished);

        o.provide_outputs("start-b", outputs(json!({"context": "b success"})))
            .unwrap();
        assert_eq!(o.node_state("start-b"), Some(Succeeded));
        assert_eq!(o.node_state("end"), Some(Skipped));
        assert_eq!(o.progress(), OrchestratorProgress::Finished);

        o.provide_outputs("start-a", outputs(json!({"context": "a success"})))
            .unwrap();
        assert_states(
            &o,
            &[
                ("start-a", Succeeded),
                ("start-b", Succeeded),
                ("start-c", Succeeded),
                ("end", Ready),
            ],
        );
        assert_eq!(o.progress(), OrchestratorProgress::Advanced);
        assert_eq!(
            o.task_from_id("end").unwrap().inputs,
            outputs(json!({
                "in-1": "a success",
                "in-2": "b success",
                "in-3": "c another success"
            }))
        );
    }
}

#[test]
fn full_state_records_stage_and_results() {
    let mut o = orchestrator(&simple_sequence());
    o.provide_outputs("a", outputs(json!({"context": "a"}))).unwrap();
    let records = o.full_state();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].stage, 0);
    assert_eq!(records[0].outputs, Some(outputs(json!({"context": "a"}))));
    assert_eq!(records[1].stage, 1);
    assert_eq!(records[1].inputs, Some(outputs(json!({"context": "a"}))));
    assert_eq!(records[3].inputs, None);
}
