//! Implementations behind the `graphrun` subcommands.

use crate::demo::demo_kit;
use anyhow::{bail, Context, Result};
use graphrun_checkpoint::{read_record, write_record, CheckpointRecord};
use graphrun_core::{
    condense, create_plan, ExecutionPlan, GraphDescriptor, HandlerRegistry, InputValues,
    OutputValues, RunConfig, RunEventKind, Runner, StackSnapshot,
};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

pub fn load_graph(path: &Path) -> Result<GraphDescriptor> {
    GraphDescriptor::from_file(path)
        .with_context(|| format!("failed to load graph document {}", path.display()))
}

/// Structural issues of the document at `path`; empty when it is valid.
pub fn validate(path: &Path) -> Result<Vec<String>> {
    let graph = load_graph(path)?;
    let issues = graph.validation_issues();
    tracing::debug!(file = %path.display(), issues = issues.len(), "validated graph");
    Ok(issues)
}

pub fn plan(graph: &GraphDescriptor, fold_cycles: bool) -> Result<ExecutionPlan> {
    let plan = if fold_cycles {
        create_plan(&condense(graph))
    } else {
        create_plan(graph)
    };
    plan.context("unable to plan graph (try --condense if it has cycles)")
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

/// Merge `--inputs` JSON and `--input key=value` pairs; pairs win.
///
/// A value that parses as JSON is used as such, anything else is a string.
pub fn parse_inputs(pairs: &[String], json: Option<&str>) -> Result<InputValues> {
    let mut inputs = match json {
        Some(source) => match serde_json::from_str::<Value>(source).context("--inputs is not valid JSON")? {
            Value::Object(map) => map,
            other => bail!("--inputs must be a JSON object, got {}", other),
        },
        None => InputValues::new(),
    };
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("--input expects key=value, got '{}'", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.trim().to_string(), value);
    }
    Ok(inputs)
}

#[derive(Debug, Default)]
pub struct RunOptions {
    pub inputs: InputValues,
    pub config: RunConfig,
    /// Continue from a checkpoint saved by an earlier run
    pub snapshot: Option<CheckpointRecord>,
    /// Where to write a checkpoint when the run stops at an unanswered input
    pub save_snapshot: Option<PathBuf>,
}

#[derive(Debug, Default, PartialEq)]
pub struct RunSummary {
    pub events: usize,
    pub outputs: Vec<OutputValues>,
    /// Stopped at an input nobody answered
    pub suspended: bool,
    pub failure: Option<String>,
}

pub fn demo_registry() -> HandlerRegistry {
    HandlerRegistry::new().with_kit(demo_kit())
}

/// Drive `graph` with the demo kit, writing every event to `out` as a JSON line.
///
/// Each input is answered with the supplied inputs. With nothing supplied the
/// run stops at the first input and, if asked to, saves its snapshot.
pub async fn run(graph: GraphDescriptor, options: RunOptions, out: &mut impl Write) -> Result<RunSummary> {
    let RunOptions {
        inputs,
        config,
        snapshot,
        save_snapshot,
    } = options;
    let (run_id, step) = match &snapshot {
        Some(record) => (record.run_id.clone(), record.step + 1),
        None => (graph.title.clone().unwrap_or_else(|| "graphrun".to_string()), 1),
    };
    let mut runner = match snapshot {
        Some(record) => {
            let snapshot: StackSnapshot = record.snapshot()?;
            Runner::resume(graph, demo_registry(), config, snapshot)
                .context("snapshot does not fit this graph")?
        }
        None => Runner::new(graph, demo_registry(), config),
    };

    let mut summary = RunSummary::default();
    while let Some(event) = runner.next().await {
        summary.events += 1;
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        match &event.kind {
            RunEventKind::Input { .. } if !inputs.is_empty() => {
                runner.provide_inputs(inputs.clone())?;
            }
            RunEventKind::Input { node, .. } => {
                summary.suspended = true;
                if let Some(path) = &save_snapshot {
                    let record = CheckpointRecord::new(run_id.clone(), step, &runner.state())?
                        .with_metadata("node", node.id.clone());
                    write_record(path, &record)
                        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
                    tracing::info!(node = %node.id, file = %path.display(), "run suspended, snapshot saved");
                } else {
                    tracing::info!(node = %node.id, "run suspended waiting for input");
                }
                break;
            }
            RunEventKind::Output { outputs, .. } => summary.outputs.push(outputs.clone()),
            _ => {}
        }
    }
    summary.failure = runner.failure().map(ToString::to_string);
    Ok(summary)
}

/// Read a checkpoint written by `run --save-snapshot` (JSON, or bincode for `.bin`).
pub fn load_snapshot(path: &Path) -> Result<CheckpointRecord> {
    read_record(path).with_context(|| format!("failed to load snapshot {}", path.display()))
}
