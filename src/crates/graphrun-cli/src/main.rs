use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use graphrun_cli::commands::{self, OutputFormat, RunOptions};
use graphrun_core::{condense, RunConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrun")]
#[command(about = "Validate, plan and run port-to-port graph documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "GRAPHRUN_LOG", default_value = "info", global = true)]
    log_level: String,

    /// Run limits file (YAML or TOML)
    #[arg(long, env = "GRAPHRUN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the node invocation budget
    #[arg(long, env = "GRAPHRUN_MAX_STEPS", global = true)]
    max_steps: Option<usize>,

    /// Override how long an input may wait for an answer
    #[arg(long, env = "GRAPHRUN_INPUT_TIMEOUT_MS", global = true)]
    input_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that every edge endpoint names a node
    Validate {
        /// Graph document (JSON or YAML)
        file: PathBuf,
    },

    /// Print the stage layout of a graph
    Plan {
        file: PathBuf,

        /// Fold cycles into single nodes before planning
        #[arg(long)]
        condense: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the graph with its cycles folded into sub-graphs
    Condense {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Run a graph with the demo handlers, printing events as JSON lines
    Run {
        file: PathBuf,

        /// Value for input nodes, as key=value (repeatable)
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Values for input nodes as one JSON object
        #[arg(long = "inputs")]
        inputs_json: Option<String>,

        /// Resume from a saved snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Save a checkpoint here if the run stops at an unanswered input (`.bin` for bincode)
        #[arg(long)]
        save_snapshot: Option<PathBuf>,
    },
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };
        if let Some(max_steps) = self.max_steps {
            config = config.with_max_steps(max_steps);
        }
        if let Some(ms) = self.input_timeout_ms {
            config = config.with_input_timeout(Duration::from_millis(ms));
        }
        config.check()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Validate { file } => {
            let issues = commands::validate(file)?;
            if !issues.is_empty() {
                for issue in &issues {
                    eprintln!("  - {}", issue);
                }
                bail!("{} has {} issue(s)", file.display(), issues.len());
            }
            println!("{} is valid", file.display());
        }
        Commands::Plan {
            file,
            condense,
            format,
        } => {
            let graph = commands::load_graph(file)?;
            let plan = commands::plan(&graph, *condense)?;
            println!("{}", commands::render(&plan, *format)?);
        }
        Commands::Condense { file, format } => {
            let graph = commands::load_graph(file)?;
            println!("{}", commands::render(&condense(&graph), *format)?);
        }
        Commands::Run {
            file,
            inputs,
            inputs_json,
            snapshot,
            save_snapshot,
        } => {
            let graph = commands::load_graph(file)?;
            let options = RunOptions {
                inputs: commands::parse_inputs(inputs, inputs_json.as_deref())?,
                config: cli.run_config()?,
                snapshot: snapshot.as_deref().map(commands::load_snapshot).transpose()?,
                save_snapshot: save_snapshot.clone(),
            };
            let summary = commands::run(graph, options, &mut std::io::stdout().lock()).await?;
            tracing::info!(
                events = summary.events,
                outputs = summary.outputs.len(),
                suspended = summary.suspended,
                "run finished"
            );
            if let Some(failure) = summary.failure {
                bail!("run failed: {}", failure);
            }
        }
    }

    Ok(())
}
