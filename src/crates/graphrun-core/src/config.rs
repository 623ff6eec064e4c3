//! Run configuration
//!
//! [`RunConfig`] controls the knobs of a traversal run that are not part of
//! the graph document. It can be built in code or loaded from a YAML or TOML
//! file:
//!
//! ```yaml
//! max_steps: 500
//! input_timeout_ms: 30000
//! interactive: true
//! ```

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_MAX_STEPS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on traversal results across all frames of one run
    pub max_steps: usize,
    /// Deadline for answering an input request, measured from the suspension
    pub input_timeout_ms: Option<u64>,
    /// Whether handlers may bubble input requests to the consumer
    pub interactive: bool,
    /// End the run at the first top-level output node
    pub stop_at_first_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            input_timeout_ms: None,
            interactive: true,
            stop_at_first_output: false,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_input_timeout(mut self, timeout: Duration) -> Self {
        self.input_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_stop_at_first_output(mut self, stop: bool) -> Self {
        self.stop_at_first_output = stop;
        self
    }

    pub fn input_timeout(&self) -> Option<Duration> {
        self.input_timeout_ms.map(Duration::from_millis)
    }

    /// Load from `.yaml`/`.yml` or `.toml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&source)?,
            Some("toml") => toml::from_str(&source)
                .map_err(|e| GraphError::Configuration(format!("{}: {}", path.display(), e)))?,
            other => {
                return Err(GraphError::Configuration(format!(
                    "unsupported config format {:?} for {}",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(GraphError::Configuration("max_steps must be positive".into()));
        }
        Ok(())
    }
}
