//! Secret masking around handler dispatch.
//!
//! Nodes of a *secret source* type (for example a `secrets` node that reads
//! API keys) never hand their real values to the graph. Their outputs are
//! replaced with opaque placeholders of the form `SECRET_<32 hex digits>`
//! and the real values are kept in a vault shared by every wrapped handler.
//! Placeholders are swapped back for the real value only in inputs that an
//! allow-list entry `(node id, input pattern)` names; everywhere else the
//! graph, its events and its snapshots only ever see placeholders.
//!
//! The vault lives in memory and belongs to one interceptor (and its
//! clones). A value that is concealed again reuses its placeholder, so the
//! vault grows with the number of distinct secrets, not with the number of
//! runs; [`SecretInterceptor::clear`] empties it. A snapshot taken under one
//! interceptor only carries placeholders: resuming it in another process
//! needs an interceptor that has concealed the same values again, otherwise
//! allowed inputs receive the placeholder text.
//!
//! ```text
//!   secrets ──{key: SECRET_ab12..}──▶ fetch (allowed: key) ──▶ sees the real key
//!                                 └─▶ log                     ──▶ sees SECRET_ab12..
//! ```

use crate::error::{GraphError, Result};
use crate::graph::{InputValues, NodeId, OutputValues};
use crate::handler::{HandlerOutput, HandlerRegistry, NodeHandler, NodeHandlerContext};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Prefix of every placeholder the interceptor hands out
pub const SECRET_PREFIX: &str = "SECRET_";

type Vault = Arc<RwLock<HashMap<String, Value>>>;

#[derive(Debug)]
struct Policy {
    sources: HashSet<String>,
    allowed: Vec<(NodeId, Regex)>,
    placeholder: Regex,
}

impl Policy {
    fn reveals(&self, node: &str, port: &str) -> bool {
        self.allowed
            .iter()
            .any(|(id, pattern)| id == node && pattern.is_match(port))
    }
}

/// Wraps a registry so secret values stay out of the graph
#[derive(Debug, Clone)]
pub struct SecretInterceptor {
    sources: HashSet<String>,
    allowed: Vec<(NodeId, Regex)>,
    vault: Vault,
}

impl Default for SecretInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretInterceptor {
    pub fn new() -> Self {
        Self {
            sources: HashSet::new(),
            allowed: Vec::new(),
            vault: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Treat every output of nodes of `node_type` as secret.
    pub fn with_secret_source(mut self, node_type: impl Into<String>) -> Self {
        self.sources.insert(node_type.into());
        self
    }

    /// Reveal secrets to inputs of `node` whose port name matches `pattern`.
    pub fn allow(mut self, node: impl Into<NodeId>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            GraphError::Configuration(format!("invalid input pattern '{}': {}", pattern, e))
        })?;
        self.allowed.push((node.into(), regex));
        Ok(self)
    }

    /// Number of secrets currently held in the vault.
    pub fn secret_count(&self) -> usize {
        self.vault.read().map(|v| v.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    /// Forget every concealed value; placeholders handed out so far stop resolving.
    pub fn clear(&self) {
        match self.vault.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// A copy of `registry` whose handlers conceal and reveal secrets.
    pub fn wrap(&self, registry: &HandlerRegistry) -> Result<HandlerRegistry> {
        let policy = Arc::new(Policy {
            sources: self.sources.clone(),
            allowed: self.allowed.clone(),
            placeholder: Regex::new(&format!("{}[0-9a-f]{{32}}", SECRET_PREFIX))
                .map_err(|e| GraphError::Configuration(e.to_string()))?,
        });

        let mut wrapped = HandlerRegistry::new();
        for (node_type, inner) in registry.iter() {
            let handler = Intercepted {
                node_type: node_type.to_string(),
                inner: inner.clone(),
                policy: policy.clone(),
                vault: self.vault.clone(),
            };
            wrapped.register_handler(node_type, Arc::new(handler));
        }
        Ok(wrapped)
    }
}

struct Intercepted {
    node_type: String,
    inner: Arc<dyn NodeHandler>,
    policy: Arc<Policy>,
    vault: Vault,
}

impl NodeHandler for Intercepted {
    fn invoke(&self, inputs: InputValues, context: NodeHandlerContext) -> crate::handler::HandlerFuture {
        let node = context.descriptor.id.clone();
        let inputs = reveal_inputs(&self.policy, &self.vault, &node, inputs);
        let conceal = self.policy.sources.contains(&self.node_type);
        let vault = self.vault.clone();
        let future = self.inner.invoke(inputs, context);

        Box::pin(async move {
            let output = future.await?;
            if !conceal {
                return Ok(output);
            }
            Ok(match output {
                HandlerOutput::Values(values) => {
                    tracing::debug!(node = %node, count = values.len(), "concealing secret outputs");
                    HandlerOutput::Values(conceal_outputs(&vault, values))
                }
                other => other,
            })
        })
    }
}

fn reveal_inputs(policy: &Policy, vault: &Vault, node: &str, inputs: InputValues) -> InputValues {
    let secrets = match vault.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    if secrets.is_empty() {
        return inputs;
    }
    inputs
        .into_iter()
        .map(|(port, value)| {
            if policy.reveals(node, &port) {
                (port, reveal(&policy.placeholder, &secrets, value))
            } else {
                (port, value)
            }
        })
        .collect()
}

fn reveal(placeholder: &Regex, secrets: &HashMap<String, Value>, value: Value) -> Value {
    match value {
        Value::String(text) => {
            if let Some(secret) = secrets.get(&text) {
                return secret.clone();
            }
            let replaced = placeholder.replace_all(&text, |caps: &regex::Captures| {
                match secrets.get(&caps[0]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => caps[0].to_string(),
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| reveal(placeholder, secrets, v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, reveal(placeholder, secrets, v)))
                .collect(),
        ),
        other => other,
    }
}

fn conceal_outputs(vault: &Vault, outputs: OutputValues) -> OutputValues {
    let mut guard = match vault.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    outputs
        .into_iter()
        .map(|(port, value)| {
            let known = guard
                .iter()
                .find(|(_, secret)| **secret == value)
                .map(|(placeholder, _)| placeholder.clone());
            let placeholder = match known {
                Some(placeholder) => placeholder,
                None => {
                    let placeholder = format!("{}{}", SECRET_PREFIX, Uuid::new_v4().simple());
                    guard.insert(placeholder.clone(), value);
                    placeholder
                }
            };
            (port, Value::String(placeholder))
        })
        .collect()
}
