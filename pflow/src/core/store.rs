//! Mutable shared store threaded through one workflow execution.
//!
//! The store is a flat string-keyed map. Per-node outputs live under the node
//! id (`shared["fetch"]["result"]`); reserved system keys use a
//! double-underscore prefix. The store is never rolled back: a repair cycle
//! hands the *mutated* store to the next attempt so already-performed side
//! effects (a commit already made, a message already posted) are not redone.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Checkpoint written by the pipeline runtime: `{completed_nodes, failed_node}`.
pub const EXECUTION_KEY: &str = "__execution__";
/// Per-node warning messages accumulated during a run.
pub const WARNINGS_KEY: &str = "__warnings__";
/// Per-node unresolved-template diagnostics.
pub const TEMPLATE_ERRORS_KEY: &str = "__template_errors__";
/// LLM call summaries recorded during the run.
pub const LLM_CALLS_KEY: &str = "__llm_calls__";
/// Node ids touched by repair, accumulated across cycles.
pub const MODIFIED_NODES_KEY: &str = "__modified_nodes__";
/// Set by the runtime when a failure is known to be unfixable by repair.
pub const NON_REPAIRABLE_KEY: &str = "__non_repairable_error__";
/// Execution-parameter key listing parameter names that must be redacted.
pub const ENV_PARAM_NAMES_KEY: &str = "__env_param_names__";

/// Execution checkpoint recorded by the pipeline runtime.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Checkpoint {
    pub completed_nodes: Vec<String>,
    pub failed_node: Option<String>,
}

/// The single mutable context threaded through one execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SharedStore {
    entries: Map<String, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    /// Merge flat execution parameters into the store root. These seed
    /// template values before the pipeline runs.
    pub fn merge_params(&mut self, params: &Map<String, Value>) {
        for (key, value) in params {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Namespaced output of a node, when present and an object.
    pub fn node_output(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.entries.get(node_id).and_then(Value::as_object)
    }

    /// Parse the `__execution__` checkpoint, if the runtime recorded one.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let value = self.entries.get(EXECUTION_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn set_checkpoint(&mut self, checkpoint: &Checkpoint) {
        if let Ok(value) = serde_json::to_value(checkpoint) {
            self.entries.insert(EXECUTION_KEY.to_string(), value);
        }
    }

    /// Per-node warnings, in deterministic (node id) order.
    pub fn warnings(&self) -> BTreeMap<String, String> {
        object_of_strings(self.entries.get(WARNINGS_KEY))
    }

    /// Per-node unresolved-template messages, in deterministic order.
    ///
    /// Each value is the diagnostic object's `message` field when present,
    /// else the raw value rendered as a string.
    pub fn template_errors(&self) -> BTreeMap<String, String> {
        let Some(object) = self.entries.get(TEMPLATE_ERRORS_KEY).and_then(Value::as_object) else {
            return BTreeMap::new();
        };
        object
            .iter()
            .map(|(node_id, value)| {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| stringify(value));
                (node_id.clone(), message)
            })
            .collect()
    }

    pub fn has_warnings(&self) -> bool {
        self.entries
            .get(WARNINGS_KEY)
            .and_then(Value::as_object)
            .is_some_and(|object| !object.is_empty())
    }

    pub fn has_template_errors(&self) -> bool {
        self.entries
            .get(TEMPLATE_ERRORS_KEY)
            .and_then(Value::as_object)
            .is_some_and(|object| !object.is_empty())
    }

    /// Whether the runtime flagged the failure as unfixable by repair.
    pub fn non_repairable(&self) -> bool {
        self.entries
            .get(NON_REPAIRABLE_KEY)
            .is_some_and(|value| value.as_bool().unwrap_or(true))
    }

    /// LLM call summaries recorded during the run.
    pub fn llm_calls(&self) -> Vec<Value> {
        self.entries
            .get(LLM_CALLS_KEY)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Node ids touched by repair so far.
    pub fn modified_nodes(&self) -> Vec<String> {
        self.entries
            .get(MODIFIED_NODES_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append repaired node ids, deduplicating while preserving first-seen
    /// order. Never replaces earlier entries.
    pub fn record_modified_nodes<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut current = self.modified_nodes();
        for id in ids {
            let id = id.into();
            if !current.contains(&id) {
                current.push(id);
            }
        }
        let values = current.into_iter().map(Value::String).collect();
        self.entries
            .insert(MODIFIED_NODES_KEY.to_string(), Value::Array(values));
    }

    /// Parameter names that must be redacted before persistence.
    pub fn env_param_names(&self) -> Vec<String> {
        self.entries
            .get(ENV_PARAM_NAMES_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn object_of_strings(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(object) = value.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let text = value
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| stringify(value));
            (key.clone(), text)
        })
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
