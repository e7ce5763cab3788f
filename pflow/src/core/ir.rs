//! Declarative workflow graph data model.
//!
//! A [`WorkflowIR`] is the wire form a planner (or a repair call) produces:
//! typed nodes, action-labelled edges, declared inputs and outputs. The IR is
//! owned by callers and may be replaced wholesale by a repair cycle; this
//! module only defines the shape and the fail-closed checks applied to
//! untrusted candidates.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single typed step in the workflow graph.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    /// Unique within the graph.
    pub id: String,
    /// Registry key naming the node implementation.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node parameters; values may contain `${node_id.field}` template
    /// references resolved against the shared store at run time.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Control-flow edge between two nodes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    /// Action label the upstream node must return for this edge to fire.
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "default".to_string()
}

/// Declared template variable the workflow expects to be supplied externally.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputSpec {
    pub description: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub required: bool,
    pub default: Option<Value>,
}

/// Declared workflow output pointing at a produced value.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSpec {
    pub description: String,
    pub source: String,
}

/// Declarative workflow graph.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowIR {
    pub ir_version: String,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    pub start_node: String,
    /// Declaration order is significant: output extraction probes declared
    /// outputs first-to-last, so these maps preserve insertion order.
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputSpec>,
}

impl WorkflowIR {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Last node in declaration order, used for conventional output lookup.
    pub fn last_node(&self) -> Option<&NodeSpec> {
        self.nodes.last()
    }

    /// Fail-closed shape checks applied to untrusted candidate IRs.
    ///
    /// A candidate violating any of these is unusable regardless of what the
    /// generator claimed: non-empty `ir_version`, non-empty `nodes`, every
    /// node has `id` and `type`, every edge has both `from` and `to`.
    pub fn shape_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.ir_version.trim().is_empty() {
            errors.push("missing ir_version".to_string());
        }
        if self.nodes.is_empty() {
            errors.push("workflow has no nodes".to_string());
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                errors.push(format!("node at index {index} is missing an id"));
            }
            if node.node_type.trim().is_empty() {
                errors.push(format!("node '{}' is missing a type", node.id));
            }
        }
        for (index, edge) in self.edges.iter().enumerate() {
            if edge.from.trim().is_empty() {
                errors.push(format!("edge at index {index} is missing 'from'"));
            }
            if edge.to.trim().is_empty() {
                errors.push(format!("edge at index {index} is missing 'to'"));
            }
        }
        errors
    }

    /// Referential checks: `start_node` and every edge endpoint must name an
    /// existing node.
    pub fn reference_errors(&self) -> Vec<String> {
        let ids: BTreeSet<&str> = self.nodes.iter().map(|node| node.id.as_str()).collect();
        let mut errors = Vec::new();
        if !self.start_node.is_empty() && !ids.contains(self.start_node.as_str()) {
            errors.push(format!(
                "start_node '{}' does not name an existing node",
                self.start_node
            ));
        }
        for edge in &self.edges {
            if !ids.contains(edge.from.as_str()) {
                errors.push(format!("edge references unknown node '{}'", edge.from));
            }
            if !ids.contains(edge.to.as_str()) {
                errors.push(format!("edge references unknown node '{}'", edge.to));
            }
        }
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(format!("duplicate node id '{}'", node.id));
            }
        }
        errors
    }
}
