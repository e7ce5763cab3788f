//! Node-level diff between two workflow IRs.
//!
//! Used after a repair cycle to report which nodes the LLM touched. Output is
//! deterministic (node ids in lexicographic order).

use std::collections::BTreeMap;

use crate::core::ir::{NodeSpec, WorkflowIR};

/// Compute per-node change tags between an original and a repaired IR.
///
/// A node present only in `repaired` gets `["added"]`; only in `original`,
/// `["removed"]`. For nodes present in both, a changed type contributes
/// `"type"` and changed params contribute exactly one tag chosen by priority:
/// `"ignore_errors added"` when that key is newly present, else
/// `"command modified"` or `"prompt modified"` when those keys changed, else
/// `"params"`. Only the first matching param rule applies.
pub fn compute_workflow_diff(
    original: &WorkflowIR,
    repaired: &WorkflowIR,
) -> BTreeMap<String, Vec<String>> {
    let before: BTreeMap<&str, &NodeSpec> = original
        .nodes
        .iter()
        .map(|node| (node.id.as_str(), node))
        .collect();
    let after: BTreeMap<&str, &NodeSpec> = repaired
        .nodes
        .iter()
        .map(|node| (node.id.as_str(), node))
        .collect();

    let mut diff = BTreeMap::new();

    for (id, node) in &after {
        let Some(previous) = before.get(id) else {
            diff.insert((*id).to_string(), vec!["added".to_string()]);
            continue;
        };
        let mut changes = Vec::new();
        if previous.node_type != node.node_type {
            changes.push("type".to_string());
        }
        if previous.params != node.params {
            changes.push(param_change_tag(previous, node));
        }
        if !changes.is_empty() {
            diff.insert((*id).to_string(), changes);
        }
    }

    for id in before.keys() {
        if !after.contains_key(id) {
            diff.insert((*id).to_string(), vec!["removed".to_string()]);
        }
    }

    diff
}

fn param_change_tag(before: &NodeSpec, after: &NodeSpec) -> String {
    if !before.params.contains_key("ignore_errors") && after.params.contains_key("ignore_errors") {
        return "ignore_errors added".to_string();
    }
    if before.params.get("command") != after.params.get("command") {
        return "command modified".to_string();
    }
    if before.params.get("prompt") != after.params.get("prompt") {
        return "prompt modified".to_string();
    }
    "params".to_string()
}

/// Node ids touched by the repair, in deterministic order.
pub fn changed_node_ids(diff: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    diff.keys().cloned().collect()
}
