//! Typed outcomes for pipeline runs and workflow executions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::ErrorRecord;
use crate::core::ir::WorkflowIR;
use crate::core::store::SharedStore;

/// Terminal result of one compiled-pipeline run.
///
/// Replaces the loose "action string starting with `error`" convention with a
/// tagged result; the decision rule is unchanged (`Error` means FAILED).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The pipeline finished; carries the terminal action string, if any.
    Done(Option<String>),
    /// The pipeline finished in a failed state with a reason.
    Error(String),
}

impl FlowOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, FlowOutcome::Error(_))
    }

    /// Conventional action string surface for callers and display code.
    pub fn action(&self) -> Option<String> {
        match self {
            FlowOutcome::Done(action) => action.clone(),
            FlowOutcome::Error(reason) => Some(format!("error: {reason}")),
        }
    }
}

/// Tri-state execution status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    /// The run finished but produced warnings or unresolved templates.
    Degraded,
    Failed,
}

/// Warning surfaced from the shared store after a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub node_id: Option<String>,
    pub message: String,
}

/// The value returned from one executor invocation.
///
/// `success` stays `true` for [`ExecutionStatus::Degraded`]: a
/// completed-with-warnings run is not a failure. This dual-status surface is
/// intentional backward compatibility; boolean-only consumers see DEGRADED as
/// success, status-aware consumers can distinguish the two.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub status: ExecutionStatus,
    pub shared_after: SharedStore,
    pub errors: Vec<ErrorRecord>,
    pub warnings: Vec<WarningRecord>,
    /// Terminal action string from the compiled pipeline, if any.
    pub action_result: Option<String>,
    pub node_count: usize,
    pub duration: Duration,
    pub output_data: Option<Value>,
    pub metrics_summary: Option<Value>,
    /// Final IR after a successful run that required repair, so callers can
    /// persist the corrected workflow.
    pub repaired_workflow_ir: Option<WorkflowIR>,
    pub repair_attempted: bool,
    pub repair_reason: Option<String>,
}

impl ExecutionResult {
    /// Failed result shell with no pipeline run behind it (e.g. validation
    /// rejected the workflow before execution).
    pub fn failed(
        errors: Vec<ErrorRecord>,
        action_result: Option<String>,
        shared_after: SharedStore,
        node_count: usize,
    ) -> Self {
        Self {
            success: false,
            status: ExecutionStatus::Failed,
            shared_after,
            errors,
            warnings: Vec::new(),
            action_result,
            node_count,
            duration: Duration::ZERO,
            output_data: None,
            metrics_summary: None,
            repaired_workflow_ir: None,
            repair_attempted: false,
            repair_reason: None,
        }
    }
}
