//! Two-phase orchestration: validate (and statically repair), then execute
//! with a bounded runtime-repair loop.
//!
//! The loop is bounded three ways: a hard cap on executions, loop detection
//! via stable error signatures, and an immediate stop when the runtime flags
//! a failure as non-repairable. When repair is exhausted the caller gets the
//! FIRST failing result, not the last: later attempts ran against a workflow
//! the LLM already rewrote, so their errors describe a graph the user never
//! submitted.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::diff::{changed_node_ids, compute_workflow_diff};
use crate::core::errors::{ErrorCategory, ErrorRecord, ErrorSource, RepairError, normalize_errors};
use crate::core::ir::WorkflowIR;
use crate::core::outcome::ExecutionResult;
use crate::core::signature::error_signature;
use crate::core::store::SharedStore;
use crate::executor::{ExecuteOptions, Executor};
use crate::io::collect::{WorkflowManager, sanitize_params};
use crate::io::compiler::Compiler;
use crate::io::config::PflowConfig;
use crate::io::llm::CliModel;
use crate::io::validator::WorkflowValidator;
use crate::repair::{RepairOutcome, RepairService};

/// Validation errors surfaced to the caller before execution.
const MAX_REPORTED_VALIDATION_ERRORS: usize = 3;

/// Reason string attached when loop detection fires.
const LOOP_DETECTED_REASON: &str = "Could not automatically fix this issue";

/// One workflow run request.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub ir: WorkflowIR,
    /// Flat execution parameters, merged into the store root.
    pub params: Map<String, Value>,
    /// Repair mode: `false` is a plain validate-then-run.
    pub enable_repair: bool,
    /// Store from a previous execution to resume from.
    pub resume: Option<SharedStore>,
    /// Explicit store key to read the user-facing output from.
    pub output_key: Option<String>,
}

impl RunRequest {
    pub fn new(ir: WorkflowIR) -> Self {
        Self {
            ir,
            params: Map::new(),
            enable_repair: false,
            resume: None,
            output_key: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_repair(mut self) -> Self {
        self.enable_repair = true;
        self
    }

    pub fn with_resume(mut self, store: SharedStore) -> Self {
        self.resume = Some(store);
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

/// Coordinates validation, static repair, execution, and runtime repair.
pub struct Orchestrator {
    executor: Executor,
    repair: RepairService,
    validator: Arc<dyn WorkflowValidator>,
    manager: Option<Arc<dyn WorkflowManager>>,
    /// Bound on executions per run (repairs sit between executions, so
    /// `n` executions allow at most `n - 1` repair cycles).
    max_runtime_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        executor: Executor,
        repair: RepairService,
        validator: Arc<dyn WorkflowValidator>,
    ) -> Self {
        Self {
            executor,
            repair,
            validator,
            manager: None,
            max_runtime_attempts: 3,
        }
    }

    /// Wire an orchestrator from config, with repairs served by the
    /// configured structured-output CLI model.
    pub fn from_config(
        config: &PflowConfig,
        compiler: Arc<dyn Compiler>,
        validator: Arc<dyn WorkflowValidator>,
    ) -> Self {
        let model = Arc::new(CliModel::new(&config.llm));
        let repair = RepairService::new(model, validator.clone())
            .with_max_attempts(config.max_repair_attempts)
            .with_temperature(config.llm.temperature);
        Self::new(Executor::new(compiler), repair, validator)
            .with_max_runtime_attempts(config.max_runtime_attempts)
    }

    pub fn with_manager(mut self, manager: Arc<dyn WorkflowManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_max_runtime_attempts(mut self, bound: u32) -> Self {
        self.max_runtime_attempts = bound.max(1);
        self
    }

    /// Run a workflow to completion.
    ///
    /// Compilation and fatal runtime errors propagate as `Err`; every other
    /// path, including exhausted repair, returns `Ok` with a result.
    #[instrument(skip_all, fields(nodes = request.ir.nodes.len(), repair = request.enable_repair))]
    pub fn run(&self, request: RunRequest) -> Result<ExecutionResult> {
        if request.enable_repair {
            self.run_with_repair(request)
        } else {
            self.run_plain(request)
        }
    }

    /// Plain mode: one validation pass, one execution, no repair.
    fn run_plain(&self, request: RunRequest) -> Result<ExecutionResult> {
        let report = self
            .validator
            .validate(&request.ir, &request.params, false)?;
        if !report.is_valid() {
            return Ok(validation_failed_result(&request.ir, &report.errors));
        }

        let options = ExecuteOptions {
            output_key: request.output_key.clone(),
            validate: true,
        };
        let result = self
            .executor
            .execute(&request.ir, &request.params, request.resume, &options)?;
        if result.success {
            self.notify_manager(&request.ir, true, &request.params);
        }
        Ok(result)
    }

    /// Repair mode: static validation with LLM repair, then a bounded
    /// execute/repair loop.
    fn run_with_repair(&self, request: RunRequest) -> Result<ExecutionResult> {
        let mut current_ir = request.ir.clone();
        let mut statically_repaired_nodes: Vec<String> = Vec::new();

        // Phase 1: validate, repairing statically if needed.
        let report = self
            .validator
            .validate(&current_ir, &request.params, false)?;
        if !report.is_valid() {
            info!(errors = report.errors.len(), "workflow invalid, attempting static repair");
            let repair_errors: Vec<RepairError> = report
                .errors
                .iter()
                .cloned()
                .map(RepairError::Validation)
                .collect();
            match self
                .repair
                .repair_with_validation(&current_ir, &repair_errors, None, &request.params)?
            {
                RepairOutcome::Repaired { ir, attempts } => {
                    info!(attempts, "static repair produced a valid workflow");
                    let diff = compute_workflow_diff(&current_ir, &ir);
                    statically_repaired_nodes = changed_node_ids(&diff);
                    current_ir = ir;
                }
                RepairOutcome::Unrepaired { errors } => {
                    warn!("static repair exhausted, reporting validation failure");
                    return Ok(validation_failed_result(&current_ir, &errors));
                }
            }
        }

        // Phase 2: seed the store. A resume store is reused as-is; a fresh
        // store is pre-seeded with the phase 1 repair provenance.
        let mut store = match request.resume.clone() {
            Some(resume) => resume,
            None => {
                let mut fresh = SharedStore::new();
                if !statically_repaired_nodes.is_empty() {
                    fresh.record_modified_nodes(statically_repaired_nodes.iter().cloned());
                }
                fresh
            }
        };

        // Phase 3: execute, repairing at runtime within bounds.
        let options = ExecuteOptions {
            output_key: request.output_key.clone(),
            validate: false,
        };
        let mut first_failure: Option<ExecutionResult> = None;
        let mut last_signature: Option<String> = None;
        let mut runtime_repaired = false;
        let mut executions = 0u32;
        let repair_happened = |runtime: bool| runtime || !statically_repaired_nodes.is_empty();

        loop {
            let mut result =
                self.executor
                    .execute(&current_ir, &request.params, Some(store), &options)?;
            executions += 1;

            if result.success {
                result.repair_attempted = repair_happened(runtime_repaired);
                if runtime_repaired {
                    result.repaired_workflow_ir = Some(current_ir.clone());
                }
                self.notify_manager(&current_ir, true, &request.params);
                return Ok(result);
            }

            if result.shared_after.non_repairable() {
                warn!("runtime flagged failure as non-repairable, stopping");
                append_non_repairable_warnings(&mut result);
                result.repair_attempted = repair_happened(runtime_repaired);
                return Ok(result);
            }

            if first_failure.is_none() {
                first_failure = Some(result.clone());
            }

            let signature = error_signature(&result.errors);
            if last_signature.as_deref() == Some(signature.as_str()) {
                warn!(signature = %signature, "identical failure after repair, loop detected");
                result.repair_attempted = true;
                result.repair_reason = Some(LOOP_DETECTED_REASON.to_string());
                return Ok(result);
            }
            last_signature = Some(signature);

            if executions >= self.max_runtime_attempts {
                info!(executions, "execution bound reached");
                break;
            }

            let repair_errors: Vec<RepairError> = result
                .errors
                .iter()
                .cloned()
                .map(RepairError::Runtime)
                .collect();
            match self.repair.repair_with_validation(
                &current_ir,
                &repair_errors,
                Some(&result.shared_after),
                &request.params,
            )? {
                RepairOutcome::Repaired { ir, attempts } => {
                    info!(attempts, execution = executions, "runtime repair produced a candidate");
                    let diff = compute_workflow_diff(&current_ir, &ir);
                    // The next attempt resumes from the mutated store so
                    // completed side effects are not redone.
                    store = result.shared_after;
                    store.record_modified_nodes(changed_node_ids(&diff));
                    current_ir = ir;
                    runtime_repaired = true;
                }
                RepairOutcome::Unrepaired { .. } => {
                    warn!("runtime repair exhausted");
                    break;
                }
            }
        }

        let mut preserved = first_failure.expect("loop ran at least once");
        preserved.repair_attempted = repair_happened(runtime_repaired);
        Ok(preserved)
    }

    fn notify_manager(&self, ir: &WorkflowIR, success: bool, params: &Map<String, Value>) {
        let Some(manager) = &self.manager else {
            return;
        };
        let sanitized = sanitize_params(params);
        if let Err(err) = manager.record_execution(ir, success, &sanitized) {
            warn!(err = %format!("{err:#}"), "workflow manager notification failed");
        }
    }
}

/// Failed result for a workflow rejected before any execution.
fn validation_failed_result(ir: &WorkflowIR, errors: &[String]) -> ExecutionResult {
    let repair_errors: Vec<RepairError> = errors
        .iter()
        .take(MAX_REPORTED_VALIDATION_ERRORS)
        .cloned()
        .map(RepairError::Validation)
        .collect();
    ExecutionResult::failed(
        normalize_errors(&repair_errors),
        Some("validation_failed".to_string()),
        SharedStore::new(),
        ir.nodes.len(),
    )
}

/// Fold the failing run's warnings into the error list as non-repairable
/// records, so the caller sees why repair was refused.
fn append_non_repairable_warnings(result: &mut ExecutionResult) {
    let extra: Vec<ErrorRecord> = result
        .warnings
        .iter()
        .map(|warning| {
            ErrorRecord::new(
                ErrorSource::Runtime,
                ErrorCategory::NonRepairable,
                warning.message.clone(),
                warning.node_id.clone(),
                false,
            )
        })
        .collect();
    result.errors.extend(extra);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::validator::ValidationReport;
    use crate::test_support::{
        ScriptedCompiler, ScriptedModel, ScriptedRun, ScriptedValidator, single_node_ir,
    };

    fn orchestrator(
        runs: Vec<ScriptedRun>,
        validator: ScriptedValidator,
        model: ScriptedModel,
    ) -> Orchestrator {
        let validator = Arc::new(validator);
        Orchestrator::new(
            Executor::new(Arc::new(ScriptedCompiler::new(runs))),
            RepairService::new(Arc::new(model), validator.clone()),
            validator,
        )
    }

    /// Plain mode rejects an invalid workflow without executing, capping the
    /// reported errors.
    #[test]
    fn plain_mode_reports_validation_failure_without_executing() {
        let validator = ScriptedValidator::new(vec![ValidationReport::with_errors(vec![
            "one".to_string(),
            "two".to_string(),
            "three".to_string(),
            "four".to_string(),
        ])]);
        let orchestrator = orchestrator(Vec::new(), validator, ScriptedModel::new(Vec::new()));

        let result = orchestrator
            .run(RunRequest::new(single_node_ir()))
            .expect("run");
        assert!(!result.success);
        assert_eq!(result.action_result.as_deref(), Some("validation_failed"));
        assert_eq!(result.errors.len(), MAX_REPORTED_VALIDATION_ERRORS);
    }

    #[test]
    fn plain_mode_executes_valid_workflow() {
        let orchestrator = orchestrator(
            vec![ScriptedRun::done(None, vec![])],
            ScriptedValidator::clean(),
            ScriptedModel::new(Vec::new()),
        );
        let result = orchestrator
            .run(RunRequest::new(single_node_ir()))
            .expect("run");
        assert!(result.success);
        assert!(!result.repair_attempted);
    }
}
