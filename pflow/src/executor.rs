//! Single-run workflow executor.
//!
//! Runs a compiled pipeline exactly once against a shared store and converts
//! its loosely-typed outcome into a typed [`ExecutionResult`]. Retry and
//! repair policy live in [`crate::orchestrate`]; this module knows nothing
//! about repair beyond tolerating a resume store.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::errors::{error_from_exception, synthesize_runtime_error};
use crate::core::ir::WorkflowIR;
use crate::core::outcome::{ExecutionResult, ExecutionStatus, FlowOutcome, WarningRecord};
use crate::core::store::SharedStore;
use crate::io::collect::{ExecutionCollector, emit};
use crate::io::compiler::{Compiler, is_fatal};

/// Per-invocation execution options.
#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    /// Explicit store key to read the user-facing output from.
    pub output_key: Option<String>,
    /// Whether the compiler should run its own validation pass. Turned off
    /// on a repair retry that was already validated.
    pub validate: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            output_key: None,
            validate: true,
        }
    }
}

/// Runs one compiled pipeline and classifies the outcome.
pub struct Executor {
    compiler: Arc<dyn Compiler>,
    collectors: Vec<Arc<dyn ExecutionCollector>>,
}

impl Executor {
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            collectors: Vec::new(),
        }
    }

    pub fn with_collectors(
        compiler: Arc<dyn Compiler>,
        collectors: Vec<Arc<dyn ExecutionCollector>>,
    ) -> Self {
        Self {
            compiler,
            collectors,
        }
    }

    /// Execute the workflow once.
    ///
    /// `params` are merged into the store root before the run and seed
    /// template values. `resume` supplies a prior execution's store so a
    /// repaired workflow continues from where the failed one stopped.
    ///
    /// Status determination: a pipeline error outcome is FAILED regardless of
    /// anything else; a clean outcome with warnings or unresolved templates
    /// is DEGRADED (with `success = true`); otherwise SUCCESS.
    ///
    /// Compilation and fatal runtime errors propagate to the caller; all
    /// other failures during the run become a FAILED result with one
    /// classified error record.
    #[instrument(skip_all, fields(nodes = ir.nodes.len(), validate = options.validate, resume = resume.is_some()))]
    pub fn execute(
        &self,
        ir: &WorkflowIR,
        params: &Map<String, Value>,
        resume: Option<SharedStore>,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        emit(&self.collectors, "record_workflow_start", |c| {
            c.record_workflow_start()
        });

        let mut store = resume.unwrap_or_default();
        store.merge_params(params);

        let run: Result<FlowOutcome> = self
            .compiler
            .compile(ir, params, options.validate)
            .and_then(|pipeline| pipeline.run(&mut store));

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "run failed with recoverable error");
                let record = error_from_exception(&err);
                let mut result =
                    ExecutionResult::failed(vec![record], None, store, ir.nodes.len());
                result.duration = start.elapsed();
                emit(&self.collectors, "record_workflow_end", |c| {
                    c.record_workflow_end(ExecutionStatus::Failed, result.duration)
                });
                return Ok(result);
            }
        };

        let action_result = outcome.action();
        let status = if outcome.is_error() {
            ExecutionStatus::Failed
        } else if store.has_warnings() || store.has_template_errors() {
            ExecutionStatus::Degraded
        } else {
            ExecutionStatus::Success
        };
        let success = status != ExecutionStatus::Failed;

        let errors = if status == ExecutionStatus::Failed {
            vec![synthesize_runtime_error(action_result.as_deref(), &store)]
        } else {
            Vec::new()
        };
        let warnings = collect_warnings(&store);
        let output_data = extract_output_data(ir, &store, options.output_key.as_deref());
        let metrics_summary = self.metrics_summary(&store);
        let duration = start.elapsed();

        emit(&self.collectors, "record_workflow_end", |c| {
            c.record_workflow_end(status, duration)
        });
        debug!(?status, duration_ms = duration.as_millis() as u64, "execution finished");

        Ok(ExecutionResult {
            success,
            status,
            shared_after: store,
            errors,
            warnings,
            action_result,
            node_count: ir.nodes.len(),
            duration,
            output_data,
            metrics_summary,
            repaired_workflow_ir: None,
            repair_attempted: false,
            repair_reason: None,
        })
    }

    fn metrics_summary(&self, store: &SharedStore) -> Option<Value> {
        let llm_calls = store.llm_calls();
        self.collectors
            .iter()
            .find_map(|collector| collector.summary(&llm_calls))
    }
}

fn collect_warnings(store: &SharedStore) -> Vec<WarningRecord> {
    let mut warnings: Vec<WarningRecord> = store
        .warnings()
        .into_iter()
        .map(|(node_id, message)| WarningRecord {
            node_id: Some(node_id),
            message,
        })
        .collect();
    warnings.extend(
        store
            .template_errors()
            .into_iter()
            .map(|(node_id, message)| WarningRecord {
                node_id: Some(node_id),
                message,
            }),
    );
    warnings
}

/// Conventional store keys tried when no output is declared.
const CONVENTIONAL_OUTPUT_KEYS: &[&str] = &["result", "output", "response", "data"];

/// Extract the user-facing output value. Tried in order, first hit wins:
/// an explicit `output_key`; the first declared workflow output present in
/// the store; a conventional root key; the last node's namespaced
/// `result`/`output`/`response`.
fn extract_output_data(
    ir: &WorkflowIR,
    store: &SharedStore,
    output_key: Option<&str>,
) -> Option<Value> {
    if let Some(key) = output_key
        && let Some(value) = store.get(key)
    {
        return Some(value.clone());
    }

    for name in ir.outputs.keys() {
        if let Some(value) = store.get(name) {
            return Some(value.clone());
        }
    }

    for key in CONVENTIONAL_OUTPUT_KEYS {
        if let Some(value) = store.get(key) {
            return Some(value.clone());
        }
    }

    let last = ir.last_node()?;
    let output = store.node_output(&last.id)?;
    for key in ["result", "output", "response"] {
        if let Some(value) = output.get(key) {
            return Some(value.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ir::OutputSpec;
    use crate::core::store::{TEMPLATE_ERRORS_KEY, WARNINGS_KEY};
    use crate::io::compiler::CompilationError;
    use crate::test_support::{ScriptedCompiler, ScriptedRun, single_node_ir};
    use serde_json::json;

    fn run_scripted(
        ir: &WorkflowIR,
        runs: Vec<ScriptedRun>,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let compiler = Arc::new(ScriptedCompiler::new(runs));
        let executor = Executor::new(compiler);
        executor
            .execute(ir, &Map::new(), None, options)
            .expect("execute")
    }

    /// Clean run, no warnings: SUCCESS with an empty error list.
    #[test]
    fn clean_run_is_success() {
        let ir = single_node_ir();
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(None, vec![])],
            &ExecuteOptions::default(),
        );
        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(result.errors.is_empty());
        assert_eq!(result.node_count, 1);
    }

    /// Warnings present but no error outcome: DEGRADED, success stays true.
    #[test]
    fn warnings_degrade_but_do_not_fail() {
        let ir = single_node_ir();
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(
                None,
                vec![(WARNINGS_KEY.to_string(), json!({"step": "slow"}))],
            )],
            &ExecuteOptions::default(),
        );
        assert!(result.success);
        assert_eq!(result.status, ExecutionStatus::Degraded);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].node_id.as_deref(), Some("step"));
    }

    /// An error outcome is FAILED even when warnings are also present.
    #[test]
    fn failed_takes_priority_over_degraded() {
        let ir = single_node_ir();
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::error(
                "node crashed",
                vec![
                    (WARNINGS_KEY.to_string(), json!({"step": "slow"})),
                    (TEMPLATE_ERRORS_KEY.to_string(), json!({"step": {"message": "m"}})),
                ],
            )],
            &ExecuteOptions::default(),
        );
        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.action_result.as_deref(),
            Some("error: node crashed")
        );
    }

    #[test]
    fn recoverable_run_error_becomes_failed_result() {
        let ir = single_node_ir();
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::recoverable("subprocess misbehaved")],
            &ExecuteOptions::default(),
        );
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("subprocess misbehaved"));
    }

    /// Compilation failures must propagate, never be absorbed into a
    /// repair-eligible FAILED result.
    #[test]
    fn compilation_error_propagates() {
        let ir = single_node_ir();
        let compiler = Arc::new(ScriptedCompiler::failing_compile("bad registry entry"));
        let executor = Executor::new(compiler);
        let err = executor
            .execute(&ir, &Map::new(), None, &ExecuteOptions::default())
            .expect_err("should propagate");
        assert!(err.downcast_ref::<CompilationError>().is_some());
    }

    #[test]
    fn output_extraction_priority() {
        let mut ir = single_node_ir();
        ir.outputs.insert(
            "summary".to_string(),
            OutputSpec {
                description: String::new(),
                source: "step.result".to_string(),
            },
        );

        // Explicit output_key wins.
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(
                None,
                vec![
                    ("picked".to_string(), json!("explicit")),
                    ("summary".to_string(), json!("declared")),
                    ("result".to_string(), json!("conventional")),
                ],
            )],
            &ExecuteOptions {
                output_key: Some("picked".to_string()),
                validate: true,
            },
        );
        assert_eq!(result.output_data, Some(json!("explicit")));

        // Declared output beats conventional keys.
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(
                None,
                vec![
                    ("summary".to_string(), json!("declared")),
                    ("result".to_string(), json!("conventional")),
                ],
            )],
            &ExecuteOptions::default(),
        );
        assert_eq!(result.output_data, Some(json!("declared")));

        // Last node's namespaced output is the final fallback.
        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(
                None,
                vec![("step".to_string(), json!({"response": "namespaced"}))],
            )],
            &ExecuteOptions::default(),
        );
        assert_eq!(result.output_data, Some(json!("namespaced")));
    }

    /// Declared outputs are probed in declaration order, not sorted order.
    #[test]
    fn declared_outputs_are_probed_in_declaration_order() {
        let mut ir = single_node_ir();
        for name in ["zebra", "alpha"] {
            ir.outputs.insert(
                name.to_string(),
                OutputSpec {
                    description: String::new(),
                    source: format!("step.{name}"),
                },
            );
        }

        let result = run_scripted(
            &ir,
            vec![ScriptedRun::done(
                None,
                vec![
                    ("alpha".to_string(), json!("declared-second")),
                    ("zebra".to_string(), json!("declared-first")),
                ],
            )],
            &ExecuteOptions::default(),
        );
        assert_eq!(result.output_data, Some(json!("declared-first")));
    }

    #[test]
    fn resume_store_is_carried_into_the_run() {
        let ir = single_node_ir();
        let mut resume = SharedStore::new();
        resume.insert("earlier", json!({"result": "kept"}));
        let compiler = Arc::new(ScriptedCompiler::new(vec![ScriptedRun::done(None, vec![])]));
        let executor = Executor::new(compiler);
        let result = executor
            .execute(&ir, &Map::new(), Some(resume), &ExecuteOptions::default())
            .expect("execute");
        assert_eq!(
            result.shared_after.get("earlier"),
            Some(&json!({"result": "kept"}))
        );
    }
}
