//! End-to-end orchestration scenarios with scripted collaborators.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use pflow::core::errors::ErrorCategory;
use pflow::core::ir::WorkflowIR;
use pflow::core::store::{
    Checkpoint, ENV_PARAM_NAMES_KEY, NON_REPAIRABLE_KEY, SharedStore, WARNINGS_KEY,
};
use pflow::executor::Executor;
use pflow::io::collect::WorkflowManager;
use pflow::io::validator::ValidationReport;
use pflow::orchestrate::{Orchestrator, RunRequest};
use pflow::repair::RepairService;
use pflow::test_support::{
    ScriptedCompiler, ScriptedModel, ScriptedRun, ScriptedValidator, two_node_ir,
};

struct Harness {
    compiler: Arc<ScriptedCompiler>,
    model: Arc<ScriptedModel>,
    orchestrator: Orchestrator,
}

fn harness(
    runs: Vec<ScriptedRun>,
    validator: ScriptedValidator,
    model_responses: Vec<Value>,
) -> Harness {
    let compiler = Arc::new(ScriptedCompiler::new(runs));
    let model = Arc::new(ScriptedModel::new(model_responses));
    let validator = Arc::new(validator);
    let orchestrator = Orchestrator::new(
        Executor::new(compiler.clone()),
        RepairService::new(model.clone(), validator.clone()),
        validator,
    );
    Harness {
        compiler,
        model,
        orchestrator,
    }
}

/// A candidate the repair model might produce: same graph with the second
/// node's command changed.
fn repaired_candidate() -> WorkflowIR {
    let mut ir = two_node_ir();
    ir.nodes[1]
        .params
        .insert("command".to_string(), json!("git push --force-with-lease"));
    ir
}

fn candidate_json() -> Value {
    serde_json::to_value(repaired_candidate()).expect("serialize candidate")
}

#[test]
fn successful_run_needs_no_repair() {
    let h = harness(
        vec![ScriptedRun::done(
            Some("default"),
            vec![("result".to_string(), json!("done"))],
        )],
        ScriptedValidator::clean(),
        Vec::new(),
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(result.success);
    assert!(!result.repair_attempted);
    assert!(result.repaired_workflow_ir.is_none());
    assert_eq!(result.output_data, Some(json!("done")));
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.compiler.compile_calls(), 1);
}

#[test]
fn invalid_workflow_is_statically_repaired_then_executed() {
    let h = harness(
        vec![ScriptedRun::done(None, vec![])],
        ScriptedValidator::new(vec![ValidationReport::with_errors(vec![
            "edge references unknown node 'ghost'".to_string(),
        ])]),
        vec![candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(result.success);
    assert!(result.repair_attempted);
    // Static repair provenance lands in the store for downstream attempts.
    assert_eq!(result.shared_after.modified_nodes(), vec!["commit".to_string()]);
    assert_eq!(h.model.calls(), 1);
}

#[test]
fn static_repair_exhaustion_reports_validation_failure_without_executing() {
    let h = harness(
        Vec::new(),
        // Initial validation fails, and so does every candidate's validation.
        ScriptedValidator::new(vec![
            ValidationReport::with_errors(vec!["bad edge".to_string()]),
            ValidationReport::with_errors(vec!["bad edge".to_string()]),
            ValidationReport::with_errors(vec!["bad edge".to_string()]),
            ValidationReport::with_errors(vec!["bad edge".to_string()]),
        ]),
        vec![candidate_json(), candidate_json(), candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert_eq!(result.action_result.as_deref(), Some("validation_failed"));
    assert_eq!(h.compiler.compile_calls(), 0);
    assert_eq!(h.model.calls(), 3);
}

#[test]
fn runtime_failure_is_repaired_and_rerun() {
    let h = harness(
        vec![
            ScriptedRun::error(
                "push rejected",
                vec![
                    ("fetch".to_string(), json!({"result": "sha123"})),
                    (
                        "__execution__".to_string(),
                        json!({"completed_nodes": ["fetch"], "failed_node": "commit"}),
                    ),
                ],
            ),
            ScriptedRun::done(None, vec![("commit".to_string(), json!({"result": "pushed"}))]),
        ],
        ScriptedValidator::clean(),
        vec![candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(result.success);
    assert!(result.repair_attempted);
    assert_eq!(result.repaired_workflow_ir, Some(repaired_candidate()));
    // The second attempt resumed from the mutated store: the completed
    // node's output survived the repair cycle.
    assert_eq!(
        result.shared_after.get("fetch"),
        Some(&json!({"result": "sha123"}))
    );
    assert_eq!(result.shared_after.modified_nodes(), vec!["commit".to_string()]);
    assert_eq!(h.model.calls(), 1);
    assert_eq!(h.compiler.compile_calls(), 2);
}

/// The same error signature twice in a row means repair is making no
/// progress: stop without a third execution or a second repair call.
#[test]
fn identical_failure_after_repair_triggers_loop_detection() {
    let h = harness(
        vec![
            ScriptedRun::error("push rejected", vec![]),
            ScriptedRun::error("push rejected", vec![]),
        ],
        ScriptedValidator::clean(),
        vec![candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert!(result.repair_attempted);
    assert_eq!(
        result.repair_reason.as_deref(),
        Some("Could not automatically fix this issue")
    );
    assert_eq!(h.compiler.compile_calls(), 2);
    assert_eq!(h.model.calls(), 1);
}

/// Volatile message details (timestamps) must not defeat loop detection.
#[test]
fn loop_detection_sees_through_timestamps() {
    let h = harness(
        vec![
            ScriptedRun::error("push rejected at 10:45:23", vec![]),
            ScriptedRun::error("push rejected at 11:02:09", vec![]),
        ],
        ScriptedValidator::clean(),
        vec![candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert_eq!(
        result.repair_reason.as_deref(),
        Some("Could not automatically fix this issue")
    );
    assert_eq!(h.compiler.compile_calls(), 2);
}

/// Three executions and two repair cycles is the hard bound; the FIRST
/// failure is what the caller sees.
#[test]
fn exhausted_repair_preserves_the_first_failure() {
    let h = harness(
        vec![
            ScriptedRun::error("alpha went wrong", vec![]),
            ScriptedRun::error("beta went wrong", vec![]),
            ScriptedRun::error("gamma went wrong", vec![]),
        ],
        ScriptedValidator::clean(),
        vec![candidate_json(), candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert!(result.repair_attempted);
    assert!(result.errors[0].message.contains("alpha went wrong"));
    assert_eq!(h.compiler.compile_calls(), 3);
    assert_eq!(h.model.calls(), 2);
}

#[test]
fn unrepairable_candidate_ends_the_loop_with_the_first_failure() {
    let h = harness(
        vec![ScriptedRun::error("push rejected", vec![])],
        ScriptedValidator::clean(),
        // Model fails: generation failure is not retried.
        Vec::new(),
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert!(result.errors[0].message.contains("push rejected"));
    assert_eq!(h.compiler.compile_calls(), 1);
}

/// A runtime-flagged non-repairable failure short-circuits before any LLM
/// call, folding the run's warnings into the error list.
#[test]
fn non_repairable_flag_short_circuits_repair() {
    let h = harness(
        vec![ScriptedRun::error(
            "credentials rejected",
            vec![
                (NON_REPAIRABLE_KEY.to_string(), json!(true)),
                (
                    WARNINGS_KEY.to_string(),
                    json!({"commit": "authentication failed for remote"}),
                ),
            ],
        )],
        ScriptedValidator::clean(),
        vec![candidate_json()],
    );

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.compiler.compile_calls(), 1);
    let non_repairable: Vec<_> = result
        .errors
        .iter()
        .filter(|e| e.category == ErrorCategory::NonRepairable)
        .collect();
    assert_eq!(non_repairable.len(), 1);
    assert!(!non_repairable[0].fixable);
    assert_eq!(non_repairable[0].node_id.as_deref(), Some("commit"));
}

#[test]
fn resume_store_feeds_the_first_execution() {
    let h = harness(
        vec![ScriptedRun::done(None, vec![])],
        ScriptedValidator::clean(),
        Vec::new(),
    );

    let mut resume = SharedStore::new();
    resume.insert("fetch", json!({"result": "from the previous run"}));
    resume.set_checkpoint(&Checkpoint {
        completed_nodes: vec!["fetch".to_string()],
        failed_node: None,
    });

    let result = h
        .orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair().with_resume(resume))
        .expect("run");

    assert!(result.success);
    assert_eq!(
        result.shared_after.get("fetch"),
        Some(&json!({"result": "from the previous run"}))
    );
}

#[derive(Default)]
struct RecordingManager {
    calls: Mutex<Vec<(bool, Map<String, Value>)>>,
}

impl WorkflowManager for RecordingManager {
    fn record_execution(
        &self,
        _ir: &WorkflowIR,
        success: bool,
        sanitized_params: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((success, sanitized_params.clone()));
        Ok(())
    }
}

#[test]
fn manager_is_notified_on_success_with_redacted_params() {
    let compiler = Arc::new(ScriptedCompiler::new(vec![ScriptedRun::done(None, vec![])]));
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let validator = Arc::new(ScriptedValidator::clean());
    let manager = Arc::new(RecordingManager::default());
    let orchestrator = Orchestrator::new(
        Executor::new(compiler),
        RepairService::new(model, validator.clone()),
        validator,
    )
    .with_manager(manager.clone());

    let mut params = Map::new();
    params.insert("repo".to_string(), json!("octo/demo"));
    params.insert("gh_token".to_string(), json!("s3cret"));
    params.insert(ENV_PARAM_NAMES_KEY.to_string(), json!(["gh_token"]));

    let result = orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair().with_params(params))
        .expect("run");

    assert!(result.success);
    let calls = manager.calls.lock().expect("calls lock");
    assert_eq!(calls.len(), 1);
    let (success, recorded) = &calls[0];
    assert!(success);
    assert_eq!(recorded.get("repo"), Some(&json!("octo/demo")));
    assert_eq!(recorded.get("gh_token"), Some(&json!("[redacted]")));
}

/// Metadata updates follow success, not mode: a repair-disabled run records
/// itself the same way a repaired one does.
#[test]
fn manager_is_notified_when_repair_is_disabled() {
    let compiler = Arc::new(ScriptedCompiler::new(vec![ScriptedRun::done(None, vec![])]));
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let validator = Arc::new(ScriptedValidator::clean());
    let manager = Arc::new(RecordingManager::default());
    let orchestrator = Orchestrator::new(
        Executor::new(compiler),
        RepairService::new(model, validator.clone()),
        validator,
    )
    .with_manager(manager.clone());

    let result = orchestrator
        .run(RunRequest::new(two_node_ir()))
        .expect("run");

    assert!(result.success);
    let calls = manager.calls.lock().expect("calls lock");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0);
}

#[test]
fn failed_run_does_not_notify_the_manager() {
    let compiler = Arc::new(ScriptedCompiler::new(vec![ScriptedRun::error(
        "push rejected",
        vec![],
    )]));
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let validator = Arc::new(ScriptedValidator::clean());
    let manager = Arc::new(RecordingManager::default());
    let orchestrator = Orchestrator::new(
        Executor::new(compiler),
        RepairService::new(model, validator.clone()),
        validator,
    )
    .with_manager(manager.clone());

    let result = orchestrator
        .run(RunRequest::new(two_node_ir()).with_repair())
        .expect("run");

    assert!(!result.success);
    assert!(manager.calls.lock().expect("calls lock").is_empty());
}
