//! LLM-backed workflow repair with a bounded validate loop.
//!
//! One call to [`RepairService::repair_with_validation`] runs up to
//! `max_attempts` generation attempts. Each candidate is gated fail-closed:
//! JSON Schema (Draft 2020-12), then deserialization, then shape checks, then
//! the external static validator. A candidate failing validation feeds its
//! errors into the next attempt; a generation failure (model error, schema
//! mismatch, unparseable output) ends the loop immediately, because retrying
//! an unreliable generator with the same inputs wastes money without changing
//! the distribution of outcomes.

use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::errors::{ErrorRecord, RepairError, normalize_errors};
use crate::core::ir::WorkflowIR;
use crate::core::store::SharedStore;
use crate::io::collect::{ExecutionCollector, RepairAttemptRecord, emit};
use crate::io::llm::{Model, PromptRequest};
use crate::io::validator::WorkflowValidator;

const VALIDATION_TEMPLATE: &str = include_str!("prompts/repair_validation.md");
const RUNTIME_TEMPLATE: &str = include_str!("prompts/repair_runtime.md");
const WORKFLOW_SCHEMA: &str = include_str!("../schemas/workflow_ir.schema.json");

/// Outcome of one bounded repair loop.
#[derive(Clone, Debug)]
pub enum RepairOutcome {
    Repaired {
        ir: WorkflowIR,
        /// 1-indexed attempt that produced the valid candidate.
        attempts: u32,
    },
    /// No valid candidate within the attempt bound; carries the last set of
    /// validation errors (or the original errors if generation failed).
    Unrepaired { errors: Vec<String> },
}

/// Generates repaired workflows and validates them before release.
pub struct RepairService {
    model: Arc<dyn Model>,
    validator: Arc<dyn WorkflowValidator>,
    collectors: Vec<Arc<dyn ExecutionCollector>>,
    max_attempts: u32,
    temperature: f32,
}

impl RepairService {
    pub fn new(model: Arc<dyn Model>, validator: Arc<dyn WorkflowValidator>) -> Self {
        Self {
            model,
            validator,
            collectors: Vec::new(),
            max_attempts: 3,
            temperature: 0.0,
        }
    }

    pub fn with_collectors(mut self, collectors: Vec<Arc<dyn ExecutionCollector>>) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Repair a workflow until it passes static validation or the attempt
    /// bound is hit.
    ///
    /// `shared` supplies the failed run's store as out-of-band model context;
    /// `params` are the execution parameters the validator checks template
    /// resolution against.
    #[instrument(skip_all, fields(errors = errors.len(), max_attempts = self.max_attempts))]
    pub fn repair_with_validation(
        &self,
        ir: &WorkflowIR,
        errors: &[RepairError],
        shared: Option<&SharedStore>,
        params: &Map<String, Value>,
    ) -> Result<RepairOutcome> {
        let mut current_ir = ir.clone();
        let mut current_errors: Vec<RepairError> = errors.to_vec();

        for attempt in 1..=self.max_attempts {
            let records = normalize_errors(&current_errors);
            let Some(candidate) = self.generate_repair(&current_ir, &current_errors, shared)? else {
                warn!(attempt, "repair generation failed, giving up");
                return Ok(RepairOutcome::Unrepaired {
                    errors: records.into_iter().map(|r| r.message).collect(),
                });
            };

            let report = match self.validator.validate(&candidate, params, false) {
                Ok(report) => report,
                Err(err) => {
                    warn!(attempt, err = %format!("{err:#}"), "static validation errored");
                    crate::io::validator::ValidationReport::with_errors(vec![format!(
                        "validator failed: {err:#}"
                    )])
                }
            };

            let success = report.is_valid();
            emit(&self.collectors, "record_repair_attempt", |c| {
                c.record_repair_attempt(&RepairAttemptRecord {
                    attempt,
                    errors: &records,
                    workflow_before: &current_ir,
                    workflow_after: success.then_some(&candidate),
                    success: Some(success),
                    validation_errors: &report.errors,
                })
            });

            if success {
                info!(attempt, "repair produced a valid workflow");
                return Ok(RepairOutcome::Repaired {
                    ir: candidate,
                    attempts: attempt,
                });
            }

            warn!(
                attempt,
                errors = report.errors.len(),
                "repaired workflow failed validation"
            );
            // The rejected candidate becomes the next attempt's input,
            // carrying whatever partial progress it made.
            current_errors = report
                .errors
                .iter()
                .cloned()
                .map(RepairError::Validation)
                .collect();
            current_ir = candidate;
        }

        let remaining: Vec<String> = normalize_errors(&current_errors)
            .into_iter()
            .map(|r| r.message)
            .collect();
        Ok(RepairOutcome::Unrepaired { errors: remaining })
    }

    /// One generation attempt. Returns `None` (never retried) when the model
    /// call fails or the candidate does not survive the fail-closed gates.
    fn generate_repair(
        &self,
        ir: &WorkflowIR,
        errors: &[RepairError],
        shared: Option<&SharedStore>,
    ) -> Result<Option<WorkflowIR>> {
        let prompt = render_repair_prompt(ir, errors)?;
        let schema: Value = serde_json::from_str(WORKFLOW_SCHEMA).context("parse ir schema")?;

        let cache_blocks = shared
            .map(|store| vec![Value::Object(store.entries().clone())])
            .unwrap_or_default();
        let request = PromptRequest {
            prompt,
            schema: Some(schema.clone()),
            cache_blocks,
            temperature: self.temperature,
        };

        let response = match self.model.prompt(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "repair model call failed");
                return Ok(None);
            }
        };

        Ok(parse_candidate(&response, &schema))
    }
}

/// Fail-closed candidate gates: schema, deserialization, shape.
fn parse_candidate(response: &Value, schema: &Value) -> Option<WorkflowIR> {
    let compiled = match jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
    {
        Ok(compiled) => compiled,
        Err(err) => {
            warn!(err = %err, "ir schema failed to compile");
            return None;
        }
    };
    let schema_errors: Vec<String> = compiled
        .iter_errors(response)
        .map(|err| err.to_string())
        .collect();
    if !schema_errors.is_empty() {
        warn!(errors = ?schema_errors, "candidate rejected by schema");
        return None;
    }

    let candidate: WorkflowIR = match serde_json::from_value(response.clone()) {
        Ok(candidate) => candidate,
        Err(err) => {
            warn!(err = %err, "candidate failed to deserialize");
            return None;
        }
    };

    let shape_errors = candidate.shape_errors();
    if !shape_errors.is_empty() {
        warn!(errors = ?shape_errors, "candidate rejected by shape checks");
        return None;
    }
    Some(candidate)
}

fn render_repair_prompt(ir: &WorkflowIR, errors: &[RepairError]) -> Result<String> {
    let has_runtime = errors
        .iter()
        .any(|error| matches!(error, RepairError::Runtime(_)));
    let name = if has_runtime {
        "repair_runtime"
    } else {
        "repair_validation"
    };

    let mut env = Environment::new();
    env.add_template("repair_validation", VALIDATION_TEMPLATE)
        .expect("validation template should be valid");
    env.add_template("repair_runtime", RUNTIME_TEMPLATE)
        .expect("runtime template should be valid");

    let records: Vec<ErrorRecord> = normalize_errors(errors);
    let errors_json =
        serde_json::to_string_pretty(&records).context("serialize error records")?;
    let workflow_json = serde_json::to_string_pretty(ir).context("serialize workflow")?;

    let template = env.get_template(name)?;
    let rendered = template.render(context! {
        errors => errors_json,
        workflow => workflow_json,
    })?;
    Ok(rendered)
}
