//! Normalized error records and the pure classification functions that
//! produce them.
//!
//! Failure signals arrive in several loose shapes: a terminal error outcome
//! from the pipeline, contents of the shared store, bare strings from static
//! validation, or a caught exception. Everything is normalized here into one
//! [`ErrorRecord`] shape with enough structure for both a human and a repair
//! LLM to act on. All functions in this module are pure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::store::SharedStore;

/// Maximum node-output keys copied into `available_fields` on a template
/// error before truncating.
pub const MAX_DISPLAYED_FIELDS: usize = 10;

/// Where an error originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Runtime,
    Validation,
    Api,
    Exception,
}

/// Exhaustive error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ApiValidation,
    TemplateError,
    ExecutionFailure,
    EdgeFormat,
    InvalidNodeType,
    StaticValidation,
    NonRepairable,
    Exception,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ApiValidation => "api_validation",
            ErrorCategory::TemplateError => "template_error",
            ErrorCategory::ExecutionFailure => "execution_failure",
            ErrorCategory::EdgeFormat => "edge_format",
            ErrorCategory::InvalidNodeType => "invalid_node_type",
            ErrorCategory::StaticValidation => "static_validation",
            ErrorCategory::NonRepairable => "non_repairable",
            ErrorCategory::Exception => "exception",
        }
    }
}

/// Normalized error shape produced by the classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub source: ErrorSource,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub fixable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_error_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_field_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
}

impl ErrorRecord {
    pub fn new(
        source: ErrorSource,
        category: ErrorCategory,
        message: impl Into<String>,
        node_id: Option<String>,
        fixable: bool,
    ) -> Self {
        Self {
            source,
            category,
            message: message.into(),
            node_id,
            fixable,
            status_code: None,
            raw_response: None,
            response_headers: None,
            response_time: None,
            mcp_error_details: None,
            mcp_error: None,
            available_fields: None,
            available_field_count: None,
            template: None,
            hint: None,
            exception_type: None,
        }
    }
}

/// Heterogeneous repair input: bare strings from static validation or
/// structured records from runtime, normalized at the boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum RepairError {
    Validation(String),
    Runtime(ErrorRecord),
}

/// Determine the failure message and the offending node from a terminal
/// action string and the shared store.
///
/// Priority order: (1) a checkpoint's recorded `failed_node`; (2) a
/// root-level `error` string, optionally paired with `error_details`'s
/// `server`/`tool` to synthesize a node id; (3) the failed node's own
/// namespaced `error` field or an embedded JSON `result.error`; (4) a
/// generic fallback naming the action.
pub fn extract_error_info(
    action_result: Option<&str>,
    store: &SharedStore,
) -> (String, Option<String>) {
    let mut failed_node = store.checkpoint().and_then(|c| c.failed_node);

    if let Some(message) = store.get("error").and_then(Value::as_str) {
        if failed_node.is_none()
            && let Some(details) = store.get("error_details").and_then(Value::as_object)
            && let (Some(server), Some(tool)) = (
                details.get("server").and_then(Value::as_str),
                details.get("tool").and_then(Value::as_str),
            )
        {
            failed_node = Some(format!("{server}_{tool}"));
        }
        return (message.to_string(), failed_node);
    }

    if let Some(node_id) = failed_node.as_deref()
        && let Some(output) = store.node_output(node_id)
    {
        if let Some(message) = output.get("error").and_then(Value::as_str) {
            return (message.to_string(), failed_node);
        }
        if let Some(message) = embedded_result_error(output.get("result")) {
            return (message, failed_node);
        }
    }

    let message = format!(
        "Workflow failed with action: {}",
        action_result.unwrap_or("unknown")
    );
    (message, failed_node)
}

/// An `error` field embedded in a node's `result`, either as a JSON object
/// or as a JSON string that itself parses to an object.
fn embedded_result_error(result: Option<&Value>) -> Option<String> {
    let result = result?;
    if let Some(object) = result.as_object()
        && let Some(error) = object.get("error")
    {
        return Some(value_as_text(error));
    }
    if let Some(text) = result.as_str()
        && let Ok(Value::Object(object)) = serde_json::from_str::<Value>(text)
        && let Some(error) = object.get("error")
    {
        return Some(value_as_text(error));
    }
    None
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

const API_VALIDATION_PHRASES: &[&str] = &[
    "input should be",
    "field required",
    "invalid request data",
    "following fields are missing",
    "validation error",
    "parameter `",
];

/// Keyword classification of a failure message.
///
/// API-validation phrases are checked before the template check; order
/// matters because API rejections often also mention templates.
pub fn determine_error_category(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();
    if API_VALIDATION_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return ErrorCategory::ApiValidation;
    }
    if lowered.contains("${") || lowered.contains("template") {
        return ErrorCategory::TemplateError;
    }
    ErrorCategory::ExecutionFailure
}

const NON_FIXABLE_KEYWORDS: &[&str] = &[
    "api key",
    "authentication",
    "unauthorized",
    "forbidden",
    "rate limit",
    "quota",
    "connection refused",
    "timeout",
    "permission denied",
    "out of memory",
];

/// Keyword triage: can regenerating the workflow plausibly fix this?
///
/// The non-fixable set short-circuits; everything else defaults to
/// optimistically `true`. The messages the heuristic was tuned on (template,
/// field, not found, missing, undefined, key error, attribute, type error,
/// value error) all land on that default, so no second table is consulted.
///
/// Known limitation, preserved deliberately: "missing" covers both a
/// genuinely absent required input (not fixable by regenerating the graph)
/// and a wrong template path (fixable). The message text alone cannot
/// distinguish the two, so this function does not try to.
pub fn is_fixable(message: &str) -> bool {
    let lowered = message.to_lowercase();
    !NON_FIXABLE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Copy rich diagnostic fields from the failed node's namespaced output.
pub fn enrich_from_node_output(record: &mut ErrorRecord, store: &SharedStore) {
    let Some(node_id) = record.node_id.as_deref() else {
        return;
    };
    let Some(output) = store.node_output(node_id) else {
        return;
    };

    if let Some(status_code) = output.get("status_code").and_then(Value::as_u64) {
        record.status_code = Some(status_code);
        record.raw_response = output.get("response").cloned();
        record.response_headers = output.get("response_headers").cloned();
        record.response_time = output.get("response_time").cloned();
    }
    if let Some(details) = output.get("error_details") {
        record.mcp_error_details = Some(details.clone());
    }
    if let Some(error) = output
        .get("result")
        .and_then(Value::as_object)
        .and_then(|result| result.get("error"))
    {
        record.mcp_error = Some(error.clone());
    }

    if record.category == ErrorCategory::TemplateError {
        let fields: Vec<String> = output.keys().cloned().collect();
        if fields.len() > MAX_DISPLAYED_FIELDS {
            record.available_field_count = Some(fields.len());
            record.hint = Some(
                "field list truncated; see the execution trace dump for the full node output"
                    .to_string(),
            );
            record.available_fields = Some(fields.into_iter().take(MAX_DISPLAYED_FIELDS).collect());
        } else {
            record.available_fields = Some(fields);
        }
    }
}

/// Build the single synthesized record for a failed run.
pub fn synthesize_runtime_error(action_result: Option<&str>, store: &SharedStore) -> ErrorRecord {
    let (message, node_id) = extract_error_info(action_result, store);
    let category = determine_error_category(&message);
    let fixable = is_fixable(&message);
    let mut record = ErrorRecord::new(ErrorSource::Runtime, category, message, node_id, fixable);
    enrich_from_node_output(&mut record, store);
    record
}

/// Build the record for an exception caught at the executor boundary.
///
/// `exception_type` stays unset here: an opaque error chain carries messages,
/// not a kind name, and the full chain is already in `message`.
pub fn error_from_exception(error: &anyhow::Error) -> ErrorRecord {
    let message = format!("{error:#}");
    let fixable = is_fixable(&message);
    ErrorRecord::new(
        ErrorSource::Exception,
        ErrorCategory::Exception,
        message,
        None,
        fixable,
    )
}

/// Normalize a heterogeneous error list into uniform records.
///
/// Bare validation strings get a category inferred from substrings;
/// already-structured runtime records pass through unchanged.
pub fn normalize_errors(errors: &[RepairError]) -> Vec<ErrorRecord> {
    errors
        .iter()
        .map(|error| match error {
            RepairError::Runtime(record) => record.clone(),
            RepairError::Validation(message) => {
                let category = infer_validation_category(message);
                ErrorRecord::new(
                    ErrorSource::Validation,
                    category,
                    message.clone(),
                    None,
                    true,
                )
            }
        })
        .collect()
}

fn infer_validation_category(message: &str) -> ErrorCategory {
    if message.contains("Template") {
        return ErrorCategory::TemplateError;
    }
    if message.contains("Edge") || message.contains("from") || message.contains("to") {
        return ErrorCategory::EdgeFormat;
    }
    if message.contains("node type") {
        return ErrorCategory::InvalidNodeType;
    }
    ErrorCategory::StaticValidation
}
