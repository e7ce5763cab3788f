//! Static validation seam.
//!
//! Structural/template validation of a workflow is owned by an external
//! collaborator; this crate consumes its error-string surface.

use anyhow::Result;
use serde_json::{Map, Value};

use crate::core::ir::WorkflowIR;

/// Errors and warnings from one static validation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Abstraction over the external structural/template validator.
pub trait WorkflowValidator: Send + Sync {
    /// Validate an IR. `extracted_params` supplies the externally-provided
    /// template values so template resolution can be checked;
    /// `skip_node_types` disables registry lookups for node types.
    fn validate(
        &self,
        ir: &WorkflowIR,
        extracted_params: &Map<String, Value>,
        skip_node_types: bool,
    ) -> Result<ValidationReport>;
}
