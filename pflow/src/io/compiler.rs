//! Compiler and pipeline seam.
//!
//! The graph/node runtime is an external collaborator: this crate only
//! depends on "compile an IR into something with a `run(shared_store)`
//! method". Tests use scripted compilers that return predetermined outcomes
//! without a real runtime.

use std::error::Error as StdError;
use std::fmt;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::core::ir::WorkflowIR;
use crate::core::outcome::FlowOutcome;
use crate::core::store::SharedStore;

/// A compiled, runnable workflow pipeline.
pub trait Pipeline {
    /// Run the pipeline once against the shared store, mutating it in place.
    fn run(&self, store: &mut SharedStore) -> Result<FlowOutcome>;
}

/// Abstraction over the external compilation runtime.
pub trait Compiler: Send + Sync {
    /// Compile an IR into a runnable pipeline. `validate` toggles the
    /// compiler's own structural/template validation pass (turned off on a
    /// repair retry that was already validated).
    fn compile(
        &self,
        ir: &WorkflowIR,
        params: &Map<String, Value>,
        validate: bool,
    ) -> Result<Box<dyn Pipeline>>;
}

/// Structural compilation failure. Always fatal: the IR is broken in a way
/// runtime repair cannot fix, so the validation phase should have caught it.
#[derive(Debug)]
pub struct CompilationError {
    pub message: String,
}

impl CompilationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CompilationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compilation failed: {}", self.message)
    }
}

impl StdError for CompilationError {}

/// Unrecoverable runtime defect (registry corruption, runtime bug). Always
/// propagates to the top-level caller.
#[derive(Debug)]
pub struct FatalRuntimeError {
    pub message: String,
}

impl FatalRuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalRuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal runtime error: {}", self.message)
    }
}

impl StdError for FatalRuntimeError {}

/// Classify an error from compile/run at the single executor boundary.
///
/// Fatal errors ([`CompilationError`], [`FatalRuntimeError`]) propagate
/// uncaught to the caller; everything else is converted into a FAILED
/// execution result. Swallowing fatal errors would mask runtime defects as
/// "unfixable workflow" noise.
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.downcast_ref::<CompilationError>().is_some()
            || cause.downcast_ref::<FatalRuntimeError>().is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn fatal_detection_sees_through_context_wrapping() {
        let compile: Result<()> = Err(anyhow::Error::new(CompilationError::new("bad edge")))
            .context("compile workflow");
        assert!(is_fatal(&compile.unwrap_err()));

        let runtime: Result<()> = Err(anyhow::Error::new(FatalRuntimeError::new("registry gone")));
        assert!(is_fatal(&runtime.unwrap_err()));

        let recoverable = anyhow!("node exited with status 1");
        assert!(!is_fatal(&recoverable));
    }
}
