//! Workflow execution-and-repair control loop.
//!
//! This crate compiles a declarative workflow graph into a runnable pipeline
//! and executes it against a mutable shared store. When repair is enabled, a
//! language model patches the graph and the run is retried in a bounded,
//! loop-detecting control loop. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, error classification,
//!   diffing, signatures). No I/O, fully testable in isolation.
//! - **[`io`]**: Collaborator seams and side-effecting operations (compiler,
//!   validator, LLM backend, process execution, collectors). Isolated to
//!   enable scripted fakes in tests.
//!
//! Orchestration modules ([`executor`], [`repair`], [`orchestrate`]) coordinate
//! core logic with the collaborator seams to implement workflow runs.

pub mod core;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
