//! Collaborator seams and I/O helpers for workflow runs.

pub mod collect;
pub mod compiler;
pub mod config;
pub mod llm;
pub mod process;
pub mod validator;
