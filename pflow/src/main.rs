//! Workflow automation CLI.
//!
//! Thin shell over the `pflow` library: workflow files in, validation
//! verdicts and diffs out. Execution is embedded by hosts through the
//! library's [`pflow::orchestrate::Orchestrator`]; the CLI covers the
//! offline operations on workflow files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use jsonschema::Draft;
use serde_json::Value;

use pflow::core::diff::compute_workflow_diff;
use pflow::core::ir::WorkflowIR;
use pflow::{exit_codes, logging};

const WORKFLOW_SCHEMA: &str = include_str!("../schemas/workflow_ir.schema.json");

#[derive(Parser)]
#[command(
    name = "pflow",
    version,
    about = "Workflow automation with validate-then-run execution and LLM repair"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a workflow file against the IR schema, shape, and reference rules.
    Validate {
        /// Path to the workflow JSON file.
        workflow: PathBuf,
    },
    /// Show per-node changes between two workflow files.
    Diff {
        /// Original workflow JSON file.
        original: PathBuf,
        /// Repaired or edited workflow JSON file.
        repaired: PathBuf,
    },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { workflow } => cmd_validate(&workflow),
        Command::Diff { original, repaired } => cmd_diff(&original, &repaired),
    }
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let violations = match load_workflow(path) {
        Ok(ir) => {
            let mut violations = ir.shape_errors();
            violations.extend(ir.reference_errors());
            violations
        }
        Err(err) => vec![format!("{err:#}")],
    };

    if violations.is_empty() {
        println!("{} is valid", path.display());
        Ok(exit_codes::OK)
    } else {
        eprintln!("{} is invalid:\n- {}", path.display(), violations.join("\n- "));
        Ok(exit_codes::INVALID)
    }
}

fn cmd_diff(original_path: &Path, repaired_path: &Path) -> Result<i32> {
    let original = load_workflow(original_path)?;
    let repaired = load_workflow(repaired_path)?;
    let diff = compute_workflow_diff(&original, &repaired);
    let rendered = serde_json::to_string_pretty(&diff).context("serialize diff")?;
    println!("{rendered}");
    Ok(exit_codes::OK)
}

/// Parse a workflow file: JSON, then schema conformance, then the typed IR.
fn load_workflow(path: &Path) -> Result<WorkflowIR> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let instance: Value =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    validate_schema(&instance)?;
    let ir: WorkflowIR =
        serde_json::from_value(instance).context("parse workflow as typed ir")?;
    Ok(ir)
}

/// Validate JSON instance against the workflow IR schema (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(WORKFLOW_SCHEMA).context("parse ir schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile ir schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
