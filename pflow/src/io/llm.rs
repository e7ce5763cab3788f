//! Language-model seam for repair generation.
//!
//! The [`Model`] trait decouples repair prompting from the actual backend
//! (currently a structured-output CLI invoked as a subprocess). Tests use
//! scripted models that return predetermined candidates without spawning
//! processes.
//!
//! Schema, cache blocks, and temperature travel on [`PromptRequest`] as side
//! channels, never inlined into the prompt text. Keeping cache blocks out of
//! the prompt is a determinism and cost contract: the prompt string must be
//! identical across retries so backend prompt caching can hit.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::LlmConfig;
use crate::io::process::run_command_with_timeout;

/// One structured-output model invocation.
#[derive(Clone, Debug)]
pub struct PromptRequest {
    /// Prompt text; stable across retries of the same repair.
    pub prompt: String,
    /// JSON Schema the response object must satisfy.
    pub schema: Option<Value>,
    /// Context-reuse payloads passed to the backend out of band.
    pub cache_blocks: Vec<Value>,
    pub temperature: f32,
}

/// Abstraction over language-model backends.
pub trait Model: Send + Sync {
    /// Send one prompt and return the structured response value.
    fn prompt(&self, request: &PromptRequest) -> Result<Value>;
}

/// Model backed by a structured-output CLI (e.g. an `llm`-style tool).
///
/// The prompt is fed on stdin; schema, temperature, and cache blocks are
/// passed as arguments. Stdout must be a single JSON value.
pub struct CliModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CliModel {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }
}

impl Model for CliModel {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), has_schema = request.schema.is_some()))]
    fn prompt(&self, request: &PromptRequest) -> Result<Value> {
        let program = self
            .command
            .first()
            .ok_or_else(|| anyhow!("llm command is empty"))?;
        info!(program = %program, "starting llm call");

        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..]);
        cmd.arg("--temperature").arg(request.temperature.to_string());
        if let Some(schema) = &request.schema {
            cmd.arg("--schema").arg(schema.to_string());
        }
        for block in &request.cache_blocks {
            cmd.arg("--fragment").arg(block.to_string());
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run llm command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "llm call timed out");
            return Err(anyhow!("llm call timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "llm call failed");
            return Err(anyhow!(
                "llm call failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }

        let stdout = output.stdout_text();
        let value: Value = serde_json::from_str(stdout.trim()).context("parse llm output json")?;
        debug!("llm call completed");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh_model(script: &str) -> CliModel {
        CliModel::new(&LlmConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            temperature: 0.0,
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
    }

    #[test]
    fn parses_json_from_stdout() {
        // The trailing args (--temperature ...) are absorbed by the shell -c
        // command name slot.
        let model = sh_model("echo '{\"ok\": true}'");
        let request = PromptRequest {
            prompt: "fix it".to_string(),
            schema: None,
            cache_blocks: Vec::new(),
            temperature: 0.0,
        };
        let value = model.prompt(&request).expect("prompt");
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let model = sh_model("echo nope >&2; exit 3");
        let request = PromptRequest {
            prompt: "fix it".to_string(),
            schema: None,
            cache_blocks: Vec::new(),
            temperature: 0.0,
        };
        let err = model.prompt(&request).unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let model = sh_model("echo not-json");
        let request = PromptRequest {
            prompt: "fix it".to_string(),
            schema: None,
            cache_blocks: Vec::new(),
            temperature: 0.0,
        };
        let err = model.prompt(&request).unwrap_err();
        assert!(format!("{err:#}").contains("parse llm output"));
    }
}
