//! Execution configuration stored as TOML.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Execution configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PflowConfig {
    /// Bound on repair-generation attempts per repair call.
    pub max_repair_attempts: u32,

    /// Bound on execute/repair cycles per workflow run.
    pub max_runtime_attempts: u32,

    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Command to invoke for structured-output LLM calls.
    pub command: Vec<String>,

    /// Sampling temperature for repair calls. Zero keeps repairs
    /// deterministic given identical prompts.
    pub temperature: f32,

    /// Wall-clock budget per LLM call in seconds.
    pub timeout_secs: u64,

    /// Truncate LLM stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            temperature: 0.0,
            timeout_secs: 300,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for PflowConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 3,
            max_runtime_attempts: 3,
            llm: LlmConfig::default(),
        }
    }
}

impl PflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_repair_attempts == 0 {
            return Err(anyhow!("max_repair_attempts must be > 0"));
        }
        if self.max_runtime_attempts == 0 {
            return Err(anyhow!("max_runtime_attempts must be > 0"));
        }
        if self.llm.command.is_empty() || self.llm.command[0].trim().is_empty() {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be > 0"));
        }
        if self.llm.output_limit_bytes == 0 {
            return Err(anyhow!("llm.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<PflowConfig> {
    if !path.exists() {
        let config = PflowConfig::default();
        config.validate()?;
        return Ok(config);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: PflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, config: &PflowConfig) -> Result<()> {
    config.validate()?;
    let mut buf = toml::to_string_pretty(config).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
