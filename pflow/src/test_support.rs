//! Scripted fakes and fixture builders shared by unit and integration tests.
//!
//! Available to other crates through the `test-support` feature.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::ir::{NodeSpec, WorkflowIR};
use crate::core::outcome::FlowOutcome;
use crate::core::store::SharedStore;
use crate::io::compiler::{CompilationError, Compiler, FatalRuntimeError, Pipeline};
use crate::io::llm::{Model, PromptRequest};
use crate::io::validator::{ValidationReport, WorkflowValidator};

pub fn node_spec(id: &str, node_type: &str) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        node_type: node_type.to_string(),
        params: Map::new(),
    }
}

/// Minimal valid workflow: one `shell` node named `step`.
pub fn single_node_ir() -> WorkflowIR {
    WorkflowIR {
        ir_version: "0.1.0".to_string(),
        nodes: vec![node_spec("step", "shell")],
        edges: Vec::new(),
        start_node: "step".to_string(),
        inputs: Default::default(),
        outputs: Default::default(),
    }
}

/// Two-node workflow `fetch -> commit` on the default action.
pub fn two_node_ir() -> WorkflowIR {
    WorkflowIR {
        ir_version: "0.1.0".to_string(),
        nodes: vec![node_spec("fetch", "http"), node_spec("commit", "shell")],
        edges: vec![crate::core::ir::EdgeSpec {
            from: "fetch".to_string(),
            to: "commit".to_string(),
            action: "default".to_string(),
        }],
        start_node: "fetch".to_string(),
        inputs: Default::default(),
        outputs: Default::default(),
    }
}

/// One scripted pipeline run: store mutations plus the terminal behavior.
#[derive(Clone, Debug)]
pub enum ScriptedRun {
    Outcome {
        outcome: FlowOutcome,
        store_updates: Vec<(String, Value)>,
    },
    /// `pipeline.run` returns a plain recoverable error.
    RecoverableError(String),
    /// `pipeline.run` returns a [`FatalRuntimeError`].
    FatalError(String),
}

impl ScriptedRun {
    pub fn done(action: Option<&str>, store_updates: Vec<(String, Value)>) -> Self {
        ScriptedRun::Outcome {
            outcome: FlowOutcome::Done(action.map(str::to_string)),
            store_updates,
        }
    }

    pub fn error(reason: &str, store_updates: Vec<(String, Value)>) -> Self {
        ScriptedRun::Outcome {
            outcome: FlowOutcome::Error(reason.to_string()),
            store_updates,
        }
    }

    pub fn recoverable(message: &str) -> Self {
        ScriptedRun::RecoverableError(message.to_string())
    }

    pub fn fatal(message: &str) -> Self {
        ScriptedRun::FatalError(message.to_string())
    }
}

/// Compiler whose pipelines replay a scripted run queue, one per execution.
pub struct ScriptedCompiler {
    runs: Mutex<VecDeque<ScriptedRun>>,
    compile_calls: AtomicUsize,
    fail_compile: Option<String>,
}

impl ScriptedCompiler {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            compile_calls: AtomicUsize::new(0),
            fail_compile: None,
        }
    }

    /// Compiler that always fails with a [`CompilationError`].
    pub fn failing_compile(message: &str) -> Self {
        Self {
            runs: Mutex::new(VecDeque::new()),
            compile_calls: AtomicUsize::new(0),
            fail_compile: Some(message.to_string()),
        }
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    fn next_run(&self) -> Result<ScriptedRun> {
        self.runs
            .lock()
            .expect("runs lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted compiler ran out of scripted runs"))
    }
}

impl Compiler for ScriptedCompiler {
    fn compile(
        &self,
        _ir: &WorkflowIR,
        _params: &Map<String, Value>,
        _validate: bool,
    ) -> Result<Box<dyn Pipeline>> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_compile {
            return Err(CompilationError {
                message: message.clone(),
            }
            .into());
        }
        let run = self.next_run()?;
        Ok(Box::new(ScriptedPipeline { run }))
    }
}

struct ScriptedPipeline {
    run: ScriptedRun,
}

impl Pipeline for ScriptedPipeline {
    fn run(&self, store: &mut SharedStore) -> Result<FlowOutcome> {
        match &self.run {
            ScriptedRun::Outcome {
                outcome,
                store_updates,
            } => {
                for (key, value) in store_updates {
                    store.insert(key.clone(), value.clone());
                }
                Ok(outcome.clone())
            }
            ScriptedRun::RecoverableError(message) => Err(anyhow!("{message}")),
            ScriptedRun::FatalError(message) => Err(FatalRuntimeError {
                message: message.clone(),
            }
            .into()),
        }
    }
}

/// Validator replaying a queue of reports; an empty queue validates clean.
pub struct ScriptedValidator {
    reports: Mutex<VecDeque<ValidationReport>>,
    calls: AtomicUsize,
    fail: bool,
}

impl ScriptedValidator {
    pub fn new(reports: Vec<ValidationReport>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn clean() -> Self {
        Self::new(Vec::new())
    }

    /// Validator whose `validate` itself errors (infrastructure failure, not
    /// an invalid workflow).
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkflowValidator for ScriptedValidator {
    fn validate(
        &self,
        _ir: &WorkflowIR,
        _extracted_params: &Map<String, Value>,
        _skip_node_types: bool,
    ) -> Result<ValidationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("validator backend unavailable"));
        }
        let mut reports = self.reports.lock().expect("reports lock");
        Ok(reports.pop_front().unwrap_or_else(ValidationReport::clean))
    }
}

/// Model replaying scripted responses and capturing the requests it saw.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<Value, String>>>,
    requests: Mutex<Vec<PromptRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Value>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(responses: Vec<Result<Value, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.requests.lock().expect("requests lock").last().cloned()
    }
}

impl Model for ScriptedModel {
    fn prompt(&self, request: &PromptRequest) -> Result<Value> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let next = self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model ran out of responses"))?;
        next.map_err(|message| anyhow!("{message}"))
    }
}
