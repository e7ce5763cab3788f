//! Optional observers of workflow execution.
//!
//! Collectors are a capability interface with default no-op methods, so the
//! core depends on one trait and never probes for method presence. Collector
//! calls are fire-and-forget: a failing collector is logged and ignored,
//! never allowed to abort a workflow.
//!
//! The [`LlmTraceRegistry`] is the one piece of process-wide mutable state in
//! the core: a reference-counted, mutex-guarded table mapping OS thread
//! identity to the trace sink active on that thread, so concurrent
//! invocations on different threads capture prompts without
//! cross-contamination. Installation is scoped by an RAII guard that releases
//! on drop, including on panic unwind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use anyhow::Result;
use serde_json::{Map, Value};
use tracing::warn;

use crate::core::errors::ErrorRecord;
use crate::core::ir::WorkflowIR;
use crate::core::outcome::ExecutionStatus;
use crate::core::store::ENV_PARAM_NAMES_KEY;

/// One repair attempt, as seen by collectors.
#[derive(Clone, Debug)]
pub struct RepairAttemptRecord<'a> {
    /// 1-indexed attempt number.
    pub attempt: u32,
    pub errors: &'a [ErrorRecord],
    pub workflow_before: &'a WorkflowIR,
    pub workflow_after: Option<&'a WorkflowIR>,
    pub success: Option<bool>,
    pub validation_errors: &'a [String],
}

/// Optional observer of workflow execution. All methods default to no-ops.
pub trait ExecutionCollector: Send + Sync {
    fn record_workflow_start(&self) -> Result<()> {
        Ok(())
    }

    fn record_workflow_end(&self, _status: ExecutionStatus, _duration: Duration) -> Result<()> {
        Ok(())
    }

    fn record_repair_attempt(&self, _attempt: &RepairAttemptRecord<'_>) -> Result<()> {
        Ok(())
    }

    /// Metrics summary for the finished run, if this collector produces one.
    fn summary(&self, _llm_calls: &[Value]) -> Option<Value> {
        None
    }
}

/// Invoke a collector call on every collector, logging and swallowing
/// failures. The workflow outcome never depends on a collector.
pub fn emit<F>(collectors: &[Arc<dyn ExecutionCollector>], call: &str, f: F)
where
    F: Fn(&dyn ExecutionCollector) -> Result<()>,
{
    for collector in collectors {
        if let Err(err) = f(collector.as_ref()) {
            warn!(call, err = %format!("{err:#}"), "collector call failed");
        }
    }
}

/// Sink receiving LLM call summaries for tracing.
pub trait LlmCallSink: Send + Sync {
    fn record_call(&self, call: &Value);
}

#[derive(Default)]
struct RegistryInner {
    installs: usize,
    by_thread: HashMap<ThreadId, Arc<dyn LlmCallSink>>,
}

/// Reference-counted, thread-keyed registry of active trace sinks.
#[derive(Default)]
pub struct LlmTraceRegistry {
    inner: Mutex<RegistryInner>,
}

impl LlmTraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a sink for the current thread. The returned guard removes it
    /// on drop; hold it for the duration of the scoped execution.
    pub fn install(self: &Arc<Self>, sink: Arc<dyn LlmCallSink>) -> TraceGuard {
        let thread = thread::current().id();
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.installs += 1;
            inner.by_thread.insert(thread, sink);
        }
        TraceGuard {
            registry: Arc::clone(self),
            thread,
        }
    }

    /// Sink active on the current thread, if any.
    pub fn current(&self) -> Option<Arc<dyn LlmCallSink>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.by_thread.get(&thread::current().id()).cloned()
    }

    /// Number of live installations across all threads.
    pub fn active_installs(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.installs
    }

    fn release(&self, thread: ThreadId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.by_thread.remove(&thread);
        inner.installs = inner.installs.saturating_sub(1);
    }
}

/// Scoped trace installation; uninstalls on drop.
pub struct TraceGuard {
    registry: Arc<LlmTraceRegistry>,
    thread: ThreadId,
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        self.registry.release(self.thread);
    }
}

/// External owner of persisted workflow metadata, notified after a
/// successful run only.
pub trait WorkflowManager: Send + Sync {
    fn record_execution(
        &self,
        ir: &WorkflowIR,
        success: bool,
        sanitized_params: &Map<String, Value>,
    ) -> Result<()>;
}

/// Redact every parameter named in the `__env_param_names__` list,
/// regardless of the key's literal spelling.
pub fn sanitize_params(params: &Map<String, Value>) -> Map<String, Value> {
    let secret_names: Vec<String> = params
        .get(ENV_PARAM_NAMES_KEY)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    params
        .iter()
        .map(|(key, value)| {
            if secret_names.iter().any(|name| name == key) {
                (key.clone(), Value::String("[redacted]".to_string()))
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}
