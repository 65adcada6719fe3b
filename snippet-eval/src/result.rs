// Evaluation results and the completion listener

use crate::error::EvalError;
use jdwp_mirror::thread::ThreadMirror;
use jdwp_mirror::types::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A structured compilation problem: message plus source offset into the
/// snippet text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub source_offset: i32,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(message: &str, source_offset: i32) -> Self {
        Self {
            message: message.to_string(),
            source_offset,
            severity: Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Terminal outcome of one evaluation.
#[derive(Debug)]
pub struct EvaluationResult {
    snippet: String,
    thread: Arc<ThreadMirror>,
    value: Option<Value>,
    error: Option<EvalError>,
    problems: Vec<Diagnostic>,
}

impl EvaluationResult {
    pub(crate) fn new(snippet: &str, thread: Arc<ThreadMirror>) -> Self {
        Self {
            snippet: snippet.to_string(),
            thread,
            value: None,
            error: None,
            problems: Vec::new(),
        }
    }

    pub(crate) fn set_value(&mut self, value: Option<Value>) {
        self.value = value;
    }

    pub(crate) fn set_error(&mut self, error: EvalError) {
        self.error = Some(error);
    }

    pub(crate) fn add_problem(&mut self, problem: Diagnostic) {
        self.problems.push(problem);
    }

    /// The snippet text this evaluation ran.
    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    /// The thread the snippet ran in.
    pub fn thread(&self) -> &Arc<ThreadMirror> {
        &self.thread
    }

    /// The typed result value; `None` when the evaluation produced no value
    /// (failure, or a deployment-only run).
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&EvalError> {
        self.error.as_ref()
    }

    /// Compilation problems collected for this snippet.
    pub fn problems(&self) -> &[Diagnostic] {
        &self.problems
    }

    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Notified exactly once per accepted evaluate call, from the worker task.
pub trait EvaluationListener: Send + Sync {
    fn evaluation_complete(&self, result: EvaluationResult);
}

/// Blanket impl so plain closures can be used as listeners.
impl<F> EvaluationListener for F
where
    F: Fn(EvaluationResult) + Send + Sync,
{
    fn evaluation_complete(&self, result: EvaluationResult) {
        self(result)
    }
}
