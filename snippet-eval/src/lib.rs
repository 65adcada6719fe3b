// Snippet evaluation engine for remote JVM debugging
//
// Compiles ad-hoc code snippets (external collaborator), deploys the
// resulting class files where the remote VM can load them, runs them in a
// suspended remote thread through the jdwp-mirror query layer, and reads
// back a typed result.

pub mod compiler;
pub mod engine;
pub mod error;
pub mod names;
pub mod result;

pub use compiler::{ClassFile, CompileOutput, SnippetCompiler, SnippetRequest};
pub use engine::EvaluationEngine;
pub use error::EvalError;
pub use result::{Diagnostic, EvaluationListener, EvaluationResult, Severity};
