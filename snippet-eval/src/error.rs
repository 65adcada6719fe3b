// Evaluation failure taxonomy
//
// Precondition rejections are returned synchronously from evaluate*();
// everything else is recorded on the EvaluationResult delivered to the
// listener.

use jdwp_mirror::JdwpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Evaluation failed - evaluation context has been disposed")]
    Disposed,

    #[error("Cannot perform nested evaluations")]
    NestedEvaluation,

    #[error("Evaluation failed - evaluation thread must be suspended")]
    ThreadNotSuspended,

    #[error("Evaluation in context of inner type not supported")]
    InnerTypeUnsupported,

    #[error("Evaluation failed - unable to determine receiving type context")]
    UnknownReceivingType,

    #[error("Snippet compilation failed")]
    CompilationFailed,

    /// The generated wrapper class must declare one field per captured local;
    /// a missing field is a defect, not a user error.
    #[error("Evaluation failed - unable to initialize local variable '{0}'")]
    MissingLocalField(String),

    #[error("Evaluation failed - unable to initialize 'this' context")]
    MissingThisField,

    #[error("Evaluation failed - internal error retrieving result")]
    MissingResult,

    #[error("Evaluation failed - unable to instantiate code snippet class '{0}'")]
    Instantiation(String),

    #[error("IO error deploying class file for evaluation: {0}")]
    Deploy(#[from] std::io::Error),

    #[error(transparent)]
    Jdwp(#[from] JdwpError),

    #[error("Internal error: {0}")]
    Internal(String),
}
