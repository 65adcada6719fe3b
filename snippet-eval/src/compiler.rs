// Snippet compiler collaborator
//
// Compilation is an external service: it receives the snippet plus the
// captured evaluation context and yields class files and a runnable class
// name, or structured diagnostics. The engine never inspects class bytes.

use crate::result::Diagnostic;

/// Everything the compiler needs to wrap a snippet into a runnable class.
#[derive(Debug, Clone)]
pub struct SnippetRequest {
    pub snippet: String,
    /// Names of captured local variables, parallel to `local_type_names`.
    pub local_names: Vec<String>,
    /// Translated source-level type names of the captured locals.
    pub local_type_names: Vec<String>,
    /// Modifier bits per captured local; finality cannot be determined from
    /// the wire, so these are all zero.
    pub local_modifiers: Vec<i32>,
    /// Fully qualified name of the lexical receiving type, if any.
    pub receiving_type: Option<String>,
    /// Project-relative source path associated with the receiving type.
    pub source_path: Option<String>,
    pub is_static: bool,
    pub is_constructor: bool,
}

/// One compiled class: bytes plus its compound name
/// (`["a", "b", "Foo"]` for `a.b.Foo`).
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub compound_name: Vec<String>,
    pub bytes: Vec<u8>,
}

/// Compiler output: class files to deploy, the runnable class, and problems.
///
/// Non-fatal problems may accompany a failure; the evaluation is a
/// compilation failure when an error-severity problem is present or no
/// runnable class name was produced.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub class_files: Vec<ClassFile>,
    pub run_class_name: Option<String>,
    pub problems: Vec<Diagnostic>,
}

pub trait SnippetCompiler: Send + Sync {
    fn compile(&self, request: &SnippetRequest) -> CompileOutput;
}
