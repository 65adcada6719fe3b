// Snippet evaluation engine
//
// Orchestrates one evaluation at a time: compile the snippet (external
// collaborator), deploy the class files next to the remote VM's class path,
// instantiate the generated wrapper remotely, marshal captured locals and
// `this` into it, invoke its run method on the suspended thread, marshal
// locals back, and interpret the distinguished result fields. Deployed
// artifacts accumulate across evaluations and are deleted on disposal,
// child-first; disposal requested mid-evaluation is deferred until the
// in-flight evaluation completes.

use crate::compiler::{ClassFile, CompileOutput, SnippetCompiler, SnippetRequest};
use crate::error::EvalError;
use crate::names;
use crate::result::{EvaluationListener, EvaluationResult};
use jdwp_mirror::frame::StackFrameMirror;
use jdwp_mirror::object::ObjectMirror;
use jdwp_mirror::protocol::JdwpError;
use jdwp_mirror::thread::ThreadMirror;
use jdwp_mirror::types::{tags, Value, Variable};
use jdwp_mirror::JdwpConnection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Instance field prefix for captured locals in the generated wrapper class.
pub const LOCAL_VAR_PREFIX: &str = "val$";
/// Instance field holding the receiver in the generated wrapper class.
pub const DELEGATE_THIS: &str = "val$this";
/// Entry point of the generated wrapper class.
pub const RUN_METHOD: &str = "run";
/// Distinguished field holding the declared result type.
pub const RESULT_TYPE_FIELD: &str = "resultType";
/// Distinguished field holding the result value.
pub const RESULT_VALUE_FIELD: &str = "resultValue";

// Class-file deployment touches package directories shared between engines;
// it runs under one process-wide exclusive lock.
static DEPLOY_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Debug, Default)]
struct EngineState {
    disposed: bool,
    /// In-flight evaluation count; nonzero rejects further evaluate calls.
    evaluations: u32,
    /// Deployed class files, accumulated across evaluations.
    snippet_files: Vec<PathBuf>,
    /// Directories created for deployment, in creation order.
    directories: Vec<PathBuf>,
}

struct EngineInner {
    vm: JdwpConnection,
    compiler: Arc<dyn SnippetCompiler>,
    output_dir: PathBuf,
    state: Mutex<EngineState>,
}

/// An evaluation engine bound to one remote VM and one output directory.
///
/// The output directory must exist and be reachable from the remote VM's
/// class path. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct EvaluationEngine {
    inner: Arc<EngineInner>,
}

/// Transient marshaling state for a single evaluation. Dropped when the
/// evaluation completes, however it ends.
struct EvalContext {
    snippet: String,
    thread: Arc<ThreadMirror>,
    frame: Option<StackFrameMirror>,
    this_object: Option<Arc<ObjectMirror>>,
    locals: Vec<CapturedLocal>,
    receiving_type: Option<String>,
    source_path: Option<String>,
    is_static: bool,
    is_constructor: bool,
}

struct CapturedLocal {
    variable: Variable,
    type_name: String,
}

impl EvaluationEngine {
    pub fn new(
        vm: JdwpConnection,
        compiler: Arc<dyn SnippetCompiler>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                vm,
                compiler,
                output_dir: output_dir.into(),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.inner.output_dir
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    pub fn is_evaluating(&self) -> bool {
        self.lock_state().evaluations > 0
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.inner.state.lock().expect("engine state poisoned")
    }

    /// Evaluate a snippet in a thread context: no locals, no receiver.
    pub async fn evaluate_in_thread(
        &self,
        snippet: &str,
        thread: Arc<ThreadMirror>,
        listener: Arc<dyn EvaluationListener>,
    ) -> Result<(), EvalError> {
        self.begin_evaluation()?;
        let ctx = match self.thread_context(snippet, thread).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(self.abort_evaluation(e).await),
        };
        self.spawn_worker(ctx, listener);
        Ok(())
    }

    /// Evaluate a snippet in a stack-frame context: the frame's visible
    /// locals and receiver are available to the snippet.
    pub async fn evaluate_in_frame(
        &self,
        snippet: &str,
        frame: StackFrameMirror,
        listener: Arc<dyn EvaluationListener>,
    ) -> Result<(), EvalError> {
        self.begin_evaluation()?;
        let ctx = match self.frame_context(snippet, frame).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(self.abort_evaluation(e).await),
        };
        self.spawn_worker(ctx, listener);
        Ok(())
    }

    /// Evaluate a snippet against an explicit receiver object: `this` is
    /// available to the snippet, no locals are.
    pub async fn evaluate_with_receiver(
        &self,
        snippet: &str,
        this_object: Arc<ObjectMirror>,
        thread: Arc<ThreadMirror>,
        listener: Arc<dyn EvaluationListener>,
    ) -> Result<(), EvalError> {
        self.begin_evaluation()?;
        let ctx = match self.receiver_context(snippet, this_object, thread).await {
            Ok(ctx) => ctx,
            Err(e) => return Err(self.abort_evaluation(e).await),
        };
        self.spawn_worker(ctx, listener);
        Ok(())
    }

    // ---- context capture (caller's task, before the worker spawns) --------

    async fn thread_context(
        &self,
        snippet: &str,
        thread: Arc<ThreadMirror>,
    ) -> Result<EvalContext, EvalError> {
        self.check_thread(&thread).await?;
        Ok(EvalContext {
            snippet: snippet.to_string(),
            thread,
            frame: None,
            this_object: None,
            locals: Vec::new(),
            receiving_type: None,
            source_path: None,
            is_static: false,
            is_constructor: false,
        })
    }

    async fn frame_context(
        &self,
        snippet: &str,
        frame: StackFrameMirror,
    ) -> Result<EvalContext, EvalError> {
        let thread = frame.thread().clone();
        self.check_thread(&thread).await?;

        // Capture visible locals; locals of anonymous declared types cannot
        // be referenced by the snippet and are excluded, not failed.
        let mut locals = Vec::new();
        for variable in frame.visible_variables().await? {
            let type_name = jdwp_mirror::reftype::signature_to_type_name(&variable.signature);
            if let Some(type_name) = names::translated_type_name(&type_name) {
                locals.push(CapturedLocal {
                    variable,
                    type_name,
                });
            } else {
                debug!("Excluding local '{}' of anonymous type", variable.name);
            }
        }

        let this_object = frame.this_object().await?;

        // Resolve the lexical receiving type: it must be top level.
        let declaring = frame.declaring_type()?;
        let type_name = declaring.name().await?;
        if !names::is_top_level(&type_name) {
            return Err(EvalError::InnerTypeUnsupported);
        }
        let source_name = declaring.source_file().await?;
        let source_path = names::source_path(&type_name, source_name.as_deref());

        let method = frame.method().await?;

        Ok(EvalContext {
            snippet: snippet.to_string(),
            thread,
            frame: Some(frame),
            this_object,
            locals,
            receiving_type: Some(type_name),
            source_path: Some(source_path),
            is_static: method.is_static(),
            is_constructor: method.is_constructor(),
        })
    }

    async fn receiver_context(
        &self,
        snippet: &str,
        this_object: Arc<ObjectMirror>,
        thread: Arc<ThreadMirror>,
    ) -> Result<EvalContext, EvalError> {
        self.check_thread(&thread).await?;

        // A bare object has no lexical frame; the receiving type is the
        // object's type with any nested qualifier stripped.
        let type_name = this_object.reference_type().await?.name().await?;
        let type_name = names::outermost_type(&type_name).to_string();
        let source_path = names::source_path(&type_name, None);

        Ok(EvalContext {
            snippet: snippet.to_string(),
            thread,
            frame: None,
            this_object: Some(this_object),
            locals: Vec::new(),
            receiving_type: Some(type_name),
            source_path: Some(source_path),
            is_static: false,
            is_constructor: false,
        })
    }

    // ---- in-flight accounting ---------------------------------------------

    fn begin_evaluation(&self) -> Result<(), EvalError> {
        let mut state = self.lock_state();
        if state.disposed {
            return Err(EvalError::Disposed);
        }
        if state.evaluations > 0 {
            return Err(EvalError::NestedEvaluation);
        }
        state.evaluations += 1;
        Ok(())
    }

    async fn check_thread(&self, thread: &ThreadMirror) -> Result<(), EvalError> {
        if !thread.is_suspended().await? {
            return Err(EvalError::ThreadNotSuspended);
        }
        Ok(())
    }

    /// An accepted evaluation failed before its worker spawned: give the
    /// in-flight slot back and run any deferred disposal.
    async fn abort_evaluation(&self, error: EvalError) -> EvalError {
        if self.end_evaluation() {
            self.delete_artifacts().await;
        }
        error
    }

    /// Decrement the in-flight count; returns whether a deferred disposal
    /// should run now.
    fn end_evaluation(&self) -> bool {
        let mut state = self.lock_state();
        if state.evaluations > 0 {
            state.evaluations -= 1;
        }
        state.disposed && state.evaluations == 0
    }

    fn spawn_worker(&self, ctx: EvalContext, listener: Arc<dyn EvaluationListener>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut result = EvaluationResult::new(&ctx.snippet, ctx.thread.clone());

            match engine.run_evaluation(&ctx, &mut result).await {
                Ok(value) => result.set_value(value),
                Err(e) => {
                    if let EvalError::Jdwp(JdwpError::InvocationException(exception_id)) = &e {
                        engine
                            .print_remote_stack_trace(*exception_id, &ctx.thread)
                            .await;
                    }
                    result.set_error(e);
                }
            }

            // Exactly one notification per accepted evaluation, then the
            // transient context is dropped and deferred disposal runs.
            listener.evaluation_complete(result);
            if engine.end_evaluation() {
                engine.delete_artifacts().await;
            }
        });
    }

    // ---- the evaluation itself (worker task) ------------------------------

    async fn run_evaluation(
        &self,
        ctx: &EvalContext,
        result: &mut EvaluationResult,
    ) -> Result<Option<Value>, EvalError> {
        let output = self.compile(ctx).await?;

        let mut failed = false;
        for problem in output.problems {
            if problem.is_error() {
                failed = true;
                result.add_problem(problem);
            }
        }

        // Deploy whatever the compiler produced, even alongside a failure;
        // artifacts are tracked and cleaned up on disposal either way.
        self.deploy(&output.class_files).await?;

        if failed {
            return Err(EvalError::CompilationFailed);
        }
        let Some(run_class_name) = output.run_class_name else {
            return Ok(None);
        };

        let instance = self.new_instance(&run_class_name, &ctx.thread).await?;
        self.initialize_locals(ctx, &instance).await?;

        info!("Running snippet in thread {}", ctx.thread.id());
        instance
            .send_message(RUN_METHOD, "()V", &[], &ctx.thread, true)
            .await?;

        self.restore_locals(ctx, &instance).await?;
        let value = self.convert_result(&instance).await?;
        Ok(value)
    }

    async fn compile(&self, ctx: &EvalContext) -> Result<CompileOutput, EvalError> {
        let request = SnippetRequest {
            snippet: ctx.snippet.clone(),
            local_names: ctx.locals.iter().map(|l| l.variable.name.clone()).collect(),
            local_type_names: ctx.locals.iter().map(|l| l.type_name.clone()).collect(),
            // Finality of a local cannot be determined from the wire.
            local_modifiers: vec![0; ctx.locals.len()],
            receiving_type: ctx.receiving_type.clone(),
            source_path: ctx.source_path.clone(),
            is_static: ctx.is_static,
            is_constructor: ctx.is_constructor,
        };

        let compiler = self.inner.compiler.clone();
        tokio::task::spawn_blocking(move || compiler.compile(&request))
            .await
            .map_err(|e| EvalError::Internal(format!("Compiler task failed: {}", e)))
    }

    /// Deploy class files into the output directory, creating package
    /// directories as needed and recording every created file and directory
    /// for deletion on disposal.
    async fn deploy(&self, class_files: &[ClassFile]) -> Result<(), EvalError> {
        if class_files.is_empty() {
            return Ok(());
        }
        let _exclusive = DEPLOY_LOCK.lock().await;

        for class_file in class_files {
            let Some((simple_name, package)) = class_file.compound_name.split_last() else {
                return Err(EvalError::Internal(
                    "Compiler produced a class with an empty compound name".to_string(),
                ));
            };

            let mut dir = self.inner.output_dir.clone();
            for component in package {
                dir.push(component);
                if !dir.exists() {
                    tokio::fs::create_dir(&dir).await?;
                    self.lock_state().directories.push(dir.clone());
                }
            }

            let path = dir.join(format!("{}.class", simple_name));
            debug!("Deploying {}", path.display());
            tokio::fs::write(&path, &class_file.bytes).await?;
            self.lock_state().snippet_files.push(path);
        }

        Ok(())
    }

    /// Construct an instance of the named class in the remote VM. When the
    /// class is not yet loaded there, force the load reflectively via
    /// Class.forName(...).newInstance().
    async fn new_instance(
        &self,
        class_name: &str,
        thread: &Arc<ThreadMirror>,
    ) -> Result<Arc<ObjectMirror>, EvalError> {
        let vm = &self.inner.vm;

        let classes = vm.classes_by_name(class_name).await?;
        if let Some(class) = classes.first() {
            return Ok(class.new_instance(thread).await?);
        }

        debug!("{} not loaded in target VM, forcing load", class_name);
        let class_class = vm
            .classes_by_name("java.lang.Class")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::Instantiation(class_name.to_string()))?;

        let name_string = vm.create_string(class_name).await?;
        let class_object = class_class
            .invoke_static(
                thread,
                "forName",
                "(Ljava/lang/String;)Ljava/lang/Class;",
                &[name_string.as_value()],
            )
            .await?;
        let Value::Object { tag, id } = class_object else {
            return Err(EvalError::Instantiation(class_name.to_string()));
        };
        if id == 0 {
            return Err(EvalError::Instantiation(class_name.to_string()));
        }

        let class_object = vm.object_mirror(tag, id);
        let instance = class_object
            .send_message("newInstance", "()Ljava/lang/Object;", &[], thread, false)
            .await?;
        let Value::Object { tag, id } = instance else {
            return Err(EvalError::Instantiation(class_name.to_string()));
        };
        if id == 0 {
            return Err(EvalError::Instantiation(class_name.to_string()));
        }

        Ok(vm.object_mirror(tag, id))
    }

    /// Write the current values of the captured locals and receiver into
    /// the wrapper instance's placeholder fields.
    async fn initialize_locals(
        &self,
        ctx: &EvalContext,
        instance: &ObjectMirror,
    ) -> Result<(), EvalError> {
        if let Some(frame) = &ctx.frame {
            for local in &ctx.locals {
                let field_name = format!("{}{}", LOCAL_VAR_PREFIX, local.variable.name);
                let field = instance
                    .field_named(&field_name)
                    .await?
                    .ok_or_else(|| EvalError::MissingLocalField(local.variable.name.clone()))?;
                let value = frame.get_value(&local.variable).await?;
                instance.set_field(&field, &value).await?;
            }
        }
        if let Some(this_object) = &ctx.this_object {
            let field = instance
                .field_named(DELEGATE_THIS)
                .await?
                .ok_or(EvalError::MissingThisField)?;
            instance.set_field(&field, &this_object.as_value()).await?;
        }
        Ok(())
    }

    /// Write the wrapper's placeholder fields back onto the original frame
    /// locals. The remote frame may have changed during the invocation; a
    /// missing placeholder field is not silently tolerated.
    async fn restore_locals(
        &self,
        ctx: &EvalContext,
        instance: &ObjectMirror,
    ) -> Result<(), EvalError> {
        let Some(frame) = &ctx.frame else {
            return Ok(());
        };
        for local in &ctx.locals {
            let field_name = format!("{}{}", LOCAL_VAR_PREFIX, local.variable.name);
            let value = instance
                .get_field(&field_name)
                .await?
                .ok_or_else(|| EvalError::MissingLocalField(local.variable.name.clone()))?;
            frame.set_value(&local.variable, &value).await?;
        }
        Ok(())
    }

    /// Interpret the wrapper's distinguished result fields.
    ///
    /// The declared result type is a remote class object. A `void` declared
    /// type yields the canonical void value; a null carried value is
    /// returned as-is; a primitive declared type is unboxed by scanning the
    /// carried wrapper object for a non-static field of the matching
    /// signature; anything else is an object reference returned unchanged.
    async fn convert_result(&self, instance: &ObjectMirror) -> Result<Option<Value>, EvalError> {
        let result_type = instance
            .get_field(RESULT_TYPE_FIELD)
            .await?
            .ok_or(EvalError::MissingResult)?;
        let result_value = instance
            .get_field(RESULT_VALUE_FIELD)
            .await?
            .ok_or(EvalError::MissingResult)?;

        let Some(class_object_id) = result_type.object_id() else {
            // No declared type: a problem or exception got here first.
            return Ok(None);
        };

        let vm = &self.inner.vm;
        let class_object = vm.object_mirror(tags::CLASS_OBJECT, class_object_id);
        let signature = class_object.reflected_type().await?.signature().await?;

        if signature == "V" || signature == "Lvoid;" {
            return Ok(Some(Value::Void));
        }

        if result_value.is_null() {
            return Ok(Some(result_value));
        }

        if signature.len() == 1 {
            // Primitive result: the VM handed us its boxed wrapper. Find the
            // non-static field carrying the matching signature and unbox.
            let Some(box_id) = result_value.object_id() else {
                return Err(EvalError::MissingResult);
            };
            let boxed = vm.object_mirror(tags::OBJECT, box_id);
            let fields = boxed.reference_type().await?.fields().await?;
            let carrier = fields
                .into_iter()
                .find(|f| !f.is_static() && f.signature == signature)
                .ok_or(EvalError::MissingResult)?;
            let values = boxed.get_field_values(std::slice::from_ref(&carrier)).await?;
            return values
                .into_iter()
                .next()
                .map(Some)
                .ok_or(EvalError::MissingResult);
        }

        Ok(Some(result_value))
    }

    /// Best effort: ask the remote exception that aborted the invocation to
    /// print its own stack trace. Failures here are logged, never escalated.
    async fn print_remote_stack_trace(&self, exception_id: u64, thread: &Arc<ThreadMirror>) {
        let exception = self.inner.vm.object_mirror(tags::OBJECT, exception_id);
        if let Err(e) = exception
            .send_message("printStackTrace", "()V", &[], thread, false)
            .await
        {
            warn!("Unable to print remote stack trace: {}", e);
        }
    }

    // ---- disposal ----------------------------------------------------------

    /// Mark the engine disposed and delete deployed artifacts.
    ///
    /// If an evaluation is in flight, cleanup is deferred until its
    /// completion callback has fired.
    pub async fn dispose(&self) {
        {
            let mut state = self.lock_state();
            state.disposed = true;
            if state.evaluations > 0 {
                debug!("Dispose deferred until in-flight evaluation completes");
                return;
            }
        }
        self.delete_artifacts().await;
    }

    /// Delete deployed class files, then created directories child-first.
    /// Deletion failures are logged, never escalated.
    async fn delete_artifacts(&self) {
        let (files, directories) = {
            let mut state = self.lock_state();
            (
                std::mem::take(&mut state.snippet_files),
                std::mem::take(&mut state.directories),
            )
        };

        for file in &files {
            match tokio::fs::remove_file(file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!(
                    "Unable to delete temporary evaluation class file {}: {}",
                    file.display(),
                    e
                ),
            }
        }

        for dir in directories.iter().rev() {
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!(
                    "Unable to delete temporary evaluation directory {}: {}",
                    dir.display(),
                    e
                ),
            }
        }
    }
}
