//! Evaluation entry points and the module cache
//!
//! Modules are cached by normalized path under the module root, so importing
//! the same file twice evaluates it once. `.json` files become modules whose
//! `default` export is the parsed document.

use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, debug_span};

use super::bytecode_vm::{Completion, InterruptKind, Resume, Vm};
use super::{Context, ContextState};
use crate::compiler::{EvalMode, Program, ScopeKind};
use crate::error::{JsError, SourceLocation};
use crate::handle::Handle;
use crate::value::{CoroutineBody, JsObject, ObjectKind, ObjectRef, PromiseStatus, PropertyKey, Value};

use super::builtins::json::json_to_value;

pub(crate) type ModuleCache = FxHashMap<PathBuf, ModuleRecord>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ModuleRecord {
    pub namespace: ObjectRef,
    /// Settles when evaluation finishes; `None` while the body first runs
    pub promise: Option<ObjectRef>,
}

/// Result of an `import`
#[derive(Debug, Clone, Copy)]
pub(crate) enum ModuleImport {
    /// Fully evaluated, or being evaluated further up the import chain
    Ready(ObjectRef),
    /// Suspended on a top-level `await`; the promise yields the namespace
    Pending(ObjectRef),
}

/// Lexically normalize `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl Context {
    /// Path a specifier refers to. Relative specifiers resolve against the
    /// importing file's directory; everything else against the base
    /// directory.
    pub(crate) fn resolve_module_path(&self, specifier: &str, importer: &str) -> PathBuf {
        let spec = Path::new(specifier);
        if spec.is_absolute() {
            return normalize(spec);
        }
        let relative = specifier.starts_with("./") || specifier.starts_with("../");
        let dir = match Path::new(importer).parent() {
            Some(parent) if relative && !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::new(),
        };
        let joined = dir.join(spec);
        if joined.is_absolute() {
            normalize(&joined)
        } else {
            normalize(&self.runtime.base_dir.join(joined))
        }
    }

    /// Import `specifier` on behalf of the file `importer`
    pub(crate) fn import_module(&mut self, specifier: &str, importer: &str) -> Result<ModuleImport, JsError> {
        let path = self.resolve_module_path(specifier, importer);
        let record = match self.modules.get(&path) {
            Some(record) => *record,
            None => self.load_module(&path, specifier)?,
        };
        let Some(promise) = record.promise else {
            return Ok(ModuleImport::Ready(record.namespace));
        };
        match self.promise_status(&Value::Object(promise)) {
            Some((PromiseStatus::Fulfilled, _)) => Ok(ModuleImport::Ready(record.namespace)),
            Some((PromiseStatus::Rejected, reason)) => Err(JsError::thrown(reason)),
            _ => Ok(ModuleImport::Pending(promise)),
        }
    }

    fn load_module(&mut self, path: &Path, specifier: &str) -> Result<ModuleRecord, JsError> {
        debug!(path = %path.display(), "loading module");
        let source = std::fs::read_to_string(path)
            .map_err(|_| JsError::module_error(format!("Cannot find module '{}'", specifier)))?;
        let filename = path.display().to_string();

        let namespace = self.create_namespace()?;
        self.heap.add_edge(self.roots.module, namespace);
        let mut record = ModuleRecord {
            namespace,
            promise: None,
        };
        self.modules.insert(path.to_path_buf(), record);

        let promise = if path.extension().is_some_and(|ext| ext == "json") {
            self.evaluate_json_module(&source, &filename, namespace)?
        } else {
            let program = self
                .runtime
                .compiler
                .compile(&source, &filename, EvalMode::Module)
                .map_err(|e| e.into_js_error(&filename));
            match program {
                Ok(program) => self.evaluate_module(Rc::new(program), namespace)?,
                Err(e) => {
                    self.modules.remove(path);
                    self.heap.remove_edge(self.roots.module, namespace);
                    return Err(e);
                }
            }
        };
        self.heap.add_edge(self.roots.module, promise);
        // a failed import is reported to the importer, not as an unhandled rejection
        self.mark_handled(promise)?;
        record.promise = Some(promise);
        self.modules.insert(path.to_path_buf(), record);
        Ok(record)
    }

    fn mark_handled(&mut self, promise: ObjectRef) -> Result<(), JsError> {
        if let ObjectKind::Promise(state) = &mut self.heap.object_mut(promise)?.kind {
            state.handled = true;
        }
        Ok(())
    }

    fn create_namespace(&mut self) -> Result<ObjectRef, JsError> {
        let namespace = self.alloc(JsObject::new(None, ObjectKind::Namespace));
        let tag = PropertyKey::Symbol(self.intrinsics.to_string_tag_symbol.clone());
        self.put(namespace, tag, Value::from("Module"))?;
        Ok(namespace)
    }

    fn evaluate_json_module(&mut self, source: &str, filename: &str, namespace: ObjectRef) -> Result<ObjectRef, JsError> {
        let document: serde_json::Value = serde_json::from_str(source).map_err(|e| JsError::SyntaxError {
            message: e.to_string(),
            location: SourceLocation {
                file: Some(filename.to_string()),
                line: e.line() as u32,
                column: e.column() as u32,
            },
        })?;
        let value = json_to_value(self, &document)?;
        let key = self.key("default");
        self.put(namespace, key, value)?;
        let promise = self.create_promise();
        self.resolve_promise(promise, Value::Object(namespace))?;
        Ok(promise)
    }

    /// Start a module body in its own scope under the global scope. The
    /// returned promise fulfills with the namespace.
    fn evaluate_module(&mut self, program: Rc<Program>, namespace: ObjectRef) -> Result<ObjectRef, JsError> {
        let saved = self.current_scope;
        let root = self.scopes.root();
        self.current_scope = root;
        let scope = self.push_scope_under(root, ScopeKind::Module)?;
        let mut vm = Vm::new(program, 0, scope);
        vm.module = Some(namespace);
        vm.is_async = true;
        let promise = self.spawn_coroutine(CoroutineBody::Vm(Box::new(vm)), Some(Value::Object(namespace)));
        self.current_scope = if self.scopes.contains(saved) { saved } else { root };
        promise?
            .as_object()
            .ok_or_else(|| JsError::internal_error("module evaluation without a promise"))
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Host entry points
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Load the module at `entry` (relative to the base directory) and
    /// return its namespace. Importing an already loaded path is a no-op.
    pub fn run(&mut self, entry: &str) -> Result<Handle, JsError> {
        self.ensure_usable()?;
        let _span = debug_span!("run", entry).entered();
        let previous = self.enter_running();
        let result = self.import_module(entry, "");
        self.leave_running(previous);
        let namespace = match result {
            Ok(ModuleImport::Ready(namespace)) => Ok(namespace),
            Ok(ModuleImport::Pending(_)) => {
                let path = self.resolve_module_path(entry, "");
                self.modules
                    .get(&path)
                    .map(|record| record.namespace)
                    .ok_or_else(|| JsError::internal_error("module vanished from the cache"))
            }
            Err(e) => Err(e),
        };
        self.report_uncaught(&namespace);
        let handle = namespace.map(|ns| self.make_handle(Value::Object(ns)));
        self.collect()?;
        handle
    }

    /// Compile and evaluate `source`. Scripts yield their completion value
    /// (a promise if the top level awaited); modules yield a promise of
    /// their namespace. Compile errors are returned without a report.
    pub fn eval(&mut self, source: &str, filename: &str, mode: EvalMode) -> Result<Handle, JsError> {
        let _span = debug_span!("eval", filename).entered();
        self.ensure_usable()?;
        let program = self
            .runtime
            .compiler
            .compile(source, filename, mode)
            .map_err(|e| e.into_js_error(filename))?;
        self.eval_program(Rc::new(program), mode)
    }

    /// Evaluate an already compiled program. An uncaught error is reported
    /// through the error callback and returned.
    pub fn eval_program(&mut self, program: Rc<Program>, mode: EvalMode) -> Result<Handle, JsError> {
        self.ensure_usable()?;
        let previous = self.enter_running();
        let saved = self.current_scope;
        let result = match mode {
            EvalMode::Script => self.eval_script(program),
            EvalMode::Module => self.eval_module(program),
        };
        self.current_scope = if self.scopes.contains(saved) { saved } else { self.scopes.root() };
        self.leave_running(previous);
        self.report_uncaught(&result);
        let handle = result.map(|value| self.make_handle(value));
        self.collect()?;
        handle
    }

    /// Hand an error escaping a host entry point to the error callback.
    /// The caller still receives it.
    fn report_uncaught<T>(&mut self, result: &Result<T, JsError>) {
        if let Err(e) = result
            && !e.is_internal()
        {
            self.report_error(e);
        }
    }

    fn eval_script(&mut self, program: Rc<Program>) -> Result<Value, JsError> {
        let root = self.scopes.root();
        let scope = self.push_scope_under(root, ScopeKind::Script)?;
        let mut vm = Vm::new(program, 0, scope);
        vm.is_async = true;
        match Box::new(vm).run(self, Resume::Start)? {
            Completion::Return(value) => Ok(value),
            Completion::Interrupt(interrupt) if interrupt.kind == InterruptKind::Await => {
                self.park_coroutine(CoroutineBody::Vm(interrupt.vm), interrupt.value, None)
            }
            Completion::Interrupt(interrupt) => {
                interrupt.vm.discard(self)?;
                Err(JsError::internal_error("script suspended on yield"))
            }
        }
    }

    fn eval_module(&mut self, program: Rc<Program>) -> Result<Value, JsError> {
        let namespace = self.create_namespace()?;
        let promise = self.evaluate_module(program, namespace)?;
        Ok(Value::Object(promise))
    }

    fn enter_running(&mut self) -> ContextState {
        let previous = self.state;
        if previous != ContextState::Draining {
            self.state = ContextState::Running;
        }
        previous
    }

    fn leave_running(&mut self, previous: ContextState) {
        if previous != ContextState::Draining {
            self.state = ContextState::Idle;
        }
    }
}
