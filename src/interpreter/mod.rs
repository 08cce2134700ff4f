//! Execution context
//!
//! A [`Context`] owns everything a running program touches: the chunk heap,
//! the scope tree, the realm's well-known objects, the call stack used for
//! diagnostics, the micro/macro task queues and the module cache. Bytecode
//! runs in [`Vm`] instances created per call; suspended VMs are parked in
//! generator and coroutine objects and resumed from here.

mod async_generator;
// Builtin function implementations (split into separate files)
pub mod builtins;

pub mod bytecode_vm;
mod call;
mod coroutine;
mod iteration;
mod modules;
mod operations;
mod realm;
pub mod scope;
mod tasks;

pub use bytecode_vm::{Completion, Interrupt, InterruptKind, Resume, Vm};
pub use operations::Hint;
pub use realm::Intrinsics;
pub use scope::{Binding, ScopeId, ScopeTree};
pub use tasks::TaskId;

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::Runtime;
use crate::compiler::{BindingKind, ScopeKind};
use crate::error::{JsError, StackFrame};
use crate::gc::{ChunkId, GcStats, Heap};
use crate::handle::{Handle, ReleaseQueue};
use crate::string_dict::StringDict;
use crate::value::{
    CoroutineBody, JsObject, JsString, JsSymbol, NativeFn, NativeFunction, ObjectKind, ObjectRef,
    PromiseStatus, PropertyKey, Value,
};

/// Lifecycle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Built, nothing evaluated yet
    Created,
    /// Evaluating a program or running a task
    Running,
    /// Waiting for the host
    Idle,
    /// Inside `run_until_idle`
    Draining,
    Disposed,
}

/// Root chunks that are not scopes
#[derive(Debug, Clone, Copy)]
pub(crate) struct Roots {
    /// Callees and arguments of queued tasks
    pub task: ChunkId,
    /// Namespaces and evaluation promises of cached modules
    pub module: ChunkId,
    /// Values held by host [`Handle`]s
    pub handle: ChunkId,
    /// Prototypes, constructors and other realm objects
    pub realm: ChunkId,
    /// Values leaving a popped scope with no enclosing scope to hold them;
    /// released at the next quiescent point
    pub transit: ChunkId,
}

/// A call stack entry
#[derive(Debug, Clone)]
pub(crate) struct CallFrame {
    pub frame: StackFrame,
    /// The function being run; natives read their slots through it
    pub callee: Option<ObjectRef>,
}

/// Receives uncaught errors from tasks and unhandled rejections
pub type ErrorCallback = Box<dyn FnMut(&mut Context, &JsError)>;

pub struct Context {
    pub(crate) heap: Heap,
    pub(crate) scopes: ScopeTree,
    pub(crate) current_scope: ScopeId,
    /// Parent of task scopes and suspendable function bodies
    pub(crate) task_scope: ScopeId,
    pub(crate) roots: Roots,
    releases: Rc<ReleaseQueue>,
    pub(crate) strings: StringDict,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) call_stack: Vec<CallFrame>,
    pub(crate) tasks: tasks::TaskQueues,
    pub(crate) modules: modules::ModuleCache,
    next_symbol_id: u64,
    error_callback: Option<ErrorCallback>,
    pub(crate) runtime: Runtime,
    pub(crate) state: ContextState,
    /// VMs currently executing (not suspended)
    pub(crate) running_vms: usize,
}

impl Context {
    /// Build a context with the realm and globals installed
    pub fn new(runtime: Runtime) -> Result<Self, JsError> {
        let mut heap = Heap::new();
        let scopes = ScopeTree::new(&mut heap);
        let root_scope = scopes.root();
        let roots = Roots {
            task: heap.alloc_root(),
            module: heap.alloc_root(),
            handle: heap.alloc_root(),
            realm: heap.alloc_root(),
            transit: heap.alloc_root(),
        };
        let mut next_symbol_id = 0;
        let intrinsics = Intrinsics::new(&mut heap, roots.realm, &mut next_symbol_id);

        let mut ctx = Self {
            heap,
            scopes,
            current_scope: root_scope,
            task_scope: root_scope,
            roots,
            releases: ReleaseQueue::new(),
            strings: StringDict::with_common_strings(),
            intrinsics,
            call_stack: Vec::new(),
            tasks: tasks::TaskQueues::default(),
            modules: FxHashMap::default(),
            next_symbol_id,
            error_callback: None,
            runtime,
            state: ContextState::Created,
            running_vms: 0,
        };
        ctx.task_scope = ctx.push_scope_under(root_scope, ScopeKind::Task)?;
        builtins::install(&mut ctx)?;
        Ok(ctx)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), JsError> {
        if self.state == ContextState::Disposed {
            return Err(JsError::internal_error("context has been disposed"));
        }
        Ok(())
    }

    pub fn intern(&mut self, s: &str) -> JsString {
        self.strings.get_or_insert(s)
    }

    pub fn key(&mut self, s: &str) -> PropertyKey {
        self.strings.key(s)
    }

    pub(crate) fn new_symbol(&mut self, description: Option<JsString>) -> JsSymbol {
        self.next_symbol_id += 1;
        JsSymbol::new(self.next_symbol_id, description)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Object creation
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Allocate an object owned by the current scope until something
    /// else references it
    pub fn alloc(&mut self, object: JsObject) -> ObjectRef {
        let id = self.heap.alloc_object(object);
        let root = self.current_root();
        self.heap.add_edge(root, id);
        id
    }

    pub fn create_object(&mut self) -> ObjectRef {
        let proto = self.intrinsics.object_prototype;
        self.alloc(JsObject::ordinary(Some(proto)))
    }

    pub fn create_array(&mut self, elements: Vec<Value>) -> ObjectRef {
        let proto = self.intrinsics.array_prototype;
        self.alloc(JsObject::new(Some(proto), ObjectKind::Array(elements)))
    }

    /// Create a host function callable from JavaScript
    pub fn create_native_function(&mut self, name: &str, func: NativeFn, length: u32) -> Value {
        Value::Object(self.create_native(name, func, length, Vec::new()))
    }

    /// Native function carrying `slots`, readable through [`Context::native_slot`]
    pub(crate) fn create_native(&mut self, name: &str, func: NativeFn, length: u32, slots: Vec<Value>) -> ObjectRef {
        let proto = self.intrinsics.function_prototype;
        let name = self.intern(name);
        self.alloc(JsObject::new(
            Some(proto),
            ObjectKind::Native(NativeFunction {
                name,
                func,
                length,
                slots,
                constructor: false,
            }),
        ))
    }

    /// Add a native method to `target`
    pub fn register_method(&mut self, target: ObjectRef, name: &str, func: NativeFn, arity: u32) -> Result<(), JsError> {
        let method = self.create_native(name, func, arity, Vec::new());
        let key = self.key(name);
        self.put(target, key, Value::Object(method))
    }

    /// Add a native method keyed by a well-known symbol
    pub(crate) fn register_symbol_method(
        &mut self,
        target: ObjectRef,
        symbol: JsSymbol,
        name: &str,
        func: NativeFn,
        arity: u32,
    ) -> Result<(), JsError> {
        let method = self.create_native(name, func, arity, Vec::new());
        self.put(target, PropertyKey::Symbol(symbol), Value::Object(method))
    }

    /// Declare a global `var` binding
    pub fn define_global(&mut self, name: &str, value: Value) -> Result<(), JsError> {
        let name = self.intern(name);
        let root = self.scopes.root();
        self.declare_in(root, &name, BindingKind::Var, Some(value))
    }

    /// Current value of a global binding
    pub fn get_global(&mut self, name: &str) -> Result<Value, JsError> {
        let name = self.intern(name);
        let root = self.scopes.root();
        let binding = self
            .scopes
            .get(root)?
            .bindings
            .get(name.as_str())
            .copied()
            .ok_or_else(|| JsError::reference_error(name.as_str()))?;
        Ok(self.heap.binding(binding.chunk)?.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Edge-maintaining mutation
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Set an own property, moving the edge from the old value to the new
    pub(crate) fn put(&mut self, obj: ObjectRef, key: PropertyKey, value: Value) -> Result<(), JsError> {
        self.heap.link(obj, &value);
        let old = self.heap.object_mut(obj)?.properties.insert(key, value);
        if let Some(old) = old {
            self.heap.unlink(obj, &old);
        }
        Ok(())
    }

    /// Remove an own property; returns whether it existed
    pub(crate) fn remove(&mut self, obj: ObjectRef, key: &PropertyKey) -> Result<bool, JsError> {
        let old = self.heap.object_mut(obj)?.properties.shift_remove(key);
        match old {
            Some(old) => {
                self.heap.unlink(obj, &old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn set_prototype(&mut self, obj: ObjectRef, proto: Option<ObjectRef>) -> Result<(), JsError> {
        if let Some(p) = proto {
            self.heap.add_edge(obj, p);
        }
        let old = std::mem::replace(&mut self.heap.object_mut(obj)?.prototype, proto);
        if let Some(old) = old {
            self.heap.remove_edge(obj, old);
        }
        Ok(())
    }

    /// Swap an object's payload, moving edges from the old payload's
    /// references to the new one's
    pub(crate) fn replace_kind(&mut self, obj: ObjectRef, kind: ObjectKind) -> Result<ObjectKind, JsError> {
        let mut probe = JsObject::new(None, kind);
        let added = probe.references();
        self.heap.link_all(obj, &added);
        let object = self.heap.object_mut(obj)?;
        std::mem::swap(&mut object.kind, &mut probe.kind);
        let removed = probe.references();
        self.heap.unlink_all(obj, &removed);
        Ok(probe.kind)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Handles
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Root `value` for the host until the last clone of the handle drops
    pub fn make_handle(&mut self, value: Value) -> Handle {
        self.heap.link(self.roots.handle, &value);
        Handle::new(value, self.releases.clone())
    }

    fn release_handles(&mut self) {
        for id in self.releases.drain() {
            self.heap.remove_edge(self.roots.handle, id);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Call stack
    // ═══════════════════════════════════════════════════════════════════════════════

    pub(crate) fn push_frame(&mut self, frame: StackFrame, callee: Option<ObjectRef>) -> Result<(), JsError> {
        if self.call_stack.len() >= self.runtime.max_call_depth {
            return Err(JsError::range_error("Maximum call stack size exceeded"));
        }
        self.call_stack.push(CallFrame { frame, callee });
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) {
        self.call_stack.pop();
    }

    /// Snapshot of the call stack, innermost first
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        self.call_stack.iter().rev().map(|f| f.frame.clone()).collect()
    }

    pub(crate) fn format_stack(&self, name: &str, message: &str) -> String {
        let mut out = if message.is_empty() {
            name.to_string()
        } else {
            format!("{}: {}", name, message)
        };
        for frame in self.call_stack.iter().rev() {
            out.push('\n');
            out.push_str(&frame.frame.to_string());
        }
        out
    }

    /// Slot `index` of the native function currently running
    pub fn native_slot(&self, index: usize) -> Value {
        self.call_stack
            .last()
            .and_then(|f| f.callee)
            .and_then(|id| self.heap.object(id).ok())
            .and_then(|obj| match &obj.kind {
                ObjectKind::Native(native) => native.slots.get(index).cloned(),
                _ => None,
            })
            .unwrap_or(Value::Undefined)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Errors
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Replace the handler for uncaught errors. The default logs through
    /// `tracing::error!`.
    pub fn set_error_callback(&mut self, callback: impl FnMut(&mut Context, &JsError) + 'static) {
        self.error_callback = Some(Box::new(callback));
    }

    /// Hand an uncaught error to the error callback
    pub fn report_error(&mut self, error: &JsError) {
        match self.error_callback.take() {
            Some(mut callback) => {
                callback(self, error);
                if self.error_callback.is_none() {
                    self.error_callback = Some(callback);
                }
            }
            None => {
                let text = self.error_text(error);
                tracing::error!("Uncaught {}", text);
            }
        }
    }

    /// Human-readable text of an error without running JavaScript
    pub fn error_text(&self, error: &JsError) -> String {
        match error {
            JsError::Thrown { value } => self.value_text(value),
            JsError::UnhandledRejection { reason } => format!("(in promise) {}", reason),
            other => format!("{}: {}", other.error_name(), other.message()),
        }
    }

    /// `Name: message` for error objects, the display string otherwise.
    /// Reads the heap only.
    pub fn value_text(&self, value: &Value) -> String {
        if let Some(id) = value.as_object()
            && let Ok(obj) = self.heap.object(id)
            && matches!(obj.kind, ObjectKind::Error)
        {
            let name = self.peek_field(id, "name").unwrap_or_else(|| "Error".to_string());
            return match self.peek_field(id, "message") {
                Some(message) if !message.is_empty() => format!("{}: {}", name, message),
                _ => name,
            };
        }
        builtins::console::display(self, value)
    }

    /// String-valued property along the prototype chain, read without
    /// invoking any code
    fn peek_field(&self, id: ObjectRef, name: &str) -> Option<String> {
        let key = PropertyKey::from(name);
        let mut current = Some(id);
        let mut depth = 0;
        while let Some(c) = current {
            let obj = self.heap.object(c).ok()?;
            if let Some(value) = obj.properties.get(&key) {
                return value.as_str().map(str::to_string);
            }
            depth += 1;
            if depth > 64 {
                return None;
            }
            current = obj.prototype;
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Reclamation
    // ═══════════════════════════════════════════════════════════════════════════════

    /// No VM is executing and no native call is in progress
    pub(crate) fn is_quiescent(&self) -> bool {
        self.running_vms == 0 && self.call_stack.is_empty()
    }

    /// Reclaim everything orphaned since the last collection. Does nothing
    /// while code is running; the next quiescent point picks it up.
    /// Popped scopes do not wait for this: their roots are swept on pop.
    pub fn collect(&mut self) -> Result<(), JsError> {
        if !self.is_quiescent() {
            return Ok(());
        }
        self.release_handles();
        self.heap.clear_root(self.roots.transit);
        while self.heap.has_orphans() {
            let queue = self.heap.take_orphans();
            let marked = self.heap.sweep(queue);
            self.finish_collection(marked)?;
        }
        Ok(())
    }

    /// Free marked chunks. Unhandled rejections among them are reported and
    /// suspended bodies they owned are discarded.
    pub(crate) fn finish_collection(&mut self, marked: Vec<ChunkId>) -> Result<(), JsError> {
        if marked.is_empty() {
            return Ok(());
        }
        let mut reasons = Vec::new();
        let mut bodies = Vec::new();
        for &id in &marked {
            let Ok(obj) = self.heap.object_mut(id) else {
                continue;
            };
            match &mut obj.kind {
                ObjectKind::Promise(state) if state.status == PromiseStatus::Rejected && !state.handled => {
                    state.handled = true;
                    reasons.push(state.result.clone());
                }
                ObjectKind::Generator(state) => bodies.extend(state.vm.take()),
                ObjectKind::AsyncGenerator(state) => bodies.extend(state.vm.take()),
                ObjectKind::Coroutine(coroutine) => {
                    if let Some(CoroutineBody::Vm(vm)) = coroutine.body.take() {
                        bodies.push(vm);
                    }
                }
                _ => {}
            }
        }
        let reasons: Vec<String> = reasons.iter().map(|r| self.value_text(r)).collect();

        let freed = self.heap.free(&marked);
        debug!(freed, "collected");

        for reason in reasons {
            self.report_error(&JsError::UnhandledRejection { reason });
        }
        for vm in bodies {
            vm.discard(self)?;
        }
        Ok(())
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Check the chunk graph's edge bookkeeping
    pub fn verify_heap(&self) -> Result<(), String> {
        self.heap.verify_edges()
    }

    /// Tear the context down: pending tasks are dropped, every open scope
    /// is popped with its `using` disposers run (suspended bodies included,
    /// without their finally blocks) and all chunks are freed. Disposal
    /// errors go to the error callback.
    pub fn dispose(&mut self) -> Result<(), JsError> {
        if self.state == ContextState::Disposed {
            return Ok(());
        }
        self.tasks = tasks::TaskQueues::default();
        self.modules.clear();
        self.call_stack.clear();
        let root = self.scopes.root();
        self.current_scope = root;
        let children = self.scopes.get(root)?.children.clone();
        for child in children.into_iter().rev() {
            if let Err(e) = self.teardown_scope(child) {
                if e.is_internal() {
                    return Err(e);
                }
                self.report_error(&e);
            }
        }
        if let Err(e) = self.dispose_resources(root) {
            if e.is_internal() {
                return Err(e);
            }
            self.report_error(&e);
        }
        self.error_callback = None;
        self.tasks = tasks::TaskQueues::default();
        self.releases.reset();
        self.heap = Heap::new();
        self.scopes = ScopeTree::new(&mut self.heap);
        self.current_scope = self.scopes.root();
        self.state = ContextState::Disposed;
        debug!("context disposed");
        Ok(())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.state)
            .field("scopes", &self.scopes.len())
            .field("call_depth", &self.call_stack.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context::new(Runtime::default()).unwrap()
    }

    #[test]
    fn test_new_context_is_created() {
        let ctx = context();
        assert_eq!(ctx.state(), ContextState::Created);
        assert!(!ctx.has_task());
    }

    #[test]
    fn test_define_and_read_global() {
        let mut ctx = context();
        ctx.define_global("answer", Value::Number(42.0)).unwrap();
        assert_eq!(ctx.get_global("answer").unwrap(), Value::Number(42.0));
        assert!(ctx.get_global("missing").is_err());
    }

    #[test]
    fn test_self_cycle_freed_when_scope_pops() {
        let mut ctx = context();
        ctx.collect().unwrap();
        let before = ctx.gc_stats().live_chunks;

        ctx.push_scope(ScopeKind::Block).unwrap();
        let a = ctx.create_object();
        let key = ctx.key("self");
        ctx.put(a, key, Value::Object(a)).unwrap();
        ctx.pop_scope().unwrap();

        assert!(!ctx.heap.contains(a));
        assert_eq!(ctx.gc_stats().live_chunks, before);
        ctx.verify_heap().unwrap();
    }

    #[test]
    fn test_handle_keeps_value_alive_until_dropped() {
        let mut ctx = context();
        ctx.push_scope(ScopeKind::Block).unwrap();
        let obj = ctx.create_object();
        let handle = ctx.make_handle(Value::Object(obj));
        ctx.pop_scope().unwrap();
        assert!(ctx.heap.contains(obj));

        drop(handle);
        ctx.collect().unwrap();
        assert!(!ctx.heap.contains(obj));
    }

    #[test]
    fn test_replace_kind_moves_edges() {
        let mut ctx = context();
        let target = ctx.create_object();
        let holder = ctx.create_array(vec![Value::Object(target)]);
        assert_eq!(ctx.heap.edge_count(holder, target), 1);
        ctx.replace_kind(holder, ObjectKind::Array(Vec::new())).unwrap();
        assert_eq!(ctx.heap.edge_count(holder, target), 0);
    }

    #[test]
    fn test_handle_dropped_after_dispose_releases_nothing() {
        let mut ctx = context();
        let obj = ctx.create_object();
        let handle = ctx.make_handle(Value::Object(obj));
        ctx.dispose().unwrap();

        drop(handle);
        assert!(ctx.releases.drain().is_empty());
    }

    #[test]
    fn test_dispose_frees_everything() {
        let mut ctx = context();
        ctx.define_global("x", Value::Number(1.0)).unwrap();
        ctx.dispose().unwrap();
        assert_eq!(ctx.state(), ContextState::Disposed);
        assert_eq!(ctx.gc_stats().roots, 1);
    }
}
