//! Bytecode Virtual Machine
//!
//! A stack machine executing one function body (or one script or module
//! body) of a [`Program`]. Besides the operand stack it keeps a try-stack of
//! protected regions, a label stack of breakable regions and the list of
//! scopes it opened. `await` and `yield` stop the machine with an
//! [`Interrupt`] that carries the machine itself; whoever receives it parks
//! the box in a generator or coroutine object and resumes it later with a
//! [`Resume`].

use std::rc::Rc;

use super::{Context, ScopeId};
use crate::compiler::{Constant, Op, Program};
use crate::error::{JsError, StackFrame};
use crate::gc::ChunkId;
use crate::value::{
    CheapClone, JsObject, JsString, ListIterator, ObjectKind, ObjectRef, PropertyKey, Value,
    push_values,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Suspension
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Await,
    Yield,
}

/// A machine stopped at `await` or `yield`
#[derive(Debug)]
pub struct Interrupt {
    pub kind: InterruptKind,
    /// The awaited or yielded value
    pub value: Value,
    pub vm: Box<Vm>,
}

/// Outcome of running a machine until it stops
#[derive(Debug)]
pub enum Completion {
    Return(Value),
    Interrupt(Interrupt),
}

/// How a machine is (re-)entered
#[derive(Debug, Clone)]
pub enum Resume {
    Start,
    /// Continue with the settled or sent value
    Next(Value),
    /// Throw at the suspension point
    Throw(JsError),
    /// Return from the suspension point, running finally blocks
    Return(Value),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Machine state
// ═══════════════════════════════════════════════════════════════════════════════

/// A protected region opened by `TryBegin`
#[derive(Debug, Clone, Copy)]
struct TryFrame {
    catch: Option<u32>,
    finally: Option<u32>,
    stack_len: usize,
    label_len: usize,
    scope_len: usize,
    pending_len: usize,
}

/// A breakable region opened by `PushLabel`
#[derive(Debug, Clone)]
struct LabelFrame {
    label: Option<JsString>,
    break_target: u32,
    continue_target: Option<u32>,
    stack_len: usize,
    scope_len: usize,
    try_len: usize,
}

/// A completion travelling through finally blocks
#[derive(Debug, Clone)]
enum Abrupt {
    Normal,
    Throw(JsError),
    Return(Value),
    Jump {
        target: u32,
        label_len: usize,
        try_len: usize,
        scope_len: usize,
        stack_len: usize,
    },
}

impl Abrupt {
    /// The value carried out of the scopes being left
    fn value(&self) -> Option<&Value> {
        match self {
            Abrupt::Return(value) => Some(value),
            Abrupt::Throw(error) => thrown_value(error),
            _ => None,
        }
    }
}

fn thrown_value(error: &JsError) -> Option<&Value> {
    match error {
        JsError::Thrown { value } => Some(value),
        _ => None,
    }
}

/// Where a resumed value goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeInto {
    Stack,
    /// An async disposer settled; `PopScope` continues with the next one
    Dispose,
    /// An async iterator result settled; `IteratorNext` picks it up
    IteratorResult,
}

/// What the dispatch loop does after an instruction
enum Flow {
    Continue,
    Return(Value),
    Suspend(InterruptKind, Value),
}

pub struct Vm {
    program: Rc<Program>,
    ip: u32,
    /// Offset of the instruction being executed
    op_start: u32,
    stack: Vec<Value>,
    try_stack: Vec<TryFrame>,
    labels: Vec<LabelFrame>,
    /// Scopes opened by this machine, the function scope first
    scopes: Vec<ScopeId>,
    /// Completions waiting for their finally block to end
    pending: Vec<Abrupt>,
    resume_into: ResumeInto,
    /// Settled result of an async iterator step
    iterator_result: Option<Value>,
    /// Where values leaving the outermost scope are kept: the caller's scope
    holding: Option<ChunkId>,

    pub(crate) this: Value,
    /// Class whose constructor is running; `super()` calls its parent
    pub(crate) clazz: Option<ObjectRef>,
    pub(crate) function: Option<ObjectRef>,
    /// Namespace of the module being evaluated
    pub(crate) module: Option<ObjectRef>,
    pub(crate) frame: StackFrame,
    pub(crate) is_async: bool,
    pub(crate) is_generator: bool,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("file", &self.program.filename)
            .field("ip", &self.ip)
            .field("stack", &self.stack.len())
            .field("scopes", &self.scopes.len())
            .finish()
    }
}

impl Vm {
    /// Machine starting at `entry` inside `scope`, which it owns from now on
    pub fn new(program: Rc<Program>, entry: u32, scope: ScopeId) -> Self {
        let frame = StackFrame {
            function_name: None,
            file: Some(program.filename.clone()),
            line: 0,
            column: 0,
        };
        Self {
            program,
            ip: entry,
            op_start: entry,
            stack: Vec::new(),
            try_stack: Vec::new(),
            labels: Vec::new(),
            scopes: vec![scope],
            pending: Vec::new(),
            resume_into: ResumeInto::Stack,
            iterator_result: None,
            holding: None,
            this: Value::Undefined,
            clazz: None,
            function: None,
            module: None,
            frame,
            is_async: false,
            is_generator: false,
        }
    }

    pub fn program(&self) -> &Rc<Program> {
        &self.program
    }

    /// Chunks this machine keeps alive while suspended
    pub fn references(&self) -> Vec<ChunkId> {
        let mut refs = self.live_values();
        refs.extend(self.clazz);
        refs.extend(self.function);
        refs.extend(self.module);
        refs
    }

    /// Objects on the operand stack and in pending completions
    fn live_values(&self) -> Vec<ChunkId> {
        let mut refs = Vec::new();
        push_values(&mut refs, &self.stack);
        push_values(&mut refs, [&self.this]);
        push_values(&mut refs, &self.iterator_result);
        for abrupt in &self.pending {
            push_values(&mut refs, abrupt.value());
        }
        refs
    }

    /// Link everything the machine still holds, plus `in_flight`, to the
    /// scope that outlives the one being popped. The popped scope is swept
    /// immediately and must not take these values with it.
    fn hold_live_values(&self, ctx: &mut Context, in_flight: Option<&Value>) {
        let root = match self.scopes.last() {
            Some(&id) => ctx.holding_root(id),
            None => self.holding.unwrap_or(ctx.roots.transit),
        };
        let mut refs = self.live_values();
        push_values(&mut refs, in_flight);
        ctx.heap.link_all(root, &refs);
    }

    fn current_scope(&self, ctx: &Context) -> ScopeId {
        self.scopes.last().copied().unwrap_or(ctx.task_scope)
    }

    /// Run until the body completes or suspends.
    ///
    /// On an uncaught error every scope the machine still owns is torn down
    /// (disposers run) before the error is returned.
    pub fn run(mut self: Box<Self>, ctx: &mut Context, resume: Resume) -> Result<Completion, JsError> {
        if let Err(e) = ctx.push_frame(self.frame.clone(), self.function) {
            self.holding = Some(ctx.holding_root(ctx.current_scope));
            let e = self.close_scopes(ctx, e);
            return Err(e);
        }
        ctx.running_vms += 1;
        let saved = ctx.current_scope;
        self.holding = Some(ctx.holding_root(saved));
        ctx.current_scope = self.current_scope(ctx);

        let result = self.execute(ctx, resume);
        let result = match result {
            Ok(Flow::Suspend(kind, value)) => Ok(Completion::Interrupt(Interrupt { kind, value, vm: self })),
            Ok(Flow::Return(value)) => Ok(Completion::Return(value)),
            Ok(Flow::Continue) => Err(JsError::internal_error("machine stopped without completing")),
            Err(e) => Err(self.close_scopes(ctx, e)),
        };

        ctx.running_vms = ctx.running_vms.saturating_sub(1);
        ctx.pop_frame();
        ctx.current_scope = if ctx.scopes.contains(saved) { saved } else { ctx.scopes.root() };
        result
    }

    /// Tear down every owned scope after `error`, folding disposal errors in
    fn close_scopes(&mut self, ctx: &mut Context, error: JsError) -> JsError {
        if error.is_internal() {
            let _ = self.discard_scopes(ctx);
            return error;
        }
        match self.unwind_scopes(ctx, 0, thrown_value(&error)) {
            Ok(()) => error,
            Err(e) if e.is_internal() => e,
            Err(e) => ctx.suppress(e, Some(error)).unwrap_or_else(|internal| internal),
        }
    }

    fn discard_scopes(&mut self, ctx: &mut Context) -> Result<(), JsError> {
        if let Some(&first) = self.scopes.first()
            && ctx.scopes.contains(first)
        {
            ctx.discard_scope(first)?;
        }
        self.scopes.clear();
        Ok(())
    }

    /// Drop a machine that will never resume. Its scopes go away without
    /// running disposers or finally blocks.
    pub fn discard(mut self: Box<Self>, ctx: &mut Context) -> Result<(), JsError> {
        self.discard_scopes(ctx)
    }

    /// Pop owned scopes down to `len`, running their disposers.
    /// `in_flight` is the value being returned or thrown past them.
    fn unwind_scopes(&mut self, ctx: &mut Context, len: usize, in_flight: Option<&Value>) -> Result<(), JsError> {
        let mut error = None;
        while self.scopes.len() > len {
            let Some(id) = self.scopes.pop() else { break };
            ctx.current_scope = self.current_scope(ctx);
            if !ctx.scopes.contains(id) {
                continue;
            }
            self.hold_live_values(ctx, in_flight);
            if let Err(e) = ctx.teardown_scope(id) {
                if e.is_internal() {
                    return Err(e);
                }
                error = Some(ctx.suppress(e, error)?);
            }
        }
        ctx.current_scope = self.current_scope(ctx);
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Dispatch loop
    // ═══════════════════════════════════════════════════════════════════════════════

    fn execute(&mut self, ctx: &mut Context, resume: Resume) -> Result<Flow, JsError> {
        let into = std::mem::replace(&mut self.resume_into, ResumeInto::Stack);
        match (resume, into) {
            (Resume::Start, _) => {}
            (Resume::Next(value), ResumeInto::Stack) => self.stack.push(value),
            (Resume::Next(_), ResumeInto::Dispose) => {}
            (Resume::Next(value), ResumeInto::IteratorResult) => self.iterator_result = Some(value),
            (Resume::Throw(error), ResumeInto::Dispose) => {
                let id = self.current_scope(ctx);
                let previous = ctx.scopes.get_mut(id)?.pending_error.take();
                let combined = ctx.suppress(error, previous)?;
                ctx.scopes.get_mut(id)?.pending_error = Some(combined);
            }
            (Resume::Throw(error), _) => {
                if let Flow::Return(v) = self.complete(ctx, Abrupt::Throw(error))? {
                    return Ok(Flow::Return(v));
                }
            }
            (Resume::Return(value), _) => {
                if let Flow::Return(v) = self.complete(ctx, Abrupt::Return(value))? {
                    return Ok(Flow::Return(v));
                }
            }
        }

        loop {
            self.op_start = self.ip;
            let op = self
                .program
                .op(self.ip)
                .ok_or_else(|| JsError::internal_error(format!("instruction pointer {} out of range", self.ip)))?;
            self.ip += 1;
            match self.step(ctx, op) {
                Ok(Flow::Continue) => {}
                Ok(flow) => return Ok(flow),
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    self.mark_location(ctx);
                    if let Flow::Return(v) = self.complete(ctx, Abrupt::Throw(e))? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
        }
    }

    /// Record the current source position in this machine's call frame
    fn mark_location(&self, ctx: &mut Context) {
        if let Some((line, column)) = self.program.location(self.op_start)
            && let Some(top) = ctx.call_stack.last_mut()
        {
            top.frame.line = line;
            top.frame.column = column;
        }
    }

    /// Route an abrupt completion to the innermost handler that wants it.
    /// `Flow::Continue` means execution resumes at the new `ip`.
    fn complete(&mut self, ctx: &mut Context, mut abrupt: Abrupt) -> Result<Flow, JsError> {
        loop {
            let frame = match &abrupt {
                Abrupt::Throw(e) if e.is_internal() => None,
                Abrupt::Jump { try_len, .. } if self.try_stack.len() <= *try_len => None,
                Abrupt::Normal => None,
                _ => self.try_stack.pop(),
            };
            let Some(frame) = frame else { break };

            if let Err(e) = self.unwind_scopes(ctx, frame.scope_len, abrupt.value()) {
                abrupt = self.fold_error(ctx, abrupt, e)?;
            }
            self.stack.truncate(frame.stack_len);
            self.labels.truncate(frame.label_len);
            self.pending.truncate(frame.pending_len);

            abrupt = match (abrupt, frame.catch, frame.finally) {
                (Abrupt::Throw(error), Some(catch), _) => {
                    let value = ctx.error_to_value(error)?;
                    // the catch block ends with TryEnd, which enters finally
                    self.try_stack.push(TryFrame { catch: None, ..frame });
                    self.stack.push(value);
                    self.ip = catch;
                    return Ok(Flow::Continue);
                }
                (other, _, Some(finally)) => {
                    self.pending.push(other);
                    self.ip = finally;
                    return Ok(Flow::Continue);
                }
                (other, _, None) => other,
            };
        }

        match abrupt {
            Abrupt::Normal => Ok(Flow::Continue),
            Abrupt::Throw(error) => Err(error),
            Abrupt::Return(value) => {
                self.try_stack.clear();
                self.labels.clear();
                self.pending.clear();
                self.unwind_scopes(ctx, 0, Some(&value))?;
                Ok(Flow::Return(value))
            }
            Abrupt::Jump {
                target,
                label_len,
                scope_len,
                stack_len,
                ..
            } => {
                self.unwind_scopes(ctx, scope_len, None)?;
                self.stack.truncate(stack_len);
                self.labels.truncate(label_len);
                self.ip = target;
                Ok(Flow::Continue)
            }
        }
    }

    /// A disposal error during unwinding replaces a pending return or jump
    /// and suppresses a pending throw
    fn fold_error(&mut self, ctx: &mut Context, abrupt: Abrupt, error: JsError) -> Result<Abrupt, JsError> {
        if error.is_internal() {
            return Err(error);
        }
        Ok(match abrupt {
            Abrupt::Throw(previous) => Abrupt::Throw(ctx.suppress(error, Some(previous))?),
            _ => Abrupt::Throw(error),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Operand helpers
    // ═══════════════════════════════════════════════════════════════════════════════

    fn pop(&mut self) -> Result<Value, JsError> {
        self.stack
            .pop()
            .ok_or_else(|| JsError::internal_error("operand stack underflow"))
    }

    fn pop_n(&mut self, n: u32) -> Result<Vec<Value>, JsError> {
        let n = n as usize;
        if self.stack.len() < n {
            return Err(JsError::internal_error("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn peek(&self, depth: u32) -> Result<Value, JsError> {
        let index = self
            .stack
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or_else(|| JsError::internal_error("operand stack underflow"))?;
        self.stack
            .get(index)
            .cloned()
            .ok_or_else(|| JsError::internal_error("operand stack underflow"))
    }

    fn name(&self, index: u32) -> Result<JsString, JsError> {
        self.program
            .name(index)
            .map(CheapClone::cheap_clone)
            .ok_or_else(|| JsError::internal_error(format!("constant {} is not a name", index)))
    }

    fn object_operand(&self, value: &Value) -> Result<ObjectRef, JsError> {
        value
            .as_object()
            .ok_or_else(|| JsError::internal_error("instruction expects an object operand"))
    }

    fn enter_scope(&mut self, ctx: &mut Context, kind: crate::compiler::ScopeKind) -> Result<(), JsError> {
        let parent = self.current_scope(ctx);
        let id = ctx.push_scope_under(parent, kind)?;
        self.scopes.push(id);
        ctx.current_scope = id;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Instructions
    // ═══════════════════════════════════════════════════════════════════════════════

    fn step(&mut self, ctx: &mut Context, op: Op) -> Result<Flow, JsError> {
        match op {
            // ───────────────────────────────────────────────────────────────────
            // Scopes and stack
            // ───────────────────────────────────────────────────────────────────
            Op::PushScope { kind } => self.enter_scope(ctx, kind)?,
            Op::PopScope => return self.pop_scope(ctx),
            Op::Pop => {
                self.pop()?;
            }
            Op::Dup => {
                let top = self.peek(0)?;
                self.stack.push(top);
            }
            Op::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(a);
            }
            Op::PushValue { depth } => {
                let value = self.peek(depth)?;
                self.stack.push(value);
            }
            Op::PushUndefined => self.stack.push(Value::Undefined),
            Op::PushNull => self.stack.push(Value::Null),
            Op::PushUninitialized => self.stack.push(Value::Uninitialized),
            Op::PushTrue => self.stack.push(Value::Boolean(true)),
            Op::PushFalse => self.stack.push(Value::Boolean(false)),
            Op::PushConst { index } => {
                let value = match self.program.constant(index) {
                    Some(Constant::Number(n)) => Value::Number(*n),
                    Some(Constant::String(s)) => Value::String(s.cheap_clone()),
                    None => return Err(JsError::internal_error(format!("unknown constant {}", index))),
                };
                self.stack.push(value);
            }
            Op::PushThis => self.stack.push(self.this.clone()),
            Op::PushObject => {
                let obj = ctx.create_object();
                self.stack.push(Value::Object(obj));
            }
            Op::PushArray { count } => {
                let elements = self.pop_n(count)?;
                let array = ctx.create_array(elements);
                self.stack.push(Value::Object(array));
            }
            Op::PushFunction { function } => {
                let is_arrow = self.program.function(function).is_some_and(|t| t.kind.is_arrow());
                let this_value = is_arrow.then(|| self.this.clone());
                let closure = ctx.create_closure(&self.program, function, this_value)?;
                self.stack.push(Value::Object(closure));
            }
            Op::PushClass { function, extends } => {
                let parent = if extends { Some(self.pop()?) } else { None };
                let class = ctx.create_class(&self.program, function, parent)?;
                self.stack.push(Value::Object(class));
            }

            // ───────────────────────────────────────────────────────────────────
            // Bindings
            // ───────────────────────────────────────────────────────────────────
            Op::Declare { name, kind } => {
                let name = self.name(name)?;
                ctx.declare(&name, kind)?;
            }
            Op::Initialize { name } => {
                let name = self.name(name)?;
                let value = self.pop()?;
                ctx.initialize(&name, value)?;
            }
            Op::Load { name } => {
                let name = self.name(name)?;
                let value = ctx.load(&name)?;
                self.stack.push(value);
            }
            Op::Store { name } => {
                let name = self.name(name)?;
                let value = self.pop()?;
                ctx.store(&name, value)?;
            }
            Op::TypeOfName { name } => {
                let name = self.name(name)?;
                let value = ctx.type_of_name(&name)?;
                self.stack.push(value);
            }

            // ───────────────────────────────────────────────────────────────────
            // Fields
            // ───────────────────────────────────────────────────────────────────
            Op::GetField => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let key = ctx.to_property_key(&key)?;
                let value = ctx.get_field(&obj, &key)?;
                self.stack.push(value);
            }
            Op::SetField => {
                let value = self.pop()?;
                let key = self.pop()?;
                let obj = self.pop()?;
                let key = ctx.to_property_key(&key)?;
                ctx.set_field(&obj, key, value)?;
            }
            Op::GetNamed { name } => {
                let key = PropertyKey::from(self.name(name)?);
                let obj = self.pop()?;
                let value = ctx.get_field(&obj, &key)?;
                self.stack.push(value);
            }
            Op::SetNamed { name } => {
                let key = PropertyKey::from(self.name(name)?);
                let value = self.pop()?;
                let obj = self.pop()?;
                ctx.set_field(&obj, key, value)?;
            }
            Op::DelField => {
                let key = self.pop()?;
                let obj = self.pop()?;
                let key = ctx.to_property_key(&key)?;
                let deleted = ctx.del_field(&obj, &key)?;
                self.stack.push(Value::Boolean(deleted));
            }
            Op::InitField => {
                let value = self.pop()?;
                let key = self.pop()?;
                let obj = self.peek(0)?;
                let id = self.object_operand(&obj)?;
                let key = ctx.to_property_key(&key)?;
                ctx.set_object_field(id, key, value)?;
            }
            Op::DefineMethod { is_static } => {
                let method = self.pop()?;
                let key = self.pop()?;
                let class = self.peek(0)?;
                let class_id = self.object_operand(&class)?;
                let key = ctx.to_property_key(&key)?;
                let target = if is_static {
                    class_id
                } else {
                    let prototype_key = ctx.key("prototype");
                    let prototype = ctx.get_object_field(class_id, &prototype_key)?;
                    self.object_operand(&prototype)?
                };
                ctx.put(target, key, method)?;
            }
            Op::Append => {
                let value = self.pop()?;
                let array = self.peek(0)?;
                ctx.push_element(self.object_operand(&array)?, value)?;
            }
            Op::Spread => {
                let iterable = self.pop()?;
                let array = self.peek(0)?;
                let id = self.object_operand(&array)?;
                for value in ctx.iterate_to_vec(&iterable)? {
                    ctx.push_element(id, value)?;
                }
            }
            Op::CopyFields => {
                let source = self.pop()?;
                let target = self.peek(0)?;
                let target = self.object_operand(&target)?;
                if let Some(source) = source.as_object() {
                    for (key, value) in ctx.own_entries(source)? {
                        ctx.put(target, key, value)?;
                    }
                }
            }

            // ───────────────────────────────────────────────────────────────────
            // Calls
            // ───────────────────────────────────────────────────────────────────
            Op::Call { argc } => {
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                self.mark_location(ctx);
                let result = ctx.call_function(callee, Value::Undefined, &args)?;
                self.stack.push(result);
            }
            Op::CallMethod { argc } => {
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                let this = self.pop()?;
                self.mark_location(ctx);
                let result = ctx.call_function(callee, this, &args)?;
                self.stack.push(result);
            }
            Op::New { argc } => {
                let args = self.pop_n(argc)?;
                let callee = self.pop()?;
                self.mark_location(ctx);
                let result = ctx.construct(&callee, &args)?;
                self.stack.push(result);
            }
            Op::SuperCall { argc } => {
                let args = self.pop_n(argc)?;
                let class = self
                    .clazz
                    .ok_or_else(|| JsError::syntax_error("'super' keyword unexpected here", 0, 0))?;
                let parent = ctx.heap.object(class)?.prototype;
                let parent = match parent {
                    Some(p) if p != ctx.intrinsics.function_prototype => p,
                    _ => {
                        return Err(JsError::type_error(
                            "Super constructor null of anonymous class is not a constructor",
                        ));
                    }
                };
                self.mark_location(ctx);
                ctx.construct_with_this(parent, self.this.clone(), &args)?;
                self.stack.push(Value::Undefined);
            }
            Op::CallSpread => {
                let args = self.pop()?;
                let callee = self.pop()?;
                let this = self.pop()?;
                let args = ctx.array_elements(self.object_operand(&args)?)?;
                self.mark_location(ctx);
                let result = ctx.call_function(callee, this, &args)?;
                self.stack.push(result);
            }
            Op::Return => {
                let value = self.stack.pop().unwrap_or(Value::Undefined);
                return self.complete(ctx, Abrupt::Return(value));
            }
            Op::Halt => {
                let value = self.stack.pop().unwrap_or(Value::Undefined);
                return self.complete(ctx, Abrupt::Return(value));
            }

            // ───────────────────────────────────────────────────────────────────
            // Control flow
            // ───────────────────────────────────────────────────────────────────
            Op::Jump { target } => self.ip = target,
            Op::JumpIfFalse { target } => {
                if !self.pop()?.to_boolean() {
                    self.ip = target;
                }
            }
            Op::JumpIfTrue { target } => {
                if self.pop()?.to_boolean() {
                    self.ip = target;
                }
            }
            Op::JumpIfNullish { target } => {
                if self.peek(0)?.is_nullish() {
                    self.pop()?;
                    self.stack.push(Value::Undefined);
                    self.ip = target;
                }
            }
            Op::JumpIfNotNullish { target } => {
                if !self.peek(0)?.is_nullish() {
                    self.ip = target;
                }
            }
            Op::Throw => {
                let value = self.pop()?;
                return Err(JsError::thrown(value));
            }
            Op::TryBegin { catch, finally } => self.try_stack.push(TryFrame {
                catch,
                finally,
                stack_len: self.stack.len(),
                label_len: self.labels.len(),
                scope_len: self.scopes.len(),
                pending_len: self.pending.len(),
            }),
            Op::TryEnd => {
                let frame = self
                    .try_stack
                    .pop()
                    .ok_or_else(|| JsError::internal_error("TryEnd without TryBegin"))?;
                if let Some(finally) = frame.finally {
                    self.pending.push(Abrupt::Normal);
                    self.ip = finally;
                }
            }
            Op::EndFinally => {
                let abrupt = self
                    .pending
                    .pop()
                    .ok_or_else(|| JsError::internal_error("EndFinally without a pending completion"))?;
                return match abrupt {
                    Abrupt::Normal => Ok(Flow::Continue),
                    Abrupt::Throw(error) => Err(error),
                    other => self.complete(ctx, other),
                };
            }
            Op::PushLabel {
                label,
                break_target,
                continue_target,
            } => {
                let label = label.map(|l| self.name(l)).transpose()?;
                self.labels.push(LabelFrame {
                    label,
                    break_target,
                    continue_target,
                    stack_len: self.stack.len(),
                    scope_len: self.scopes.len(),
                    try_len: self.try_stack.len(),
                });
            }
            Op::PopLabel => {
                self.labels.pop();
            }
            Op::Break { label } => {
                let label = label.map(|l| self.name(l)).transpose()?;
                let index = self.find_label(label.as_ref(), false)?;
                let frame = self
                    .labels
                    .get(index)
                    .cloned()
                    .ok_or_else(|| JsError::internal_error("label vanished"))?;
                return self.complete(
                    ctx,
                    Abrupt::Jump {
                        target: frame.break_target,
                        label_len: index,
                        try_len: frame.try_len,
                        scope_len: frame.scope_len,
                        stack_len: frame.stack_len,
                    },
                );
            }
            Op::Continue { label } => {
                let label = label.map(|l| self.name(l)).transpose()?;
                let index = self.find_label(label.as_ref(), true)?;
                let frame = self
                    .labels
                    .get(index)
                    .cloned()
                    .ok_or_else(|| JsError::internal_error("label vanished"))?;
                let target = frame
                    .continue_target
                    .ok_or_else(|| JsError::syntax_error("Illegal continue statement", 0, 0))?;
                return self.complete(
                    ctx,
                    Abrupt::Jump {
                        target,
                        label_len: index + 1,
                        try_len: frame.try_len,
                        scope_len: frame.scope_len,
                        stack_len: frame.stack_len,
                    },
                );
            }

            // ───────────────────────────────────────────────────────────────────
            // Operators
            // ───────────────────────────────────────────────────────────────────
            Op::Binary { operator } => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = ctx.binary(operator, &a, &b)?;
                self.stack.push(result);
            }
            Op::Unary { operator } => {
                let a = self.pop()?;
                let result = ctx.unary(operator, &a)?;
                self.stack.push(result);
            }
            Op::Increment => {
                let a = self.pop()?;
                let n = ctx.to_number(&a)?;
                self.stack.push(Value::Number(n + 1.0));
            }
            Op::Decrement => {
                let a = self.pop()?;
                let n = ctx.to_number(&a)?;
                self.stack.push(Value::Number(n - 1.0));
            }

            // ───────────────────────────────────────────────────────────────────
            // Iteration
            // ───────────────────────────────────────────────────────────────────
            Op::GetIterator => {
                let iterable = self.pop()?;
                let iterator = ctx.get_iterator(&iterable)?;
                self.stack.push(iterator);
            }
            Op::GetAsyncIterator => {
                let iterable = self.pop()?;
                let iterator = ctx.get_async_iterator(&iterable)?;
                self.stack.push(iterator);
            }
            Op::IteratorNext { done } => {
                let result = match self.iterator_result.take() {
                    Some(result) => result,
                    None => {
                        let iterator = self.peek(0)?;
                        let result = ctx.iterator_next(&iterator, None)?;
                        if self.is_async && ctx.is_promise(&result) {
                            self.ip = self.op_start;
                            self.resume_into = ResumeInto::IteratorResult;
                            return Ok(Flow::Suspend(InterruptKind::Await, result));
                        }
                        result
                    }
                };
                match ctx.iterator_value(&result)? {
                    Some(value) => self.stack.push(value),
                    None => self.ip = done,
                }
            }
            Op::ForInKeys => {
                let obj = self.pop()?;
                let items = match obj.as_object() {
                    Some(id) => ctx
                        .own_keys(id)?
                        .into_iter()
                        .filter(|k| !k.is_symbol())
                        .map(|k| k.to_value())
                        .collect(),
                    None => Vec::new(),
                };
                let proto = ctx.intrinsics.list_iterator_prototype;
                let iterator = ctx.alloc(JsObject::new(
                    Some(proto),
                    ObjectKind::ListIterator(ListIterator { items, index: 0 }),
                ));
                self.stack.push(Value::Object(iterator));
            }
            Op::Rest { from } => {
                let array = self.pop()?;
                let elements = ctx.array_elements(self.object_operand(&array)?)?;
                let rest = elements.into_iter().skip(from as usize).collect();
                let rest = ctx.create_array(rest);
                self.stack.push(Value::Object(rest));
            }
            Op::RestObject { excluded } => {
                let keys = self.pop_n(excluded)?;
                let source = self.pop()?;
                let mut excluded = Vec::with_capacity(keys.len());
                for key in &keys {
                    excluded.push(ctx.to_property_key(key)?);
                }
                let rest = ctx.create_object();
                if let Some(source) = source.as_object() {
                    for (key, value) in ctx.own_entries(source)? {
                        if !excluded.contains(&key) {
                            ctx.put(rest, key, value)?;
                        }
                    }
                }
                self.stack.push(Value::Object(rest));
            }

            // ───────────────────────────────────────────────────────────────────
            // Suspension
            // ───────────────────────────────────────────────────────────────────
            Op::Await => {
                if !self.is_async {
                    return Err(JsError::syntax_error(
                        "await is only valid in async functions and the top level bodies of modules",
                        0,
                        0,
                    ));
                }
                let value = self.pop()?;
                return Ok(Flow::Suspend(InterruptKind::Await, value));
            }
            Op::Yield => {
                if !self.is_generator {
                    return Err(JsError::syntax_error("yield is only valid in generator functions", 0, 0));
                }
                let value = self.pop()?;
                return Ok(Flow::Suspend(InterruptKind::Yield, value));
            }

            // ───────────────────────────────────────────────────────────────────
            // Modules
            // ───────────────────────────────────────────────────────────────────
            Op::Import { specifier } => {
                let specifier = self.name(specifier)?;
                let importer = self.program.filename.clone();
                match ctx.import_module(specifier.as_str(), &importer)? {
                    super::modules::ModuleImport::Ready(namespace) => {
                        self.stack.push(Value::Object(namespace));
                    }
                    super::modules::ModuleImport::Pending(promise) if self.is_async => {
                        return Ok(Flow::Suspend(InterruptKind::Await, Value::Object(promise)));
                    }
                    super::modules::ModuleImport::Pending(promise) => {
                        self.stack.push(Value::Object(promise));
                    }
                }
            }
            Op::Export { name } => {
                let name = self.name(name)?;
                let value = self.pop()?;
                let namespace = self.module_namespace()?;
                ctx.put(namespace, PropertyKey::from(name), value)?;
            }
            Op::ExportAll => {
                let source = self.pop()?;
                let namespace = self.module_namespace()?;
                let source = self.object_operand(&source)?;
                let default_key = ctx.key("default");
                for (key, value) in ctx.own_entries(source)? {
                    if key != default_key {
                        ctx.put(namespace, key, value)?;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn module_namespace(&self) -> Result<ObjectRef, JsError> {
        self.module
            .ok_or_else(|| JsError::syntax_error("Unexpected token 'export'", 0, 0))
    }

    /// Innermost label frame matching `label`; without a name, the innermost
    /// frame that accepts the statement
    fn find_label(&self, label: Option<&JsString>, is_continue: bool) -> Result<usize, JsError> {
        let found = self.labels.iter().rposition(|frame| match label {
            Some(name) => frame.label.as_ref() == Some(name),
            None => !is_continue || frame.continue_target.is_some(),
        });
        found.ok_or_else(|| match (label, is_continue) {
            (Some(name), _) => JsError::syntax_error(format!("Undefined label '{}'", name), 0, 0),
            (None, false) => JsError::syntax_error("Illegal break statement", 0, 0),
            (None, true) => JsError::syntax_error("Illegal continue statement: no surrounding iteration statement", 0, 0),
        })
    }

    /// Leave the innermost block scope. Disposers run one at a time in
    /// reverse order; an `await using` disposer in an async body suspends
    /// on its result and this instruction is re-entered afterwards.
    fn pop_scope(&mut self, ctx: &mut Context) -> Result<Flow, JsError> {
        if self.scopes.len() <= 1 {
            return Err(JsError::internal_error("PopScope without a matching PushScope"));
        }
        let id = self.current_scope(ctx);
        loop {
            let Some(disposable) = ctx.scopes.get_mut(id)?.disposables.pop() else {
                break;
            };
            match ctx.call_function(disposable.method, disposable.value, &[]) {
                Ok(result) => {
                    if disposable.is_async && self.is_async {
                        self.ip = self.op_start;
                        self.resume_into = ResumeInto::Dispose;
                        return Ok(Flow::Suspend(InterruptKind::Await, result));
                    }
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    let previous = ctx.scopes.get_mut(id)?.pending_error.take();
                    let combined = ctx.suppress(e, previous)?;
                    ctx.scopes.get_mut(id)?.pending_error = Some(combined);
                }
            }
        }
        self.scopes.pop();
        ctx.current_scope = self.current_scope(ctx);
        self.hold_live_values(ctx, None);
        ctx.teardown_scope(id)?;
        Ok(Flow::Continue)
    }
}
