//! Promise built-in methods
//!
//! Promises settle through reaction jobs queued as microtasks. Resolving
//! with a thenable locks the promise and queues a job that calls the
//! thenable's `then` with a fresh pair of resolving functions.

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{
    JsObject, NativeFrame, ObjectKind, ObjectRef, PromiseReaction, PromiseState, PromiseStatus,
    PropertyKey, Stage, Value,
};

use super::{create_async_native, create_constructor};

/// Initialize Promise.prototype with then, catch, finally methods
pub fn init_promise_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.promise_prototype;

    ctx.register_method(proto, "then", promise_then, 2)?;
    ctx.register_method(proto, "catch", promise_catch, 1)?;
    ctx.register_method(proto, "finally", promise_finally, 1)?;

    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("Promise"))
}

/// Create Promise constructor with static methods
pub fn create_promise_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.promise_prototype;
    let ctor = create_constructor(ctx, "Promise", promise_constructor, 1, proto)?;

    ctx.register_method(ctor, "resolve", promise_resolve_static, 1)?;
    ctx.register_method(ctor, "reject", promise_reject_static, 1)?;

    let all = create_async_native(ctx, "all", promise_all, 1);
    let key = ctx.key("all");
    ctx.put(ctor, key, Value::Object(all))?;

    Ok(ctor)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Promise state machine
// ═══════════════════════════════════════════════════════════════════════════════

impl Context {
    /// Allocate a pending promise
    pub fn create_promise(&mut self) -> ObjectRef {
        let proto = self.intrinsics.promise_prototype;
        self.alloc(JsObject::new(Some(proto), ObjectKind::Promise(PromiseState::pending())))
    }

    pub fn is_promise(&self, value: &Value) -> bool {
        value
            .as_object()
            .and_then(|id| self.heap.object(id).ok())
            .is_some_and(|obj| matches!(obj.kind, ObjectKind::Promise(_)))
    }

    /// Status and result of a promise, `None` for anything else
    pub fn promise_status(&self, value: &Value) -> Option<(PromiseStatus, Value)> {
        let obj = self.heap.object(value.as_object()?).ok()?;
        match &obj.kind {
            ObjectKind::Promise(state) => Some((state.status, state.result.clone())),
            _ => None,
        }
    }

    fn promise_state_mut(&mut self, promise: ObjectRef) -> Result<&mut PromiseState, JsError> {
        match &mut self.heap.object_mut(promise)?.kind {
            ObjectKind::Promise(state) => Ok(state),
            _ => Err(JsError::internal_error("object is not a promise")),
        }
    }

    /// Resolve `promise` with `value`, adopting thenables.
    /// Settled and locked promises ignore the call.
    pub fn resolve_promise(&mut self, promise: ObjectRef, value: Value) -> Result<(), JsError> {
        let state = self.promise_state_mut(promise)?;
        if state.status != PromiseStatus::Pending || state.locked {
            return Ok(());
        }
        if value.as_object() == Some(promise) {
            let error = JsError::type_error("Chaining cycle detected for promise #<Promise>");
            let reason = self.error_to_value(error)?;
            return self.settle_promise(promise, PromiseStatus::Rejected, reason);
        }
        if !matches!(value, Value::Object(_)) {
            return self.settle_promise(promise, PromiseStatus::Fulfilled, value);
        }

        let key = self.key("then");
        let then = match self.get_field(&value, &key) {
            Ok(then) => then,
            Err(e) if e.is_internal() => return Err(e),
            Err(e) => {
                let reason = self.error_to_value(e)?;
                return self.settle_promise(promise, PromiseStatus::Rejected, reason);
            }
        };
        if !self.is_callable(&then) {
            return self.settle_promise(promise, PromiseStatus::Fulfilled, value);
        }

        self.promise_state_mut(promise)?.locked = true;
        let job = self.create_native_function("", promise_thenable_job, 3);
        self.create_microtask(job, Value::Undefined, vec![Value::Object(promise), value, then]);
        Ok(())
    }

    /// Reject `promise` with `reason`. Settled and locked promises ignore
    /// the call.
    pub fn reject_promise(&mut self, promise: ObjectRef, reason: Value) -> Result<(), JsError> {
        let state = self.promise_state_mut(promise)?;
        if state.status != PromiseStatus::Pending || state.locked {
            return Ok(());
        }
        self.settle_promise(promise, PromiseStatus::Rejected, reason)
    }

    fn unlock_promise(&mut self, promise: ObjectRef) -> Result<(), JsError> {
        self.promise_state_mut(promise)?.locked = false;
        Ok(())
    }

    fn settle_promise(&mut self, promise: ObjectRef, status: PromiseStatus, value: Value) -> Result<(), JsError> {
        let state = self.promise_state_mut(promise)?;
        if state.status != PromiseStatus::Pending {
            return Ok(());
        }
        state.status = status;
        state.result = value.clone();
        state.locked = false;
        let reactions = std::mem::take(&mut state.reactions);
        self.heap.link(promise, &value);

        let rejected = status == PromiseStatus::Rejected;
        for reaction in reactions {
            self.heap.unlink(promise, &reaction.on_fulfilled);
            self.heap.unlink(promise, &reaction.on_rejected);
            if let Some(derived) = reaction.derived {
                self.heap.remove_edge(promise, derived);
            }
            let handler = if rejected {
                reaction.on_rejected
            } else {
                reaction.on_fulfilled
            };
            self.schedule_reaction(handler, reaction.derived, value.clone(), rejected);
        }
        Ok(())
    }

    fn schedule_reaction(&mut self, handler: Value, derived: Option<ObjectRef>, value: Value, rejected: bool) {
        let job = self.create_native_function("", promise_reaction_job, 4);
        let derived = derived.map(Value::Object).unwrap_or(Value::Undefined);
        self.create_microtask(job, Value::Undefined, vec![handler, derived, value, Value::Boolean(rejected)]);
    }

    /// Attach handlers to `promise`; their results settle `derived`.
    /// Marks the promise as handled.
    pub(crate) fn perform_then(
        &mut self,
        promise: ObjectRef,
        on_fulfilled: Value,
        on_rejected: Value,
        derived: Option<ObjectRef>,
    ) -> Result<(), JsError> {
        let state = self.promise_state_mut(promise)?;
        state.handled = true;
        match state.status {
            PromiseStatus::Pending => {
                state.reactions.push(PromiseReaction {
                    on_fulfilled: on_fulfilled.clone(),
                    on_rejected: on_rejected.clone(),
                    derived,
                });
                self.heap.link(promise, &on_fulfilled);
                self.heap.link(promise, &on_rejected);
                if let Some(derived) = derived {
                    self.heap.add_edge(promise, derived);
                }
            }
            PromiseStatus::Fulfilled => {
                let value = state.result.clone();
                self.schedule_reaction(on_fulfilled, derived, value, false);
            }
            PromiseStatus::Rejected => {
                let value = state.result.clone();
                self.schedule_reaction(on_rejected, derived, value, true);
            }
        }
        Ok(())
    }

    /// `Promise.resolve(value)`: promises pass through unchanged
    pub fn promise_resolve(&mut self, value: Value) -> Result<ObjectRef, JsError> {
        if let Some(id) = value.as_object()
            && self.is_promise(&value)
        {
            return Ok(id);
        }
        let promise = self.create_promise();
        self.resolve_promise(promise, value)?;
        Ok(promise)
    }

    /// `resolve`/`reject` pair settling `promise` at most once between them
    fn create_resolving_functions(&mut self, promise: ObjectRef) -> (Value, Value) {
        let flag = Value::Object(self.create_object());
        let slots = vec![Value::Object(promise), flag];
        let resolve = self.create_native("", promise_resolve_function, 1, slots.clone());
        let reject = self.create_native("", promise_reject_function, 1, slots);
        (Value::Object(resolve), Value::Object(reject))
    }
}

/// First caller of a resolving-function pair wins
fn take_resolution(ctx: &mut Context, flag: &Value) -> Result<bool, JsError> {
    let Some(flag) = flag.as_object() else {
        return Err(JsError::internal_error("resolving function without a flag"));
    };
    let key = ctx.key("resolved");
    if ctx.heap.object(flag)?.get_own(&key).is_some_and(Value::to_boolean) {
        return Ok(false);
    }
    ctx.put(flag, key, Value::Boolean(true))?;
    Ok(true)
}

fn slot_promise(ctx: &Context) -> Result<ObjectRef, JsError> {
    ctx.native_slot(0)
        .as_object()
        .ok_or_else(|| JsError::internal_error("resolving function without a promise"))
}

fn promise_resolve_function(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let promise = slot_promise(ctx)?;
    let flag = ctx.native_slot(1);
    if take_resolution(ctx, &flag)? {
        ctx.unlock_promise(promise)?;
        let value = args.first().cloned().unwrap_or(Value::Undefined);
        ctx.resolve_promise(promise, value)?;
    }
    Ok(Value::Undefined)
}

fn promise_reject_function(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let promise = slot_promise(ctx)?;
    let flag = ctx.native_slot(1);
    if take_resolution(ctx, &flag)? {
        ctx.unlock_promise(promise)?;
        let reason = args.first().cloned().unwrap_or(Value::Undefined);
        ctx.reject_promise(promise, reason)?;
    }
    Ok(Value::Undefined)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

/// `[handler, derived, value, rejected]`
fn promise_reaction_job(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let [handler, derived, value, rejected] = args else {
        return Err(JsError::internal_error("malformed promise reaction job"));
    };
    let derived = derived.as_object();
    let rejected = rejected.to_boolean();

    if !ctx.is_callable(handler) {
        match (derived, rejected) {
            (Some(d), false) => ctx.resolve_promise(d, value.clone())?,
            (Some(d), true) => ctx.reject_promise(d, value.clone())?,
            (None, true) => return Err(JsError::thrown(value.clone())),
            (None, false) => {}
        }
        return Ok(Value::Undefined);
    }

    match ctx.call_function(handler.clone(), Value::Undefined, std::slice::from_ref(value)) {
        Ok(result) => {
            if let Some(d) = derived {
                ctx.resolve_promise(d, result)?;
            }
        }
        Err(e) if e.is_internal() => return Err(e),
        Err(e) => match derived {
            Some(d) => {
                let reason = ctx.error_to_value(e)?;
                ctx.reject_promise(d, reason)?;
            }
            None => return Err(e),
        },
    }
    Ok(Value::Undefined)
}

/// `[promise, thenable, then]`
fn promise_thenable_job(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let [promise, thenable, then] = args else {
        return Err(JsError::internal_error("malformed thenable job"));
    };
    let promise = promise
        .as_object()
        .ok_or_else(|| JsError::internal_error("thenable job without a promise"))?;
    let (resolve, reject) = ctx.create_resolving_functions(promise);
    match ctx.call_function(then.clone(), thenable.clone(), &[resolve, reject.clone()]) {
        Ok(_) => Ok(Value::Undefined),
        Err(e) if e.is_internal() => Err(e),
        Err(e) => {
            let reason = ctx.error_to_value(e)?;
            ctx.call_function(reject, Value::Undefined, &[reason])
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constructor and prototype methods
// ═══════════════════════════════════════════════════════════════════════════════

/// new Promise(executor)
pub fn promise_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let executor = args.first().cloned().unwrap_or(Value::Undefined);
    let Some(promise) = this.as_object() else {
        return Err(JsError::type_error("Promise constructor cannot be invoked without 'new'"));
    };
    if !ctx.is_callable(&executor) {
        return Err(JsError::type_error(format!(
            "Promise resolver {} is not a function",
            ctx.describe(&executor)
        )));
    }
    ctx.replace_kind(promise, ObjectKind::Promise(PromiseState::pending()))?;

    let (resolve, reject) = ctx.create_resolving_functions(promise);
    if let Err(e) = ctx.call_function(executor, Value::Undefined, &[resolve, reject.clone()]) {
        if e.is_internal() {
            return Err(e);
        }
        let reason = ctx.error_to_value(e)?;
        ctx.call_function(reject, Value::Undefined, &[reason])?;
    }
    Ok(this)
}

fn this_promise(ctx: &Context, this: &Value, method: &str) -> Result<ObjectRef, JsError> {
    match this.as_object() {
        Some(id) if ctx.is_promise(this) => Ok(id),
        _ => Err(JsError::type_error(format!(
            "Method Promise.prototype.{} called on incompatible receiver {}",
            method,
            ctx.describe(this)
        ))),
    }
}

/// Promise.prototype.then(onFulfilled, onRejected)
pub fn promise_then(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let promise = this_promise(ctx, &this, "then")?;
    let handler = |ctx: &Context, index: usize| {
        args.get(index)
            .filter(|h| ctx.is_callable(h))
            .cloned()
            .unwrap_or(Value::Undefined)
    };
    let on_fulfilled = handler(ctx, 0);
    let on_rejected = handler(ctx, 1);
    let derived = ctx.create_promise();
    ctx.perform_then(promise, on_fulfilled, on_rejected, Some(derived))?;
    Ok(Value::Object(derived))
}

/// Promise.prototype.catch(onRejected)
pub fn promise_catch(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let on_rejected = args.first().cloned().unwrap_or(Value::Undefined);
    let key = ctx.key("then");
    let then = ctx.get_field(&this, &key)?;
    ctx.call_function(then, this, &[Value::Undefined, on_rejected])
}

/// Promise.prototype.finally(onFinally)
///
/// The callback's own result is not awaited.
pub fn promise_finally(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let on_finally = args.first().cloned().unwrap_or(Value::Undefined);
    let key = ctx.key("then");
    let then = ctx.get_field(&this, &key)?;
    if !ctx.is_callable(&on_finally) {
        return ctx.call_function(then, this, &[on_finally.clone(), on_finally]);
    }
    let fulfilled = ctx.create_native("", finally_fulfilled, 1, vec![on_finally.clone()]);
    let rejected = ctx.create_native("", finally_rejected, 1, vec![on_finally]);
    ctx.call_function(then, this, &[Value::Object(fulfilled), Value::Object(rejected)])
}

fn finally_fulfilled(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let on_finally = ctx.native_slot(0);
    ctx.call_function(on_finally, Value::Undefined, &[])?;
    Ok(args.first().cloned().unwrap_or(Value::Undefined))
}

fn finally_rejected(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let on_finally = ctx.native_slot(0);
    ctx.call_function(on_finally, Value::Undefined, &[])?;
    Err(JsError::thrown(args.first().cloned().unwrap_or(Value::Undefined)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Static methods
// ═══════════════════════════════════════════════════════════════════════════════

/// Promise.resolve(value)
pub fn promise_resolve_static(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    Ok(Value::Object(ctx.promise_resolve(value)?))
}

/// Promise.reject(reason)
pub fn promise_reject_static(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let reason = args.first().cloned().unwrap_or(Value::Undefined);
    let promise = ctx.create_promise();
    ctx.reject_promise(promise, reason)?;
    Ok(Value::Object(promise))
}

/// Promise.all(iterable)
///
/// Awaits the elements one after another, one stage per element.
/// `locals` holds `[items, results]`.
pub fn promise_all(ctx: &mut Context, frame: &mut NativeFrame) -> Result<Stage, JsError> {
    if frame.stage == 0 {
        let items = ctx.iterate_to_vec(&frame.arg(0))?;
        let items = ctx.create_array(items);
        let results = ctx.create_array(Vec::new());
        frame.locals = vec![Value::Object(items), Value::Object(results)];
    }
    let (Some(items), Some(results)) = (
        frame.locals.first().and_then(Value::as_object),
        frame.locals.get(1).and_then(Value::as_object),
    ) else {
        return Err(JsError::internal_error("Promise.all lost its state"));
    };
    if frame.stage > 0 {
        ctx.push_element(results, frame.value.clone())?;
    }

    let next = ctx.array_len(results)?;
    if next < ctx.array_len(items)? {
        let item = ctx.get_object_field(items, &PropertyKey::Index(next))?;
        return Ok(Stage::Await {
            value: item,
            next: frame.stage + 1,
        });
    }
    Ok(Stage::Done(Value::Object(results)))
}
