//! Suspended bodies: async functions, async natives and generators
//!
//! An async body runs inside a coroutine object until it stops at an
//! `await`. The coroutine then parks the body (its VM or native frame) and
//! subscribes to the awaited value; the continuation natives resume it from
//! a microtask. Generators park their VM in the generator object and are
//! resumed by `next`/`return`/`throw`.

use super::Context;
use super::bytecode_vm::{Completion, InterruptKind, Resume};
use crate::error::{JsError, StackFrame};
use crate::value::{
    Coroutine, CoroutineBody, GeneratorStatus, JsObject, NativeFrame, ObjectKind, ObjectRef, Stage,
    Value,
};

/// How a body stopped
enum Step {
    Done(Value),
    Await(Value, CoroutineBody),
}

impl Context {
    /// Start an async body. Returns the promise its completion settles;
    /// `result` replaces the body's return value as the fulfillment value.
    pub(crate) fn spawn_coroutine(&mut self, body: CoroutineBody, result: Option<Value>) -> Result<Value, JsError> {
        let promise = self.create_promise();
        let co = self.alloc(JsObject::new(
            None,
            ObjectKind::Coroutine(Coroutine {
                body: Some(body),
                promise,
                result,
            }),
        ));
        self.resume_coroutine(co, Resume::Start)?;
        Ok(Value::Object(promise))
    }

    /// Park a body that already stopped at an `await` of `value`
    pub(crate) fn park_coroutine(
        &mut self,
        body: CoroutineBody,
        value: Value,
        result: Option<Value>,
    ) -> Result<Value, JsError> {
        let promise = self.create_promise();
        let co = self.alloc(JsObject::new(
            None,
            ObjectKind::Coroutine(Coroutine {
                body: Some(body),
                promise,
                result,
            }),
        ));
        if let Err(e) = self.await_value(co, value) {
            if e.is_internal() {
                return Err(e);
            }
            self.resume_coroutine(co, Resume::Throw(e))?;
        }
        Ok(Value::Object(promise))
    }

    fn take_body(&mut self, co: ObjectRef) -> Result<Option<(CoroutineBody, ObjectRef, Option<Value>)>, JsError> {
        let ObjectKind::Coroutine(coroutine) = &mut self.heap.object_mut(co)?.kind else {
            return Err(JsError::internal_error("object is not a coroutine"));
        };
        let Some(body) = coroutine.body.take() else {
            return Ok(None);
        };
        let promise = coroutine.promise;
        let result = coroutine.result.clone();
        self.heap.unlink_all(co, &body.references());
        Ok(Some((body, promise, result)))
    }

    fn store_body(&mut self, co: ObjectRef, body: CoroutineBody) -> Result<(), JsError> {
        let refs = body.references();
        let ObjectKind::Coroutine(coroutine) = &mut self.heap.object_mut(co)?.kind else {
            return Err(JsError::internal_error("object is not a coroutine"));
        };
        coroutine.body = Some(body);
        self.heap.link_all(co, &refs);
        Ok(())
    }

    /// Continue a parked body. A coroutine that already finished, or that is
    /// running, ignores the call.
    pub(crate) fn resume_coroutine(&mut self, co: ObjectRef, resume: Resume) -> Result<(), JsError> {
        let Some((mut body, promise, result)) = self.take_body(co)? else {
            return Ok(());
        };
        let mut resume = resume;
        loop {
            let step = match body {
                CoroutineBody::Vm(vm) => match vm.run(self, resume) {
                    Ok(Completion::Return(value)) => Ok(Step::Done(value)),
                    Ok(Completion::Interrupt(interrupt)) => match interrupt.kind {
                        InterruptKind::Await => Ok(Step::Await(interrupt.value, CoroutineBody::Vm(interrupt.vm))),
                        InterruptKind::Yield => {
                            interrupt.vm.discard(self)?;
                            Err(JsError::type_error("yield is not supported in async functions"))
                        }
                    },
                    Err(e) => Err(e),
                },
                CoroutineBody::Native(frame) => self.run_stage(frame, resume),
            };

            match step {
                Ok(Step::Done(value)) => {
                    let value = result.unwrap_or(value);
                    return self.resolve_promise(promise, value);
                }
                Ok(Step::Await(value, parked)) => {
                    self.store_body(co, parked)?;
                    match self.await_value(co, value) {
                        Ok(()) => return Ok(()),
                        Err(e) if e.is_internal() => return Err(e),
                        Err(e) => {
                            let Some((taken, _, _)) = self.take_body(co)? else {
                                return Ok(());
                            };
                            body = taken;
                            resume = Resume::Throw(e);
                        }
                    }
                }
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    let reason = self.error_to_value(e)?;
                    return self.reject_promise(promise, reason);
                }
            }
        }
    }

    /// Run one stage of an async native
    fn run_stage(&mut self, mut frame: NativeFrame, resume: Resume) -> Result<Step, JsError> {
        match resume {
            Resume::Start => {}
            Resume::Next(value) => frame.value = value,
            Resume::Throw(error) => return Err(error),
            Resume::Return(value) => return Ok(Step::Done(value)),
        }
        let call_frame = StackFrame {
            function_name: None,
            file: None,
            line: 0,
            column: 0,
        };
        self.push_frame(call_frame, None)?;
        let stage = (frame.func)(self, &mut frame);
        self.pop_frame();
        match stage? {
            Stage::Await { value, next } => {
                frame.stage = next;
                Ok(Step::Await(value, CoroutineBody::Native(frame)))
            }
            Stage::Done(value) => Ok(Step::Done(value)),
        }
    }

    /// Subscribe coroutine `co` to `value`. Native promises get internal
    /// reactions, other thenables have their `then` called with the two
    /// continuations, and plain values resume from a microtask.
    fn await_value(&mut self, co: ObjectRef, value: Value) -> Result<(), JsError> {
        let on_fulfilled = Value::Object(self.create_native("", coroutine_fulfilled, 1, vec![Value::Object(co)]));
        if let Some(promise) = value.as_object()
            && self.is_promise(&value)
        {
            let on_rejected = Value::Object(self.create_native("", coroutine_rejected, 1, vec![Value::Object(co)]));
            return self.perform_then(promise, on_fulfilled, on_rejected, None);
        }
        if matches!(value, Value::Object(_)) {
            let key = self.key("then");
            let then = self.get_field(&value, &key)?;
            if self.is_callable(&then) {
                let on_rejected =
                    Value::Object(self.create_native("", coroutine_rejected, 1, vec![Value::Object(co)]));
                self.call_function(then, value, &[on_fulfilled, on_rejected])?;
                return Ok(());
            }
        }
        self.create_microtask(on_fulfilled, Value::Undefined, vec![value]);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Generators
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Drive generator `this` and wrap the outcome in an iterator result
    pub(crate) fn resume_generator(&mut self, this: &Value, resume: Resume) -> Result<Value, JsError> {
        let generator = this.as_object().filter(|id| {
            self.heap
                .object(*id)
                .is_ok_and(|o| matches!(o.kind, ObjectKind::Generator(_)))
        });
        let Some(id) = generator else {
            return Err(JsError::type_error(format!(
                "next method called on incompatible receiver {}",
                self.describe(this)
            )));
        };

        let ObjectKind::Generator(state) = &mut self.heap.object_mut(id)?.kind else {
            return Err(JsError::internal_error("generator vanished"));
        };
        let status = state.status;
        let resume = match (status, resume) {
            (GeneratorStatus::Running, _) => {
                return Err(JsError::type_error("Generator is already running"));
            }
            (GeneratorStatus::Completed, Resume::Return(value)) => return self.create_iter_result(value, true),
            (GeneratorStatus::Completed, Resume::Throw(error)) => return Err(error),
            (GeneratorStatus::Completed, _) => return self.create_iter_result(Value::Undefined, true),
            (GeneratorStatus::SuspendedStart, Resume::Next(_)) => Resume::Start,
            (_, resume) => resume,
        };

        let vm = state.vm.take();
        state.status = GeneratorStatus::Running;
        let Some(vm) = vm else {
            return Err(JsError::internal_error("suspended generator without a body"));
        };
        self.heap.unlink_all(id, &vm.references());

        // a generator closed before it started never runs its body
        if status == GeneratorStatus::SuspendedStart
            && let Resume::Return(_) | Resume::Throw(_) = resume
        {
            vm.discard(self)?;
            self.set_generator_status(id, GeneratorStatus::Completed)?;
            return match resume {
                Resume::Throw(error) => Err(error),
                Resume::Return(value) => self.create_iter_result(value, true),
                _ => self.create_iter_result(Value::Undefined, true),
            };
        }

        match vm.run(self, resume) {
            Ok(Completion::Return(value)) => {
                self.set_generator_status(id, GeneratorStatus::Completed)?;
                self.create_iter_result(value, true)
            }
            Ok(Completion::Interrupt(interrupt)) if interrupt.kind == InterruptKind::Yield => {
                let refs = interrupt.vm.references();
                if let ObjectKind::Generator(state) = &mut self.heap.object_mut(id)?.kind {
                    state.vm = Some(interrupt.vm);
                    state.status = GeneratorStatus::SuspendedYield;
                }
                self.heap.link_all(id, &refs);
                self.create_iter_result(interrupt.value, false)
            }
            Ok(Completion::Interrupt(interrupt)) => {
                interrupt.vm.discard(self)?;
                self.set_generator_status(id, GeneratorStatus::Completed)?;
                Err(JsError::internal_error("generator suspended on await"))
            }
            Err(e) => {
                self.set_generator_status(id, GeneratorStatus::Completed)?;
                Err(e)
            }
        }
    }

    fn set_generator_status(&mut self, id: ObjectRef, status: GeneratorStatus) -> Result<(), JsError> {
        if let ObjectKind::Generator(state) = &mut self.heap.object_mut(id)?.kind {
            state.status = status;
        }
        Ok(())
    }
}

fn slot_coroutine(ctx: &Context) -> Result<ObjectRef, JsError> {
    ctx.native_slot(0)
        .as_object()
        .ok_or_else(|| JsError::internal_error("continuation without a coroutine"))
}

fn coroutine_fulfilled(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let co = slot_coroutine(ctx)?;
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    ctx.resume_coroutine(co, Resume::Next(value))?;
    Ok(Value::Undefined)
}

fn coroutine_rejected(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let co = slot_coroutine(ctx)?;
    let reason = args.first().cloned().unwrap_or(Value::Undefined);
    ctx.resume_coroutine(co, Resume::Throw(JsError::thrown(reason)))?;
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use crate::value::{AsyncNativeFunction, PromiseStatus};

    fn doubler(ctx: &mut Context, frame: &mut NativeFrame) -> Result<Stage, JsError> {
        match frame.stage {
            0 => {
                let promise = ctx.create_promise();
                ctx.resolve_promise(promise, frame.arg(0))?;
                Ok(Stage::Await {
                    value: Value::Object(promise),
                    next: 1,
                })
            }
            _ => {
                let n = ctx.to_number(&frame.value)?;
                Ok(Stage::Done(Value::Number(n * 2.0)))
            }
        }
    }

    #[test]
    fn test_async_native_runs_in_stages() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let proto = ctx.intrinsics.function_prototype;
        let name = ctx.intern("doubler");
        let f = ctx.alloc(JsObject::new(
            Some(proto),
            ObjectKind::AsyncNative(AsyncNativeFunction {
                name,
                func: doubler,
                length: 1,
            }),
        ));
        let promise = ctx
            .call_function(Value::Object(f), Value::Undefined, &[Value::Number(21.0)])
            .unwrap();
        assert_eq!(ctx.promise_status(&promise).map(|s| s.0), Some(PromiseStatus::Pending));

        while ctx.next_task().unwrap() {}
        assert_eq!(
            ctx.promise_status(&promise),
            Some((PromiseStatus::Fulfilled, Value::Number(42.0)))
        );
    }

    #[test]
    fn test_resume_rejects_non_generators() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let obj = Value::Object(ctx.create_object());
        let err = ctx.resume_generator(&obj, Resume::Next(Value::Undefined)).unwrap_err();
        assert_eq!(err.error_name(), "TypeError");
    }
}
