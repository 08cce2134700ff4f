//! Async generators: queued `next`/`return`/`throw` requests
//!
//! Each call enqueues a request holding a fresh promise. While the body is
//! running or waiting on a promise the generator is `Running` and requests
//! stay queued; once the body yields or finishes, the front request is
//! settled and the next one is started.
//!
//! Every `yield` and the final return value are awaited before the request
//! settles, so awaited rejections surface inside the body.

use super::Context;
use super::bytecode_vm::{Completion, InterruptKind, Resume, Vm};
use crate::error::JsError;
use crate::value::{AsyncGeneratorRequest, GeneratorStatus, ObjectKind, ObjectRef, RequestKind, Value};

/// What a settled await continues with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AwaitStep {
    /// `await` inside the body
    Body,
    /// operand of `yield`
    Yield,
    /// the completion value of `return`
    Return,
}

impl AwaitStep {
    fn code(self) -> f64 {
        match self {
            AwaitStep::Body => 0.0,
            AwaitStep::Yield => 1.0,
            AwaitStep::Return => 2.0,
        }
    }

    fn from_code(code: f64) -> Self {
        if code == 1.0 {
            AwaitStep::Yield
        } else if code == 2.0 {
            AwaitStep::Return
        } else {
            AwaitStep::Body
        }
    }
}

impl Context {
    /// `next`/`return`/`throw` on an async generator. Always returns a
    /// promise; a receiver that is not an async generator rejects it.
    pub(crate) fn async_generator_enqueue(
        &mut self,
        this: &Value,
        kind: RequestKind,
        value: Value,
    ) -> Result<Value, JsError> {
        let promise = self.create_promise();
        let generator = this.as_object().filter(|id| {
            self.heap
                .object(*id)
                .is_ok_and(|o| matches!(o.kind, ObjectKind::AsyncGenerator(_)))
        });
        let Some(id) = generator else {
            let error = JsError::type_error(format!(
                "next method called on incompatible receiver {}",
                self.describe(this)
            ));
            let reason = self.error_to_value(error)?;
            self.reject_promise(promise, reason)?;
            return Ok(Value::Object(promise));
        };

        let request = AsyncGeneratorRequest { kind, value, promise };
        let (request_value, request_promise) = (request.value.clone(), request.promise);
        let ObjectKind::AsyncGenerator(state) = &mut self.heap.object_mut(id)?.kind else {
            return Err(JsError::internal_error("async generator vanished"));
        };
        state.queue.push_back(request);
        let running = state.status == GeneratorStatus::Running;
        self.heap.link(id, &request_value);
        self.heap.add_edge(id, request_promise);

        if !running {
            self.drain_async_generator(id)?;
        }
        Ok(Value::Object(promise))
    }

    /// Serve queued requests until the body is busy or the queue is empty
    fn drain_async_generator(&mut self, id: ObjectRef) -> Result<(), JsError> {
        loop {
            let ObjectKind::AsyncGenerator(state) = &self.heap.object(id)?.kind else {
                return Err(JsError::internal_error("object is not an async generator"));
            };
            let status = state.status;
            let Some(front) = state.queue.front() else {
                return Ok(());
            };
            let (kind, value) = (front.kind, front.value.clone());

            match (status, kind) {
                (GeneratorStatus::Running, _) => return Ok(()),
                // closing before the first `next` never runs the body
                (GeneratorStatus::SuspendedStart, RequestKind::Return | RequestKind::Throw) => {
                    if let Some(vm) = self.take_async_vm(id)? {
                        vm.discard(self)?;
                    }
                    self.set_async_status(id, GeneratorStatus::Completed)?;
                }
                (GeneratorStatus::Completed, RequestKind::Next) => {
                    let done = self.create_iter_result(Value::Undefined, true)?;
                    self.settle_request(id, Ok(done))?;
                }
                (GeneratorStatus::Completed, RequestKind::Throw) => {
                    self.settle_request(id, Err(value))?;
                }
                (GeneratorStatus::Completed, RequestKind::Return) => {
                    self.set_async_status(id, GeneratorStatus::Running)?;
                    return self.await_for_async_generator(id, value, AwaitStep::Return);
                }
                (status, kind) => {
                    let resume = match kind {
                        _ if status == GeneratorStatus::SuspendedStart => Resume::Start,
                        RequestKind::Next => Resume::Next(value),
                        RequestKind::Return => Resume::Return(value),
                        RequestKind::Throw => Resume::Throw(JsError::thrown(value)),
                    };
                    return self.run_async_generator(id, resume);
                }
            }
        }
    }

    /// Run the body until it awaits, yields or finishes
    fn run_async_generator(&mut self, id: ObjectRef, resume: Resume) -> Result<(), JsError> {
        let Some(vm) = self.take_async_vm(id)? else {
            return Err(JsError::internal_error("suspended async generator without a body"));
        };
        self.set_async_status(id, GeneratorStatus::Running)?;

        match vm.run(self, resume) {
            Ok(Completion::Interrupt(interrupt)) => {
                let step = match interrupt.kind {
                    InterruptKind::Await => AwaitStep::Body,
                    InterruptKind::Yield => AwaitStep::Yield,
                };
                self.park_async_vm(id, interrupt.vm)?;
                self.await_for_async_generator(id, interrupt.value, step)
            }
            Ok(Completion::Return(value)) => self.await_for_async_generator(id, value, AwaitStep::Return),
            Err(e) if e.is_internal() => Err(e),
            Err(e) => {
                self.set_async_status(id, GeneratorStatus::Completed)?;
                let reason = self.error_to_value(e)?;
                self.settle_request(id, Err(reason))?;
                self.drain_async_generator(id)
            }
        }
    }

    /// Subscribe the generator to `value`; the continuation picks up at `step`
    fn await_for_async_generator(&mut self, id: ObjectRef, value: Value, step: AwaitStep) -> Result<(), JsError> {
        let promise = match self.promise_resolve(value) {
            Ok(promise) => promise,
            Err(e) if e.is_internal() => return Err(e),
            Err(e) => {
                let reason = self.error_to_value(e)?;
                return self.continue_async_generator(id, step, Err(reason));
            }
        };
        let slots = vec![Value::Object(id), Value::Number(step.code())];
        let on_fulfilled = Value::Object(self.create_native("", async_generator_fulfilled, 1, slots.clone()));
        let on_rejected = Value::Object(self.create_native("", async_generator_rejected, 1, slots));
        self.perform_then(promise, on_fulfilled, on_rejected, None)
    }

    fn continue_async_generator(
        &mut self,
        id: ObjectRef,
        step: AwaitStep,
        outcome: Result<Value, Value>,
    ) -> Result<(), JsError> {
        match (step, outcome) {
            (AwaitStep::Body, Ok(value)) => self.run_async_generator(id, Resume::Next(value)),
            (AwaitStep::Body | AwaitStep::Yield, Err(reason)) => {
                self.run_async_generator(id, Resume::Throw(JsError::thrown(reason)))
            }
            (AwaitStep::Yield, Ok(value)) => {
                self.set_async_status(id, GeneratorStatus::SuspendedYield)?;
                let result = self.create_iter_result(value, false)?;
                self.settle_request(id, Ok(result))?;
                self.drain_async_generator(id)
            }
            (AwaitStep::Return, outcome) => {
                self.set_async_status(id, GeneratorStatus::Completed)?;
                let outcome = match outcome {
                    Ok(value) => Ok(self.create_iter_result(value, true)?),
                    Err(reason) => Err(reason),
                };
                self.settle_request(id, outcome)?;
                self.drain_async_generator(id)
            }
        }
    }

    /// Pop the front request and settle its promise
    fn settle_request(&mut self, id: ObjectRef, outcome: Result<Value, Value>) -> Result<(), JsError> {
        let ObjectKind::AsyncGenerator(state) = &mut self.heap.object_mut(id)?.kind else {
            return Err(JsError::internal_error("object is not an async generator"));
        };
        let Some(request) = state.queue.pop_front() else {
            return Err(JsError::internal_error("async generator settled without a request"));
        };
        self.heap.unlink(id, &request.value);
        // the caller's handlers may be all that holds the promise now
        self.heap.link(self.roots.transit, &Value::Object(request.promise));
        self.heap.remove_edge(id, request.promise);
        match outcome {
            Ok(value) => self.resolve_promise(request.promise, value),
            Err(reason) => self.reject_promise(request.promise, reason),
        }
    }

    fn take_async_vm(&mut self, id: ObjectRef) -> Result<Option<Box<Vm>>, JsError> {
        let ObjectKind::AsyncGenerator(state) = &mut self.heap.object_mut(id)?.kind else {
            return Err(JsError::internal_error("object is not an async generator"));
        };
        let vm = state.vm.take();
        if let Some(vm) = &vm {
            self.heap.unlink_all(id, &vm.references());
        }
        Ok(vm)
    }

    fn park_async_vm(&mut self, id: ObjectRef, vm: Box<Vm>) -> Result<(), JsError> {
        let refs = vm.references();
        let ObjectKind::AsyncGenerator(state) = &mut self.heap.object_mut(id)?.kind else {
            return Err(JsError::internal_error("object is not an async generator"));
        };
        state.vm = Some(vm);
        self.heap.link_all(id, &refs);
        Ok(())
    }

    fn set_async_status(&mut self, id: ObjectRef, status: GeneratorStatus) -> Result<(), JsError> {
        if let ObjectKind::AsyncGenerator(state) = &mut self.heap.object_mut(id)?.kind {
            state.status = status;
        }
        Ok(())
    }
}

fn slot_step(ctx: &Context) -> Result<(ObjectRef, AwaitStep), JsError> {
    let id = ctx
        .native_slot(0)
        .as_object()
        .ok_or_else(|| JsError::internal_error("continuation without an async generator"))?;
    let step = match ctx.native_slot(1) {
        Value::Number(code) => AwaitStep::from_code(code),
        _ => AwaitStep::Body,
    };
    Ok((id, step))
}

fn async_generator_fulfilled(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let (id, step) = slot_step(ctx)?;
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    ctx.continue_async_generator(id, step, Ok(value))?;
    Ok(Value::Undefined)
}

fn async_generator_rejected(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let (id, step) = slot_step(ctx)?;
    let reason = args.first().cloned().unwrap_or(Value::Undefined);
    ctx.continue_async_generator(id, step, Err(reason))?;
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use crate::value::PromiseStatus;

    #[test]
    fn test_incompatible_receiver_rejects() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let obj = Value::Object(ctx.create_object());
        let promise = ctx.async_generator_enqueue(&obj, RequestKind::Next, Value::Undefined).unwrap();
        let (status, _) = ctx.promise_status(&promise).unwrap();
        assert_eq!(status, PromiseStatus::Rejected);
    }

    #[test]
    fn test_await_step_codes() {
        for step in [AwaitStep::Body, AwaitStep::Yield, AwaitStep::Return] {
            assert_eq!(AwaitStep::from_code(step.code()), step);
        }
    }
}
