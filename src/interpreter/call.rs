//! Function invocation
//!
//! `call_function` dispatches on the callee's kind: bytecode closures get a
//! fresh function scope and a VM, natives are called directly, async natives
//! start a coroutine and bound functions forward to their target.

use std::collections::VecDeque;
use std::rc::Rc;

use super::Context;
use super::bytecode_vm::{Completion, Resume, Vm};
use crate::compiler::{BindingKind, FunctionKind, FunctionTemplate, Program};
use crate::error::{JsError, StackFrame};
use crate::value::{
    AsyncGeneratorState, CheapClone, Closure, CoroutineBody, GeneratorState, GeneratorStatus, JsObject, NativeFn, NativeFrame,
    ObjectKind, ObjectRef, Value,
};

/// Callee payload copied out of the heap before the call runs
enum Callee {
    Closure(Closure),
    Native { func: NativeFn, name: String, constructor: bool },
    AsyncNative(NativeFrame),
    Bound { target: ObjectRef, this: Value, args: Vec<Value> },
}

impl Context {
    fn callee(&self, callee: &Value, this: &Value, args: &[Value]) -> Result<Option<(ObjectRef, Callee)>, JsError> {
        let Some(id) = callee.as_object() else {
            return Ok(None);
        };
        let found = match &self.heap.object(id)?.kind {
            ObjectKind::Closure(closure) => Callee::Closure(closure.clone()),
            ObjectKind::Native(native) => Callee::Native {
                func: native.func,
                name: native.name.to_string(),
                constructor: native.constructor,
            },
            ObjectKind::AsyncNative(native) => Callee::AsyncNative(NativeFrame {
                func: native.func,
                this: this.clone(),
                args: args.to_vec(),
                stage: 0,
                value: Value::Undefined,
                locals: Vec::new(),
            }),
            ObjectKind::Bound(bound) => Callee::Bound {
                target: bound.target,
                this: bound.this.clone(),
                args: bound.args.clone(),
            },
            _ => return Ok(None),
        };
        Ok(Some((id, found)))
    }

    /// Call `callee` with `this` and `args`
    pub fn call_function(&mut self, callee: Value, this: Value, args: &[Value]) -> Result<Value, JsError> {
        let Some((id, found)) = self.callee(&callee, &this, args)? else {
            return Err(JsError::type_error(format!("{} is not a function", self.describe(&callee))));
        };
        match found {
            Callee::Closure(closure) => self.invoke_closure(id, closure, this, args, false),
            Callee::Native { func, name, .. } => self.call_native(id, func, name, this, args),
            Callee::AsyncNative(frame) => self.spawn_coroutine(CoroutineBody::Native(frame), None),
            Callee::Bound {
                target,
                this: bound_this,
                args: bound_args,
            } => {
                let mut full = bound_args;
                full.extend_from_slice(args);
                self.call_function(Value::Object(target), bound_this, &full)
            }
        }
    }

    fn call_native(
        &mut self,
        id: ObjectRef,
        func: NativeFn,
        name: String,
        this: Value,
        args: &[Value],
    ) -> Result<Value, JsError> {
        let frame = StackFrame {
            function_name: Some(name),
            file: None,
            line: 0,
            column: 0,
        };
        self.push_frame(frame, Some(id))?;
        let result = func(self, this, args);
        self.pop_frame();
        result
    }

    /// Run a bytecode function. Generators return their generator object and
    /// async functions their promise without running to completion.
    fn invoke_closure(
        &mut self,
        id: ObjectRef,
        closure: Closure,
        this: Value,
        args: &[Value],
        construct: bool,
    ) -> Result<Value, JsError> {
        let template = template_of(&closure)?.clone();
        if template.kind == FunctionKind::ClassConstructor && !construct {
            return Err(JsError::type_error(format!(
                "Class constructor {} cannot be invoked without 'new'",
                template.name
            )));
        }
        let this = if template.kind.is_arrow() {
            closure.this_value.clone().unwrap_or(Value::Undefined)
        } else {
            this
        };
        let suspendable = template.kind.is_async() || template.kind.is_generator();
        let parent = if suspendable { self.task_scope } else { self.current_scope };
        let scope = self.push_scope_under(parent, template.kind.scope_kind())?;
        if let Err(e) = self.bind_parameters(scope, &closure, &template, args) {
            self.discard_scope(scope)?;
            return Err(e);
        }

        let mut vm = Vm::new(closure.program.cheap_clone(), template.entry, scope);
        vm.this = this;
        vm.function = Some(id);
        vm.frame = frame_for(&closure.program, &template);
        vm.is_async = template.kind.is_async();
        vm.is_generator = template.kind.is_generator();
        if template.kind == FunctionKind::ClassConstructor {
            vm.clazz = Some(id);
        }
        let vm = Box::new(vm);

        if template.kind.is_generator() {
            let is_async = template.kind.is_async();
            let key = self.key("prototype");
            let proto = self.get_object_field(id, &key)?.as_object().unwrap_or(if is_async {
                self.intrinsics.async_generator_prototype
            } else {
                self.intrinsics.generator_prototype
            });
            let kind = if is_async {
                ObjectKind::AsyncGenerator(AsyncGeneratorState {
                    status: GeneratorStatus::SuspendedStart,
                    vm: Some(vm),
                    queue: VecDeque::new(),
                })
            } else {
                ObjectKind::Generator(GeneratorState {
                    status: GeneratorStatus::SuspendedStart,
                    vm: Some(vm),
                })
            };
            let generator = self.alloc(JsObject::new(Some(proto), kind));
            return Ok(Value::Object(generator));
        }
        if template.kind.is_async() {
            return self.spawn_coroutine(CoroutineBody::Vm(vm), None);
        }
        match vm.run(self, Resume::Start)? {
            Completion::Return(value) => Ok(value),
            Completion::Interrupt(interrupt) => {
                interrupt.vm.discard(self)?;
                Err(JsError::internal_error("synchronous function suspended"))
            }
        }
    }

    /// Declare parameters as `var` bindings of the function scope
    fn bind_parameters(
        &mut self,
        scope: super::ScopeId,
        closure: &Closure,
        template: &FunctionTemplate,
        args: &[Value],
    ) -> Result<(), JsError> {
        self.install_captures(scope, &closure.captures)?;
        // the rest array belongs to the callee's scope
        let saved = std::mem::replace(&mut self.current_scope, scope);
        let result = self.declare_parameters(scope, template, args);
        self.current_scope = saved;
        result
    }

    fn declare_parameters(
        &mut self,
        scope: super::ScopeId,
        template: &FunctionTemplate,
        args: &[Value],
    ) -> Result<(), JsError> {
        let count = template.params.len();
        for (i, name) in template.params.iter().enumerate() {
            let value = if template.rest && i + 1 == count {
                let rest = args.get(i..).map(<[Value]>::to_vec).unwrap_or_default();
                Value::Object(self.create_array(rest))
            } else {
                args.get(i).cloned().unwrap_or(Value::Undefined)
            };
            self.declare_in(scope, name, BindingKind::Var, Some(value))?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn is_constructor(&self, value: &Value) -> bool {
        let Some(id) = value.as_object() else {
            return false;
        };
        match self.heap.object(id).map(|o| &o.kind) {
            Ok(ObjectKind::Closure(closure)) => template_of(closure).is_ok_and(|t| t.kind.is_constructor()),
            Ok(ObjectKind::Native(native)) => native.constructor,
            Ok(ObjectKind::Bound(bound)) => self.is_constructor(&Value::Object(bound.target)),
            _ => false,
        }
    }

    /// `new callee(...args)`
    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Result<Value, JsError> {
        if !self.is_constructor(callee) {
            return Err(JsError::type_error(format!("{} is not a constructor", self.describe(callee))));
        }
        let Some(id) = callee.as_object() else {
            return Err(JsError::internal_error("constructor is not an object"));
        };
        if let ObjectKind::Bound(bound) = &self.heap.object(id)?.kind {
            let target = Value::Object(bound.target);
            let mut full = bound.args.clone();
            full.extend_from_slice(args);
            return self.construct(&target, &full);
        }
        let key = self.key("prototype");
        let proto = self
            .get_object_field(id, &key)?
            .as_object()
            .unwrap_or(self.intrinsics.object_prototype);
        let this = Value::Object(self.alloc(JsObject::ordinary(Some(proto))));
        let result = self.construct_with_this(id, this.clone(), args)?;
        Ok(if matches!(result, Value::Object(_)) { result } else { this })
    }

    /// Run constructor `callee` on an existing `this` (`new` and `super()`)
    pub(crate) fn construct_with_this(&mut self, callee: ObjectRef, this: Value, args: &[Value]) -> Result<Value, JsError> {
        let callee_value = Value::Object(callee);
        match self.callee(&callee_value, &this, args)? {
            Some((id, Callee::Closure(closure))) => self.invoke_closure(id, closure, this, args, true),
            Some((id, Callee::Native { func, name, constructor: true })) => self.call_native(id, func, name, this, args),
            Some((_, Callee::Bound { target, args: bound_args, .. })) => {
                let mut full = bound_args;
                full.extend_from_slice(args);
                self.construct_with_this(target, this, &full)
            }
            _ => Err(JsError::type_error(format!(
                "{} is not a constructor",
                self.describe(&callee_value)
            ))),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Function objects
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Closure over the current scope for template `function` of `program`
    pub(crate) fn create_closure(
        &mut self,
        program: &Rc<Program>,
        function: u32,
        this_value: Option<Value>,
    ) -> Result<ObjectRef, JsError> {
        let kind = program
            .function(function)
            .map(|t| t.kind)
            .ok_or_else(|| JsError::internal_error(format!("unknown function {}", function)))?;
        let captures = Rc::new(self.scopes.captures(self.current_scope));
        let proto = self.intrinsics.function_prototype;
        let id = self.alloc(JsObject::new(
            Some(proto),
            ObjectKind::Closure(Closure {
                program: program.cheap_clone(),
                function,
                captures,
                this_value,
            }),
        ));
        let prototype_key = self.key("prototype");
        if kind.is_constructor() {
            let prototype = self.create_object();
            let constructor_key = self.key("constructor");
            self.put(prototype, constructor_key, Value::Object(id))?;
            self.put(id, prototype_key, Value::Object(prototype))?;
        } else if kind.is_generator() {
            let generator_proto = if kind.is_async() {
                self.intrinsics.async_generator_prototype
            } else {
                self.intrinsics.generator_prototype
            };
            let prototype = self.alloc(JsObject::ordinary(Some(generator_proto)));
            self.put(id, prototype_key, Value::Object(prototype))?;
        }
        Ok(id)
    }

    /// Class constructor, optionally extending `parent` (a constructor or `null`)
    pub(crate) fn create_class(
        &mut self,
        program: &Rc<Program>,
        function: u32,
        parent: Option<Value>,
    ) -> Result<ObjectRef, JsError> {
        let (function_proto, instance_proto) = match &parent {
            None => (self.intrinsics.function_prototype, Some(self.intrinsics.object_prototype)),
            Some(Value::Null) => (self.intrinsics.function_prototype, None),
            Some(value) if self.is_constructor(value) => {
                let key = self.key("prototype");
                let inherited = match self.get_field(value, &key)? {
                    Value::Object(p) => Some(p),
                    Value::Null => None,
                    other => {
                        return Err(JsError::type_error(format!(
                            "Class extends value does not have valid prototype property {}",
                            self.describe(&other)
                        )));
                    }
                };
                let Some(parent_id) = value.as_object() else {
                    return Err(JsError::internal_error("constructor is not an object"));
                };
                (parent_id, inherited)
            }
            Some(value) => {
                return Err(JsError::type_error(format!(
                    "Class extends value {} is not a constructor or null",
                    self.describe(value)
                )));
            }
        };
        let class = self.create_closure(program, function, None)?;
        self.set_prototype(class, Some(function_proto))?;
        let key = self.key("prototype");
        if let Some(prototype) = self.get_object_field(class, &key)?.as_object() {
            self.set_prototype(prototype, instance_proto)?;
        }
        Ok(class)
    }
}

fn template_of(closure: &Closure) -> Result<&FunctionTemplate, JsError> {
    closure
        .program
        .function(closure.function)
        .ok_or_else(|| JsError::internal_error(format!("unknown function {}", closure.function)))
}

fn frame_for(program: &Program, template: &FunctionTemplate) -> StackFrame {
    StackFrame {
        function_name: (!template.name.is_empty()).then(|| template.name.to_string()),
        file: Some(program.filename.clone()),
        line: template.line,
        column: template.column,
    }
}
