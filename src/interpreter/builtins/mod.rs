//! Built-in function implementations for the JavaScript standard library
//!
//! Prototypes live in [`Intrinsics`](super::Intrinsics) and are filled in
//! here; constructors and global functions become `var` bindings of the
//! global scope.

pub mod array;
pub mod console;
pub mod error;
pub mod function;
pub mod generator;
pub mod global;
pub mod json;
pub mod map;
pub mod object;
pub mod promise;
pub mod set;
pub mod symbol;
pub mod timers;

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{AsyncNativeFn, AsyncNativeFunction, JsObject, NativeFn, NativeFunction, ObjectKind, ObjectRef, Value};

/// Fill in the realm's prototypes and define every global
pub fn install(ctx: &mut Context) -> Result<(), JsError> {
    object::init_object_prototype(ctx)?;
    function::init_function_prototype(ctx)?;
    array::init_array_prototype(ctx)?;
    array::init_array_iterator_prototype(ctx)?;
    set::init_list_iterator_prototype(ctx)?;
    generator::init_generator_prototype(ctx)?;
    generator::init_async_generator_prototype(ctx)?;
    error::init_error(ctx)?;
    promise::init_promise_prototype(ctx)?;
    set::init_set_prototype(ctx)?;
    map::init_map_prototype(ctx)?;

    let constructors = [
        ("Object", object::create_object_constructor(ctx)?),
        ("Function", function::create_function_constructor(ctx)?),
        ("Array", array::create_array_constructor(ctx)?),
        ("Symbol", symbol::create_symbol_constructor(ctx)?),
        ("Promise", promise::create_promise_constructor(ctx)?),
        ("Set", set::create_set_constructor(ctx)?),
        ("Map", map::create_map_constructor(ctx)?),
        ("JSON", json::create_json_object(ctx)?),
    ];
    for (name, ctor) in constructors {
        ctx.define_global(name, Value::Object(ctor))?;
    }

    global::register_global_values(ctx)?;
    timers::register_timer_functions(ctx)?;
    #[cfg(feature = "console")]
    {
        let console = console::create_console_object(ctx)?;
        ctx.define_global("console", Value::Object(console))?;
    }
    Ok(())
}

/// Native constructor wired to `prototype` in both directions
pub(crate) fn create_constructor(
    ctx: &mut Context,
    name: &str,
    func: NativeFn,
    length: u32,
    prototype: ObjectRef,
) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.function_prototype;
    let name = ctx.intern(name);
    let ctor = ctx.alloc(JsObject::new(
        Some(proto),
        ObjectKind::Native(NativeFunction {
            name,
            func,
            length,
            slots: Vec::new(),
            constructor: true,
        }),
    ));
    let prototype_key = ctx.key("prototype");
    let constructor_key = ctx.key("constructor");
    ctx.put(ctor, prototype_key, Value::Object(prototype))?;
    ctx.put(prototype, constructor_key, Value::Object(ctor))?;
    Ok(ctor)
}

/// Staged native whose calls return promises
pub(crate) fn create_async_native(ctx: &mut Context, name: &str, func: AsyncNativeFn, length: u32) -> ObjectRef {
    let proto = ctx.intrinsics.function_prototype;
    let name = ctx.intern(name);
    ctx.alloc(JsObject::new(
        Some(proto),
        ObjectKind::AsyncNative(AsyncNativeFunction { name, func, length }),
    ))
}

/// Argument `index`, `undefined` when missing
pub(crate) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}
