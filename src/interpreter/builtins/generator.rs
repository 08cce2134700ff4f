//! Generator built-in methods

use crate::error::JsError;
use crate::interpreter::{Context, Resume};
use crate::value::{PropertyKey, RequestKind, Value};

use super::arg;

/// Initialize Generator.prototype. `[Symbol.iterator]` is inherited from
/// the shared iterator prototype.
pub fn init_generator_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.generator_prototype;

    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("Generator"))?;

    ctx.register_method(proto, "next", generator_next, 1)?;
    ctx.register_method(proto, "return", generator_return, 1)?;
    ctx.register_method(proto, "throw", generator_throw, 1)
}

/// Generator.prototype.next(value)
pub fn generator_next(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.resume_generator(&this, Resume::Next(arg(args, 0)))
}

/// Generator.prototype.return(value)
pub fn generator_return(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.resume_generator(&this, Resume::Return(arg(args, 0)))
}

/// Generator.prototype.throw(error)
pub fn generator_throw(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.resume_generator(&this, Resume::Throw(JsError::thrown(arg(args, 0))))
}

/// Initialize AsyncGenerator.prototype and the async iterator prototype
/// it inherits `[Symbol.asyncIterator]` from
pub fn init_async_generator_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let iterator_proto = ctx.intrinsics.async_iterator_prototype;
    let symbol = ctx.intrinsics.async_iterator_symbol.clone();
    ctx.register_symbol_method(iterator_proto, symbol, "[Symbol.asyncIterator]", super::array::iterator_self, 0)?;

    let proto = ctx.intrinsics.async_generator_prototype;
    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("AsyncGenerator"))?;

    ctx.register_method(proto, "next", async_generator_next, 1)?;
    ctx.register_method(proto, "return", async_generator_return, 1)?;
    ctx.register_method(proto, "throw", async_generator_throw, 1)
}

/// AsyncGenerator.prototype.next(value)
pub fn async_generator_next(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.async_generator_enqueue(&this, RequestKind::Next, arg(args, 0))
}

/// AsyncGenerator.prototype.return(value)
pub fn async_generator_return(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.async_generator_enqueue(&this, RequestKind::Return, arg(args, 0))
}

/// AsyncGenerator.prototype.throw(error)
pub fn async_generator_throw(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    ctx.async_generator_enqueue(&this, RequestKind::Throw, arg(args, 0))
}
