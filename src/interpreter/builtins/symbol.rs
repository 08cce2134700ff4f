//! Symbol built-in object implementation
//!
//! Well-known symbols are allocated with the realm; the constructor only
//! exposes them.

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{ObjectRef, Value};

use super::arg;

/// Create the Symbol function with the well-known symbols as statics
pub fn create_symbol_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let ctor = ctx.create_native("Symbol", symbol_constructor, 0, Vec::new());

    let well_known = [
        ("iterator", ctx.intrinsics.iterator_symbol.clone()),
        ("asyncIterator", ctx.intrinsics.async_iterator_symbol.clone()),
        ("dispose", ctx.intrinsics.dispose_symbol.clone()),
        ("asyncDispose", ctx.intrinsics.async_dispose_symbol.clone()),
        ("toStringTag", ctx.intrinsics.to_string_tag_symbol.clone()),
    ];
    for (name, symbol) in well_known {
        let key = ctx.key(name);
        ctx.put(ctor, key, Value::Symbol(symbol))?;
    }
    Ok(ctor)
}

/// Symbol(description): a fresh unique symbol. Not a constructor.
pub fn symbol_constructor(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let description = match arg(args, 0) {
        Value::Undefined => None,
        other => Some(ctx.to_string(&other)?),
    };
    Ok(Value::Symbol(ctx.new_symbol(description)))
}
