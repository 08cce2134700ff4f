//! Function.prototype methods

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{BoundFunction, JsObject, ObjectKind, ObjectRef, Value};

use super::{arg, create_constructor};

pub fn init_function_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.function_prototype;

    ctx.register_method(proto, "call", function_call, 1)?;
    ctx.register_method(proto, "apply", function_apply, 2)?;
    ctx.register_method(proto, "bind", function_bind, 1)?;
    ctx.register_method(proto, "toString", function_to_string, 0)
}

/// `Function` exists for `instanceof` checks; building functions from
/// source text is not possible without a parser
pub fn create_function_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.function_prototype;
    create_constructor(ctx, "Function", function_constructor, 1, proto)
}

pub fn function_constructor(_ctx: &mut Context, _this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Err(JsError::type_error("Code generation from strings disallowed for this context"))
}

fn callable_this(ctx: &Context, this: &Value, method: &str) -> Result<(), JsError> {
    if ctx.is_callable(this) {
        return Ok(());
    }
    Err(JsError::type_error(format!(
        "Function.prototype.{} called on {}, which is not a function",
        method,
        ctx.describe(this)
    )))
}

/// Function.prototype.call(thisArg, ...args)
pub fn function_call(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    callable_this(ctx, &this, "call")?;
    let rest = args.get(1..).unwrap_or_default();
    ctx.call_function(this, arg(args, 0), rest)
}

/// Function.prototype.apply(thisArg, argsArray)
pub fn function_apply(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    callable_this(ctx, &this, "apply")?;
    let list = match arg(args, 1) {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(id) => {
            let len_key = ctx.key("length");
            let len = ctx.get_object_field(id, &len_key)?;
            let len = ctx.to_uint32(&len)?;
            let mut out = Vec::with_capacity(len as usize);
            for i in 0..len {
                out.push(ctx.get_object_field(id, &i.into())?);
            }
            out
        }
        other => {
            return Err(JsError::type_error(format!(
                "CreateListFromArrayLike called on non-object {}",
                ctx.describe(&other)
            )));
        }
    };
    ctx.call_function(this, arg(args, 0), &list)
}

/// Function.prototype.bind(thisArg, ...args)
pub fn function_bind(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    callable_this(ctx, &this, "bind")?;
    let Some(target) = this.as_object() else {
        return Err(JsError::type_error("Bind must be called on a function"));
    };
    let proto = ctx.heap.object(target)?.prototype;
    let bound = BoundFunction {
        target,
        this: arg(args, 0),
        args: args.get(1..).unwrap_or_default().to_vec(),
    };
    let bound = ctx.alloc(JsObject::new(proto, ObjectKind::Bound(bound)));
    Ok(Value::Object(bound))
}

/// Function.prototype.toString()
pub fn function_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    callable_this(ctx, &this, "toString")?;
    let name = this.as_object().and_then(|id| ctx.function_name(id)).unwrap_or_default();
    Ok(Value::from(format!("function {}() {{ [native code] }}", name)))
}
