//! Object built-in methods

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{JsObject, ObjectKind, ObjectRef, PropertyKey, Value};

use super::{arg, create_constructor};

/// Initialize Object.prototype with hasOwnProperty, toString, valueOf methods.
/// The prototype object must already exist in `ctx.intrinsics.object_prototype`.
pub fn init_object_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.object_prototype;

    ctx.register_method(proto, "hasOwnProperty", object_has_own_property, 1)?;
    ctx.register_method(proto, "isPrototypeOf", object_is_prototype_of, 1)?;
    ctx.register_method(proto, "toString", object_to_string, 0)?;
    ctx.register_method(proto, "valueOf", object_value_of, 0)
}

/// Create Object constructor with static methods (keys, values, entries, assign, etc.)
pub fn create_object_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.object_prototype;
    let ctor = create_constructor(ctx, "Object", object_constructor, 1, proto)?;

    // Property enumeration
    ctx.register_method(ctor, "keys", object_keys, 1)?;
    ctx.register_method(ctor, "values", object_values, 1)?;
    ctx.register_method(ctor, "entries", object_entries, 1)?;

    // Object manipulation
    ctx.register_method(ctor, "assign", object_assign, 2)?;
    ctx.register_method(ctor, "fromEntries", object_from_entries, 1)?;
    ctx.register_method(ctor, "create", object_create, 2)?;
    ctx.register_method(ctor, "hasOwn", object_has_own, 2)?;
    ctx.register_method(ctor, "is", object_is, 2)?;

    // Prototype chain
    ctx.register_method(ctor, "getPrototypeOf", object_get_prototype_of, 1)?;
    ctx.register_method(ctor, "setPrototypeOf", object_set_prototype_of, 2)?;

    Ok(ctor)
}

/// Object(value): objects pass through, everything else gets a fresh object
pub fn object_constructor(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    match arg(args, 0) {
        value @ Value::Object(_) => Ok(value),
        _ => Ok(Value::Object(ctx.create_object())),
    }
}

fn object_arg(ctx: &mut Context, args: &[Value]) -> Result<ObjectRef, JsError> {
    let target = arg(args, 0);
    if target.is_nullish() {
        return Err(JsError::type_error("Cannot convert undefined or null to object"));
    }
    ctx.to_object(&target)
}

pub fn object_keys(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = object_arg(ctx, args)?;
    let keys: Vec<Value> = ctx
        .own_keys(id)?
        .into_iter()
        .filter(|k| !k.is_symbol())
        .map(|k| k.to_value())
        .collect();
    Ok(Value::Object(ctx.create_array(keys)))
}

pub fn object_values(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = object_arg(ctx, args)?;
    let values = ctx.own_entries(id)?.into_iter().map(|(_, v)| v).collect();
    Ok(Value::Object(ctx.create_array(values)))
}

pub fn object_entries(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = object_arg(ctx, args)?;
    let mut pairs = Vec::new();
    for (key, value) in ctx.own_entries(id)? {
        let pair = ctx.create_array(vec![key.to_value(), value]);
        pairs.push(Value::Object(pair));
    }
    Ok(Value::Object(ctx.create_array(pairs)))
}

/// Object.assign(target, ...sources)
pub fn object_assign(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let target = object_arg(ctx, args)?;
    for source in args.iter().skip(1) {
        let Some(source) = source.as_object() else {
            continue;
        };
        let mut symbols = Vec::new();
        for key in ctx.own_keys(source)? {
            if key.is_symbol() {
                symbols.push(key);
            }
        }
        let mut entries = ctx.own_entries(source)?;
        for key in symbols {
            let value = ctx.get_object_field(source, &key)?;
            entries.push((key, value));
        }
        for (key, value) in entries {
            ctx.set_object_field(target, key, value)?;
        }
    }
    Ok(Value::Object(target))
}

/// Object.fromEntries(iterable)
pub fn object_from_entries(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let entries = ctx.iterate_to_vec(&arg(args, 0))?;
    let obj = ctx.create_object();
    for entry in entries {
        let Some(pair) = entry.as_object() else {
            return Err(JsError::type_error(format!(
                "Iterator value {} is not an entry object",
                ctx.describe(&entry)
            )));
        };
        let key = ctx.get_object_field(pair, &PropertyKey::Index(0))?;
        let value = ctx.get_object_field(pair, &PropertyKey::Index(1))?;
        let key = ctx.to_property_key(&key)?;
        ctx.set_object_field(obj, key, value)?;
    }
    Ok(Value::Object(obj))
}

/// Object.create(proto, properties)
pub fn object_create(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let proto = match arg(args, 0) {
        Value::Null => None,
        Value::Object(id) => Some(id),
        other => {
            return Err(JsError::type_error(format!(
                "Object prototype may only be an Object or null: {}",
                ctx.describe(&other)
            )));
        }
    };
    let obj = ctx.alloc(JsObject::ordinary(proto));
    if let Some(properties) = arg(args, 1).as_object() {
        for (key, value) in ctx.own_entries(properties)? {
            ctx.put(obj, key, value)?;
        }
    }
    Ok(Value::Object(obj))
}

pub fn object_has_own(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = object_arg(ctx, args)?;
    let key = ctx.to_property_key(&arg(args, 1))?;
    Ok(Value::Boolean(has_own(ctx, id, &key)?))
}

fn has_own(ctx: &Context, id: ObjectRef, key: &PropertyKey) -> Result<bool, JsError> {
    Ok(ctx.own_keys(id)?.contains(key))
}

/// Object.is(a, b): SameValue
pub fn object_is(_ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let (a, b) = (arg(args, 0), arg(args, 1));
    let same = match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => {
            (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative())
        }
        _ => a.strict_equals(&b),
    };
    Ok(Value::Boolean(same))
}

pub fn object_get_prototype_of(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = object_arg(ctx, args)?;
    Ok(match ctx.heap.object(id)?.prototype {
        Some(proto) => Value::Object(proto),
        None => Value::Null,
    })
}

/// Object.setPrototypeOf(obj, proto); refuses to close a prototype cycle
pub fn object_set_prototype_of(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let target = arg(args, 0);
    let proto = match arg(args, 1) {
        Value::Null => None,
        Value::Object(id) => Some(id),
        other => {
            return Err(JsError::type_error(format!(
                "Object prototype may only be an Object or null: {}",
                ctx.describe(&other)
            )));
        }
    };
    let Some(id) = target.as_object() else {
        return Ok(target);
    };
    let mut current = proto;
    while let Some(c) = current {
        if c == id {
            return Err(JsError::type_error("Cyclic __proto__ value"));
        }
        current = ctx.heap.object(c)?.prototype;
    }
    ctx.set_prototype(id, proto)?;
    Ok(target)
}

pub fn object_has_own_property(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = ctx.to_object(&this)?;
    let key = ctx.to_property_key(&arg(args, 0))?;
    Ok(Value::Boolean(has_own(ctx, id, &key)?))
}

pub fn object_is_prototype_of(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let (Some(proto), Some(id)) = (this.as_object(), arg(args, 0).as_object()) else {
        return Ok(Value::Boolean(false));
    };
    let mut current = ctx.heap.object(id)?.prototype;
    while let Some(c) = current {
        if c == proto {
            return Ok(Value::Boolean(true));
        }
        current = ctx.heap.object(c)?.prototype;
    }
    Ok(Value::Boolean(false))
}

/// Object.prototype.toString(): `[object Tag]`
pub fn object_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let tag = match &this {
        Value::Undefined | Value::Uninitialized => "Undefined".to_string(),
        Value::Null => "Null".to_string(),
        Value::Object(id) => {
            let tag_key = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
            match ctx.get_object_field(*id, &tag_key)? {
                Value::String(s) => s.to_string(),
                _ => builtin_tag(ctx, *id)?.to_string(),
            }
        }
        Value::Number(_) => "Number".to_string(),
        Value::String(_) => "String".to_string(),
        Value::Boolean(_) => "Boolean".to_string(),
        Value::Symbol(_) => "Symbol".to_string(),
    };
    Ok(Value::from(format!("[object {}]", tag)))
}

fn builtin_tag(ctx: &Context, id: ObjectRef) -> Result<&'static str, JsError> {
    Ok(match &ctx.heap.object(id)?.kind {
        ObjectKind::Array(_) => "Array",
        ObjectKind::Error => "Error",
        ObjectKind::Closure(_) | ObjectKind::Native(_) | ObjectKind::AsyncNative(_) | ObjectKind::Bound(_) => {
            "Function"
        }
        _ => "Object",
    })
}

pub fn object_value_of(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Object(ctx.to_object(&this)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    fn context() -> Context {
        Context::new(Runtime::default()).unwrap()
    }

    #[test]
    fn test_keys_in_insertion_order_with_indices_first() {
        let mut ctx = context();
        let obj = ctx.create_object();
        let b = ctx.key("b");
        let a = ctx.key("a");
        ctx.put(obj, b, Value::Number(1.0)).unwrap();
        ctx.put(obj, a, Value::Number(2.0)).unwrap();
        ctx.put(obj, PropertyKey::Index(0), Value::Number(3.0)).unwrap();
        let keys = object_keys(&mut ctx, Value::Undefined, &[Value::Object(obj)]).unwrap();
        let keys = ctx.array_elements(keys.as_object().unwrap()).unwrap();
        assert_eq!(keys, vec![Value::from("b"), Value::from("a"), Value::from("0")]);
    }

    #[test]
    fn test_set_prototype_rejects_cycles() {
        let mut ctx = context();
        let a = ctx.create_object();
        let b = ctx.alloc(JsObject::ordinary(Some(a)));
        let err = object_set_prototype_of(&mut ctx, Value::Undefined, &[Value::Object(a), Value::Object(b)])
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Cyclic __proto__ value");
    }

    #[test]
    fn test_to_string_uses_tag() {
        let mut ctx = context();
        let promise = Value::Object(ctx.create_promise());
        let text = object_to_string(&mut ctx, promise, &[]).unwrap();
        assert_eq!(text, Value::from("[object Promise]"));
        let array = Value::Object(ctx.create_array(Vec::new()));
        assert_eq!(object_to_string(&mut ctx, array, &[]).unwrap(), Value::from("[object Array]"));
    }

    #[test]
    fn test_object_is_distinguishes_signed_zero() {
        let mut ctx = context();
        let same = object_is(&mut ctx, Value::Undefined, &[Value::Number(0.0), Value::Number(-0.0)]).unwrap();
        assert_eq!(same, Value::Boolean(false));
        let nan = object_is(&mut ctx, Value::Undefined, &[Value::Number(f64::NAN), Value::Number(f64::NAN)]).unwrap();
        assert_eq!(nan, Value::Boolean(true));
    }
}
