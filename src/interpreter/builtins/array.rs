//! Array built-in methods

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{ArrayIterator, IterationMode, JsObject, ObjectKind, ObjectRef, PropertyKey, Value};

use super::{arg, create_constructor};

/// Initialize Array.prototype with all array methods.
/// The prototype object must already exist in `ctx.intrinsics.array_prototype`.
pub fn init_array_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.array_prototype;

    // Mutating methods
    ctx.register_method(proto, "push", array_push, 1)?;
    ctx.register_method(proto, "pop", array_pop, 0)?;
    ctx.register_method(proto, "shift", array_shift, 0)?;
    ctx.register_method(proto, "unshift", array_unshift, 1)?;

    // Accessor methods
    ctx.register_method(proto, "concat", array_concat, 1)?;
    ctx.register_method(proto, "slice", array_slice, 2)?;
    ctx.register_method(proto, "join", array_join, 1)?;
    ctx.register_method(proto, "toString", array_to_string, 0)?;
    ctx.register_method(proto, "indexOf", array_index_of, 1)?;
    ctx.register_method(proto, "includes", array_includes, 1)?;

    // Iteration methods
    ctx.register_method(proto, "forEach", array_foreach, 1)?;
    ctx.register_method(proto, "map", array_map, 1)?;
    ctx.register_method(proto, "filter", array_filter, 1)?;
    ctx.register_method(proto, "reduce", array_reduce, 1)?;
    ctx.register_method(proto, "find", array_find, 1)?;
    ctx.register_method(proto, "some", array_some, 1)?;
    ctx.register_method(proto, "every", array_every, 1)?;

    // Iterator methods
    ctx.register_method(proto, "keys", array_keys, 0)?;
    ctx.register_method(proto, "entries", array_entries, 0)?;
    let values = ctx.create_native("values", array_values, 0, Vec::new());
    let values_key = ctx.key("values");
    ctx.put(proto, values_key, Value::Object(values))?;
    let iterator_key = PropertyKey::Symbol(ctx.intrinsics.iterator_symbol.clone());
    ctx.put(proto, iterator_key, Value::Object(values))
}

/// `%ArrayIteratorPrototype%.next` plus `[Symbol.iterator]() { return this }`
/// on the shared iterator prototype
pub fn init_array_iterator_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let iterator_proto = ctx.intrinsics.iterator_prototype;
    let symbol = ctx.intrinsics.iterator_symbol.clone();
    ctx.register_symbol_method(iterator_proto, symbol, "[Symbol.iterator]", iterator_self, 0)?;

    let proto = ctx.intrinsics.array_iterator_prototype;
    ctx.register_method(proto, "next", array_iterator_next, 0)?;
    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("Array Iterator"))
}

/// Create Array constructor with static methods (isArray, of, from)
pub fn create_array_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.array_prototype;
    let ctor = create_constructor(ctx, "Array", array_constructor, 1, proto)?;

    ctx.register_method(ctor, "isArray", array_is_array, 1)?;
    ctx.register_method(ctor, "of", array_of, 0)?;
    ctx.register_method(ctor, "from", array_from, 1)?;
    Ok(ctor)
}

/// Array(n) or Array(...items)
pub fn array_constructor(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    if let [Value::Number(n)] = args {
        let array = ctx.create_array(Vec::new());
        ctx.set_array_length(array, *n)?;
        return Ok(Value::Object(array));
    }
    Ok(Value::Object(ctx.create_array(args.to_vec())))
}

pub fn array_is_array(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Boolean(ctx.is_array(&arg(args, 0))))
}

pub fn array_of(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Object(ctx.create_array(args.to_vec())))
}

/// Array.from(iterable, mapFn)
pub fn array_from(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let items = ctx.iterate_to_vec(&arg(args, 0))?;
    let map_fn = arg(args, 1);
    if map_fn.is_nullish() {
        return Ok(Value::Object(ctx.create_array(items)));
    }
    let result = ctx.create_array(Vec::new());
    for (i, item) in items.into_iter().enumerate() {
        let mapped = ctx.call_function(map_fn.clone(), Value::Undefined, &[item, Value::Number(i as f64)])?;
        ctx.push_element(result, mapped)?;
    }
    Ok(Value::Object(result))
}

fn this_array(ctx: &Context, this: &Value, method: &str) -> Result<ObjectRef, JsError> {
    match this.as_object() {
        Some(id) if ctx.is_array(this) => Ok(id),
        _ => Err(JsError::type_error(format!(
            "Array.prototype.{} called on non-array {}",
            method,
            ctx.describe(this)
        ))),
    }
}

fn callback_arg(ctx: &Context, args: &[Value]) -> Result<Value, JsError> {
    let callback = arg(args, 0);
    if !ctx.is_callable(&callback) {
        return Err(JsError::type_error(format!("{} is not a function", ctx.describe(&callback))));
    }
    Ok(callback)
}

/// Resolve a relative index argument against `len`
fn relative_index(ctx: &mut Context, value: &Value, len: u32, default: u32) -> Result<u32, JsError> {
    if matches!(value, Value::Undefined) {
        return Ok(default);
    }
    let n = ctx.to_number(value)?;
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    let len = len as f64;
    let resolved = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
    Ok(resolved as u32)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mutating methods
// ═══════════════════════════════════════════════════════════════════════════════

pub fn array_push(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "push")?;
    for value in args {
        let len = ctx.array_len(id)?;
        ctx.set_array_element(id, len, value.clone())?;
    }
    Ok(Value::Number(ctx.array_len(id)? as f64))
}

pub fn array_pop(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "pop")?;
    let popped = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::Array(elements) => elements.pop(),
        _ => None,
    };
    Ok(match popped {
        Some(value) => {
            ctx.heap.unlink(id, &value);
            value
        }
        None => Value::Undefined,
    })
}

pub fn array_shift(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "shift")?;
    let shifted = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::Array(elements) if !elements.is_empty() => Some(elements.remove(0)),
        _ => None,
    };
    Ok(match shifted {
        Some(value) => {
            ctx.heap.unlink(id, &value);
            value
        }
        None => Value::Undefined,
    })
}

pub fn array_unshift(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "unshift")?;
    for value in args {
        ctx.heap.link(id, value);
    }
    let len = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::Array(elements) => {
            elements.splice(0..0, args.iter().cloned());
            elements.len()
        }
        _ => 0,
    };
    Ok(Value::Number(len as f64))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Accessor methods
// ═══════════════════════════════════════════════════════════════════════════════

pub fn array_concat(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "concat")?;
    let mut out = ctx.array_elements(id)?;
    for item in args {
        match item.as_object() {
            Some(other) if ctx.is_array(item) => out.extend(ctx.array_elements(other)?),
            _ => out.push(item.clone()),
        }
    }
    Ok(Value::Object(ctx.create_array(out)))
}

pub fn array_slice(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "slice")?;
    let elements = ctx.array_elements(id)?;
    let len = elements.len() as u32;
    let start = relative_index(ctx, &arg(args, 0), len, 0)?;
    let end = relative_index(ctx, &arg(args, 1), len, len)?;
    let taken = elements
        .into_iter()
        .skip(start as usize)
        .take(end.saturating_sub(start) as usize)
        .collect();
    Ok(Value::Object(ctx.create_array(taken)))
}

pub fn array_join(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "join")?;
    let separator = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        other => ctx.to_string(&other)?.to_string(),
    };
    let mut parts = Vec::new();
    for element in ctx.array_elements(id)? {
        if element.is_nullish() {
            parts.push(String::new());
        } else {
            parts.push(ctx.to_string(&element)?.to_string());
        }
    }
    Ok(Value::from(parts.join(&separator)))
}

pub fn array_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    array_join(ctx, this, &[])
}

pub fn array_index_of(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "indexOf")?;
    let needle = arg(args, 0);
    let position = ctx
        .array_elements(id)?
        .iter()
        .position(|v| v.strict_equals(&needle));
    Ok(Value::Number(position.map(|i| i as f64).unwrap_or(-1.0)))
}

pub fn array_includes(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "includes")?;
    let needle = arg(args, 0);
    let found = ctx.array_elements(id)?.iter().any(|v| v.same_value_zero(&needle));
    Ok(Value::Boolean(found))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Iteration methods
// ═══════════════════════════════════════════════════════════════════════════════

/// Call `callback(element, index, array)` for each index below the live
/// length, stopping when `visit` returns false
fn each_element(
    ctx: &mut Context,
    id: ObjectRef,
    args: &[Value],
    mut visit: impl FnMut(&mut Context, Value, Value) -> Result<bool, JsError>,
) -> Result<(), JsError> {
    let callback = callback_arg(ctx, args)?;
    let this_arg = arg(args, 1);
    let mut i = 0;
    while i < ctx.array_len(id)? {
        let element = ctx.get_object_field(id, &PropertyKey::Index(i))?;
        let result = ctx.call_function(
            callback.clone(),
            this_arg.clone(),
            &[element.clone(), Value::Number(i as f64), Value::Object(id)],
        )?;
        if !visit(ctx, element, result)? {
            break;
        }
        i += 1;
    }
    Ok(())
}

pub fn array_foreach(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "forEach")?;
    each_element(ctx, id, args, |_, _, _| Ok(true))?;
    Ok(Value::Undefined)
}

pub fn array_map(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "map")?;
    let result = ctx.create_array(Vec::new());
    each_element(ctx, id, args, |ctx, _, mapped| {
        ctx.push_element(result, mapped)?;
        Ok(true)
    })?;
    Ok(Value::Object(result))
}

pub fn array_filter(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "filter")?;
    let result = ctx.create_array(Vec::new());
    each_element(ctx, id, args, |ctx, element, keep| {
        if keep.to_boolean() {
            ctx.push_element(result, element)?;
        }
        Ok(true)
    })?;
    Ok(Value::Object(result))
}

pub fn array_find(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "find")?;
    let mut found = Value::Undefined;
    each_element(ctx, id, args, |_, element, hit| {
        if hit.to_boolean() {
            found = element;
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

pub fn array_some(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "some")?;
    let mut any = false;
    each_element(ctx, id, args, |_, _, hit| {
        any = hit.to_boolean();
        Ok(!any)
    })?;
    Ok(Value::Boolean(any))
}

pub fn array_every(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "every")?;
    let mut all = true;
    each_element(ctx, id, args, |_, _, hit| {
        all = hit.to_boolean();
        Ok(all)
    })?;
    Ok(Value::Boolean(all))
}

/// reduce(callback, initial)
pub fn array_reduce(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_array(ctx, &this, "reduce")?;
    let callback = callback_arg(ctx, args)?;
    let mut i = 0;
    let mut acc = match args.get(1) {
        Some(initial) => initial.clone(),
        None => {
            if ctx.array_len(id)? == 0 {
                return Err(JsError::type_error("Reduce of empty array with no initial value"));
            }
            i = 1;
            ctx.get_object_field(id, &PropertyKey::Index(0))?
        }
    };
    while i < ctx.array_len(id)? {
        let element = ctx.get_object_field(id, &PropertyKey::Index(i))?;
        acc = ctx.call_function(
            callback.clone(),
            Value::Undefined,
            &[acc, element, Value::Number(i as f64), Value::Object(id)],
        )?;
        i += 1;
    }
    Ok(acc)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Iterators
// ═══════════════════════════════════════════════════════════════════════════════

fn create_array_iterator(ctx: &mut Context, this: &Value, method: &str, mode: IterationMode) -> Result<Value, JsError> {
    let array = this_array(ctx, this, method)?;
    let proto = ctx.intrinsics.array_iterator_prototype;
    let iterator = ctx.alloc(JsObject::new(
        Some(proto),
        ObjectKind::ArrayIterator(ArrayIterator { array, index: 0, mode }),
    ));
    Ok(Value::Object(iterator))
}

pub fn array_keys(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    create_array_iterator(ctx, &this, "keys", IterationMode::Keys)
}

pub fn array_values(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    create_array_iterator(ctx, &this, "values", IterationMode::Values)
}

pub fn array_entries(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    create_array_iterator(ctx, &this, "entries", IterationMode::Entries)
}

/// %ArrayIteratorPrototype%.next(); reads the array live
pub fn array_iterator_next(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let state = match this.as_object().map(|id| ctx.heap.object(id).map(|o| &o.kind)) {
        Some(Ok(ObjectKind::ArrayIterator(state))) => state.clone(),
        _ => {
            return Err(JsError::type_error(format!(
                "next method called on incompatible receiver {}",
                ctx.describe(&this)
            )));
        }
    };
    let len = ctx.array_len(state.array)?;
    let Some(id) = this.as_object() else {
        return Err(JsError::internal_error("iterator is not an object"));
    };
    if state.index >= len {
        if let ObjectKind::ArrayIterator(it) = &mut ctx.heap.object_mut(id)?.kind {
            it.index = u32::MAX;
        }
        return ctx.create_iter_result(Value::Undefined, true);
    }
    if let ObjectKind::ArrayIterator(it) = &mut ctx.heap.object_mut(id)?.kind {
        it.index += 1;
    }
    let index = Value::Number(state.index as f64);
    let value = match state.mode {
        IterationMode::Keys => index,
        IterationMode::Values => ctx.get_object_field(state.array, &PropertyKey::Index(state.index))?,
        IterationMode::Entries => {
            let element = ctx.get_object_field(state.array, &PropertyKey::Index(state.index))?;
            Value::Object(ctx.create_array(vec![index, element]))
        }
    };
    ctx.create_iter_result(value, false)
}

pub fn iterator_self(_ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(this)
}
