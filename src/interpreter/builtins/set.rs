//! Set built-in methods and the snapshot list iterator shared with Map

use indexmap::IndexMap;

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{JsObject, ListIterator, ObjectKind, ObjectRef, PropertyKey, Value, ValueKey};

use super::{arg, create_constructor};

/// Initialize Set.prototype with add, has, delete, clear, forEach methods
pub fn init_set_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.set_prototype;

    ctx.register_method(proto, "add", set_add, 1)?;
    ctx.register_method(proto, "has", set_has, 1)?;
    ctx.register_method(proto, "delete", set_delete, 1)?;
    ctx.register_method(proto, "clear", set_clear, 0)?;
    ctx.register_method(proto, "forEach", set_foreach, 1)?;
    ctx.register_method(proto, "entries", set_entries, 0)?;

    let values = ctx.create_native("values", set_values, 0, Vec::new());
    for key in [ctx.key("values"), ctx.key("keys")] {
        ctx.put(proto, key, Value::Object(values))?;
    }
    let iterator_key = PropertyKey::Symbol(ctx.intrinsics.iterator_symbol.clone());
    ctx.put(proto, iterator_key, Value::Object(values))?;
    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("Set"))
}

pub fn create_set_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.set_prototype;
    create_constructor(ctx, "Set", set_constructor, 0, proto)
}

/// Initialize the prototype of snapshot iterators with `next`
pub fn init_list_iterator_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.list_iterator_prototype;
    ctx.register_method(proto, "next", list_iterator_next, 0)
}

/// Turn a freshly constructed `this` into an empty collection of `kind`
pub(crate) fn init_collection(ctx: &mut Context, this: &Value, name: &str, kind: ObjectKind) -> Result<ObjectRef, JsError> {
    let Some(id) = this.as_object() else {
        return Err(JsError::type_error(format!("Constructor {} requires 'new'", name)));
    };
    if !matches!(ctx.heap.object(id)?.kind, ObjectKind::Ordinary) {
        return Err(JsError::type_error(format!("Constructor {} requires 'new'", name)));
    }
    ctx.replace_kind(id, kind)?;
    Ok(id)
}

/// -0 is stored as +0
pub(crate) fn normalize_zero(value: Value) -> Value {
    match value {
        Value::Number(n) if n == 0.0 => Value::Number(0.0),
        other => other,
    }
}

/// new Set(iterable)
pub fn set_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = init_collection(ctx, &this, "Set", ObjectKind::Set(IndexMap::default()))?;
    let iterable = arg(args, 0);
    if !iterable.is_nullish() {
        for value in ctx.iterate_to_vec(&iterable)? {
            insert(ctx, id, value)?;
        }
    }
    Ok(Value::Object(id))
}

fn this_set(ctx: &Context, this: &Value, method: &str) -> Result<ObjectRef, JsError> {
    if let Some(id) = this.as_object()
        && matches!(ctx.heap.object(id)?.kind, ObjectKind::Set(_))
    {
        return Ok(id);
    }
    Err(JsError::type_error(format!(
        "Method Set.prototype.{} called on incompatible receiver {}",
        method,
        ctx.describe(this)
    )))
}

fn insert(ctx: &mut Context, id: ObjectRef, value: Value) -> Result<(), JsError> {
    let value = normalize_zero(value);
    let key = ValueKey::from_value(&value);
    let ObjectKind::Set(entries) = &mut ctx.heap.object_mut(id)?.kind else {
        return Err(JsError::internal_error("not a set"));
    };
    if entries.contains_key(&key) {
        return Ok(());
    }
    entries.insert(key, value.clone());
    ctx.heap.link(id, &value);
    Ok(())
}

pub fn set_add(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "add")?;
    insert(ctx, id, arg(args, 0))?;
    Ok(this)
}

pub fn set_has(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "has")?;
    let key = ValueKey::from_value(&arg(args, 0));
    let found = match &ctx.heap.object(id)?.kind {
        ObjectKind::Set(entries) => entries.contains_key(&key),
        _ => false,
    };
    Ok(Value::Boolean(found))
}

pub fn set_delete(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "delete")?;
    let key = ValueKey::from_value(&arg(args, 0));
    let removed = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::Set(entries) => entries.shift_remove(&key),
        _ => None,
    };
    Ok(Value::Boolean(match removed {
        Some(value) => {
            ctx.heap.unlink(id, &value);
            true
        }
        None => false,
    }))
}

pub fn set_clear(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "clear")?;
    ctx.replace_kind(id, ObjectKind::Set(IndexMap::default()))?;
    Ok(Value::Undefined)
}

fn set_snapshot(ctx: &Context, id: ObjectRef) -> Result<Vec<Value>, JsError> {
    match &ctx.heap.object(id)?.kind {
        ObjectKind::Set(entries) => Ok(entries.values().cloned().collect()),
        _ => Err(JsError::internal_error("not a set")),
    }
}

/// forEach(callback, thisArg) over a snapshot of the entries
pub fn set_foreach(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "forEach")?;
    let callback = arg(args, 0);
    if !ctx.is_callable(&callback) {
        return Err(JsError::type_error(format!("{} is not a function", ctx.describe(&callback))));
    }
    for value in set_snapshot(ctx, id)? {
        ctx.call_function(callback.clone(), arg(args, 1), &[value.clone(), value, this.clone()])?;
    }
    Ok(Value::Undefined)
}

pub fn set_values(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "values")?;
    let items = set_snapshot(ctx, id)?;
    Ok(create_list_iterator(ctx, items))
}

pub fn set_entries(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_set(ctx, &this, "entries")?;
    let mut items = Vec::new();
    for value in set_snapshot(ctx, id)? {
        items.push(Value::Object(ctx.create_array(vec![value.clone(), value])));
    }
    Ok(create_list_iterator(ctx, items))
}

// ═══════════════════════════════════════════════════════════════════════════════
// List iterator
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn create_list_iterator(ctx: &mut Context, items: Vec<Value>) -> Value {
    let proto = ctx.intrinsics.list_iterator_prototype;
    let iterator = ctx.alloc(JsObject::new(
        Some(proto),
        ObjectKind::ListIterator(ListIterator { items, index: 0 }),
    ));
    Value::Object(iterator)
}

/// next() over the snapshot; the items are released once exhausted
pub fn list_iterator_next(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let Some(id) = this.as_object() else {
        return Err(JsError::type_error(format!(
            "next method called on incompatible receiver {}",
            ctx.describe(&this)
        )));
    };
    let next = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::ListIterator(iter) => {
            let item = iter.items.get(iter.index).cloned();
            iter.index += 1;
            Some(item)
        }
        _ => None,
    };
    let Some(next) = next else {
        return Err(JsError::type_error(format!(
            "next method called on incompatible receiver {}",
            ctx.describe(&this)
        )));
    };
    match next {
        Some(value) => ctx.create_iter_result(value, false),
        None => {
            ctx.replace_kind(id, ObjectKind::ListIterator(ListIterator { items: Vec::new(), index: 0 }))?;
            ctx.create_iter_result(Value::Undefined, true)
        }
    }
}
