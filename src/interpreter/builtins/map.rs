//! Map built-in methods

use indexmap::IndexMap;

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{ObjectKind, ObjectRef, PropertyKey, Value, ValueKey};

use super::set::{create_list_iterator, init_collection, normalize_zero};
use super::{arg, create_constructor};

pub fn init_map_prototype(ctx: &mut Context) -> Result<(), JsError> {
    let proto = ctx.intrinsics.map_prototype;

    ctx.register_method(proto, "get", map_get, 1)?;
    ctx.register_method(proto, "set", map_set, 2)?;
    ctx.register_method(proto, "has", map_has, 1)?;
    ctx.register_method(proto, "delete", map_delete, 1)?;
    ctx.register_method(proto, "clear", map_clear, 0)?;
    ctx.register_method(proto, "forEach", map_foreach, 1)?;
    ctx.register_method(proto, "keys", map_keys, 0)?;
    ctx.register_method(proto, "values", map_values, 0)?;

    let entries = ctx.create_native("entries", map_entries, 0, Vec::new());
    let entries_key = ctx.key("entries");
    ctx.put(proto, entries_key, Value::Object(entries))?;
    let iterator_key = PropertyKey::Symbol(ctx.intrinsics.iterator_symbol.clone());
    ctx.put(proto, iterator_key, Value::Object(entries))?;
    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(proto, tag, Value::from("Map"))
}

pub fn create_map_constructor(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let proto = ctx.intrinsics.map_prototype;
    create_constructor(ctx, "Map", map_constructor, 0, proto)
}

/// new Map(entries)
pub fn map_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = init_collection(ctx, &this, "Map", ObjectKind::Map(IndexMap::default()))?;
    let iterable = arg(args, 0);
    if iterable.is_nullish() {
        return Ok(Value::Object(id));
    }
    for entry in ctx.iterate_to_vec(&iterable)? {
        let Some(pair) = entry.as_object() else {
            return Err(JsError::type_error(format!(
                "Iterator value {} is not an entry object",
                ctx.describe(&entry)
            )));
        };
        let key = ctx.get_object_field(pair, &PropertyKey::Index(0))?;
        let value = ctx.get_object_field(pair, &PropertyKey::Index(1))?;
        insert(ctx, id, key, value)?;
    }
    Ok(Value::Object(id))
}

fn this_map(ctx: &Context, this: &Value, method: &str) -> Result<ObjectRef, JsError> {
    if let Some(id) = this.as_object()
        && matches!(ctx.heap.object(id)?.kind, ObjectKind::Map(_))
    {
        return Ok(id);
    }
    Err(JsError::type_error(format!(
        "Method Map.prototype.{} called on incompatible receiver {}",
        method,
        ctx.describe(this)
    )))
}

/// Insert or overwrite, moving edges from the replaced pair
fn insert(ctx: &mut Context, id: ObjectRef, key: Value, value: Value) -> Result<(), JsError> {
    let key = normalize_zero(key);
    let hash_key = ValueKey::from_value(&key);
    ctx.heap.link(id, &key);
    ctx.heap.link(id, &value);
    let ObjectKind::Map(entries) = &mut ctx.heap.object_mut(id)?.kind else {
        return Err(JsError::internal_error("not a map"));
    };
    let replaced = entries.insert(hash_key, (key, value));
    if let Some((old_key, old_value)) = replaced {
        ctx.heap.unlink(id, &old_key);
        ctx.heap.unlink(id, &old_value);
    }
    Ok(())
}

fn lookup(ctx: &Context, id: ObjectRef, key: &Value) -> Result<Option<Value>, JsError> {
    let key = ValueKey::from_value(key);
    Ok(match &ctx.heap.object(id)?.kind {
        ObjectKind::Map(entries) => entries.get(&key).map(|(_, v)| v.clone()),
        _ => None,
    })
}

pub fn map_get(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "get")?;
    Ok(lookup(ctx, id, &arg(args, 0))?.unwrap_or(Value::Undefined))
}

pub fn map_set(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "set")?;
    insert(ctx, id, arg(args, 0), arg(args, 1))?;
    Ok(this)
}

pub fn map_has(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "has")?;
    Ok(Value::Boolean(lookup(ctx, id, &arg(args, 0))?.is_some()))
}

pub fn map_delete(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "delete")?;
    let key = ValueKey::from_value(&arg(args, 0));
    let removed = match &mut ctx.heap.object_mut(id)?.kind {
        ObjectKind::Map(entries) => entries.shift_remove(&key),
        _ => None,
    };
    Ok(Value::Boolean(match removed {
        Some((old_key, old_value)) => {
            ctx.heap.unlink(id, &old_key);
            ctx.heap.unlink(id, &old_value);
            true
        }
        None => false,
    }))
}

pub fn map_clear(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "clear")?;
    ctx.replace_kind(id, ObjectKind::Map(IndexMap::default()))?;
    Ok(Value::Undefined)
}

fn map_snapshot(ctx: &Context, id: ObjectRef) -> Result<Vec<(Value, Value)>, JsError> {
    match &ctx.heap.object(id)?.kind {
        ObjectKind::Map(entries) => Ok(entries.values().cloned().collect()),
        _ => Err(JsError::internal_error("not a map")),
    }
}

/// forEach(callback, thisArg): callback(value, key, map)
pub fn map_foreach(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "forEach")?;
    let callback = arg(args, 0);
    if !ctx.is_callable(&callback) {
        return Err(JsError::type_error(format!("{} is not a function", ctx.describe(&callback))));
    }
    for (key, value) in map_snapshot(ctx, id)? {
        ctx.call_function(callback.clone(), arg(args, 1), &[value, key, this.clone()])?;
    }
    Ok(Value::Undefined)
}

pub fn map_keys(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "keys")?;
    let items = map_snapshot(ctx, id)?.into_iter().map(|(k, _)| k).collect();
    Ok(create_list_iterator(ctx, items))
}

pub fn map_values(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "values")?;
    let items = map_snapshot(ctx, id)?.into_iter().map(|(_, v)| v).collect();
    Ok(create_list_iterator(ctx, items))
}

pub fn map_entries(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    let id = this_map(ctx, &this, "entries")?;
    let mut items = Vec::new();
    for (key, value) in map_snapshot(ctx, id)? {
        items.push(Value::Object(ctx.create_array(vec![key, value])));
    }
    Ok(create_list_iterator(ctx, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    fn new_map(ctx: &mut Context) -> Value {
        let ctor = ctx.get_global("Map").unwrap();
        ctx.construct(&ctor, &[]).unwrap()
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let map = new_map(&mut ctx);
        map_set(&mut ctx, map.clone(), &[Value::from("a"), Value::Number(1.0)]).unwrap();
        map_set(&mut ctx, map.clone(), &[Value::from("a"), Value::Number(2.0)]).unwrap();
        assert_eq!(map_get(&mut ctx, map.clone(), &[Value::from("a")]).unwrap(), Value::Number(2.0));
        let size = ctx.key("size");
        assert_eq!(ctx.get_field(&map, &size).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_object_keys_by_identity() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let map = new_map(&mut ctx);
        let a = Value::Object(ctx.create_object());
        let b = Value::Object(ctx.create_object());
        map_set(&mut ctx, map.clone(), &[a.clone(), Value::from("first")]).unwrap();
        assert_eq!(map_get(&mut ctx, map.clone(), &[b]).unwrap(), Value::Undefined);
        assert_eq!(map_get(&mut ctx, map.clone(), &[a.clone()]).unwrap(), Value::from("first"));
        map_delete(&mut ctx, map, &[a]).unwrap();
        ctx.verify_heap().unwrap();
    }

    #[test]
    fn test_map_from_entries_iterates_in_order() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let pair1 = Value::Object(ctx.create_array(vec![Value::from("x"), Value::Number(1.0)]));
        let pair2 = Value::Object(ctx.create_array(vec![Value::from("y"), Value::Number(2.0)]));
        let list = Value::Object(ctx.create_array(vec![pair1, pair2]));
        let ctor = ctx.get_global("Map").unwrap();
        let map = ctx.construct(&ctor, &[list]).unwrap();
        let keys = map_keys(&mut ctx, map, &[]).unwrap();
        assert_eq!(ctx.iterate_to_vec(&keys).unwrap(), vec![Value::from("x"), Value::from("y")]);
    }
}
