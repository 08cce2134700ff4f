//! JSON built-in methods
//!
//! Both directions go through `serde_json::Value`; the `preserve_order`
//! feature keeps object keys in source order.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{ObjectKind, ObjectRef, PropertyKey, Value};

use super::arg;

/// Create the JSON namespace object
pub fn create_json_object(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let json = ctx.create_object();
    ctx.register_method(json, "stringify", json_stringify, 3)?;
    ctx.register_method(json, "parse", json_parse, 2)?;
    let tag = PropertyKey::Symbol(ctx.intrinsics.to_string_tag_symbol.clone());
    ctx.put(json, tag, Value::from("JSON"))?;
    Ok(json)
}

/// JSON.stringify(value, replacer, space). Function replacers are not
/// supported and are ignored.
pub fn json_stringify(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let mut visited = Vec::new();
    let Some(json) = value_to_json(ctx, &arg(args, 0), &mut visited)? else {
        return Ok(Value::Undefined);
    };

    let indent = match arg(args, 2) {
        Value::Number(n) if n >= 1.0 => " ".repeat(n.min(10.0) as usize),
        Value::String(s) => s.as_str().chars().take(10).collect(),
        _ => String::new(),
    };
    if indent.is_empty() {
        return Ok(Value::from(json.to_string()));
    }

    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(indent.as_bytes()));
    json.serialize(&mut serializer)
        .map_err(|e| JsError::internal_error(format!("JSON serialization failed: {}", e)))?;
    let text = String::from_utf8(out).map_err(|e| JsError::internal_error(e.to_string()))?;
    Ok(Value::from(text))
}

/// JSON.parse(text). Revivers are not supported and are ignored.
pub fn json_parse(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let text = ctx.to_string(&arg(args, 0))?;
    let json: serde_json::Value = serde_json::from_str(text.as_str())
        .map_err(|e| JsError::syntax_error(format!("JSON parse error: {}", e), e.line() as u32, e.column() as u32))?;
    json_to_value(ctx, &json)
}

/// Build JavaScript values from a parsed document
pub fn json_to_value(ctx: &mut Context, json: &serde_json::Value) -> Result<Value, JsError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(ctx.intern(s)),
        serde_json::Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(json_to_value(ctx, item)?);
            }
            Value::Object(ctx.create_array(elements))
        }
        serde_json::Value::Object(map) => {
            let obj = ctx.create_object();
            for (key, item) in map {
                let value = json_to_value(ctx, item)?;
                let key = ctx.key(key);
                ctx.put(obj, key, value)?;
            }
            Value::Object(obj)
        }
    })
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return serde_json::Value::Number(serde_json::Number::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Convert to JSON; `None` stands for values JSON skips (undefined,
/// functions, symbols). `visited` holds the objects on the current path.
fn value_to_json(
    ctx: &mut Context,
    value: &Value,
    visited: &mut Vec<ObjectRef>,
) -> Result<Option<serde_json::Value>, JsError> {
    let id = match value {
        Value::Undefined | Value::Uninitialized | Value::Symbol(_) => return Ok(None),
        Value::Null => return Ok(Some(serde_json::Value::Null)),
        Value::Boolean(b) => return Ok(Some(serde_json::Value::Bool(*b))),
        Value::Number(n) => return Ok(Some(number_to_json(*n))),
        Value::String(s) => return Ok(Some(serde_json::Value::String(s.to_string()))),
        Value::Object(id) => *id,
    };
    if ctx.is_callable(value) {
        return Ok(None);
    }

    let to_json_key = ctx.key("toJSON");
    let to_json = ctx.get_object_field(id, &to_json_key)?;
    if ctx.is_callable(&to_json) {
        let replaced = ctx.call_function(to_json, value.clone(), &[])?;
        if !matches!(&replaced, Value::Object(other) if *other == id) {
            return value_to_json(ctx, &replaced, visited);
        }
    }

    if visited.contains(&id) {
        return Err(JsError::type_error("Converting circular structure to JSON"));
    }
    visited.push(id);
    let result = object_to_json(ctx, id, visited);
    visited.pop();
    result.map(Some)
}

fn object_to_json(ctx: &mut Context, id: ObjectRef, visited: &mut Vec<ObjectRef>) -> Result<serde_json::Value, JsError> {
    match &ctx.heap.object(id)?.kind {
        ObjectKind::Array(_) => {
            let elements = ctx.array_elements(id)?;
            let mut items = Vec::with_capacity(elements.len());
            for element in &elements {
                items.push(value_to_json(ctx, element, visited)?.unwrap_or(serde_json::Value::Null));
            }
            Ok(serde_json::Value::Array(items))
        }
        ObjectKind::Set(_)
        | ObjectKind::Map(_)
        | ObjectKind::Promise(_)
        | ObjectKind::Generator(_)
        | ObjectKind::AsyncGenerator(_) => {
            Ok(serde_json::Value::Object(serde_json::Map::new()))
        }
        _ => {
            let mut map = serde_json::Map::new();
            for (key, value) in ctx.own_entries(id)? {
                if let Some(json) = value_to_json(ctx, &value, visited)? {
                    map.insert(key.to_string(), json);
                }
            }
            Ok(serde_json::Value::Object(map))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    fn context() -> Context {
        Context::new(Runtime::default()).unwrap()
    }

    fn stringify(ctx: &mut Context, args: &[Value]) -> Value {
        json_stringify(ctx, Value::Undefined, args).unwrap()
    }

    #[test]
    fn test_parse_then_stringify_keeps_key_order() {
        let mut ctx = context();
        let text = r#"{"z":1,"a":[true,null,"s"],"m":{"k":2.5}}"#;
        let value = json_parse(&mut ctx, Value::Undefined, &[Value::from(text)]).unwrap();
        assert_eq!(stringify(&mut ctx, &[value]), Value::from(text));
    }

    #[test]
    fn test_stringify_skips_undefined_and_functions() {
        let mut ctx = context();
        let obj = ctx.create_object();
        let f = ctx.get_global("parseInt").unwrap();
        ctx.put(obj, PropertyKey::from("u"), Value::Undefined).unwrap();
        ctx.put(obj, PropertyKey::from("f"), f.clone()).unwrap();
        ctx.put(obj, PropertyKey::from("n"), Value::Number(f64::NAN)).unwrap();
        assert_eq!(stringify(&mut ctx, &[Value::Object(obj)]), Value::from(r#"{"n":null}"#));
        let arr = Value::Object(ctx.create_array(vec![Value::Undefined, f]));
        assert_eq!(stringify(&mut ctx, &[arr]), Value::from("[null,null]"));
        assert_eq!(stringify(&mut ctx, &[Value::Undefined]), Value::Undefined);
    }

    #[test]
    fn test_stringify_detects_cycles() {
        let mut ctx = context();
        let obj = ctx.create_object();
        ctx.put(obj, PropertyKey::from("self"), Value::Object(obj)).unwrap();
        let err = json_stringify(&mut ctx, Value::Undefined, &[Value::Object(obj)]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Converting circular structure to JSON");
    }

    #[test]
    fn test_stringify_with_indent() {
        let mut ctx = context();
        let value = json_parse(&mut ctx, Value::Undefined, &[Value::from(r#"{"a":[1]}"#)]).unwrap();
        let text = stringify(&mut ctx, &[value, Value::Undefined, Value::Number(2.0)]);
        assert_eq!(text, Value::from("{\n  \"a\": [\n    1\n  ]\n}"));
    }

    #[test]
    fn test_parse_error_is_syntax_error() {
        let mut ctx = context();
        let err = json_parse(&mut ctx, Value::Undefined, &[Value::from("{oops")]).unwrap_err();
        assert_eq!(err.error_name(), "SyntaxError");
    }
}
