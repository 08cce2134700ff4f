//! Console built-in methods and the host-side value formatter

use crate::error::JsError;
use crate::interpreter::Context;
use crate::platform::ConsoleLevel;
use crate::value::{JsObject, NativeFn, ObjectKind, ObjectRef, PromiseStatus, PropertyKey, Value, number_to_string};

const MAX_DEPTH: usize = 4;
const MAX_ITEMS: usize = 100;

/// Create console object with log, error, warn, info, debug methods
pub fn create_console_object(ctx: &mut Context) -> Result<ObjectRef, JsError> {
    let console = ctx.create_object();
    let methods: [(&str, NativeFn); 5] = [
        ("log", console_log),
        ("info", console_info),
        ("debug", console_debug),
        ("warn", console_warn),
        ("error", console_error),
    ];
    for (name, func) in methods {
        ctx.register_method(console, name, func, 0)?;
    }
    Ok(console)
}

fn write(ctx: &mut Context, level: ConsoleLevel, args: &[Value]) -> Result<Value, JsError> {
    let output: Vec<String> = args.iter().map(|v| display(ctx, v)).collect();
    let console = ctx.runtime.console.clone();
    console.write(level, &output.join(" "));
    Ok(Value::Undefined)
}

pub fn console_log(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    write(ctx, ConsoleLevel::Log, args)
}

pub fn console_info(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    write(ctx, ConsoleLevel::Info, args)
}

pub fn console_debug(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    write(ctx, ConsoleLevel::Debug, args)
}

pub fn console_warn(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    write(ctx, ConsoleLevel::Warn, args)
}

pub fn console_error(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    write(ctx, ConsoleLevel::Error, args)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Formatting
// ═══════════════════════════════════════════════════════════════════════════════

/// Format a value for display. Reads the heap only and never runs
/// JavaScript, so it is safe inside error reporting. Top-level strings are
/// printed raw.
pub fn display(ctx: &Context, value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        other => format_value(ctx, other, 0, &mut Vec::new()),
    }
}

/// Format with depth tracking; `seen` holds the objects on the current path
fn format_value(ctx: &Context, value: &Value, depth: usize, seen: &mut Vec<ObjectRef>) -> String {
    match value {
        Value::Undefined | Value::Uninitialized => String::from("undefined"),
        Value::Null => String::from("null"),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::String(s) => format!("\"{}\"", s),
        Value::Symbol(sym) => match &sym.description {
            Some(desc) => format!("Symbol({})", desc),
            None => String::from("Symbol()"),
        },
        Value::Object(id) => {
            if seen.contains(id) {
                return String::from("[Circular]");
            }
            let Ok(obj) = ctx.heap.object(*id) else {
                return String::from("[freed]");
            };
            if depth >= MAX_DEPTH {
                return match &obj.kind {
                    ObjectKind::Array(elements) => format!("[Array({})]", elements.len()),
                    _ if ctx.is_callable(value) => String::from("[Function]"),
                    _ => String::from("{...}"),
                };
            }
            seen.push(*id);
            let result = format_object(ctx, *id, obj, depth, seen);
            seen.pop();
            result
        }
    }
}

fn format_list(items: Vec<String>, total: usize, open: &str, close: &str) -> String {
    let mut items = items;
    if total > MAX_ITEMS {
        items.push(format!("... {} more items", total - MAX_ITEMS));
    }
    if items.is_empty() {
        format!("{}{}", open, close)
    } else {
        format!("{} {} {}", open, items.join(", "), close)
    }
}

fn format_object(ctx: &Context, id: ObjectRef, obj: &JsObject, depth: usize, seen: &mut Vec<ObjectRef>) -> String {
    let mut fields: Vec<String> = obj
        .properties
        .iter()
        .take(MAX_ITEMS)
        .filter(|(key, _)| !(key.is_symbol() && matches!(obj.kind, ObjectKind::Namespace)))
        .map(|(key, value)| {
            let value = format_value(ctx, value, depth + 1, seen);
            if key.is_symbol() {
                format!("[{}]: {}", key, value)
            } else {
                format!("{}: {}", key, value)
            }
        })
        .collect();

    match &obj.kind {
        ObjectKind::Array(elements) => {
            let mut items: Vec<String> = elements
                .iter()
                .take(MAX_ITEMS)
                .map(|e| format_value(ctx, e, depth + 1, seen))
                .collect();
            items.append(&mut fields);
            format_list(items, elements.len(), "[", "]")
        }
        ObjectKind::Closure(_) | ObjectKind::Native(_) | ObjectKind::AsyncNative(_) | ObjectKind::Bound(_) => {
            match ctx.function_name(id) {
                Some(name) if !name.is_empty() => format!("[Function: {}]", name),
                _ => String::from("[Function (anonymous)]"),
            }
        }
        ObjectKind::Error => {
            match obj.properties.get(&PropertyKey::from("stack")).and_then(Value::as_str) {
                Some(stack) => stack.to_string(),
                None => ctx.value_text(&Value::Object(id)),
            }
        }
        ObjectKind::Promise(state) => {
            let inner = match state.status {
                PromiseStatus::Pending => String::from("<pending>"),
                PromiseStatus::Fulfilled => format_value(ctx, &state.result, depth + 1, seen),
                PromiseStatus::Rejected => {
                    format!("<rejected> {}", format_value(ctx, &state.result, depth + 1, seen))
                }
            };
            format!("Promise {{ {} }}", inner)
        }
        ObjectKind::Set(entries) => {
            let items = entries
                .values()
                .take(MAX_ITEMS)
                .map(|v| format_value(ctx, v, depth + 1, seen))
                .collect();
            format_list(items, entries.len(), &format!("Set({}) {{", entries.len()), "}")
        }
        ObjectKind::Map(entries) => {
            let items = entries
                .values()
                .take(MAX_ITEMS)
                .map(|(k, v)| {
                    format!(
                        "{} => {}",
                        format_value(ctx, k, depth + 1, seen),
                        format_value(ctx, v, depth + 1, seen)
                    )
                })
                .collect();
            format_list(items, entries.len(), &format!("Map({}) {{", entries.len()), "}")
        }
        ObjectKind::Generator(_) => String::from("Object [Generator] {}"),
        ObjectKind::AsyncGenerator(_) => String::from("Object [AsyncGenerator] {}"),
        ObjectKind::Namespace => format_list(fields, obj.properties.len(), "[Module] {", "}"),
        ObjectKind::Coroutine(_) | ObjectKind::ArrayIterator(_) | ObjectKind::ListIterator(_) => {
            String::from("[object Iterator]")
        }
        ObjectKind::Ordinary => format_list(fields, obj.properties.len(), "{", "}"),
    }
}
