//! Error constructor built-in methods

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{JsObject, NativeFn, ObjectKind, ObjectRef, Value};

use super::create_constructor;

/// Constructor name, native, and the prototype it installs
const ERROR_CONSTRUCTORS: [(&str, NativeFn); 5] = [
    ("Error", error_constructor),
    ("TypeError", type_error_constructor),
    ("RangeError", range_error_constructor),
    ("ReferenceError", reference_error_constructor),
    ("SyntaxError", syntax_error_constructor),
];

/// Initialize Error and all derived error constructors and add them to globals
pub fn init_error(ctx: &mut Context) -> Result<(), JsError> {
    let error_proto = ctx.intrinsics.error_prototype;
    ctx.register_method(error_proto, "toString", error_to_string, 0)?;

    for (name, func) in ERROR_CONSTRUCTORS {
        let proto = ctx.intrinsics.error_prototype_for(name);
        set_name_and_message(ctx, proto, name)?;
        let ctor = create_constructor(ctx, name, func, 1, proto)?;
        ctx.define_global(name, Value::Object(ctor))?;
    }

    let suppressed_proto = ctx.intrinsics.suppressed_error_prototype;
    set_name_and_message(ctx, suppressed_proto, "SuppressedError")?;
    let ctor = create_constructor(ctx, "SuppressedError", suppressed_error_constructor, 3, suppressed_proto)?;
    ctx.define_global("SuppressedError", Value::Object(ctor))
}

fn set_name_and_message(ctx: &mut Context, proto: ObjectRef, name: &str) -> Result<(), JsError> {
    let name_key = ctx.key("name");
    let message_key = ctx.key("message");
    let name = ctx.intern(name);
    ctx.put(proto, name_key, Value::String(name))?;
    ctx.put(proto, message_key, Value::from(""))
}

impl Context {
    /// Allocate an error object of constructor `name` with a stack snapshot
    pub fn create_error(&mut self, name: &str, message: &str) -> Result<ObjectRef, JsError> {
        let proto = self.intrinsics.error_prototype_for(name);
        let obj = self.alloc(JsObject::new(Some(proto), ObjectKind::Error));
        self.init_error_fields(obj, name, Some(message))?;
        Ok(obj)
    }

    fn init_error_fields(&mut self, obj: ObjectRef, name: &str, message: Option<&str>) -> Result<(), JsError> {
        if let Some(message) = message {
            let key = self.key("message");
            let message = self.intern(message);
            self.put(obj, key, Value::String(message))?;
        }
        let stack = self.format_stack(name, message.unwrap_or(""));
        let key = self.key("stack");
        self.put(obj, key, Value::from(stack))
    }

    /// The JavaScript value an error is caught as. Thrown values pass
    /// through, native errors become error objects, internal errors stay
    /// uncatchable.
    pub fn error_to_value(&mut self, error: JsError) -> Result<Value, JsError> {
        match error {
            JsError::Thrown { value } => Ok(value),
            JsError::Internal(_) => Err(error),
            other => {
                let obj = self.create_error(other.error_name(), &other.message())?;
                Ok(Value::Object(obj))
            }
        }
    }

    /// `SuppressedError { error, suppressed }` built when a disposal fails
    /// while another error is already propagating
    pub(crate) fn create_suppressed_error(&mut self, error: Value, suppressed: Value) -> Result<ObjectRef, JsError> {
        let obj = self.create_error("SuppressedError", "An error was suppressed during disposal")?;
        let error_key = self.key("error");
        let suppressed_key = self.key("suppressed");
        self.put(obj, error_key, error)?;
        self.put(obj, suppressed_key, suppressed)?;
        Ok(obj)
    }

    /// `this` if it is a fresh object constructed from `proto`, otherwise a
    /// new object with that prototype (constructors called without `new`)
    fn error_receiver(&mut self, this: &Value, proto: ObjectRef) -> Result<ObjectRef, JsError> {
        if let Some(id) = this.as_object() {
            let mut current = self.heap.object(id)?.prototype;
            let mut depth = 0;
            while let Some(p) = current {
                if p == proto {
                    self.replace_kind(id, ObjectKind::Error)?;
                    return Ok(id);
                }
                depth += 1;
                if depth > 64 {
                    break;
                }
                current = self.heap.object(p)?.prototype;
            }
        }
        Ok(self.alloc(JsObject::new(Some(proto), ObjectKind::Error)))
    }
}

fn construct_error(ctx: &mut Context, this: Value, args: &[Value], name: &str) -> Result<Value, JsError> {
    let proto = ctx.intrinsics.error_prototype_for(name);
    let obj = ctx.error_receiver(&this, proto)?;
    let message = match args.first() {
        Some(Value::Undefined) | None => None,
        Some(value) => Some(ctx.to_string(value)?),
    };
    ctx.init_error_fields(obj, name, message.as_ref().map(|m| m.as_str()))?;
    Ok(Value::Object(obj))
}

pub fn error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    construct_error(ctx, this, args, "Error")
}

pub fn type_error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    construct_error(ctx, this, args, "TypeError")
}

pub fn range_error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    construct_error(ctx, this, args, "RangeError")
}

pub fn reference_error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    construct_error(ctx, this, args, "ReferenceError")
}

pub fn syntax_error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    construct_error(ctx, this, args, "SyntaxError")
}

/// new SuppressedError(error, suppressed, message)
pub fn suppressed_error_constructor(ctx: &mut Context, this: Value, args: &[Value]) -> Result<Value, JsError> {
    let message: Vec<Value> = args.get(2).cloned().into_iter().collect();
    let result = construct_error(ctx, this, &message, "SuppressedError")?;
    let Some(obj) = result.as_object() else {
        return Err(JsError::internal_error("error constructor returned a primitive"));
    };
    let error_key = ctx.key("error");
    let suppressed_key = ctx.key("suppressed");
    ctx.put(obj, error_key, args.first().cloned().unwrap_or(Value::Undefined))?;
    ctx.put(obj, suppressed_key, args.get(1).cloned().unwrap_or(Value::Undefined))?;
    Ok(result)
}

/// Error.prototype.toString()
pub fn error_to_string(ctx: &mut Context, this: Value, _args: &[Value]) -> Result<Value, JsError> {
    if !matches!(this, Value::Object(_)) {
        return Err(JsError::type_error(format!(
            "Method Error.prototype.toString called on incompatible receiver {}",
            ctx.describe(&this)
        )));
    }
    let name_key = ctx.key("name");
    let message_key = ctx.key("message");
    let name = match ctx.get_field(&this, &name_key)? {
        Value::Undefined => "Error".to_string(),
        other => ctx.to_string(&other)?.to_string(),
    };
    let message = match ctx.get_field(&this, &message_key)? {
        Value::Undefined => String::new(),
        other => ctx.to_string(&other)?.to_string(),
    };
    let text = match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{}: {}", name, message),
    };
    Ok(Value::from(text))
}
