//! Per-kind operations on values
//!
//! Every operation matches on the value's kind and runs the entry for that
//! kind. Object-family kinds share the ordinary behaviour; arrays override
//! field access to keep `length` consistent, function kinds answer `name`
//! and `length`, and `Set`/`Map` answer `size`.

use super::Context;
use crate::compiler::{BinaryOp, UnaryOp};
use crate::error::JsError;
use crate::value::{
    CheapClone, JsString, Kind, ObjectKind, ObjectRef, PropertyKey, Value, number_to_string,
};

/// Largest gap an array write may open past its current length
const MAX_ARRAY_GAP: u32 = 1 << 20;

/// Prototype chains longer than this are treated as cyclic
const MAX_PROTOTYPE_DEPTH: usize = 10_000;

/// Preferred type for `to_primitive`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Default,
    Number,
    String,
}

impl Context {
    /// Kind of any value, objects included
    pub fn kind_of(&self, value: &Value) -> Kind {
        match value {
            Value::Object(id) => self.heap.kind_of(*id).unwrap_or(Kind::Object),
            other => other.primitive_kind().unwrap_or(Kind::Undefined),
        }
    }

    pub fn is_callable(&self, value: &Value) -> bool {
        self.kind_of(value).is_callable()
    }

    pub(crate) fn is_array(&self, value: &Value) -> bool {
        self.kind_of(value) == Kind::Array
    }

    pub fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Uninitialized | Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Object(_) if self.is_callable(value) => "function",
            Value::Object(_) => "object",
        }
    }

    /// Short description used in error messages
    pub(crate) fn describe(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{}\"", s),
            Value::Symbol(s) => PropertyKey::Symbol(s.clone()).to_string(),
            Value::Object(id) => match self.heap.object(*id).map(|o| &o.kind) {
                Ok(ObjectKind::Array(_)) => "#<Array>".to_string(),
                Ok(ObjectKind::Promise(_)) => "#<Promise>".to_string(),
                Ok(_) if self.is_callable(value) => {
                    format!("function {}", self.function_name(*id).unwrap_or_default())
                }
                _ => "#<Object>".to_string(),
            },
            Value::Number(n) => number_to_string(*n),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Undefined | Value::Uninitialized => "undefined".to_string(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Coercions
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn to_primitive(&mut self, value: &Value, hint: Hint) -> Result<Value, JsError> {
        if !matches!(value, Value::Object(_)) {
            return Ok(value.clone());
        }
        let order = match hint {
            Hint::String => ["toString", "valueOf"],
            Hint::Number | Hint::Default => ["valueOf", "toString"],
        };
        for name in order {
            let key = self.key(name);
            let method = self.get_field(value, &key)?;
            if self.is_callable(&method) {
                let result = self.call_function(method, value.clone(), &[])?;
                if !matches!(result, Value::Object(_)) {
                    return Ok(result);
                }
            }
        }
        Err(JsError::type_error("Cannot convert object to primitive value"))
    }

    pub fn to_string(&mut self, value: &Value) -> Result<JsString, JsError> {
        Ok(match value {
            Value::String(s) => s.cheap_clone(),
            Value::Number(n) => JsString::from(number_to_string(*n)),
            Value::Boolean(true) => self.intern("true"),
            Value::Boolean(false) => self.intern("false"),
            Value::Null => self.intern("null"),
            Value::Undefined | Value::Uninitialized => self.intern("undefined"),
            Value::Symbol(_) => {
                return Err(JsError::type_error("Cannot convert a Symbol value to a string"));
            }
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::String)?;
                return self.to_string(&primitive);
            }
        })
    }

    pub fn to_number(&mut self, value: &Value) -> Result<f64, JsError> {
        Ok(match value {
            Value::Number(n) => *n,
            Value::Undefined | Value::Uninitialized => f64::NAN,
            Value::Null | Value::Boolean(false) => 0.0,
            Value::Boolean(true) => 1.0,
            Value::String(s) => string_to_number(s.as_str()),
            Value::Symbol(_) => {
                return Err(JsError::type_error("Cannot convert a Symbol value to a number"));
            }
            Value::Object(_) => {
                let primitive = self.to_primitive(value, Hint::Number)?;
                return self.to_number(&primitive);
            }
        })
    }

    pub fn to_int32(&mut self, value: &Value) -> Result<i32, JsError> {
        Ok(f64_to_int32(self.to_number(value)?))
    }

    pub fn to_uint32(&mut self, value: &Value) -> Result<u32, JsError> {
        Ok(f64_to_int32(self.to_number(value)?) as u32)
    }

    /// Object for property access. Primitives get a fresh plain object.
    pub fn to_object(&mut self, value: &Value) -> Result<ObjectRef, JsError> {
        match value {
            Value::Object(id) => Ok(*id),
            Value::Null | Value::Undefined | Value::Uninitialized => {
                Err(JsError::type_error("Cannot convert undefined or null to object"))
            }
            _ => Ok(self.create_object()),
        }
    }

    pub fn to_property_key(&mut self, value: &Value) -> Result<PropertyKey, JsError> {
        Ok(match value {
            Value::String(s) => PropertyKey::from(s.cheap_clone()),
            Value::Number(n) => PropertyKey::from_number(*n),
            Value::Symbol(s) => PropertyKey::Symbol(s.clone()),
            other => {
                let s = self.to_string(other)?;
                PropertyKey::from(s)
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Field access
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn get_field(&mut self, target: &Value, key: &PropertyKey) -> Result<Value, JsError> {
        match target {
            Value::Object(id) => self.get_object_field(*id, key),
            Value::Undefined | Value::Uninitialized | Value::Null => Err(JsError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                if matches!(target, Value::Null) { "null" } else { "undefined" },
                key
            ))),
            Value::String(s) => match key {
                PropertyKey::String(name) if name.as_str() == "length" => {
                    Ok(Value::Number(s.as_str().chars().count() as f64))
                }
                PropertyKey::Index(i) => Ok(s
                    .as_str()
                    .chars()
                    .nth(*i as usize)
                    .map(|c| Value::String(JsString::from(c.to_string())))
                    .unwrap_or(Value::Undefined)),
                _ => self.get_object_field(self.intrinsics.object_prototype, key),
            },
            Value::Symbol(sym) => match key {
                PropertyKey::String(name) if name.as_str() == "description" => Ok(sym
                    .description
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Undefined)),
                _ => self.get_object_field(self.intrinsics.object_prototype, key),
            },
            Value::Number(_) | Value::Boolean(_) => self.get_object_field(self.intrinsics.object_prototype, key),
        }
    }

    /// Look `key` up on `id` and its prototype chain
    pub(crate) fn get_object_field(&mut self, id: ObjectRef, key: &PropertyKey) -> Result<Value, JsError> {
        let mut current = Some(id);
        let mut depth = 0;
        while let Some(c) = current {
            if let Some(value) = self.exotic_get(c, key)? {
                return Ok(value);
            }
            let obj = self.heap.object(c)?;
            if let Some(value) = obj.properties.get(key) {
                return Ok(value.clone());
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_DEPTH {
                return Err(JsError::range_error("Prototype chain too deep"));
            }
            current = obj.prototype;
        }
        Ok(Value::Undefined)
    }

    /// Kind-specific own properties that do not live in the property map
    fn exotic_get(&self, id: ObjectRef, key: &PropertyKey) -> Result<Option<Value>, JsError> {
        let obj = self.heap.object(id)?;
        let name = match key {
            PropertyKey::String(name) => Some(name.as_str()),
            _ => None,
        };
        Ok(match (&obj.kind, name, key) {
            (ObjectKind::Array(elements), Some("length"), _) => Some(Value::Number(elements.len() as f64)),
            (ObjectKind::Array(elements), _, PropertyKey::Index(i)) => elements.get(*i as usize).cloned(),
            (ObjectKind::Set(entries), Some("size"), _) => Some(Value::Number(entries.len() as f64)),
            (ObjectKind::Map(entries), Some("size"), _) => Some(Value::Number(entries.len() as f64)),
            (
                ObjectKind::Closure(_) | ObjectKind::Native(_) | ObjectKind::AsyncNative(_) | ObjectKind::Bound(_),
                Some(field @ ("name" | "length")),
                _,
            ) if !obj.properties.contains_key(key) => Some(if field == "name" {
                Value::String(JsString::from(self.function_name(id).unwrap_or_default()))
            } else {
                Value::Number(self.function_length(id) as f64)
            }),
            _ => None,
        })
    }

    /// Intrinsic name of a function object
    pub(crate) fn function_name(&self, id: ObjectRef) -> Option<String> {
        let mut current = id;
        let mut prefix = String::new();
        for _ in 0..MAX_PROTOTYPE_DEPTH {
            match &self.heap.object(current).ok()?.kind {
                ObjectKind::Closure(closure) => {
                    let name = closure.program.function(closure.function)?.name.as_str();
                    return Some(prefix + name);
                }
                ObjectKind::Native(native) => return Some(prefix + native.name.as_str()),
                ObjectKind::AsyncNative(native) => return Some(prefix + native.name.as_str()),
                ObjectKind::Bound(bound) => {
                    prefix.push_str("bound ");
                    current = bound.target;
                }
                _ => return None,
            }
        }
        None
    }

    fn function_length(&self, id: ObjectRef) -> u32 {
        match self.heap.object(id).map(|o| &o.kind) {
            Ok(ObjectKind::Closure(closure)) => closure
                .program
                .function(closure.function)
                .map(|t| t.length())
                .unwrap_or(0),
            Ok(ObjectKind::Native(native)) => native.length,
            Ok(ObjectKind::AsyncNative(native)) => native.length,
            Ok(ObjectKind::Bound(bound)) => {
                let target = self.function_length(bound.target);
                target.saturating_sub(bound.args.len() as u32)
            }
            _ => 0,
        }
    }

    pub fn set_field(&mut self, target: &Value, key: PropertyKey, value: Value) -> Result<(), JsError> {
        match target {
            Value::Object(id) => self.set_object_field(*id, key, value),
            Value::Undefined | Value::Uninitialized | Value::Null => Err(JsError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                if matches!(target, Value::Null) { "null" } else { "undefined" },
                key
            ))),
            // writes to primitives are dropped
            _ => Ok(()),
        }
    }

    pub(crate) fn set_object_field(&mut self, id: ObjectRef, key: PropertyKey, value: Value) -> Result<(), JsError> {
        if matches!(self.heap.object(id)?.kind, ObjectKind::Array(_)) {
            if let PropertyKey::String(name) = &key
                && name.as_str() == "length"
            {
                let n = self.to_number(&value)?;
                return self.set_array_length(id, n);
            }
            if let PropertyKey::Index(index) = key {
                return self.set_array_element(id, index, value);
            }
        }
        self.put(id, key, value)
    }

    /// Write `array[index]`, growing the array when needed
    pub(crate) fn set_array_element(&mut self, id: ObjectRef, index: u32, value: Value) -> Result<(), JsError> {
        let len = self.array_len(id)?;
        if index > len && index - len > MAX_ARRAY_GAP {
            return Err(JsError::range_error("Invalid array length"));
        }
        self.heap.link(id, &value);
        let old = match &mut self.heap.object_mut(id)?.kind {
            ObjectKind::Array(elements) => {
                let i = index as usize;
                if i >= elements.len() {
                    elements.resize(i + 1, Value::Undefined);
                }
                elements.get_mut(i).map(|slot| std::mem::replace(slot, value))
            }
            _ => return Err(JsError::internal_error("not an array")),
        };
        if let Some(old) = old {
            self.heap.unlink(id, &old);
        }
        Ok(())
    }

    /// Assign `length`: shrinking drops trailing elements, growing pads
    /// with `undefined`
    pub(crate) fn set_array_length(&mut self, id: ObjectRef, n: f64) -> Result<(), JsError> {
        if !(n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64) {
            return Err(JsError::range_error("Invalid array length"));
        }
        let new_len = n as u32;
        let len = self.array_len(id)?;
        if new_len > len && new_len - len > MAX_ARRAY_GAP {
            return Err(JsError::range_error("Invalid array length"));
        }
        let removed = match &mut self.heap.object_mut(id)?.kind {
            ObjectKind::Array(elements) => {
                let new_len = new_len as usize;
                if new_len < elements.len() {
                    elements.split_off(new_len)
                } else {
                    elements.resize(new_len, Value::Undefined);
                    Vec::new()
                }
            }
            _ => return Err(JsError::internal_error("not an array")),
        };
        for value in &removed {
            self.heap.unlink(id, value);
        }
        Ok(())
    }

    pub(crate) fn array_len(&self, id: ObjectRef) -> Result<u32, JsError> {
        match &self.heap.object(id)?.kind {
            ObjectKind::Array(elements) => Ok(elements.len() as u32),
            _ => Err(JsError::internal_error("not an array")),
        }
    }

    /// Snapshot of an array's elements
    pub(crate) fn array_elements(&self, id: ObjectRef) -> Result<Vec<Value>, JsError> {
        match &self.heap.object(id)?.kind {
            ObjectKind::Array(elements) => Ok(elements.clone()),
            _ => Err(JsError::type_error("not an array")),
        }
    }

    pub(crate) fn push_element(&mut self, id: ObjectRef, value: Value) -> Result<(), JsError> {
        self.heap.link(id, &value);
        match &mut self.heap.object_mut(id)?.kind {
            ObjectKind::Array(elements) => {
                elements.push(value);
                Ok(())
            }
            _ => Err(JsError::type_error("not an array")),
        }
    }

    /// `delete target[key]`
    pub fn del_field(&mut self, target: &Value, key: &PropertyKey) -> Result<bool, JsError> {
        let id = match target {
            Value::Object(id) => *id,
            Value::Undefined | Value::Uninitialized | Value::Null => {
                return Err(JsError::type_error("Cannot convert undefined or null to object"));
            }
            _ => return Ok(true),
        };
        if matches!(self.heap.object(id)?.kind, ObjectKind::Array(_)) {
            match key {
                PropertyKey::String(name) if name.as_str() == "length" => return Ok(false),
                PropertyKey::Index(i) => {
                    if *i < self.array_len(id)? {
                        self.set_array_element(id, *i, Value::Undefined)?;
                    }
                    return Ok(true);
                }
                _ => {}
            }
        }
        self.remove(id, key)?;
        Ok(true)
    }

    /// Own property keys in insertion order, array indices first
    pub fn own_keys(&self, id: ObjectRef) -> Result<Vec<PropertyKey>, JsError> {
        let obj = self.heap.object(id)?;
        let mut keys = Vec::new();
        if let ObjectKind::Array(elements) = &obj.kind {
            keys.extend((0..elements.len() as u32).map(PropertyKey::Index));
        }
        keys.extend(obj.properties.keys().cloned());
        Ok(keys)
    }

    /// Own string-keyed properties as `(key, value)` pairs
    pub(crate) fn own_entries(&mut self, id: ObjectRef) -> Result<Vec<(PropertyKey, Value)>, JsError> {
        let mut out = Vec::new();
        for key in self.own_keys(id)? {
            if key.is_symbol() {
                continue;
            }
            let value = self.get_object_field(id, &key)?;
            out.push((key, value));
        }
        Ok(out)
    }

    /// `key in target`
    pub fn has_property(&self, id: ObjectRef, key: &PropertyKey) -> Result<bool, JsError> {
        let mut current = Some(id);
        while let Some(c) = current {
            if self.exotic_get(c, key)?.is_some() {
                return Ok(true);
            }
            let obj = self.heap.object(c)?;
            if obj.properties.contains_key(key) {
                return Ok(true);
            }
            current = obj.prototype;
        }
        Ok(false)
    }

    pub fn instance_of(&mut self, value: &Value, constructor: &Value) -> Result<bool, JsError> {
        if !self.is_callable(constructor) {
            return Err(JsError::type_error("Right-hand side of 'instanceof' is not callable"));
        }
        let mut constructor = constructor.clone();
        while let Some(id) = constructor.as_object()
            && let ObjectKind::Bound(bound) = &self.heap.object(id)?.kind
        {
            constructor = Value::Object(bound.target);
        }
        let key = self.key("prototype");
        let Some(prototype) = self.get_field(&constructor, &key)?.as_object() else {
            return Err(JsError::type_error(
                "Function has non-object prototype in instanceof check",
            ));
        };
        let Some(id) = value.as_object() else {
            return Ok(false);
        };
        let mut current = self.heap.object(id)?.prototype;
        while let Some(c) = current {
            if c == prototype {
                return Ok(true);
            }
            current = self.heap.object(c)?.prototype;
        }
        Ok(false)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Equality
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn strict_equals(&self, a: &Value, b: &Value) -> bool {
        a.strict_equals(b)
    }

    /// `==`
    pub fn is_equal(&mut self, a: &Value, b: &Value) -> Result<bool, JsError> {
        let (mut a, mut b) = (a.clone(), b.clone());
        // each round removes one coercion step, so this terminates quickly
        for _ in 0..4 {
            match (&a, &b) {
                (Value::Object(_), Value::Object(_)) => return Ok(a.strict_equals(&b)),
                (x, y) if x.primitive_kind().is_some() && x.primitive_kind() == y.primitive_kind() => {
                    return Ok(a.strict_equals(&b));
                }
                (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => return Ok(true),
                (Value::Null | Value::Undefined, _) | (_, Value::Null | Value::Undefined) => return Ok(false),
                (Value::Number(x), Value::String(_)) => {
                    let y = self.to_number(&b)?;
                    return Ok(*x == y);
                }
                (Value::String(_), Value::Number(y)) => {
                    let x = self.to_number(&a)?;
                    return Ok(x == *y);
                }
                (Value::Boolean(_), _) => a = Value::Number(self.to_number(&a)?),
                (_, Value::Boolean(_)) => b = Value::Number(self.to_number(&b)?),
                (Value::Object(_), _) => a = self.to_primitive(&a, Hint::Default)?,
                (_, Value::Object(_)) => b = self.to_primitive(&b, Hint::Default)?,
                _ => return Ok(false),
            }
        }
        Ok(false)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Operators
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn binary(&mut self, op: BinaryOp, a: &Value, b: &Value) -> Result<Value, JsError> {
        Ok(match op {
            BinaryOp::Add => {
                let pa = self.to_primitive(a, Hint::Default)?;
                let pb = self.to_primitive(b, Hint::Default)?;
                if matches!(pa, Value::String(_)) || matches!(pb, Value::String(_)) {
                    let sa = self.to_string(&pa)?;
                    let sb = self.to_string(&pb)?;
                    Value::String(sa + sb.as_str())
                } else {
                    Value::Number(self.to_number(&pa)? + self.to_number(&pb)?)
                }
            }
            BinaryOp::Sub => Value::Number(self.to_number(a)? - self.to_number(b)?),
            BinaryOp::Mul => Value::Number(self.to_number(a)? * self.to_number(b)?),
            BinaryOp::Div => Value::Number(self.to_number(a)? / self.to_number(b)?),
            BinaryOp::Mod => Value::Number(self.to_number(a)? % self.to_number(b)?),
            BinaryOp::Pow => {
                let base = self.to_number(a)?;
                let exponent = self.to_number(b)?;
                Value::Number(js_pow(base, exponent))
            }
            BinaryOp::Eq => Value::Boolean(self.is_equal(a, b)?),
            BinaryOp::Ne => Value::Boolean(!self.is_equal(a, b)?),
            BinaryOp::StrictEq => Value::Boolean(a.strict_equals(b)),
            BinaryOp::StrictNe => Value::Boolean(!a.strict_equals(b)),
            BinaryOp::Lt => Value::Boolean(self.less_than(a, b)? == Some(true)),
            BinaryOp::Gt => Value::Boolean(self.less_than(b, a)? == Some(true)),
            BinaryOp::Le => Value::Boolean(self.less_than(b, a)? == Some(false)),
            BinaryOp::Ge => Value::Boolean(self.less_than(a, b)? == Some(false)),
            BinaryOp::BitAnd => Value::Number((self.to_int32(a)? & self.to_int32(b)?) as f64),
            BinaryOp::BitOr => Value::Number((self.to_int32(a)? | self.to_int32(b)?) as f64),
            BinaryOp::BitXor => Value::Number((self.to_int32(a)? ^ self.to_int32(b)?) as f64),
            BinaryOp::Shl => {
                let shift = self.to_uint32(b)? & 31;
                Value::Number(self.to_int32(a)?.wrapping_shl(shift) as f64)
            }
            BinaryOp::Shr => {
                let shift = self.to_uint32(b)? & 31;
                Value::Number(self.to_int32(a)?.wrapping_shr(shift) as f64)
            }
            BinaryOp::UShr => {
                let shift = self.to_uint32(b)? & 31;
                Value::Number(self.to_uint32(a)?.wrapping_shr(shift) as f64)
            }
            BinaryOp::In => {
                let Some(id) = b.as_object() else {
                    let key = self.to_property_key(a)?;
                    return Err(JsError::type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        self.describe(b)
                    )));
                };
                let key = self.to_property_key(a)?;
                Value::Boolean(self.has_property(id, &key)?)
            }
            BinaryOp::InstanceOf => Value::Boolean(self.instance_of(a, b)?),
        })
    }

    /// Abstract relational comparison; `None` when either side is NaN
    fn less_than(&mut self, a: &Value, b: &Value) -> Result<Option<bool>, JsError> {
        let pa = self.to_primitive(a, Hint::Number)?;
        let pb = self.to_primitive(b, Hint::Number)?;
        if let (Value::String(x), Value::String(y)) = (&pa, &pb) {
            return Ok(Some(x.as_str() < y.as_str()));
        }
        let x = self.to_number(&pa)?;
        let y = self.to_number(&pb)?;
        if x.is_nan() || y.is_nan() {
            return Ok(None);
        }
        Ok(Some(x < y))
    }

    pub fn unary(&mut self, op: UnaryOp, value: &Value) -> Result<Value, JsError> {
        Ok(match op {
            UnaryOp::Neg => Value::Number(-self.to_number(value)?),
            UnaryOp::Plus => Value::Number(self.to_number(value)?),
            UnaryOp::Not => Value::Boolean(!value.to_boolean()),
            UnaryOp::BitNot => Value::Number(!self.to_int32(value)? as f64),
            UnaryOp::TypeOf => {
                let name = self.type_of(value);
                Value::String(self.intern(name))
            }
            UnaryOp::Void => Value::Undefined,
        })
    }
}

/// StringToNumber: trimmed decimal, hex/octal/binary literals, `Infinity`
pub(crate) fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    let radix = |prefix: [&str; 2], radix: u32| {
        prefix
            .iter()
            .find_map(|p| t.strip_prefix(p))
            .map(|digits| u64::from_str_radix(digits, radix).map(|n| n as f64).unwrap_or(f64::NAN))
    };
    if let Some(n) = radix(["0x", "0X"], 16)
        .or_else(|| radix(["0o", "0O"], 8))
        .or_else(|| radix(["0b", "0B"], 2))
    {
        return n;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let valid = t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !valid {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// ToInt32 on an already-converted number
pub(crate) fn f64_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4_294_967_296.0);
    (m as u64 as u32) as i32
}

/// `**` with the cases where it differs from `powf`
fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() {
        return f64::NAN;
    }
    if base.abs() == 1.0 && exponent.is_infinite() {
        return f64::NAN;
    }
    base.powf(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use proptest::prelude::*;

    fn context() -> Context {
        Context::new(Runtime::default()).unwrap()
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
    }

    #[test]
    fn test_int32_wraps() {
        assert_eq!(f64_to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(f64_to_int32(-1.0), -1);
        assert_eq!(f64_to_int32(f64::NAN), 0);
        assert_eq!(f64_to_int32(2_147_483_648.0), i32::MIN);
    }

    #[test]
    fn test_typeof_table() {
        let mut ctx = context();
        let obj = Value::Object(ctx.create_object());
        let f = ctx.create_native_function("f", |_, _, _| Ok(Value::Undefined), 0);
        assert_eq!(ctx.type_of(&Value::Null), "object");
        assert_eq!(ctx.type_of(&obj), "object");
        assert_eq!(ctx.type_of(&f), "function");
        assert_eq!(ctx.type_of(&Value::from("s")), "string");
        assert_eq!(ctx.type_of(&Value::Undefined), "undefined");
    }

    #[test]
    fn test_to_string_of_objects() {
        let mut ctx = context();
        let arr = Value::Object(ctx.create_array(vec![
            Value::Number(1.0),
            Value::Null,
            Value::from("x"),
        ]));
        assert_eq!(ctx.to_string(&arr).unwrap().as_str(), "1,,x");
        let obj = Value::Object(ctx.create_object());
        assert_eq!(ctx.to_string(&obj).unwrap().as_str(), "[object Object]");
    }

    #[test]
    fn test_loose_equality() {
        let mut ctx = context();
        assert!(ctx.is_equal(&Value::Null, &Value::Undefined).unwrap());
        assert!(ctx.is_equal(&Value::from("1"), &Value::Number(1.0)).unwrap());
        assert!(ctx.is_equal(&Value::Boolean(true), &Value::Number(1.0)).unwrap());
        assert!(!ctx.is_equal(&Value::Null, &Value::Number(0.0)).unwrap());
        let nan = Value::Number(f64::NAN);
        assert!(!ctx.is_equal(&nan, &nan).unwrap());
    }

    #[test]
    fn test_read_from_undefined_fails() {
        let mut ctx = context();
        let err = ctx.get_field(&Value::Undefined, &PropertyKey::from("x")).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Cannot read properties of undefined (reading 'x')");
        let err = ctx
            .set_field(&Value::Null, PropertyKey::from("y"), Value::Null)
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Cannot set properties of null (setting 'y')");
    }

    #[test]
    fn test_array_length_semantics() {
        let mut ctx = context();
        let arr = ctx.create_array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        let target = Value::Object(arr);
        ctx.set_field(&target, PropertyKey::Index(5), Value::Number(6.0)).unwrap();
        assert_eq!(ctx.array_len(arr).unwrap(), 6);

        ctx.set_field(&target, PropertyKey::from("length"), Value::Number(2.0)).unwrap();
        assert_eq!(ctx.array_elements(arr).unwrap(), vec![Value::Number(1.0), Value::Number(2.0)]);

        let err = ctx
            .set_field(&target, PropertyKey::from("length"), Value::Number(-1.0))
            .unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid array length");
    }

    #[test]
    fn test_primitive_without_conversion_fails() {
        let mut ctx = context();
        let proto_less = ctx.alloc(crate::value::JsObject::ordinary(None));
        let err = ctx.to_primitive(&Value::Object(proto_less), Hint::Default).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Cannot convert object to primitive value");
    }

    proptest! {
        #[test]
        fn prop_array_length_tracks_highest_write(writes in proptest::collection::vec(0u32..64, 0..16)) {
            let mut ctx = context();
            let arr = ctx.create_array(Vec::new());
            let mut expected = 0;
            for index in writes {
                ctx.set_array_element(arr, index, Value::Number(index as f64)).unwrap();
                expected = expected.max(index + 1);
                prop_assert_eq!(ctx.array_len(arr).unwrap(), expected);
            }
        }

        #[test]
        fn prop_shrinking_length_drops_tail(len in 0u32..32, cut in 0u32..32) {
            let mut ctx = context();
            let arr = ctx.create_array((0..len).map(|i| Value::Number(i as f64)).collect());
            ctx.set_array_length(arr, cut as f64).unwrap();
            prop_assert_eq!(ctx.array_len(arr).unwrap(), cut);
            let elements = ctx.array_elements(arr).unwrap();
            for (i, v) in elements.iter().enumerate() {
                if (i as u32) < len {
                    prop_assert_eq!(v, &Value::Number(i as f64));
                } else {
                    prop_assert_eq!(v, &Value::Undefined);
                }
            }
        }
    }
}
