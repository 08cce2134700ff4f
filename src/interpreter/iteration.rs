//! Iterator protocol helpers shared by the VM and the builtins

use super::Context;
use crate::error::JsError;
use crate::value::{ObjectKind, PropertyKey, Value};

impl Context {
    /// `iterable[Symbol.iterator]()`
    pub(crate) fn get_iterator(&mut self, iterable: &Value) -> Result<Value, JsError> {
        let symbol = self.intrinsics.iterator_symbol.clone();
        self.iterator_from(iterable, symbol)?
            .ok_or_else(|| JsError::type_error(format!("{} is not iterable", self.describe(iterable))))
    }

    /// `iterable[Symbol.asyncIterator]()`, or the sync iterator when there is none
    pub(crate) fn get_async_iterator(&mut self, iterable: &Value) -> Result<Value, JsError> {
        let symbol = self.intrinsics.async_iterator_symbol.clone();
        match self.iterator_from(iterable, symbol)? {
            Some(iterator) => Ok(iterator),
            None => self.get_iterator(iterable),
        }
    }

    fn iterator_from(&mut self, iterable: &Value, symbol: crate::value::JsSymbol) -> Result<Option<Value>, JsError> {
        if iterable.is_nullish() {
            return Ok(None);
        }
        let method = self.get_field(iterable, &PropertyKey::Symbol(symbol))?;
        if method.is_nullish() {
            return Ok(None);
        }
        if !self.is_callable(&method) {
            return Err(JsError::type_error(format!("{} is not iterable", self.describe(iterable))));
        }
        let iterator = self.call_function(method, iterable.clone(), &[])?;
        if !matches!(iterator, Value::Object(_)) {
            return Err(JsError::type_error("Result of the Symbol.iterator method is not an object"));
        }
        Ok(Some(iterator))
    }

    /// Call `iterator.next(arg)` and return the raw result
    pub(crate) fn iterator_next(&mut self, iterator: &Value, arg: Option<Value>) -> Result<Value, JsError> {
        let key = self.key("next");
        let next = self.get_field(iterator, &key)?;
        let args: Vec<Value> = arg.into_iter().collect();
        self.call_function(next, iterator.clone(), &args)
    }

    /// `Some(value)` for a `{ done: false }` result, `None` once done
    pub(crate) fn iterator_value(&mut self, result: &Value) -> Result<Option<Value>, JsError> {
        if !matches!(result, Value::Object(_)) {
            return Err(JsError::type_error(format!(
                "Iterator result {} is not an object",
                self.describe(result)
            )));
        }
        let done_key = self.key("done");
        if self.get_field(result, &done_key)?.to_boolean() {
            return Ok(None);
        }
        let value_key = self.key("value");
        Ok(Some(self.get_field(result, &value_key)?))
    }

    /// Drain an iterable. Arrays are read directly.
    pub(crate) fn iterate_to_vec(&mut self, iterable: &Value) -> Result<Vec<Value>, JsError> {
        if let Some(id) = iterable.as_object()
            && let ObjectKind::Array(elements) = &self.heap.object(id)?.kind
        {
            return Ok(elements.clone());
        }
        let iterator = self.get_iterator(iterable)?;
        let mut out = Vec::new();
        loop {
            let result = self.iterator_next(&iterator, None)?;
            match self.iterator_value(&result)? {
                Some(value) => out.push(value),
                None => return Ok(out),
            }
        }
    }

    /// `{ value, done }`
    pub(crate) fn create_iter_result(&mut self, value: Value, done: bool) -> Result<Value, JsError> {
        let obj = self.create_object();
        let value_key = self.key("value");
        let done_key = self.key("done");
        self.put(obj, value_key, value)?;
        self.put(obj, done_key, Value::Boolean(done))?;
        Ok(Value::Object(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[test]
    fn test_array_iterates_directly() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let arr = Value::Object(ctx.create_array(vec![Value::Number(1.0), Value::Number(2.0)]));
        assert_eq!(
            ctx.iterate_to_vec(&arr).unwrap(),
            vec![Value::Number(1.0), Value::Number(2.0)]
        );
    }

    #[test]
    fn test_array_iterator_protocol() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let arr = Value::Object(ctx.create_array(vec![Value::from("a")]));
        let iterator = ctx.get_iterator(&arr).unwrap();
        let first = ctx.iterator_next(&iterator, None).unwrap();
        assert_eq!(ctx.iterator_value(&first).unwrap(), Some(Value::from("a")));
        let second = ctx.iterator_next(&iterator, None).unwrap();
        assert_eq!(ctx.iterator_value(&second).unwrap(), None);
    }

    #[test]
    fn test_number_is_not_iterable() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let err = ctx.get_iterator(&Value::Number(5.0)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 5 is not iterable");
    }
}
