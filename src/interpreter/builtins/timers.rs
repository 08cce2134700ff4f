//! Timer globals backed by the context's task queues

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{NativeFn, Value};

use super::arg;

/// Register setTimeout, setInterval, clearTimeout, clearInterval and
/// queueMicrotask as globals
pub fn register_timer_functions(ctx: &mut Context) -> Result<(), JsError> {
    let functions: [(&str, NativeFn, u32); 5] = [
        ("setTimeout", set_timeout, 2),
        ("setInterval", set_interval, 2),
        ("clearTimeout", clear_timer, 1),
        ("clearInterval", clear_timer, 1),
        ("queueMicrotask", queue_microtask, 1),
    ];
    for (name, func, length) in functions {
        let f = ctx.create_native_function(name, func, length);
        ctx.define_global(name, f)?;
    }
    Ok(())
}

fn callback_arg(ctx: &Context, args: &[Value]) -> Result<Value, JsError> {
    let callback = arg(args, 0);
    if ctx.is_callable(&callback) {
        return Ok(callback);
    }
    Err(JsError::type_error(format!(
        "The \"callback\" argument must be of type function. Received {}",
        ctx.describe(&callback)
    )))
}

/// Delay in whole milliseconds; NaN and negatives become 0
fn delay_arg(ctx: &mut Context, args: &[Value]) -> Result<u64, JsError> {
    let delay = ctx.to_number(&arg(args, 1))?;
    if delay.is_nan() || delay <= 0.0 {
        return Ok(0);
    }
    Ok(delay.min(i32::MAX as f64) as u64)
}

fn schedule(ctx: &mut Context, args: &[Value], repeat: bool) -> Result<Value, JsError> {
    let callback = callback_arg(ctx, args)?;
    let delay = delay_arg(ctx, args)?;
    let extra = args.get(2..).unwrap_or_default().to_vec();
    let id = ctx.create_macrotask(callback, Value::Undefined, extra, delay, repeat);
    Ok(Value::Number(id as f64))
}

/// setTimeout(callback, delay, ...args)
pub fn set_timeout(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    schedule(ctx, args, false)
}

/// setInterval(callback, delay, ...args)
pub fn set_interval(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    schedule(ctx, args, true)
}

/// clearTimeout(id) / clearInterval(id); unknown ids are ignored
pub fn clear_timer(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let id = ctx.to_number(&arg(args, 0))?;
    if id.is_finite() && id >= 0.0 {
        ctx.clear_macrotask(id as u64);
    }
    Ok(Value::Undefined)
}

pub fn queue_microtask(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let callback = callback_arg(ctx, args)?;
    ctx.create_microtask(callback, Value::Undefined, Vec::new());
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use crate::platform::ManualTimeProvider;
    use std::rc::Rc;

    fn noop(_ctx: &mut Context, _this: Value, _args: &[Value]) -> Result<Value, JsError> {
        Ok(Value::Undefined)
    }

    #[test]
    fn test_set_timeout_rejects_non_function() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        let err = set_timeout(&mut ctx, Value::Undefined, &[Value::Number(1.0)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: The \"callback\" argument must be of type function. Received 1"
        );
    }

    #[test]
    fn test_clear_timeout_cancels() {
        let clock = Rc::new(ManualTimeProvider::new());
        let mut ctx = Context::new(Runtime::new().with_time_provider(clock.clone())).unwrap();
        let f = ctx.create_native_function("noop", noop, 0);
        let id = set_timeout(&mut ctx, Value::Undefined, &[f, Value::Number(50.0)]).unwrap();
        assert!(ctx.has_task());
        clear_timer(&mut ctx, Value::Undefined, &[id]).unwrap();
        assert!(!ctx.has_task());
    }

    #[test]
    fn test_negative_delay_is_immediate() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        assert_eq!(delay_arg(&mut ctx, &[Value::Undefined, Value::Number(-5.0)]).unwrap(), 0);
        assert_eq!(delay_arg(&mut ctx, &[Value::Undefined, Value::Number(f64::NAN)]).unwrap(), 0);
        assert_eq!(delay_arg(&mut ctx, &[Value::Undefined, Value::Number(7.9)]).unwrap(), 7);
    }
}
