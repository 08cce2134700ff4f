//! Global values and functions (undefined, NaN, Infinity, parseInt, parseFloat, isNaN, isFinite)

use crate::error::JsError;
use crate::interpreter::Context;
use crate::value::{NativeFn, Value};

use super::arg;

/// Register the global value bindings and number helpers
pub fn register_global_values(ctx: &mut Context) -> Result<(), JsError> {
    ctx.define_global("undefined", Value::Undefined)?;
    ctx.define_global("NaN", Value::Number(f64::NAN))?;
    ctx.define_global("Infinity", Value::Number(f64::INFINITY))?;

    let functions: [(&str, NativeFn, u32); 4] = [
        ("parseInt", global_parse_int, 2),
        ("parseFloat", global_parse_float, 1),
        ("isNaN", global_is_nan, 1),
        ("isFinite", global_is_finite, 1),
    ];
    for (name, func, length) in functions {
        let f = ctx.create_native_function(name, func, length);
        ctx.define_global(name, f)?;
    }
    Ok(())
}

/// parseInt(string, radix)
pub fn global_parse_int(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let string = ctx.to_string(&arg(args, 0))?;
    let radix = match arg(args, 1) {
        Value::Undefined => 0,
        other => ctx.to_int32(&other)?,
    };
    let s = string.as_str().trim();

    let (negative, s) = if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    };

    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"));
    let (radix, s) = match (radix, hex) {
        (0 | 16, Some(rest)) => (16, rest),
        (0, None) => (10, s),
        (r, _) => (r, s),
    };
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }

    // Parse digits until invalid character
    let mut result = 0.0f64;
    let mut found_digit = false;
    for c in s.chars() {
        let Some(digit) = c.to_digit(radix as u32) else {
            break;
        };
        found_digit = true;
        result = result * radix as f64 + digit as f64;
    }
    if !found_digit {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(if negative { -result } else { result }))
}

/// parseFloat(string): the longest numeric prefix
pub fn global_parse_float(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    let string = ctx.to_string(&arg(args, 0))?;
    let s = string.as_str().trim_start();

    let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
    if unsigned.starts_with("Infinity") {
        let sign = if s.starts_with('-') { -1.0 } else { 1.0 };
        return Ok(Value::Number(sign * f64::INFINITY));
    }

    let mut candidate = String::new();
    let mut has_dot = false;
    let mut has_exp = false;
    let mut chars = s.chars().peekable();
    if let Some(&c @ ('-' | '+')) = chars.peek() {
        candidate.push(c);
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        match c {
            '0'..='9' => candidate.push(c),
            '.' if !has_dot && !has_exp => {
                has_dot = true;
                candidate.push(c);
            }
            'e' | 'E' if !has_exp => {
                has_exp = true;
                candidate.push(c);
                chars.next();
                if let Some(&sign @ ('-' | '+')) = chars.peek() {
                    candidate.push(sign);
                } else {
                    continue;
                }
            }
            _ => break,
        }
        chars.next();
    }

    // "1e" and "1e+" are valid prefixes of nothing longer than "1"
    while !candidate.is_empty() {
        if let Ok(n) = candidate.parse::<f64>() {
            return Ok(Value::Number(n));
        }
        candidate.pop();
    }
    Ok(Value::Number(f64::NAN))
}

pub fn global_is_nan(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Boolean(ctx.to_number(&arg(args, 0))?.is_nan()))
}

pub fn global_is_finite(ctx: &mut Context, _this: Value, args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Boolean(ctx.to_number(&arg(args, 0))?.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    fn parse_int(ctx: &mut Context, args: &[Value]) -> f64 {
        global_parse_int(ctx, Value::Undefined, args).unwrap().as_number().unwrap()
    }

    fn parse_float(ctx: &mut Context, s: &str) -> f64 {
        global_parse_float(ctx, Value::Undefined, &[Value::from(s)])
            .unwrap()
            .as_number()
            .unwrap()
    }

    #[test]
    fn test_parse_int() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        assert_eq!(parse_int(&mut ctx, &[Value::from("  42px")]), 42.0);
        assert_eq!(parse_int(&mut ctx, &[Value::from("-0x1F")]), -31.0);
        assert_eq!(parse_int(&mut ctx, &[Value::from("101"), Value::Number(2.0)]), 5.0);
        assert!(parse_int(&mut ctx, &[Value::from("z"), Value::Number(10.0)]).is_nan());
        assert!(parse_int(&mut ctx, &[Value::from("1"), Value::Number(1.0)]).is_nan());
    }

    #[test]
    fn test_parse_float_prefixes() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        assert_eq!(parse_float(&mut ctx, "3.5kg"), 3.5);
        assert_eq!(parse_float(&mut ctx, "1e"), 1.0);
        assert_eq!(parse_float(&mut ctx, "-2.5e+1x"), -25.0);
        assert_eq!(parse_float(&mut ctx, "-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float(&mut ctx, ".").is_nan());
    }

    #[test]
    fn test_global_values() {
        let mut ctx = Context::new(Runtime::default()).unwrap();
        assert!(ctx.get_global("NaN").unwrap().as_number().unwrap().is_nan());
        assert_eq!(ctx.get_global("Infinity").unwrap(), Value::Number(f64::INFINITY));
    }
}
