//! Plain script evaluation: arrays, closures, control flow and builtins

use jsrt::Value;
use jsrt::compiler::{BinaryOp, BindingKind, FunctionKind, Op, ScopeKind};

use super::{array_values, emit_log, eval, get, log_entries};

#[test]
fn test_array_map_doubles() {
    // [1, 2, 3].map(x => x * 2)
    let (mut ctx, result) = eval(|b| {
        let double = b.begin_function("", FunctionKind::Arrow, &["x"]);
        b.load("x").push_number(2.0).binary(BinaryOp::Mul).ret().end_function();
        b.push_number(1.0)
            .push_number(2.0)
            .push_number(3.0)
            .push_array(3)
            .method("map")
            .push_function(double)
            .call_method(1)
            .halt();
    });
    let array = result.get();
    assert_eq!(get(&mut ctx, &array, "length"), Value::Number(3.0));
    assert_eq!(
        array_values(&mut ctx, &array),
        vec![Value::Number(2.0), Value::Number(4.0), Value::Number(6.0)]
    );
}

#[test]
fn test_closure_keeps_its_binding() {
    // function counter() { let n = 0; return () => { n = n + 1; return n; }; }
    // const c = counter(); c(); c()
    let (_ctx, result) = eval(|b| {
        let counter = b.begin_function("counter", FunctionKind::Normal, &[]);
        b.push_number(0.0).define("n", BindingKind::Let);
        let tick = b.begin_function("", FunctionKind::Arrow, &[]);
        b.load("n")
            .push_number(1.0)
            .binary(BinaryOp::Add)
            .store("n")
            .load("n")
            .ret()
            .end_function();
        b.push_function(tick).ret().end_function();

        b.push_function(counter)
            .call(0)
            .define("c", BindingKind::Const)
            .load("c")
            .call(0)
            .pop()
            .load("c")
            .call(0)
            .halt();
    });
    assert_eq!(result.get(), Value::Number(2.0));
}

#[test]
fn test_return_runs_finally_first() {
    // function f() { try { return 1; } finally { log.push("finally"); } }
    let (mut ctx, result) = eval(|b| {
        let f = b.begin_function("f", FunctionKind::Normal, &[]);
        let finally = b.new_label();
        b.try_begin(None, Some(finally)).push_number(1.0).ret().try_end();
        b.bind(finally);
        emit_log(b, "finally");
        b.end_finally().push_undefined().ret().end_function();
        b.push_function(f).call(0).halt();
    });
    assert_eq!(result.get(), Value::Number(1.0));
    assert_eq!(log_entries(&mut ctx), vec!["finally"]);
}

#[test]
fn test_for_of_sums_array() {
    // let sum = 0; for (const x of [1, 2, 3]) { sum = sum + x; } sum
    let (_ctx, result) = eval(|b| {
        let top = b.new_label();
        let done = b.new_label();
        b.push_number(0.0).define("sum", BindingKind::Let);
        b.push_number(1.0)
            .push_number(2.0)
            .push_number(3.0)
            .push_array(3)
            .emit(Op::GetIterator);
        b.bind(top)
            .iterator_next(done)
            .push_scope(ScopeKind::Block)
            .define("x", BindingKind::Const)
            .load("sum")
            .load("x")
            .binary(BinaryOp::Add)
            .store("sum")
            .pop_scope()
            .jump(top);
        b.bind(done).pop().load("sum").halt();
    });
    assert_eq!(result.get(), Value::Number(6.0));
}

#[test]
fn test_reference_error_is_catchable() {
    // try { missing; } catch (e) { e.name }
    let (_ctx, result) = eval(|b| {
        let catch = b.new_label();
        b.try_begin(Some(catch), None).load("missing").halt();
        b.bind(catch).get_named("name").halt();
    });
    assert_eq!(result.get(), Value::from("ReferenceError"));
}

#[test]
fn test_const_assignment_throws_type_error() {
    let (_ctx, result) = eval(|b| {
        let catch = b.new_label();
        b.push_number(1.0).define("k", BindingKind::Const);
        b.try_begin(Some(catch), None).push_number(2.0).store("k").push_undefined().halt();
        b.bind(catch).get_named("message").halt();
    });
    assert_eq!(result.get(), Value::from("Assignment to constant variable."));
}

#[test]
fn test_json_stringify_object_literal() {
    // JSON.stringify({ a: 1, b: [true, null] })
    let (_ctx, result) = eval(|b| {
        b.load("JSON").method("stringify");
        b.push_object()
            .push_number(1.0)
            .init_named("a")
            .push_bool(true)
            .push_null()
            .push_array(2)
            .init_named("b");
        b.call_method(1).halt();
    });
    assert_eq!(result.get(), Value::from(r#"{"a":1,"b":[true,null]}"#));
}

#[test]
fn test_set_and_map_treat_nan_as_one_key() {
    // new Set([NaN, NaN])
    let (mut ctx, result) = eval(|b| {
        b.load("Set")
            .load("NaN")
            .load("NaN")
            .push_array(2)
            .construct(1)
            .halt();
    });
    let set = result.get();
    assert_eq!(get(&mut ctx, &set, "size"), Value::Number(1.0));
    assert!(!ctx.strict_equals(&Value::Number(f64::NAN), &Value::Number(f64::NAN)));

    let (_ctx, result) = eval(|b| {
        b.load("Map")
            .construct(0)
            .method("set")
            .load("NaN")
            .push_string("first")
            .call_method(2)
            .method("get")
            .load("NaN")
            .call_method(1)
            .halt();
    });
    assert_eq!(result.get(), Value::from("first"));
}
