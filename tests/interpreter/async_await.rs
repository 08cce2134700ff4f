//! Async functions, top-level await and promise settlement

use jsrt::Value;
use jsrt::compiler::{BinaryOp, BindingKind, FunctionKind};
use jsrt::value::PromiseStatus;

use super::{emit_log, emit_log_binding, eval, log_entries};

#[test]
fn test_top_level_await_resumes_with_value() {
    // await Promise.resolve(5)
    let (mut ctx, result) = eval(|b| {
        b.load("Promise")
            .method("resolve")
            .push_number(5.0)
            .call_method(1)
            .await_value()
            .halt();
    });
    let promise = result.get();
    ctx.run_until_idle().unwrap();
    assert_eq!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, Value::Number(5.0)))
    );
}

#[test]
fn test_async_function_returns_awaited_value() {
    // async function f() { return await 1; } f()
    let (mut ctx, result) = eval(|b| {
        let f = b.begin_function("f", FunctionKind::Async, &[]);
        b.push_number(1.0).await_value().ret().end_function();
        b.push_function(f).call(0).halt();
    });
    let promise = result.get();
    assert!(ctx.is_promise(&promise));
    assert!(matches!(ctx.promise_status(&promise), Some((PromiseStatus::Pending, _))));

    // awaiting a plain value takes exactly one microtask
    assert!(ctx.next_task().unwrap());
    assert_eq!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, Value::Number(1.0)))
    );
    assert!(!ctx.has_task());
}

#[test]
fn test_await_yields_to_synchronous_code() {
    // async function a() { log.push("a1"); await null; log.push("a2"); }
    // a(); log.push("sync");
    let (mut ctx, _result) = eval(|b| {
        let a = b.begin_function("a", FunctionKind::Async, &[]);
        emit_log(b, "a1");
        b.push_null().await_value().pop();
        emit_log(b, "a2");
        b.push_undefined().ret().end_function();
        b.push_function(a).call(0).pop();
        emit_log(b, "sync");
        b.push_undefined().halt();
    });
    assert_eq!(log_entries(&mut ctx), vec!["a1", "sync"]);
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["a1", "sync", "a2"]);
}

#[test]
fn test_rejection_reaches_catch_handler() {
    // async function g() { throw "x"; } g().catch(e => log.push(e))
    let (mut ctx, _result) = eval(|b| {
        let g = b.begin_function("g", FunctionKind::Async, &[]);
        b.push_string("x").throw().end_function();
        let handler = b.begin_function("", FunctionKind::Arrow, &["e"]);
        emit_log_binding(b, "e");
        b.push_undefined().ret().end_function();
        b.push_function(g)
            .call(0)
            .method("catch")
            .push_function(handler)
            .call_method(1)
            .halt();
    });
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["x"]);
}

#[test]
fn test_await_inside_try_catches_rejection() {
    // async function h() { try { await Promise.reject("no"); } catch (e) { return "caught " + e; } }
    let (mut ctx, result) = eval(|b| {
        let h = b.begin_function("h", FunctionKind::Async, &[]);
        let catch = b.new_label();
        b.try_begin(Some(catch), None)
            .load("Promise")
            .method("reject")
            .push_string("no")
            .call_method(1)
            .await_value()
            .ret();
        b.bind(catch)
            .define("e", BindingKind::Let)
            .push_string("caught ")
            .load("e")
            .binary(BinaryOp::Add)
            .ret()
            .end_function();
        b.push_function(h).call(0).halt();
    });
    let promise = result.get();
    ctx.run_until_idle().unwrap();
    assert_eq!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, Value::from("caught no")))
    );
}

#[test]
fn test_promise_all_collects_in_order() {
    // Promise.all([1, Promise.resolve(2)])
    let (mut ctx, result) = eval(|b| {
        b.load("Promise")
            .method("all")
            .push_number(1.0)
            .load("Promise")
            .method("resolve")
            .push_number(2.0)
            .call_method(1)
            .push_array(2)
            .call_method(1)
            .halt();
    });
    let promise = result.get();
    ctx.run_until_idle().unwrap();
    let (status, values) = ctx.promise_status(&promise).unwrap();
    assert_eq!(status, PromiseStatus::Fulfilled);
    let values = super::array_values(&mut ctx, &values);
    assert_eq!(values, vec![Value::Number(1.0), Value::Number(2.0)]);
}
