//! Error reporting: the error callback, compile errors and stack limits

use std::cell::RefCell;
use std::rc::Rc;

use jsrt::compiler::{BindingKind, FunctionKind, ProgramBuilder, ScopeKind};
use jsrt::{EvalMode, Runtime, create_context};

use super::{context, eval_in, get, record_errors};

#[test]
fn test_uncaught_task_error_reaches_callback() {
    // setTimeout(() => { throw new TypeError("bad"); }, 0)
    let mut ctx = context();
    let reports = record_errors(&mut ctx);
    eval_in(&mut ctx, |b| {
        let f = b.begin_function("", FunctionKind::Arrow, &[]);
        b.load("TypeError")
            .push_string("bad")
            .construct(1)
            .throw()
            .end_function();
        b.load("setTimeout")
            .push_function(f)
            .push_number(0.0)
            .call(2)
            .halt();
    })
    .unwrap();

    ctx.run_until_idle().unwrap();
    assert_eq!(*reports.borrow(), vec!["TypeError: bad".to_string()]);
}

#[test]
fn test_uncaught_script_error_reaches_callback() {
    // throw new Error("boom")
    let mut ctx = context();
    let reports = record_errors(&mut ctx);
    let result = eval_in(&mut ctx, |b| {
        b.load("Error").push_string("boom").construct(1).throw();
    });

    assert!(result.is_err());
    assert_eq!(*reports.borrow(), vec!["Error: boom".to_string()]);
}

#[test]
fn test_compile_error_is_not_reported() {
    let mut ctx = context();
    let reports = record_errors(&mut ctx);
    assert!(ctx.eval("not json", "bad.js", EvalMode::Script).is_err());
    assert!(reports.borrow().is_empty());
}

#[test]
fn test_unhandled_rejection_reported_when_reclaimed() {
    // Promise.reject("nope");
    let mut ctx = context();
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    ctx.set_error_callback(move |_ctx, err| sink.borrow_mut().push(err.to_string()));
    eval_in(&mut ctx, |b| {
        b.load("Promise")
            .method("reject")
            .push_string("nope")
            .call_method(1)
            .pop()
            .push_undefined()
            .halt();
    })
    .unwrap();
    ctx.collect().unwrap();
    assert_eq!(*reports.borrow(), vec!["Uncaught (in promise) nope".to_string()]);
}

#[test]
fn test_handled_rejection_is_not_reported() {
    // Promise.reject("fine").catch(() => {});
    let mut ctx = context();
    let reports = record_errors(&mut ctx);
    eval_in(&mut ctx, |b| {
        let handler = b.begin_function("", FunctionKind::Arrow, &[]);
        b.push_undefined().ret().end_function();
        b.load("Promise")
            .method("reject")
            .push_string("fine")
            .call_method(1)
            .method("catch")
            .push_function(handler)
            .call_method(1)
            .pop()
            .push_undefined()
            .halt();
    })
    .unwrap();
    ctx.run_until_idle().unwrap();
    ctx.collect().unwrap();
    assert!(reports.borrow().is_empty());
}

#[test]
fn test_malformed_source_is_a_syntax_error() {
    let mut ctx = context();
    let err = ctx.eval("not json", "bad.js", EvalMode::Script).unwrap_err();
    assert_eq!(err.error_name(), "SyntaxError");
    assert!(err.to_string().contains("bad.js"));
}

#[test]
fn test_runaway_recursion_is_a_range_error() {
    // function f() { return f(); } try { f(); } catch (e) { e }
    let mut ctx = create_context(Runtime::new().with_max_call_depth(32)).unwrap();
    let result = eval_in(&mut ctx, |b| {
        let f = b.begin_function("f", FunctionKind::Normal, &[]);
        b.load("f").call(0).ret().end_function();
        b.push_function(f).define("f", BindingKind::Let);
        let catch = b.new_label();
        b.try_begin(Some(catch), None).load("f").call(0).halt();
        b.bind(catch).halt();
    })
    .unwrap();
    let error = result.get();
    assert_eq!(get(&mut ctx, &error, "name"), "RangeError".into());
    assert_eq!(
        get(&mut ctx, &error, "message"),
        "Maximum call stack size exceeded".into()
    );
}

#[test]
fn test_uncaught_script_error_is_returned() {
    let mut ctx = context();
    let err = eval_in(&mut ctx, |b| {
        b.load("missing").halt();
    })
    .unwrap_err();
    assert_eq!(ctx.error_text(&err), "ReferenceError: missing is not defined");
}

#[test]
fn test_block_scope_released_after_uncaught_error() {
    // { let big = {}; throw "out"; }
    let throw_from_block = |b: &mut ProgramBuilder| {
        b.push_scope(ScopeKind::Block)
            .push_object()
            .define("big", BindingKind::Let)
            .push_string("out")
            .throw();
    };
    let mut ctx = context();
    assert!(eval_in(&mut ctx, throw_from_block).is_err());
    let before = ctx.gc_stats().live_chunks;

    let err = eval_in(&mut ctx, throw_from_block).unwrap_err();
    assert_eq!(ctx.error_text(&err), "out");
    assert_eq!(ctx.gc_stats().live_chunks, before);
    ctx.verify_heap().unwrap();
}
