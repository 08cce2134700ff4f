//! `using` and `await using` declarations

use jsrt::compiler::{BindingKind, FunctionKind, ProgramBuilder, ScopeKind};
use jsrt::value::PromiseStatus;

use super::{emit_log, emit_log_binding, eval, get, log_entries, record_errors};

/// `let resource = name => ({ [Symbol.<symbol>]: () => <body> })` where the
/// disposer either logs or throws `name`
fn define_resource(b: &mut ProgramBuilder, symbol: &str, throws: bool) {
    let resource = b.begin_function("resource", FunctionKind::Normal, &["name"]);
    let dispose = b.begin_function("", FunctionKind::Arrow, &[]);
    if throws {
        b.load("name").throw();
    } else {
        emit_log_binding(b, "name");
        b.push_undefined().ret();
    }
    b.end_function();
    b.push_object()
        .load("Symbol")
        .get_named(symbol)
        .push_function(dispose)
        .emit(jsrt::compiler::Op::InitField)
        .ret()
        .end_function();
    b.push_function(resource).define("resource", BindingKind::Let);
}

/// `using <name> = resource("<name>");`
fn using(b: &mut ProgramBuilder, name: &str, kind: BindingKind) {
    b.load("resource").push_string(name).call(1).define(name, kind);
}

#[test]
fn test_disposers_run_in_reverse_order() {
    // { using a = resource("a"); using b = resource("b"); log.push("body"); }
    let (mut ctx, _result) = eval(|b| {
        define_resource(b, "dispose", false);
        b.push_scope(ScopeKind::Block);
        using(b, "a", BindingKind::Using);
        using(b, "b", BindingKind::Using);
        emit_log(b, "body");
        b.pop_scope().push_undefined().halt();
    });
    assert_eq!(log_entries(&mut ctx), vec!["body", "b", "a"]);
}

#[test]
fn test_disposal_errors_chain_into_suppressed_error() {
    // try { { using a = ...; using b = ...; } } catch (e) { e }
    let (mut ctx, result) = eval(|b| {
        define_resource(b, "dispose", true);
        let catch = b.new_label();
        b.try_begin(Some(catch), None).push_scope(ScopeKind::Block);
        using(b, "a", BindingKind::Using);
        using(b, "b", BindingKind::Using);
        b.pop_scope().push_undefined().halt();
        b.bind(catch).halt();
    });
    let error = result.get();
    assert_eq!(get(&mut ctx, &error, "name"), "SuppressedError".into());
    assert_eq!(get(&mut ctx, &error, "error"), "a".into());
    assert_eq!(get(&mut ctx, &error, "suppressed"), "b".into());
}

#[test]
fn test_throw_in_body_still_disposes() {
    // try { using a = resource("a"); throw "body"; } catch (e) { log.push(e); }
    let (mut ctx, _result) = eval(|b| {
        define_resource(b, "dispose", false);
        let catch = b.new_label();
        b.try_begin(Some(catch), None).push_scope(ScopeKind::Block);
        using(b, "a", BindingKind::Using);
        b.push_string("body").throw();
        b.bind(catch).define("e", BindingKind::Let);
        emit_log_binding(b, "e");
        b.push_undefined().halt();
    });
    assert_eq!(log_entries(&mut ctx), vec!["a", "body"]);
}

#[test]
fn test_await_using_waits_for_async_disposer() {
    // async function f() { { await using r = resource("r"); } log.push("after"); }
    let (mut ctx, result) = eval(|b| {
        define_resource(b, "asyncDispose", false);
        let f = b.begin_function("f", FunctionKind::Async, &[]);
        b.push_scope(ScopeKind::Block);
        using(b, "r", BindingKind::AwaitUsing);
        b.pop_scope();
        emit_log(b, "after");
        b.push_undefined().ret().end_function();
        b.push_function(f).call(0).halt();
    });
    let promise = result.get();
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["r", "after"]);
    assert!(matches!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, _))
    ));
}

#[test]
fn test_non_disposable_value_is_a_type_error() {
    let (mut ctx, result) = eval(|b| {
        let catch = b.new_label();
        b.try_begin(Some(catch), None)
            .push_scope(ScopeKind::Block)
            .push_number(1.0)
            .define("x", BindingKind::Using)
            .pop_scope()
            .push_undefined()
            .halt();
        b.bind(catch).halt();
    });
    let error = result.get();
    assert_eq!(get(&mut ctx, &error, "name"), "TypeError".into());
    assert_eq!(
        get(&mut ctx, &error, "message"),
        "The value of 'x' is not disposable".into()
    );
}

#[test]
fn test_context_dispose_runs_global_disposers() {
    // using r = resource("r"); at the top level, disposer throws "r"
    let (mut ctx, _result) = eval(|b| {
        define_resource(b, "dispose", true);
        using(b, "r", BindingKind::Using);
        b.push_undefined().halt();
    });
    let reports = record_errors(&mut ctx);
    assert!(reports.borrow().is_empty());

    ctx.dispose().unwrap();
    assert_eq!(*reports.borrow(), vec!["r".to_string()]);
}

#[test]
fn test_context_dispose_runs_disposers_of_suspended_generator() {
    // function* g() { { using r = resource("g"); yield 1; } }
    // let it = g(); it.next();
    let (mut ctx, _result) = eval(|b| {
        define_resource(b, "dispose", true);
        let g = b.begin_function("g", FunctionKind::Generator, &[]);
        b.push_scope(ScopeKind::Block);
        using(b, "g", BindingKind::Using);
        b.push_number(1.0).yield_value().pop().pop_scope();
        b.push_undefined().ret().end_function();
        b.push_function(g).call(0).define("it", BindingKind::Let);
        b.load("it").method("next").call_method(0).pop();
        b.push_undefined().halt();
    });
    let reports = record_errors(&mut ctx);

    ctx.dispose().unwrap();
    assert_eq!(*reports.borrow(), vec!["g".to_string()]);
}

#[test]
fn test_await_using_inside_async_generator() {
    // async function* g() { { await using r = resource("r"); yield "a"; } log.push("closed"); }
    // async function main() { for await (const x of g()) log.push(x); log.push("end"); }
    let (mut ctx, result) = eval(|b| {
        define_resource(b, "asyncDispose", false);
        let g = b.begin_function("g", FunctionKind::AsyncGenerator, &[]);
        b.push_scope(ScopeKind::Block);
        using(b, "r", BindingKind::AwaitUsing);
        b.push_string("a").yield_value().pop().pop_scope();
        emit_log(b, "closed");
        b.push_undefined().ret().end_function();
        b.push_function(g).define("g", BindingKind::Let);

        let main = b.begin_function("main", FunctionKind::Async, &[]);
        let top = b.new_label();
        let done = b.new_label();
        b.load("g").call(0).emit(jsrt::compiler::Op::GetAsyncIterator);
        b.bind(top)
            .iterator_next(done)
            .push_scope(ScopeKind::Block)
            .define("x", BindingKind::Const);
        emit_log_binding(b, "x");
        b.pop_scope().jump(top);
        b.bind(done).pop();
        emit_log(b, "end");
        b.push_undefined().ret().end_function();
        b.push_function(main).call(0).halt();
    });
    let promise = result.get();
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["a", "r", "closed", "end"]);
    assert!(matches!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, _))
    ));
    ctx.verify_heap().unwrap();
}
