//! Generator objects driven from the host and from bytecode

use jsrt::compiler::{BinaryOp, BindingKind, FunctionKind, Op, ProgramBuilder, ScopeKind};
use jsrt::value::PromiseStatus;
use jsrt::{Context, Handle, Value};

use super::{array_values, call_method, emit_log, emit_log_binding, eval, get, log_entries};

/// `function* g() { try { yield 1; yield 2; } finally { log.push("cleanup"); } }`
fn generator_with_finally(b: &mut ProgramBuilder) {
    generator_of_kind(b, FunctionKind::Generator);
}

/// `async function* g()` with the same body
fn async_generator_with_finally(b: &mut ProgramBuilder) {
    generator_of_kind(b, FunctionKind::AsyncGenerator);
}

fn generator_of_kind(b: &mut ProgramBuilder, kind: FunctionKind) {
    let g = b.begin_function("g", kind, &[]);
    let finally = b.new_label();
    b.try_begin(None, Some(finally))
        .push_number(1.0)
        .yield_value()
        .pop()
        .push_number(2.0)
        .yield_value()
        .pop()
        .try_end();
    b.bind(finally);
    emit_log(b, "cleanup");
    b.end_finally().push_undefined().ret().end_function();
    b.push_function(g).call(0).halt();
}

fn step(ctx: &mut Context, generator: &Value, method: &str, args: &[Value]) -> (Value, bool) {
    let result = call_method(ctx, generator, method, args).unwrap();
    let value = get(ctx, &result, "value");
    let done = get(ctx, &result, "done");
    (value, done == Value::Boolean(true))
}

#[test]
fn test_next_walks_yields_then_finishes() {
    let (mut ctx, result) = eval(generator_with_finally);
    let generator = result.get();
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::Number(1.0), false));
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::Number(2.0), false));
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::Undefined, true));
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::Undefined, true));
}

#[test]
fn test_return_runs_finally() {
    let (mut ctx, result) = eval(generator_with_finally);
    let generator = result.get();
    step(&mut ctx, &generator, "next", &[]);
    assert_eq!(
        step(&mut ctx, &generator, "return", &[Value::Number(7.0)]),
        (Value::Number(7.0), true)
    );
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
}

#[test]
fn test_throw_propagates_after_finally() {
    let (mut ctx, result) = eval(generator_with_finally);
    let generator = result.get();
    step(&mut ctx, &generator, "next", &[]);
    let err = call_method(&mut ctx, &generator, "throw", &[Value::from("stop")]).unwrap_err();
    assert_eq!(ctx.error_text(&err), "stop");
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::Undefined, true));
}

#[test]
fn test_return_before_start_skips_body() {
    let (mut ctx, result) = eval(generator_with_finally);
    let generator = result.get();
    assert_eq!(
        step(&mut ctx, &generator, "return", &[Value::Number(1.0)]),
        (Value::Number(1.0), true)
    );
    assert!(log_entries(&mut ctx).is_empty());
}

#[test]
fn test_next_argument_becomes_yield_result() {
    // function* echo() { const got = yield "ready"; return got * 2; }
    let (mut ctx, result) = eval(|b| {
        let echo = b.begin_function("echo", FunctionKind::Generator, &[]);
        b.push_string("ready")
            .yield_value()
            .define("got", BindingKind::Const)
            .load("got")
            .push_number(2.0)
            .binary(BinaryOp::Mul)
            .ret()
            .end_function();
        b.push_function(echo).call(0).halt();
    });
    let generator = result.get();
    assert_eq!(step(&mut ctx, &generator, "next", &[]), (Value::from("ready"), false));
    assert_eq!(
        step(&mut ctx, &generator, "next", &[Value::Number(21.0)]),
        (Value::Number(42.0), true)
    );
}

#[test]
fn test_spread_of_generator() {
    // [...g()] where g yields 1 and 2
    let (mut ctx, result) = eval(|b| {
        let g = b.begin_function("g", FunctionKind::Generator, &[]);
        b.push_number(1.0)
            .yield_value()
            .pop()
            .push_number(2.0)
            .yield_value()
            .pop()
            .push_undefined()
            .ret()
            .end_function();
        b.push_array(0)
            .push_function(g)
            .call(0)
            .emit(Op::Spread)
            .halt();
    });
    let array = result.get();
    assert_eq!(
        array_values(&mut ctx, &array),
        vec![Value::Number(1.0), Value::Number(2.0)]
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Async generators
// ═══════════════════════════════════════════════════════════════════════════════

/// Call `method` on an async generator; the returned promise is kept in a handle
fn request(ctx: &mut Context, generator: &Value, method: &str, args: &[Value]) -> Handle {
    let promise = call_method(ctx, generator, method, args).unwrap();
    assert!(ctx.is_promise(&promise));
    ctx.make_handle(promise)
}

/// Iterator result a fulfilled request promise carries
fn settled(ctx: &mut Context, promise: &Handle) -> (Value, bool) {
    let (status, result) = ctx.promise_status(&promise.get()).unwrap();
    assert_eq!(status, PromiseStatus::Fulfilled);
    let value = get(ctx, &result, "value");
    let done = get(ctx, &result, "done");
    (value, done == Value::Boolean(true))
}

#[test]
fn test_async_generator_queues_requests() {
    let (mut ctx, result) = eval(async_generator_with_finally);
    let generator = result.get();
    let first = request(&mut ctx, &generator, "next", &[]);
    let second = request(&mut ctx, &generator, "next", &[]);
    let third = request(&mut ctx, &generator, "next", &[]);
    assert!(matches!(
        ctx.promise_status(&first.get()),
        Some((PromiseStatus::Pending, _))
    ));

    ctx.run_until_idle().unwrap();
    assert_eq!(settled(&mut ctx, &first), (Value::Number(1.0), false));
    assert_eq!(settled(&mut ctx, &second), (Value::Number(2.0), false));
    assert_eq!(settled(&mut ctx, &third), (Value::Undefined, true));
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_async_generator_return_runs_finally() {
    let (mut ctx, result) = eval(async_generator_with_finally);
    let generator = result.get();
    let first = request(&mut ctx, &generator, "next", &[]);
    let closed = request(&mut ctx, &generator, "return", &[Value::Number(7.0)]);
    let after = request(&mut ctx, &generator, "next", &[]);

    ctx.run_until_idle().unwrap();
    assert_eq!(settled(&mut ctx, &first), (Value::Number(1.0), false));
    assert_eq!(settled(&mut ctx, &closed), (Value::Number(7.0), true));
    assert_eq!(settled(&mut ctx, &after), (Value::Undefined, true));
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
}

#[test]
fn test_async_generator_throw_rejects_request() {
    let (mut ctx, result) = eval(async_generator_with_finally);
    let generator = result.get();
    request(&mut ctx, &generator, "next", &[]);
    let thrown = request(&mut ctx, &generator, "throw", &[Value::from("stop")]);

    ctx.run_until_idle().unwrap();
    assert_eq!(
        ctx.promise_status(&thrown.get()),
        Some((PromiseStatus::Rejected, Value::from("stop")))
    );
    assert_eq!(log_entries(&mut ctx), vec!["cleanup"]);
}

#[test]
fn test_async_generator_return_before_start_skips_body() {
    let (mut ctx, result) = eval(async_generator_with_finally);
    let generator = result.get();
    let closed = request(&mut ctx, &generator, "return", &[Value::Number(1.0)]);
    ctx.run_until_idle().unwrap();
    assert_eq!(settled(&mut ctx, &closed), (Value::Number(1.0), true));
    assert!(log_entries(&mut ctx).is_empty());
}

#[test]
fn test_async_generator_yield_awaits_operand() {
    // async function* g() { yield Promise.resolve("late"); }
    let (mut ctx, result) = eval(|b| {
        let g = b.begin_function("g", FunctionKind::AsyncGenerator, &[]);
        b.load("Promise")
            .method("resolve")
            .push_string("late")
            .call_method(1)
            .yield_value()
            .pop()
            .push_undefined()
            .ret()
            .end_function();
        b.push_function(g).call(0).halt();
    });
    let generator = result.get();
    let first = request(&mut ctx, &generator, "next", &[]);
    ctx.run_until_idle().unwrap();
    assert_eq!(settled(&mut ctx, &first), (Value::from("late"), false));
}

#[test]
fn test_for_await_over_async_generator() {
    // async function* g() { yield "a"; yield "b"; }
    // async function main() { for await (const x of g()) log.push(x); log.push("end"); }
    let (mut ctx, result) = eval(|b| {
        let g = b.begin_function("g", FunctionKind::AsyncGenerator, &[]);
        b.push_string("a")
            .yield_value()
            .pop()
            .push_string("b")
            .yield_value()
            .pop()
            .push_undefined()
            .ret()
            .end_function();
        b.push_function(g).define("g", BindingKind::Let);

        let main = b.begin_function("main", FunctionKind::Async, &[]);
        let top = b.new_label();
        let done = b.new_label();
        b.load("g").call(0).emit(Op::GetAsyncIterator);
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
    assert_eq!(log_entries(&mut ctx), vec!["a", "b", "end"]);
    assert!(matches!(
        ctx.promise_status(&promise),
        Some((PromiseStatus::Fulfilled, _))
    ));
}
