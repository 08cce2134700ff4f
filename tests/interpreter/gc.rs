//! Reclamation of unreachable chunks at scope exit and collection points

use jsrt::compiler::{BinaryOp, BindingKind, FunctionKind, ProgramBuilder, ScopeKind};
use jsrt::{Context, ContextState, JsError, Value};

use super::{context, eval_in, get};

/// `live()`: live chunk count, readable while the script runs
fn live_chunks(ctx: &mut Context, _this: Value, _args: &[Value]) -> Result<Value, JsError> {
    Ok(Value::Number(ctx.gc_stats().live_chunks as f64))
}

/// `{ let a = {}; a.self = a; }`
fn self_cycle_in_block(b: &mut ProgramBuilder) {
    b.push_scope(ScopeKind::Block)
        .push_object()
        .define("a", BindingKind::Let)
        .load("a")
        .load("a")
        .set_named("self")
        .pop_scope()
        .push_undefined()
        .halt();
}

#[test]
fn test_self_cycle_freed_on_scope_pop() {
    let mut ctx = context();
    eval_in(&mut ctx, self_cycle_in_block).unwrap();
    let after_first = ctx.gc_stats().live_chunks;

    for _ in 0..3 {
        eval_in(&mut ctx, self_cycle_in_block).unwrap();
        assert_eq!(ctx.gc_stats().live_chunks, after_first);
    }
    assert!(ctx.gc_stats().freed_total > 0);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_block_cycle_freed_while_script_runs() {
    // let before = 0; before = live(); { let a = {}; a.self = a; } live() - before
    let mut ctx = context();
    let live = ctx.create_native_function("live", live_chunks, 0);
    ctx.define_global("live", live).unwrap();
    let result = eval_in(&mut ctx, |b| {
        b.push_number(0.0).define("before", BindingKind::Let);
        b.load("live").call(0).store("before");
        b.push_scope(ScopeKind::Block)
            .push_object()
            .define("a", BindingKind::Let)
            .load("a")
            .load("a")
            .set_named("self")
            .pop_scope();
        b.load("live").call(0).load("before").binary(BinaryOp::Sub).halt();
    })
    .unwrap();
    assert_eq!(result.get(), Value::Number(0.0));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_value_left_on_stack_survives_block_exit() {
    // ({ let a = { v: 1 }; a }).v, with the block popped before the read
    let mut ctx = context();
    let result = eval_in(&mut ctx, |b| {
        b.push_scope(ScopeKind::Block)
            .push_object()
            .push_number(1.0)
            .init_named("v")
            .define("a", BindingKind::Let)
            .load("a")
            .pop_scope()
            .get_named("v")
            .halt();
    })
    .unwrap();
    assert_eq!(result.get(), Value::Number(1.0));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_returned_object_outlives_callee_scope() {
    // function make() { let o = { n: 2 }; return o; } make().n
    let mut ctx = context();
    let result = eval_in(&mut ctx, |b| {
        let make = b.begin_function("make", FunctionKind::Normal, &[]);
        b.push_object()
            .push_number(2.0)
            .init_named("n")
            .define("o", BindingKind::Let)
            .load("o")
            .ret()
            .end_function();
        b.push_function(make).call(0).get_named("n").halt();
    })
    .unwrap();
    assert_eq!(result.get(), Value::Number(2.0));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_closure_cycle_freed_after_call() {
    // function f() { let o = {}; o.fn = () => o; } f();
    let build = |b: &mut ProgramBuilder| {
        let f = b.begin_function("f", FunctionKind::Normal, &[]);
        let arrow = b.begin_function("", FunctionKind::Arrow, &[]);
        b.load("o").ret().end_function();
        b.push_object()
            .define("o", BindingKind::Let)
            .load("o")
            .push_function(arrow)
            .set_named("fn")
            .push_undefined()
            .ret()
            .end_function();
        b.push_function(f).call(0).halt();
    };
    let mut ctx = context();
    eval_in(&mut ctx, build).unwrap();
    let baseline = ctx.gc_stats().live_chunks;
    eval_in(&mut ctx, build).unwrap();
    eval_in(&mut ctx, build).unwrap();
    assert_eq!(ctx.gc_stats().live_chunks, baseline);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_global_cycle_survives_collection() {
    // let keep = {}; keep.self = keep;
    let mut ctx = context();
    eval_in(&mut ctx, |b| {
        b.push_object()
            .define("keep", BindingKind::Let)
            .load("keep")
            .load("keep")
            .set_named("self")
            .push_undefined()
            .halt();
    })
    .unwrap();
    ctx.collect().unwrap();

    let keep = ctx.get_global("keep").unwrap();
    assert!(keep.as_object().is_some());
    assert_eq!(get(&mut ctx, &keep, "self"), keep);
    ctx.verify_heap().unwrap();
}

#[test]
fn test_dropping_handle_releases_result() {
    let mut ctx = context();
    let build = |b: &mut ProgramBuilder| {
        b.push_object().push_number(1.0).push_array(1).init_named("items").halt();
    };
    let handle = eval_in(&mut ctx, build).unwrap();
    let held = ctx.gc_stats().live_chunks;
    let value = handle.get();
    assert!(get(&mut ctx, &value, "items").as_object().is_some());

    drop(handle);
    ctx.collect().unwrap();
    assert_eq!(ctx.gc_stats().live_chunks, held - 2);
}

#[test]
fn test_dispose_empties_the_heap() {
    let mut ctx = context();
    eval_in(&mut ctx, |b| {
        b.push_object().define("g", BindingKind::Var).push_undefined().halt();
    })
    .unwrap();
    ctx.dispose().unwrap();
    assert_eq!(ctx.state(), ContextState::Disposed);
    assert_eq!(ctx.gc_stats().roots, 1);
    assert!(eval_in(&mut ctx, |b| {
        b.push_undefined().halt();
    })
    .is_err());
}
