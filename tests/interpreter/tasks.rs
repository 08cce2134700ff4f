//! Timers, microtasks and the idle loop

use std::rc::Rc;

use jsrt::compiler::{BinaryOp, BindingKind, FunctionKind};
use jsrt::platform::{ManualTimeProvider, TimeProvider};
use jsrt::{Runtime, create_context};

use super::{define_logger, emit_log, eval, eval_in, install_log, log_entries};

#[test]
fn test_microtasks_run_before_timers() {
    // setTimeout(t1, 0); queueMicrotask(m1); queueMicrotask(m2);
    let (mut ctx, _result) = eval(|b| {
        define_logger(b, "t1", "t1");
        define_logger(b, "m1", "m1");
        define_logger(b, "m2", "m2");
        b.load("setTimeout").load("t1").push_number(0.0).call(2).pop();
        b.load("queueMicrotask").load("m1").call(1).pop();
        b.load("queueMicrotask").load("m2").call(1).pop();
        b.push_undefined().halt();
    });
    assert!(log_entries(&mut ctx).is_empty());
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["m1", "m2", "t1"]);
    assert!(!ctx.has_task());
}

#[test]
fn test_interval_fires_until_cleared() {
    // let n = 0;
    // let id = setInterval(() => { n = n + 1; log.push("tick"); if (n === 3) clearInterval(id); }, 10);
    let clock = Rc::new(ManualTimeProvider::new());
    let mut ctx = create_context(Runtime::new().with_time_provider(clock.clone())).unwrap();
    install_log(&mut ctx);
    eval_in(&mut ctx, |b| {
        let tick = b.begin_function("", FunctionKind::Arrow, &[]);
        let end = b.new_label();
        b.load("n").push_number(1.0).binary(BinaryOp::Add).store("n");
        emit_log(b, "tick");
        b.load("n")
            .push_number(3.0)
            .binary(BinaryOp::StrictEq)
            .jump_if_false(end)
            .load("clearInterval")
            .load("id")
            .call(1)
            .pop();
        b.bind(end).push_undefined().ret().end_function();

        b.push_number(0.0).define("n", BindingKind::Let);
        b.load("setInterval")
            .push_function(tick)
            .push_number(10.0)
            .call(2)
            .define("id", BindingKind::Let)
            .push_undefined()
            .halt();
    })
    .unwrap();

    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["tick", "tick", "tick"]);
    assert_eq!(clock.monotonic_millis(), 30);
    assert!(!ctx.has_task());
}

#[test]
fn test_timer_waits_for_its_delay() {
    let clock = Rc::new(ManualTimeProvider::new());
    let mut ctx = create_context(Runtime::new().with_time_provider(clock.clone())).unwrap();
    install_log(&mut ctx);
    eval_in(&mut ctx, |b| {
        define_logger(b, "late", "late");
        b.load("setTimeout")
            .load("late")
            .push_number(100.0)
            .call(2)
            .pop()
            .push_undefined()
            .halt();
    })
    .unwrap();

    assert!(!ctx.next_task().unwrap());
    assert!(log_entries(&mut ctx).is_empty());
    clock.advance(100);
    assert!(ctx.next_task().unwrap());
    assert_eq!(log_entries(&mut ctx), vec!["late"]);
}

#[test]
fn test_microtask_budget_limits_one_drain() {
    let runtime = Runtime::new().with_microtask_budget(2);
    let mut ctx = create_context(runtime).unwrap();
    install_log(&mut ctx);
    eval_in(&mut ctx, |b| {
        define_logger(b, "m", "m");
        for _ in 0..3 {
            b.load("queueMicrotask").load("m").call(1).pop();
        }
        b.push_undefined().halt();
    })
    .unwrap();

    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx).len(), 2);
    assert!(ctx.has_task());

    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx).len(), 3);
    assert!(!ctx.has_task());
}

#[test]
fn test_clear_timeout_cancels_callback() {
    // let id = setTimeout(never, 0); clearTimeout(id);
    let (mut ctx, _result) = eval(|b| {
        define_logger(b, "never", "never");
        b.load("setTimeout")
            .load("never")
            .push_number(0.0)
            .call(2)
            .define("id", BindingKind::Let);
        b.load("clearTimeout").load("id").call(1).pop();
        b.push_undefined().halt();
    });
    assert!(!ctx.has_task());
    ctx.run_until_idle().unwrap();
    assert!(log_entries(&mut ctx).is_empty());
}

#[test]
fn test_timer_arguments_are_passed_through() {
    // setTimeout(x => log.push(x), 0, "arg")
    let (mut ctx, _result) = eval(|b| {
        let f = b.begin_function("", FunctionKind::Arrow, &["x"]);
        super::emit_log_binding(b, "x");
        b.push_undefined().ret().end_function();
        b.load("setTimeout")
            .push_function(f)
            .push_number(0.0)
            .push_string("arg")
            .call(3)
            .halt();
    });
    ctx.run_until_idle().unwrap();
    assert_eq!(log_entries(&mut ctx), vec!["arg"]);
}
