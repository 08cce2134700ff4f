//! Integration tests for the runtime, organized by feature
//!
//! Programs are assembled with `ProgramBuilder` and run through the public
//! `Context` API. Most scenarios record what happened in a global `log`
//! array that the helpers below read back.

#![allow(clippy::unwrap_used)]

mod async_await;
mod disposal;
mod errors;
mod gc;
mod generators;
mod modules;
mod scripts;
mod tasks;

use std::cell::RefCell;
use std::rc::Rc;

use jsrt::compiler::{BindingKind, FunctionKind, ProgramBuilder};
use jsrt::{Context, EvalMode, Handle, JsError, PropertyKey, Runtime, Value, create_context};

/// A context with the default runtime
pub fn context() -> Context {
    create_context(Runtime::default()).unwrap()
}

/// Assemble a script with `build` and evaluate it in `ctx`
pub fn eval_in(ctx: &mut Context, build: impl FnOnce(&mut ProgramBuilder)) -> Result<Handle, JsError> {
    let mut b = ProgramBuilder::new("test.js");
    build(&mut b);
    let program = Rc::new(b.finish()?);
    ctx.eval_program(program, EvalMode::Script)
}

/// Evaluate a script in a fresh context that has a global `log` array
pub fn eval(build: impl FnOnce(&mut ProgramBuilder)) -> (Context, Handle) {
    let mut ctx = context();
    install_log(&mut ctx);
    let handle = eval_in(&mut ctx, build).unwrap();
    (ctx, handle)
}

/// Define an empty global `log` array
pub fn install_log(ctx: &mut Context) {
    let log = ctx.create_array(Vec::new());
    ctx.define_global("log", Value::Object(log)).unwrap();
}

/// Everything pushed onto the global `log`, as display strings
pub fn log_entries(ctx: &mut Context) -> Vec<String> {
    let log = ctx.get_global("log").unwrap();
    array_values(ctx, &log)
        .iter()
        .map(|v| ctx.value_text(v))
        .collect()
}

/// Install an error callback that records every report as text
pub fn record_errors(ctx: &mut Context) -> Rc<RefCell<Vec<String>>> {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = reports.clone();
    ctx.set_error_callback(move |ctx, err| sink.borrow_mut().push(ctx.error_text(err)));
    reports
}

pub fn get(ctx: &mut Context, target: &Value, name: &str) -> Value {
    let key = ctx.key(name);
    ctx.get_field(target, &key).unwrap()
}

pub fn call_method(ctx: &mut Context, target: &Value, name: &str, args: &[Value]) -> Result<Value, JsError> {
    let key = ctx.key(name);
    let method = ctx.get_field(target, &key)?;
    ctx.call_function(method, target.clone(), args)
}

pub fn array_values(ctx: &mut Context, array: &Value) -> Vec<Value> {
    let length = get(ctx, array, "length").as_number().unwrap_or(0.0) as u32;
    (0..length)
        .map(|i| ctx.get_field(array, &PropertyKey::Index(i)).unwrap())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Emit helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// `log.push(text);`
pub fn emit_log(b: &mut ProgramBuilder, text: &str) {
    b.load("log")
        .dup()
        .get_named("push")
        .push_string(text)
        .call_method(1)
        .pop();
}

/// `log.push(<name>);` for a binding in scope
pub fn emit_log_binding(b: &mut ProgramBuilder, name: &str) {
    b.load("log").dup().get_named("push").load(name).call_method(1).pop();
}

/// `function <name>() { log.push(<text>); }`, declared with `let`
pub fn define_logger(b: &mut ProgramBuilder, name: &str, text: &str) {
    let f = b.begin_function(name, FunctionKind::Normal, &[]);
    emit_log(b, text);
    b.push_undefined().ret().end_function();
    b.push_function(f).define(name, BindingKind::Let);
}
