//! Module loading, caching and namespaces

use std::path::{Path, PathBuf};
use std::rc::Rc;

use jsrt::compiler::BinaryOp;
use jsrt::value::PromiseStatus;
use jsrt::{Context, EvalMode, ProgramBuilder, Runtime, Value, create_context};

use super::get;

/// A fresh directory under the system temp dir
fn module_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("jsrt-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Serialize a module program built with `build` into `dir/file`
fn write_module(dir: &Path, file: &str, build: impl FnOnce(&mut ProgramBuilder)) {
    let mut b = ProgramBuilder::new(file);
    build(&mut b);
    let program = b.finish().unwrap();
    std::fs::write(dir.join(file), serde_json::to_string(&program).unwrap()).unwrap();
}

fn context_in(dir: &Path) -> Context {
    let mut ctx = create_context(Runtime::new().with_base_dir(dir)).unwrap();
    ctx.define_global("hits", Value::Number(0.0)).unwrap();
    ctx
}

/// `hits = hits + 1; export const answer = 42;`
fn write_counted_lib(dir: &Path) {
    write_module(dir, "lib.js", |b| {
        b.load("hits").push_number(1.0).binary(BinaryOp::Add).store("hits");
        b.push_number(42.0).export("answer").push_undefined().halt();
    });
}

#[test]
fn test_module_evaluates_once() {
    let dir = module_dir("once");
    write_counted_lib(&dir);
    // import "./lib.js" twice, then re-export answer
    write_module(&dir, "main.js", |b| {
        b.import("./lib.js").pop();
        b.import("./lib.js").get_named("answer").export("answer");
        b.push_undefined().halt();
    });

    let mut ctx = context_in(&dir);
    let first = ctx.run("main.js").unwrap();
    let second = ctx.run("main.js").unwrap();
    assert_eq!(ctx.get_global("hits").unwrap(), Value::Number(1.0));

    let namespace = first.get();
    assert_eq!(namespace, second.get());
    assert_eq!(get(&mut ctx, &namespace, "answer"), Value::Number(42.0));
    ctx.verify_heap().unwrap();
}

#[test]
fn test_shared_dependency_is_cached() {
    let dir = module_dir("shared");
    write_counted_lib(&dir);
    write_module(&dir, "a.js", |b| {
        b.import("./lib.js").pop().push_undefined().halt();
    });
    write_module(&dir, "b.js", |b| {
        b.import("lib.js").get_named("answer").export("seen").push_undefined().halt();
    });

    let mut ctx = context_in(&dir);
    ctx.run("a.js").unwrap();
    let b = ctx.run("b.js").unwrap();
    assert_eq!(ctx.get_global("hits").unwrap(), Value::Number(1.0));
    let namespace = b.get();
    assert_eq!(get(&mut ctx, &namespace, "seen"), Value::Number(42.0));
}

#[test]
fn test_json_module_default_export() {
    let dir = module_dir("json");
    std::fs::write(dir.join("config.json"), r#"{"name": "jsrt", "ports": [80, 443]}"#).unwrap();

    let mut ctx = context_in(&dir);
    let namespace = ctx.run("config.json").unwrap().get();
    let config = get(&mut ctx, &namespace, "default");
    assert_eq!(get(&mut ctx, &config, "name"), "jsrt".into());
    let ports = get(&mut ctx, &config, "ports");
    assert_eq!(get(&mut ctx, &ports, "length"), Value::Number(2.0));
}

#[test]
fn test_missing_module_is_a_module_error() {
    let dir = module_dir("missing");
    let mut ctx = context_in(&dir);
    let err = ctx.run("nope.js").unwrap_err();
    assert!(err.to_string().contains("Cannot find module 'nope.js'"));

    // the failed path is not cached as a module
    write_counted_lib(&dir);
    std::fs::rename(dir.join("lib.js"), dir.join("nope.js")).unwrap();
    assert!(ctx.run("nope.js").is_ok());
}

#[test]
fn test_eval_in_module_mode_resolves_to_namespace() {
    let dir = module_dir("eval");
    write_counted_lib(&dir);

    let mut ctx = context_in(&dir);
    let mut b = ProgramBuilder::new(dir.join("entry.js").display().to_string());
    b.import("./lib.js").get_named("answer").push_number(1.0).binary(BinaryOp::Add);
    b.export("next").push_undefined().halt();
    let program = Rc::new(b.finish().unwrap());

    let promise = ctx.eval_program(program, EvalMode::Module).unwrap().get();
    ctx.run_until_idle().unwrap();
    let (status, namespace) = ctx.promise_status(&promise).unwrap();
    assert_eq!(status, PromiseStatus::Fulfilled);
    assert_eq!(get(&mut ctx, &namespace, "next"), Value::Number(43.0));
}
