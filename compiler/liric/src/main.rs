//! A smoke-test binary: feeds a couple of the textual-IR scenarios
//! spec.md §8 names, JITs them, and prints what they return. Exercises
//! the [`liric::Compiler`] facade the way an embedding Fortran frontend
//! would, without any of the argument-parsing machinery spec.md
//! explicitly keeps external ("CLI argument parsing in the probe
//! runner").
//!
//! ```text
//! LIRIC_LOG_FILTER=debug cargo run -p liric
//! ```

use liric::{Compiler, Config};
use tracing::info;

fn main() {
    init_logger();

    run_ret42();
    run_add_args();
}

/// Scenario 1 (spec §8): `define i32 @main() { ret i32 42 }`.
fn run_ret42() {
    let mut compiler = Compiler::create(Config::new()).expect("create compiler");
    compiler
        .feed_ll(b"define i32 @main() {\nentry:\n  ret i32 42\n}\n")
        .expect("feed ret42");
    let addr = compiler.lookup("main").expect("lookup main");
    let main_fn: extern "C" fn() -> i32 = unsafe { std::mem::transmute(addr) };
    let result = main_fn();
    info!(result, "ret42");
    println!("ret42() = {result}");
}

/// Scenario 2 (spec §8): `add(17, 25) == 42`.
fn run_add_args() {
    let mut compiler = Compiler::create(Config::new()).expect("create compiler");
    compiler
        .feed_ll(b"define i32 @add(i32 %a, i32 %b) {\nentry:\n  %s = add i32 %a, %b\n  ret i32 %s\n}\n")
        .expect("feed add");
    let addr = compiler.lookup("add").expect("lookup add");
    let add_fn: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };
    let result = add_fn(17, 25);
    info!(result, "add_args");
    println!("add(17, 25) = {result}");
}

fn init_logger() {
    if let Err(err) = liric_log::Logger::init_logger(liric_log::LoggerConfig::from_env("LIRIC_LOG").unwrap()) {
        eprintln!("failed to initialize logging: {err:?}");
    }
}
