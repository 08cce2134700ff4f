//! Host services the runtime depends on.
//!
//! The task scheduler reads time through [`TimeProvider`] and the `console`
//! builtin writes through [`ConsoleProvider`]. Hosts embedding the runtime can
//! swap either; tests use [`ManualTimeProvider`] to drive timers
//! deterministically.

mod std_impl;

pub use std_impl::{ManualTimeProvider, StdConsoleProvider, StdTimeProvider};

/// Source of time for timers and the task loop.
pub trait TimeProvider {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Milliseconds on a monotonic clock. Task due times are measured
    /// against this clock.
    fn monotonic_millis(&self) -> u64;

    /// Block until roughly `millis` milliseconds have passed.
    /// Called by `run_until_idle` when only future timers remain.
    fn sleep(&self, millis: u64);
}

/// A time provider frozen at zero. Timers with a delay never become due.
pub struct NoOpTimeProvider;

impl TimeProvider for NoOpTimeProvider {
    fn now_millis(&self) -> i64 {
        0
    }

    fn monotonic_millis(&self) -> u64 {
        0
    }

    fn sleep(&self, _millis: u64) {}
}

/// Log level for console output.
///
/// Maps to the different console methods: console.log(), console.warn(), etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

/// Sink for `console.*` output.
pub trait ConsoleProvider {
    fn write(&self, level: ConsoleLevel, message: &str);
}

/// Discards all console output.
pub struct NoOpConsoleProvider;

impl ConsoleProvider for NoOpConsoleProvider {
    fn write(&self, _level: ConsoleLevel, _message: &str) {}
}
