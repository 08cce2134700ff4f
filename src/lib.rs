//! Embeddable JavaScript runtime
//!
//! Programs arrive as bytecode produced by a [`Compiler`]; the engine itself
//! never parses source text. A [`Context`] runs them on a stack-based VM,
//! keeps every object in a chunk heap whose edges are tracked explicitly,
//! and reclaims unreachable cycles when scopes are popped.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use jsrt::compiler::{BinaryOp, ProgramBuilder};
//! use jsrt::{EvalMode, Runtime, Value, create_context};
//!
//! let mut b = ProgramBuilder::new("main.js");
//! b.push_number(1.0).push_number(2.0).binary(BinaryOp::Add).halt();
//! let program = Rc::new(b.finish().unwrap());
//!
//! let mut ctx = create_context(Runtime::new()).unwrap();
//! let result = ctx.eval_program(program, EvalMode::Script).unwrap();
//! assert_eq!(result.get(), Value::Number(3.0));
//! ```

pub mod compiler;
pub mod error;
pub mod gc;
pub mod handle;
pub mod interpreter;
pub mod platform;
pub mod string_dict;
pub mod value;

pub use compiler::{BytecodeCompiler, CompileError, Compiler, EvalMode, Program, ProgramBuilder};
pub use error::JsError;
pub use gc::GcStats;
pub use handle::Handle;
pub use interpreter::{Context, ContextState, ErrorCallback};
pub use value::{JsString, Kind, ObjectRef, PropertyKey, Value};

use std::path::PathBuf;
use std::rc::Rc;

use platform::{ConsoleProvider, StdConsoleProvider, StdTimeProvider, TimeProvider};

/// Call depth at which a `RangeError` is thrown
const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Configuration shared by the contexts created from it.
///
/// Cloning is cheap; providers are reference counted.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) compiler: Rc<dyn Compiler>,
    pub(crate) time: Rc<dyn TimeProvider>,
    pub(crate) console: Rc<dyn ConsoleProvider>,
    /// Directory relative module specifiers resolve against at the top level
    pub(crate) base_dir: PathBuf,
    /// Microtasks `run_until_idle` drains per call; 0 means no limit
    pub(crate) microtask_budget: usize,
    pub(crate) max_call_depth: usize,
}

impl Runtime {
    /// Create a runtime with the bytecode compiler, the system clock and
    /// stdout/stderr console output
    pub fn new() -> Self {
        Self {
            compiler: Rc::new(BytecodeCompiler),
            time: Rc::new(StdTimeProvider::new()),
            console: Rc::new(StdConsoleProvider::new()),
            base_dir: std::env::current_dir().unwrap_or_default(),
            microtask_budget: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_compiler(mut self, compiler: Rc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_time_provider(mut self, time: Rc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn with_console_provider(mut self, console: Rc<dyn ConsoleProvider>) -> Self {
        self.console = console;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Limit how many microtasks one `run_until_idle` call drains
    ///
    /// ```
    /// use jsrt::Runtime;
    ///
    /// let runtime = Runtime::new().with_microtask_budget(1000);
    /// assert_eq!(runtime.microtask_budget(), 1000);
    /// ```
    pub fn with_microtask_budget(mut self, budget: usize) -> Self {
        self.microtask_budget = budget;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn microtask_budget(&self) -> usize {
        self.microtask_budget
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("base_dir", &self.base_dir)
            .field("microtask_budget", &self.microtask_budget)
            .field("max_call_depth", &self.max_call_depth)
            .finish_non_exhaustive()
    }
}

/// Create a context with the realm and all globals installed
pub fn create_context(runtime: Runtime) -> Result<Context, JsError> {
    Context::new(runtime)
}
