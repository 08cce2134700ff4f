//! Program production.
//!
//! The engine never parses source text itself. A [`Compiler`] turns source
//! into a [`Program`]; the default [`BytecodeCompiler`] accepts programs
//! serialized as JSON, and [`ProgramBuilder`] assembles them in memory.

mod builder;
pub mod bytecode;

pub use builder::{Label, ProgramBuilder};
pub use bytecode::{
    BinaryOp, BindingKind, ConstIndex, Constant, FunctionIndex, FunctionKind, FunctionTemplate,
    JumpTarget, Op, Program, ScopeKind, SourceMapEntry, UnaryOp,
};

use thiserror::Error;

use crate::error::{JsError, SourceLocation};

/// How a source text is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Declarations land in the global scope; evaluation yields the
    /// completion value
    Script,
    /// Own module scope; evaluation yields a promise of the namespace
    Module,
}

/// Failure reported by a compiler
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({line}:{column})")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }

    /// Surface as a `SyntaxError` located in `filename`
    pub fn into_js_error(self, filename: &str) -> JsError {
        JsError::SyntaxError {
            message: self.message,
            location: SourceLocation {
                file: Some(filename.to_string()),
                line: self.line,
                column: self.column,
            },
        }
    }
}

/// External collaborator that turns source text into a program
pub trait Compiler {
    fn compile(&self, source: &str, filename: &str, mode: EvalMode) -> Result<Program, CompileError>;
}

/// Compiler for JSON-serialized programs.
///
/// The program's `filename` is replaced by the name it was loaded under.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeCompiler;

impl Compiler for BytecodeCompiler {
    fn compile(&self, source: &str, filename: &str, _mode: EvalMode) -> Result<Program, CompileError> {
        let mut program: Program = serde_json::from_str(source)
            .map_err(|e| CompileError::new(e.to_string(), e.line() as u32, e.column() as u32))?;
        program.filename = filename.to_string();
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytecode_compiler_round_trips_builder_output() {
        let mut b = ProgramBuilder::new("x.js");
        b.push_number(7.0).halt();
        let program = b.finish().unwrap();
        let json = serde_json::to_string(&program).unwrap();

        let loaded = BytecodeCompiler.compile(&json, "y.js", EvalMode::Script).unwrap();
        assert_eq!(loaded.filename, "y.js");
        assert_eq!(loaded.code, program.code);
    }

    #[test]
    fn test_malformed_program_is_a_syntax_error() {
        let err = BytecodeCompiler
            .compile("{ not json", "bad.js", EvalMode::Module)
            .unwrap_err()
            .into_js_error("bad.js");
        assert_eq!(err.error_name(), "SyntaxError");
        assert!(err.to_string().contains("bad.js:1:"));
    }
}
