//! Bytecode instruction set and program format
//!
//! Programs are produced by a [`Compiler`](super::Compiler) (or assembled
//! with [`ProgramBuilder`](super::ProgramBuilder)) and executed by the
//! stack-based VM. Every operand is a small integer: names and literals are
//! indices into the constant pool, jumps are absolute instruction offsets,
//! and functions are indices into the template table.
//!
//! All types derive serde so a program can be shipped as JSON.

use serde::{Deserialize, Serialize};

use crate::value::JsString;

/// Constant pool index
pub type ConstIndex = u32;

/// Absolute instruction offset
pub type JumpTarget = u32;

/// Function template index
pub type FunctionIndex = u32;

/// Bytecode instruction
///
/// Stack effects are written `[before] -> [after]` with the top on the right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Op {
    // ═══════════════════════════════════════════════════════════════════════════════
    // Scopes
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Enter a child scope
    PushScope { kind: ScopeKind },

    /// Leave the current scope, running its disposals
    PopScope,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Stack
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[a] -> []`
    Pop,

    /// `[a] -> [a, a]`
    Dup,

    /// `[a, b] -> [b, a]`
    Swap,

    /// Push a copy of the value `depth` slots below the top (0 = top)
    PushValue { depth: u32 },

    PushUndefined,
    PushNull,
    PushUninitialized,
    PushTrue,
    PushFalse,

    /// Push `constants[index]`
    PushConst { index: ConstIndex },

    PushThis,

    /// Push a new empty object
    PushObject,

    /// `[v1 .. vn] -> [array]`
    PushArray { count: u32 },

    /// Push a closure over the current scope
    PushFunction { function: FunctionIndex },

    /// `[parent?] -> [class]`. Pops the parent constructor when `extends`.
    PushClass {
        function: FunctionIndex,
        extends: bool,
    },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Bindings
    // ═══════════════════════════════════════════════════════════════════════════════
    /// Declare `name` in the current scope (`var` goes to the nearest function scope)
    Declare { name: ConstIndex, kind: BindingKind },

    /// `[v] -> []`. Initialize a declared binding, leaving its dead zone.
    /// `using` bindings register their disposer here.
    Initialize { name: ConstIndex },

    /// `[] -> [v]`
    Load { name: ConstIndex },

    /// `[v] -> []`. Assign an initialized binding.
    Store { name: ConstIndex },

    /// `[] -> [type]`. `typeof name`; unknown names give "undefined".
    TypeOfName { name: ConstIndex },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Fields
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[obj, key] -> [v]`
    GetField,

    /// `[obj, key, v] -> []`
    SetField,

    /// `[obj] -> [v]`
    GetNamed { name: ConstIndex },

    /// `[obj, v] -> []`
    SetNamed { name: ConstIndex },

    /// `[obj, key] -> [deleted]`
    DelField,

    /// `[obj, key, v] -> [obj]`. Define an own property (object literals).
    InitField,

    /// `[class, key, fn] -> [class]`. Define a method on the class prototype,
    /// or on the class itself when static.
    DefineMethod { is_static: bool },

    /// `[array, v] -> [array]`
    Append,

    /// `[array, iterable] -> [array]`
    Spread,

    /// `[obj, source] -> [obj]`. Copy own enumerable properties.
    CopyFields,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[callee, a1 .. an] -> [result]` with `this` undefined
    Call { argc: u32 },

    /// `[this, callee, a1 .. an] -> [result]`
    CallMethod { argc: u32 },

    /// `[callee, a1 .. an] -> [object]`
    New { argc: u32 },

    /// `[a1 .. an] -> [undefined]`. Run the parent constructor on `this`.
    SuperCall { argc: u32 },

    /// `[this, callee, args_array] -> [result]`
    CallSpread,

    /// `[v] -> ` return from the current function
    Return,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Control flow
    // ═══════════════════════════════════════════════════════════════════════════════
    Jump { target: JumpTarget },

    /// `[cond] -> []`
    JumpIfFalse { target: JumpTarget },

    /// `[cond] -> []`
    JumpIfTrue { target: JumpTarget },

    /// Nullish: `[v] -> [undefined]` and jump. Otherwise `[v] -> [v]`.
    JumpIfNullish { target: JumpTarget },

    /// `[v] -> [v]`; jumps unless `v` is nullish
    JumpIfNotNullish { target: JumpTarget },

    /// `[v] -> ` throw
    Throw,

    /// Open a protected region. Handlers are entered with the operand stack
    /// restored to its depth at this point; a catch handler also receives
    /// the exception value.
    TryBegin {
        catch: Option<JumpTarget>,
        finally: Option<JumpTarget>,
    },

    /// Close the innermost protected region, entering its finally block
    /// with a normal completion when it has one
    TryEnd,

    /// End of a finally block: re-apply the pending completion
    EndFinally,

    /// Open a breakable region (loop, switch or labeled block)
    PushLabel {
        label: Option<ConstIndex>,
        break_target: JumpTarget,
        continue_target: Option<JumpTarget>,
    },

    PopLabel,

    /// Leave the innermost (or named) breakable region
    Break { label: Option<ConstIndex> },

    /// Jump to the continue target of the innermost (or named) loop
    Continue { label: Option<ConstIndex> },

    /// Stop; completes with the top of the stack if any
    Halt,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Operators
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[a, b] -> [a op b]`
    Binary { operator: BinaryOp },

    /// `[a] -> [op a]`
    Unary { operator: UnaryOp },

    /// `[a] -> [ToNumber(a) + 1]`
    Increment,

    /// `[a] -> [ToNumber(a) - 1]`
    Decrement,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Iteration
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[iterable] -> [iterator]`
    GetIterator,

    /// `[iterable] -> [iterator]` via `Symbol.asyncIterator`, falling back
    /// to the sync iterator
    GetAsyncIterator,

    /// `[iterator] -> [iterator, value]`, or jump to `done` leaving `[iterator]`
    IteratorNext { done: JumpTarget },

    /// `[obj] -> [iterator]` over enumerable string keys
    ForInKeys,

    /// `[array] -> [array.slice(from)]`
    Rest { from: u32 },

    /// `[source, k1 .. kn] -> [rest]`. Copy own enumerable properties of
    /// `source` except the `excluded` keys on top of it.
    RestObject { excluded: u32 },

    // ═══════════════════════════════════════════════════════════════════════════════
    // Suspension
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[v] -> [settled]`
    Await,

    /// `[v] -> [sent]`
    Yield,

    // ═══════════════════════════════════════════════════════════════════════════════
    // Modules
    // ═══════════════════════════════════════════════════════════════════════════════
    /// `[] -> [namespace]`
    Import { specifier: ConstIndex },

    /// `[v] -> []`. Set an export of the running module.
    Export { name: ConstIndex },

    /// `[namespace] -> []`. Re-export every named export of `namespace`.
    ExportAll,
}

impl Op {
    /// Rewrite every jump target in this instruction
    pub fn map_targets(&mut self, mut f: impl FnMut(JumpTarget) -> JumpTarget) {
        match self {
            Op::Jump { target }
            | Op::JumpIfFalse { target }
            | Op::JumpIfTrue { target }
            | Op::JumpIfNullish { target }
            | Op::JumpIfNotNullish { target } => *target = f(*target),
            Op::IteratorNext { done } => *done = f(*done),
            Op::TryBegin { catch, finally } => {
                *catch = catch.map(&mut f);
                *finally = finally.map(&mut f);
            }
            Op::PushLabel {
                break_target,
                continue_target,
                ..
            } => {
                *break_target = f(*break_target);
                *continue_target = continue_target.map(&mut f);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
}

/// Declaration kind of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    Var,
    Let,
    Const,
    Using,
    AwaitUsing,
}

impl BindingKind {
    /// Starts in the temporal dead zone
    pub fn is_lexical(self) -> bool {
        !matches!(self, BindingKind::Var)
    }

    /// Cannot be assigned after initialization
    pub fn is_immutable(self) -> bool {
        matches!(
            self,
            BindingKind::Const | BindingKind::Using | BindingKind::AwaitUsing
        )
    }
}

/// Kind of a scope in the scope tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    /// The global scope
    Root,
    /// A script evaluation; its declarations live in the root
    Script,
    Module,
    Function,
    AsyncFunction,
    Generator,
    Block,
    /// Parent of every scheduled task and suspended body
    Task,
}

impl ScopeKind {
    /// Target of `var` declarations and the stop point of name resolution
    pub fn is_function_boundary(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::AsyncFunction | ScopeKind::Generator | ScopeKind::Module
        )
    }
}

/// Literal in the constant pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Number(f64),
    String(JsString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Normal,
    Arrow,
    Method,
    Async,
    AsyncArrow,
    Generator,
    AsyncGenerator,
    ClassConstructor,
}

impl FunctionKind {
    pub fn is_async(self) -> bool {
        matches!(self, FunctionKind::Async | FunctionKind::AsyncArrow | FunctionKind::AsyncGenerator)
    }

    pub fn is_arrow(self) -> bool {
        matches!(self, FunctionKind::Arrow | FunctionKind::AsyncArrow)
    }

    pub fn is_generator(self) -> bool {
        matches!(self, FunctionKind::Generator | FunctionKind::AsyncGenerator)
    }

    /// Usable with `new`
    pub fn is_constructor(self) -> bool {
        matches!(self, FunctionKind::Normal | FunctionKind::ClassConstructor)
    }

    /// Scope kind of a call's function scope
    pub fn scope_kind(self) -> ScopeKind {
        match self {
            FunctionKind::Async | FunctionKind::AsyncArrow => ScopeKind::AsyncFunction,
            FunctionKind::Generator | FunctionKind::AsyncGenerator => ScopeKind::Generator,
            _ => ScopeKind::Function,
        }
    }
}

/// Static description of a function body inside a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTemplate {
    pub name: JsString,
    pub kind: FunctionKind,
    /// Parameter names, bound as `var` in the function scope
    pub params: Vec<JsString>,
    /// The last parameter collects the remaining arguments
    #[serde(default)]
    pub rest: bool,
    /// Offset of the first instruction of the body
    pub entry: JumpTarget,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl FunctionTemplate {
    /// Value of the function's `length` property
    pub fn length(&self) -> u32 {
        let declared = self.params.len() as u32;
        if self.rest {
            declared.saturating_sub(1)
        } else {
            declared
        }
    }
}

/// Source map entry for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    pub offset: u32,
    pub line: u32,
    pub column: u32,
}

/// A compiled program. Immutable once built and shared by `Rc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub filename: String,
    pub code: Vec<Op>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub functions: Vec<FunctionTemplate>,
    /// Sorted by offset
    #[serde(default)]
    pub source_map: Vec<SourceMapEntry>,
}

impl Program {
    pub fn op(&self, offset: u32) -> Option<Op> {
        self.code.get(offset as usize).copied()
    }

    pub fn constant(&self, index: ConstIndex) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// String constant (names, specifiers)
    pub fn name(&self, index: ConstIndex) -> Option<&JsString> {
        match self.constant(index) {
            Some(Constant::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn function(&self, index: FunctionIndex) -> Option<&FunctionTemplate> {
        self.functions.get(index as usize)
    }

    /// Source position of the instruction at `offset`
    pub fn location(&self, offset: u32) -> Option<(u32, u32)> {
        let idx = self.source_map.partition_point(|e| e.offset <= offset);
        idx.checked_sub(1)
            .and_then(|i| self.source_map.get(i))
            .map(|e| (e.line, e.column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_uses_preceding_entry() {
        let program = Program {
            filename: "a.js".to_string(),
            code: vec![Op::PushNull, Op::Pop, Op::Halt],
            constants: Vec::new(),
            functions: Vec::new(),
            source_map: vec![
                SourceMapEntry { offset: 0, line: 1, column: 1 },
                SourceMapEntry { offset: 2, line: 3, column: 5 },
            ],
        };
        assert_eq!(program.location(0), Some((1, 1)));
        assert_eq!(program.location(1), Some((1, 1)));
        assert_eq!(program.location(2), Some((3, 5)));
    }

    #[test]
    fn test_map_targets_rewrites_optional_targets() {
        let mut op = Op::TryBegin {
            catch: Some(1),
            finally: None,
        };
        op.map_targets(|t| t + 10);
        assert_eq!(
            op,
            Op::TryBegin {
                catch: Some(11),
                finally: None
            }
        );
    }

    #[test]
    fn test_program_json_shape() {
        let json = r#"{
            "filename": "main.js",
            "code": [{"op": "PushConst", "index": 0}, {"op": "Halt"}],
            "constants": [{"Number": 42.0}]
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.op(0), Some(Op::PushConst { index: 0 }));
        assert_eq!(program.constant(0), Some(&Constant::Number(42.0)));
    }

    #[test]
    fn test_operator_instructions_round_trip() {
        let code = vec![
            Op::Binary { operator: BinaryOp::StrictEq },
            Op::Unary { operator: UnaryOp::Not },
        ];
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(
            json,
            r#"[{"op":"Binary","operator":"StrictEq"},{"op":"Unary","operator":"Not"}]"#
        );
        let back: Vec<Op> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn test_rest_parameter_not_counted_in_length() {
        let template = FunctionTemplate {
            name: JsString::from("f"),
            kind: FunctionKind::Normal,
            params: vec![JsString::from("a"), JsString::from("rest")],
            rest: true,
            entry: 0,
            line: 0,
            column: 0,
        };
        assert_eq!(template.length(), 1);
    }
}
