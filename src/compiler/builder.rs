//! ProgramBuilder - assembler for bytecode programs
//!
//! Emits instructions into per-function segments, allocates jump labels and
//! patches them once every segment has a final position, and de-duplicates
//! the constant pool. Hosts and tests use it to produce programs without a
//! parser.
//!
//! ```
//! use jsrt::compiler::{BinaryOp, ProgramBuilder};
//!
//! let mut b = ProgramBuilder::new("sum.js");
//! b.push_number(1.0).push_number(2.0).binary(BinaryOp::Add).halt();
//! let program = b.finish().unwrap();
//! assert_eq!(program.code.len(), 5);
//! ```

use rustc_hash::FxHashMap;

use super::bytecode::{
    BinaryOp, BindingKind, ConstIndex, Constant, FunctionIndex, FunctionKind, FunctionTemplate,
    Op, Program, ScopeKind, SourceMapEntry, UnaryOp,
};
use crate::error::JsError;
use crate::value::{CheapClone, JsString};

/// A jump destination. Emitted as a placeholder and resolved in `finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(u32);

#[derive(Debug, Default)]
struct Segment {
    code: Vec<Op>,
    source_map: Vec<SourceMapEntry>,
    function: Option<FunctionIndex>,
}

/// Builder for [`Program`]s
#[derive(Debug)]
pub struct ProgramBuilder {
    filename: String,
    segments: Vec<Segment>,
    /// Segments being emitted into; the last one is current
    open: Vec<usize>,
    constants: Vec<Constant>,
    string_map: FxHashMap<JsString, ConstIndex>,
    number_map: FxHashMap<u64, ConstIndex>,
    functions: Vec<FunctionTemplate>,
    /// Bound position of each label: (segment, offset within segment)
    labels: Vec<Option<(usize, u32)>>,
}

impl ProgramBuilder {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            segments: vec![Segment::default()],
            open: vec![0],
            constants: Vec::new(),
            string_map: FxHashMap::default(),
            number_map: FxHashMap::default(),
            functions: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// The segment being emitted into; always present since the top-level
    /// segment is never closed
    fn segment(&mut self) -> Option<&mut Segment> {
        let index = self.open.last().copied().unwrap_or(0);
        self.segments.get_mut(index)
    }

    /// Offset of the next instruction within the current segment
    pub fn offset(&self) -> u32 {
        self.open
            .last()
            .and_then(|i| self.segments.get(*i))
            .map_or(0, |s| s.code.len() as u32)
    }

    pub fn emit(&mut self, op: Op) -> &mut Self {
        if let Some(segment) = self.segment() {
            segment.code.push(op);
        }
        self
    }

    /// Attach a source position to the next emitted instruction
    pub fn location(&mut self, line: u32, column: u32) -> &mut Self {
        let offset = self.offset();
        if let Some(segment) = self.segment() {
            segment.source_map.push(SourceMapEntry {
                offset,
                line,
                column,
            });
        }
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Constants
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Index of a string constant, adding it on first use
    pub fn string(&mut self, s: &str) -> ConstIndex {
        if let Some(&index) = self.string_map.get(s) {
            return index;
        }
        let js = JsString::from(s);
        let index = self.constants.len() as ConstIndex;
        self.constants.push(Constant::String(js.cheap_clone()));
        self.string_map.insert(js, index);
        index
    }

    /// Index of a number constant; keyed by bit pattern so -0 and NaN stay distinct
    pub fn number(&mut self, n: f64) -> ConstIndex {
        let bits = n.to_bits();
        if let Some(&index) = self.number_map.get(&bits) {
            return index;
        }
        let index = self.constants.len() as ConstIndex;
        self.constants.push(Constant::Number(n));
        self.number_map.insert(bits, index);
        index
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Labels
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind `label` to the next instruction
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let segment = self.open.last().copied().unwrap_or(0);
        let offset = self.offset();
        if let Some(slot) = self.labels.get_mut(label.0 as usize) {
            *slot = Some((segment, offset));
        }
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Functions
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Start emitting the body of a new function. Instructions go to the
    /// function's own segment until the matching [`end_function`](Self::end_function).
    pub fn begin_function(&mut self, name: &str, kind: FunctionKind, params: &[&str]) -> FunctionIndex {
        let index = self.functions.len() as FunctionIndex;
        self.functions.push(FunctionTemplate {
            name: JsString::from(name),
            kind,
            params: params.iter().map(|p| JsString::from(*p)).collect(),
            rest: false,
            entry: 0,
            line: 0,
            column: 0,
        });
        self.segments.push(Segment {
            function: Some(index),
            ..Segment::default()
        });
        self.open.push(self.segments.len() - 1);
        index
    }

    /// Make the last parameter of the function being built a rest parameter
    pub fn rest_parameter(&mut self) -> &mut Self {
        let function = self
            .open
            .last()
            .and_then(|i| self.segments.get(*i))
            .and_then(|s| s.function);
        if let Some(template) = function.and_then(|f| self.functions.get_mut(f as usize)) {
            template.rest = true;
        }
        self
    }

    pub fn end_function(&mut self) -> &mut Self {
        if self.open.len() > 1 {
            self.open.pop();
        }
        self
    }

    /// Lay out every segment, resolve labels and produce the program.
    /// Each segment ends with an implicit `Halt`.
    pub fn finish(mut self) -> Result<Program, JsError> {
        if self.open.len() > 1 {
            return Err(JsError::internal_error("unterminated function body"));
        }
        let mut bases = Vec::with_capacity(self.segments.len());
        let mut base = 0u32;
        for segment in &mut self.segments {
            segment.code.push(Op::Halt);
            bases.push(base);
            base += segment.code.len() as u32;
        }

        let mut resolved = Vec::with_capacity(self.labels.len());
        for (id, slot) in self.labels.iter().enumerate() {
            let (segment, offset) =
                slot.ok_or_else(|| JsError::internal_error(format!("label {} was never bound", id)))?;
            let base = bases.get(segment).copied().unwrap_or(0);
            resolved.push(base + offset);
        }

        let mut code = Vec::with_capacity(base as usize);
        let mut source_map = Vec::new();
        let mut missing = None;
        for (segment, seg_base) in self.segments.into_iter().zip(bases.iter().copied()) {
            if let Some(f) = segment.function
                && let Some(template) = self.functions.get_mut(f as usize)
            {
                template.entry = seg_base;
                if let Some(first) = segment.source_map.first() {
                    template.line = first.line;
                    template.column = first.column;
                }
            }
            for mut op in segment.code {
                op.map_targets(|label| match resolved.get(label as usize) {
                    Some(&target) => target,
                    None => {
                        missing = Some(label);
                        0
                    }
                });
                code.push(op);
            }
            source_map.extend(segment.source_map.into_iter().map(|e| SourceMapEntry {
                offset: e.offset + seg_base,
                ..e
            }));
        }
        if let Some(label) = missing {
            return Err(JsError::internal_error(format!("unknown label {}", label)));
        }

        Ok(Program {
            filename: self.filename,
            code,
            constants: self.constants,
            functions: self.functions,
            source_map,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Emitters
    // ═══════════════════════════════════════════════════════════════════════════════

    pub fn push_number(&mut self, n: f64) -> &mut Self {
        let index = self.number(n);
        self.emit(Op::PushConst { index })
    }

    pub fn push_string(&mut self, s: &str) -> &mut Self {
        let index = self.string(s);
        self.emit(Op::PushConst { index })
    }

    pub fn push_undefined(&mut self) -> &mut Self {
        self.emit(Op::PushUndefined)
    }

    pub fn push_null(&mut self) -> &mut Self {
        self.emit(Op::PushNull)
    }

    pub fn push_bool(&mut self, b: bool) -> &mut Self {
        self.emit(if b { Op::PushTrue } else { Op::PushFalse })
    }

    pub fn push_this(&mut self) -> &mut Self {
        self.emit(Op::PushThis)
    }

    pub fn push_object(&mut self) -> &mut Self {
        self.emit(Op::PushObject)
    }

    pub fn push_array(&mut self, count: u32) -> &mut Self {
        self.emit(Op::PushArray { count })
    }

    pub fn push_function(&mut self, function: FunctionIndex) -> &mut Self {
        self.emit(Op::PushFunction { function })
    }

    pub fn push_class(&mut self, function: FunctionIndex, extends: bool) -> &mut Self {
        self.emit(Op::PushClass { function, extends })
    }

    pub fn pop(&mut self) -> &mut Self {
        self.emit(Op::Pop)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.emit(Op::Dup)
    }

    pub fn swap(&mut self) -> &mut Self {
        self.emit(Op::Swap)
    }

    pub fn push_scope(&mut self, kind: ScopeKind) -> &mut Self {
        self.emit(Op::PushScope { kind })
    }

    pub fn pop_scope(&mut self) -> &mut Self {
        self.emit(Op::PopScope)
    }

    pub fn declare(&mut self, name: &str, kind: BindingKind) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::Declare { name, kind })
    }

    pub fn initialize(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::Initialize { name })
    }

    /// `Declare` followed by `Initialize` with the value on top of the stack
    pub fn define(&mut self, name: &str, kind: BindingKind) -> &mut Self {
        self.declare(name, kind).initialize(name)
    }

    pub fn load(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::Load { name })
    }

    pub fn store(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::Store { name })
    }

    pub fn type_of_name(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::TypeOfName { name })
    }

    pub fn get_named(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::GetNamed { name })
    }

    pub fn set_named(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::SetNamed { name })
    }

    pub fn get_field(&mut self) -> &mut Self {
        self.emit(Op::GetField)
    }

    pub fn set_field(&mut self) -> &mut Self {
        self.emit(Op::SetField)
    }

    /// `[obj, v] -> [obj]` with `obj.name = v` as an own property
    pub fn init_named(&mut self, name: &str) -> &mut Self {
        self.push_string(name).swap().emit(Op::InitField)
    }

    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.emit(Op::Call { argc })
    }

    pub fn call_method(&mut self, argc: u32) -> &mut Self {
        self.emit(Op::CallMethod { argc })
    }

    /// `[obj] -> [obj, obj.name]`, ready for arguments and `call_method`
    pub fn method(&mut self, name: &str) -> &mut Self {
        self.dup().get_named(name)
    }

    pub fn construct(&mut self, argc: u32) -> &mut Self {
        self.emit(Op::New { argc })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.emit(Op::Return)
    }

    pub fn throw(&mut self) -> &mut Self {
        self.emit(Op::Throw)
    }

    pub fn halt(&mut self) -> &mut Self {
        self.emit(Op::Halt)
    }

    pub fn binary(&mut self, op: BinaryOp) -> &mut Self {
        self.emit(Op::Binary { operator: op })
    }

    pub fn unary(&mut self, op: UnaryOp) -> &mut Self {
        self.emit(Op::Unary { operator: op })
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit(Op::Jump { target: label.0 })
    }

    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.emit(Op::JumpIfFalse { target: label.0 })
    }

    pub fn jump_if_true(&mut self, label: Label) -> &mut Self {
        self.emit(Op::JumpIfTrue { target: label.0 })
    }

    pub fn jump_if_nullish(&mut self, label: Label) -> &mut Self {
        self.emit(Op::JumpIfNullish { target: label.0 })
    }

    pub fn jump_if_not_nullish(&mut self, label: Label) -> &mut Self {
        self.emit(Op::JumpIfNotNullish { target: label.0 })
    }

    pub fn try_begin(&mut self, catch: Option<Label>, finally: Option<Label>) -> &mut Self {
        self.emit(Op::TryBegin {
            catch: catch.map(|l| l.0),
            finally: finally.map(|l| l.0),
        })
    }

    pub fn try_end(&mut self) -> &mut Self {
        self.emit(Op::TryEnd)
    }

    pub fn end_finally(&mut self) -> &mut Self {
        self.emit(Op::EndFinally)
    }

    pub fn push_label(&mut self, name: Option<&str>, break_to: Label, continue_to: Option<Label>) -> &mut Self {
        let label = name.map(|n| self.string(n));
        self.emit(Op::PushLabel {
            label,
            break_target: break_to.0,
            continue_target: continue_to.map(|l| l.0),
        })
    }

    pub fn pop_label(&mut self) -> &mut Self {
        self.emit(Op::PopLabel)
    }

    pub fn break_to(&mut self, name: Option<&str>) -> &mut Self {
        let label = name.map(|n| self.string(n));
        self.emit(Op::Break { label })
    }

    pub fn continue_to(&mut self, name: Option<&str>) -> &mut Self {
        let label = name.map(|n| self.string(n));
        self.emit(Op::Continue { label })
    }

    pub fn iterator_next(&mut self, done: Label) -> &mut Self {
        self.emit(Op::IteratorNext { done: done.0 })
    }

    pub fn await_value(&mut self) -> &mut Self {
        self.emit(Op::Await)
    }

    pub fn yield_value(&mut self) -> &mut Self {
        self.emit(Op::Yield)
    }

    pub fn import(&mut self, specifier: &str) -> &mut Self {
        let specifier = self.string(specifier);
        self.emit(Op::Import { specifier })
    }

    pub fn export(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Op::Export { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_deduplicated() {
        let mut b = ProgramBuilder::new("t.js");
        let a = b.string("x");
        let c = b.string("x");
        let n1 = b.number(1.0);
        let n2 = b.number(1.0);
        let z = b.number(-0.0);
        assert_eq!(a, c);
        assert_eq!(n1, n2);
        assert_ne!(n1, z);
        let program = b.finish().unwrap();
        assert_eq!(program.constants.len(), 3);
    }

    #[test]
    fn test_forward_jump_is_patched() {
        let mut b = ProgramBuilder::new("t.js");
        let end = b.new_label();
        b.push_bool(true).jump_if_true(end).push_number(1.0).bind(end).halt();
        let program = b.finish().unwrap();
        assert_eq!(program.code.get(1), Some(&Op::JumpIfTrue { target: 3 }));
    }

    #[test]
    fn test_function_segments_are_relocated() {
        let mut b = ProgramBuilder::new("t.js");
        let f = b.begin_function("f", FunctionKind::Normal, &["x"]);
        let skip = b.new_label();
        b.location(2, 3);
        b.load("x").jump(skip).bind(skip).ret();
        b.end_function();
        b.push_function(f).halt();
        let program = b.finish().unwrap();

        // main: PushFunction, Halt, implicit Halt
        let template = program.function(f).unwrap();
        assert_eq!(template.entry, 3);
        assert_eq!((template.line, template.column), (2, 3));
        assert_eq!(program.code.get(4), Some(&Op::Jump { target: 5 }));
        assert_eq!(program.location(3), Some((2, 3)));
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut b = ProgramBuilder::new("t.js");
        let never = b.new_label();
        b.jump(never);
        assert!(b.finish().is_err());
    }

    #[test]
    fn test_rest_parameter_flag() {
        let mut b = ProgramBuilder::new("t.js");
        let f = b.begin_function("f", FunctionKind::Normal, &["a", "rest"]);
        b.rest_parameter().push_undefined().ret().end_function();
        let program = b.finish().unwrap();
        assert!(program.function(f).unwrap().rest);
    }
}
