//! JavaScript value representation
//!
//! The tagged [`Value`] record, the totally ordered [`Kind`] enumeration used
//! for capability tests, and the object records stored in heap chunks.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use crate::compiler::bytecode::{BindingKind, Program};
use crate::error::JsError;
use crate::gc::ChunkId;
use crate::interpreter::Context;
use crate::interpreter::bytecode_vm::Vm;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at the call site that a clone only bumps a reference
/// count. Plain `.clone()` on a type without this marker may copy data.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

// ═══════════════════════════════════════════════════════════════════════════════
// Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// The kind of a runtime value.
///
/// Kinds are totally ordered and the order carries meaning: every kind at or
/// above [`Kind::Object`] supports field dispatch, and every kind at or above
/// [`Kind::Callable`] can be invoked. The order comes from [`Kind::ordinal`],
/// not from the declaration order of the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Temporal dead zone marker for `let`/`const` bindings
    Uninitialized,
    /// A propagating exception
    Error,
    /// A captured suspension point (`await` / `yield`)
    Interrupt,
    Null,
    Undefined,
    Number,
    String,
    Boolean,
    Symbol,
    Object,
    Array,
    /// Invocable objects without their own body (bound functions)
    Callable,
    NativeFunction,
    /// Native functions written as resumable stage machines
    AsyncNativeFunction,
    /// Bytecode functions and class constructors
    Function,
}

impl Kind {
    /// Every kind, in ascending order.
    pub const ALL: [Kind; 15] = [
        Kind::Uninitialized,
        Kind::Error,
        Kind::Interrupt,
        Kind::Null,
        Kind::Undefined,
        Kind::Number,
        Kind::String,
        Kind::Boolean,
        Kind::Symbol,
        Kind::Object,
        Kind::Array,
        Kind::Callable,
        Kind::NativeFunction,
        Kind::AsyncNativeFunction,
        Kind::Function,
    ];

    /// Position of this kind in the capability order.
    pub const fn ordinal(self) -> u8 {
        match self {
            Kind::Uninitialized => 0,
            Kind::Error => 1,
            Kind::Interrupt => 2,
            Kind::Null => 3,
            Kind::Undefined => 4,
            Kind::Number => 5,
            Kind::String => 6,
            Kind::Boolean => 7,
            Kind::Symbol => 8,
            Kind::Object => 9,
            Kind::Array => 10,
            Kind::Callable => 11,
            Kind::NativeFunction => 12,
            Kind::AsyncNativeFunction => 13,
            Kind::Function => 14,
        }
    }

    /// Supports `getField`/`setField`/`delField` dispatch
    pub fn is_object(self) -> bool {
        self >= Kind::Object
    }

    /// Can be invoked
    pub fn is_callable(self) -> bool {
        self >= Kind::Callable
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Uninitialized => "uninitialized",
            Kind::Error => "error",
            Kind::Interrupt => "interrupt",
            Kind::Null => "null",
            Kind::Undefined => "undefined",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Boolean => "boolean",
            Kind::Symbol => "symbol",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Callable => "callable",
            Kind::NativeFunction => "native function",
            Kind::AsyncNativeFunction => "async native function",
            Kind::Function => "function",
        }
    }
}

impl PartialOrd for Kind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Kind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Values
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference to an object chunk in the heap
pub type ObjectRef = ChunkId;

/// A JavaScript value
#[derive(Clone, Default)]
pub enum Value {
    Uninitialized,
    Null,
    #[default]
    Undefined,
    Number(f64),
    String(JsString),
    Boolean(bool),
    Symbol(JsSymbol),
    Object(ObjectRef),
}

impl Value {
    /// Check if this value is null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Value::Uninitialized)
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Kind of a non-object value. Objects need the heap to tell an array
    /// from a function, so they return `None` here.
    pub fn primitive_kind(&self) -> Option<Kind> {
        match self {
            Value::Uninitialized => Some(Kind::Uninitialized),
            Value::Null => Some(Kind::Null),
            Value::Undefined => Some(Kind::Undefined),
            Value::Number(_) => Some(Kind::Number),
            Value::String(_) => Some(Kind::String),
            Value::Boolean(_) => Some(Kind::Boolean),
            Value::Symbol(_) => Some(Kind::Symbol),
            Value::Object(_) => None,
        }
    }

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Uninitialized | Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Symbol(_) | Value::Object(_) => true,
        }
    }

    /// `===`. NaN is never equal to itself.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined)
            | (Value::Null, Value::Null)
            | (Value::Uninitialized, Value::Uninitialized) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }

    /// SameValueZero: like `===` except NaN equals NaN.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// The `copy` entry of the type table: primitives copy by value and
    /// objects copy by reference.
    pub fn copy(&self) -> Value {
        self.clone()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uninitialized => write!(f, "<uninitialized>"),
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Symbol(s) => match &s.description {
                Some(d) => write!(f, "Symbol({})", d),
                None => write!(f, "Symbol()"),
            },
            Value::Object(id) => write!(f, "[object #{}]", id.index()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(JsString::from(s))
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

/// Format a number the way `String(n)` does for the common cases.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Strings and symbols
// ═══════════════════════════════════════════════════════════════════════════════

/// Reference-counted string for efficient string handling
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for JsString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(s.into())
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(s.into())
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add<&str> for JsString {
    type Output = JsString;

    fn add(self, other: &str) -> JsString {
        let mut s = String::from(&*self.0);
        s.push_str(other);
        JsString::from(s)
    }
}

/// JavaScript Symbol primitive. Identity is the id; the description is
/// informational.
#[derive(Clone, Debug)]
pub struct JsSymbol {
    id: u64,
    pub description: Option<JsString>,
}

impl JsSymbol {
    pub fn new(id: u64, description: Option<JsString>) -> Self {
        Self { id, description }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for JsSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JsSymbol {}

impl std::hash::Hash for JsSymbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Property keys
// ═══════════════════════════════════════════════════════════════════════════════

/// Property key. Canonical array-index strings are normalized to `Index`
/// so `a[1]` and `a["1"]` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    String(JsString),
    Symbol(JsSymbol),
    Index(u32),
}

impl PropertyKey {
    /// Parse a canonical array index ("0", "17", never "01" or "4294967295")
    pub fn parse_index(s: &str) -> Option<u32> {
        if s.is_empty() || s.len() > 10 {
            return None;
        }
        if s.len() > 1 && s.starts_with('0') {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let n: u64 = s.parse().ok()?;
        if n < u32::MAX as u64 {
            Some(n as u32)
        } else {
            None
        }
    }

    /// Key for a numeric subscript; non-index numbers become string keys
    pub fn from_number(n: f64) -> Self {
        if n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64 {
            PropertyKey::Index(n as u32)
        } else {
            PropertyKey::String(JsString::from(number_to_string(n)))
        }
    }

    pub fn as_index(&self) -> Option<u32> {
        match self {
            PropertyKey::Index(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, PropertyKey::Symbol(_))
    }

    /// Key as a JavaScript value (strings for index keys)
    pub fn to_value(&self) -> Value {
        match self {
            PropertyKey::String(s) => Value::String(s.cheap_clone()),
            PropertyKey::Symbol(s) => Value::Symbol(s.clone()),
            PropertyKey::Index(i) => Value::String(JsString::from(i.to_string())),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        match PropertyKey::parse_index(s) {
            Some(i) => PropertyKey::Index(i),
            None => PropertyKey::String(JsString::from(s)),
        }
    }
}

impl From<JsString> for PropertyKey {
    fn from(s: JsString) -> Self {
        match PropertyKey::parse_index(s.as_str()) {
            Some(i) => PropertyKey::Index(i),
            None => PropertyKey::String(s),
        }
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(s) => write!(f, "{}", s),
            PropertyKey::Index(i) => write!(f, "{}", i),
            PropertyKey::Symbol(sym) => match &sym.description {
                Some(d) => write!(f, "Symbol({})", d),
                None => write!(f, "Symbol()"),
            },
        }
    }
}

/// Hashable wrapper implementing SameValueZero, used for `Set`/`Map` keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Uninitialized,
    Undefined,
    Null,
    Boolean(bool),
    Number(u64),
    String(JsString),
    Symbol(u64),
    Object(ChunkId),
}

impl ValueKey {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Uninitialized => ValueKey::Uninitialized,
            Value::Undefined => ValueKey::Undefined,
            Value::Null => ValueKey::Null,
            Value::Boolean(b) => ValueKey::Boolean(*b),
            Value::Number(n) => {
                // every NaN collapses to one key and -0 to +0
                let bits = if n.is_nan() {
                    f64::NAN.to_bits()
                } else if *n == 0.0 {
                    0u64
                } else {
                    n.to_bits()
                };
                ValueKey::Number(bits)
            }
            Value::String(s) => ValueKey::String(s.cheap_clone()),
            Value::Symbol(s) => ValueKey::Symbol(s.id()),
            Value::Object(id) => ValueKey::Object(*id),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Objects
// ═══════════════════════════════════════════════════════════════════════════════

pub type PropertyMap = IndexMap<PropertyKey, Value, FxBuildHasher>;

/// An object record owned by a heap chunk.
///
/// Every object id reachable from this record (prototype, property values,
/// payload) must be mirrored by a parent/child edge in the chunk graph;
/// [`JsObject::references`] lists them.
#[derive(Debug)]
pub struct JsObject {
    pub prototype: Option<ObjectRef>,
    pub properties: PropertyMap,
    pub kind: ObjectKind,
}

impl JsObject {
    pub fn new(prototype: Option<ObjectRef>, kind: ObjectKind) -> Self {
        Self {
            prototype,
            properties: PropertyMap::default(),
            kind,
        }
    }

    pub fn ordinary(prototype: Option<ObjectRef>) -> Self {
        Self::new(prototype, ObjectKind::Ordinary)
    }

    pub fn get_own(&self, key: &PropertyKey) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Kind of the value that refers to this object
    pub fn value_kind(&self) -> Kind {
        self.kind.kind()
    }

    /// Every chunk this object keeps alive, with multiplicity.
    pub fn references(&self) -> Vec<ChunkId> {
        let mut refs = Vec::new();
        if let Some(proto) = self.prototype {
            refs.push(proto);
        }
        push_values(&mut refs, self.properties.values());
        self.kind.collect_references(&mut refs);
        refs
    }
}

pub(crate) fn push_values<'a>(refs: &mut Vec<ChunkId>, values: impl IntoIterator<Item = &'a Value>) {
    refs.extend(values.into_iter().filter_map(Value::as_object));
}

/// Object payload. The variant decides the object's [`Kind`].
#[derive(Debug)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Error,
    Closure(Closure),
    Native(NativeFunction),
    AsyncNative(AsyncNativeFunction),
    Bound(BoundFunction),
    Promise(PromiseState),
    Generator(GeneratorState),
    AsyncGenerator(AsyncGeneratorState),
    Coroutine(Coroutine),
    Set(IndexMap<ValueKey, Value, FxBuildHasher>),
    Map(IndexMap<ValueKey, (Value, Value), FxBuildHasher>),
    ArrayIterator(ArrayIterator),
    ListIterator(ListIterator),
    /// Module namespace object
    Namespace,
}

impl ObjectKind {
    pub fn kind(&self) -> Kind {
        match self {
            ObjectKind::Array(_) => Kind::Array,
            ObjectKind::Bound(_) => Kind::Callable,
            ObjectKind::Native(_) => Kind::NativeFunction,
            ObjectKind::AsyncNative(_) => Kind::AsyncNativeFunction,
            ObjectKind::Closure(_) => Kind::Function,
            _ => Kind::Object,
        }
    }

    fn collect_references(&self, refs: &mut Vec<ChunkId>) {
        match self {
            ObjectKind::Ordinary | ObjectKind::Error | ObjectKind::Namespace => {}
            ObjectKind::Array(elements) => push_values(refs, elements),
            ObjectKind::Closure(closure) => {
                refs.extend(closure.captures.iter().map(|c| c.chunk));
                if let Some(this) = &closure.this_value {
                    push_values(refs, [this]);
                }
            }
            ObjectKind::Native(native) => push_values(refs, &native.slots),
            ObjectKind::AsyncNative(_) => {}
            ObjectKind::Bound(bound) => {
                refs.push(bound.target);
                push_values(refs, [&bound.this]);
                push_values(refs, &bound.args);
            }
            ObjectKind::Promise(state) => {
                push_values(refs, [&state.result]);
                for reaction in &state.reactions {
                    push_values(refs, [&reaction.on_fulfilled, &reaction.on_rejected]);
                    if let Some(derived) = reaction.derived {
                        refs.push(derived);
                    }
                }
            }
            ObjectKind::Generator(state) => {
                if let Some(vm) = &state.vm {
                    refs.extend(vm.references());
                }
            }
            ObjectKind::AsyncGenerator(state) => {
                if let Some(vm) = &state.vm {
                    refs.extend(vm.references());
                }
                for request in &state.queue {
                    refs.push(request.promise);
                    push_values(refs, [&request.value]);
                }
            }
            ObjectKind::Coroutine(coroutine) => {
                refs.push(coroutine.promise);
                if let Some(result) = &coroutine.result {
                    push_values(refs, [result]);
                }
                if let Some(body) = &coroutine.body {
                    refs.extend(body.references());
                }
            }
            ObjectKind::Set(entries) => push_values(refs, entries.values()),
            ObjectKind::Map(entries) => {
                for (key, value) in entries.values() {
                    push_values(refs, [key, value]);
                }
            }
            ObjectKind::ArrayIterator(iter) => refs.push(iter.array),
            ObjectKind::ListIterator(iter) => push_values(refs, &iter.items),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Function payloads
// ═══════════════════════════════════════════════════════════════════════════════

/// Native function signature: `(context, this, args) -> result`
pub type NativeFn = fn(&mut Context, Value, &[Value]) -> Result<Value, JsError>;

/// Stage function of an async native: called once per stage with the frame
/// holding the resumed value.
pub type AsyncNativeFn = fn(&mut Context, &mut NativeFrame) -> Result<Stage, JsError>;

/// A binding captured by a closure at creation time
#[derive(Debug, Clone)]
pub struct Capture {
    pub name: JsString,
    pub chunk: ChunkId,
    pub kind: BindingKind,
}

/// A bytecode function: a template in a shared program plus captured state
#[derive(Debug, Clone)]
pub struct Closure {
    pub program: Rc<Program>,
    pub function: u32,
    pub captures: Rc<Vec<Capture>>,
    /// Lexical `this` of arrow functions
    pub this_value: Option<Value>,
}

#[derive(Clone)]
pub struct NativeFunction {
    pub name: JsString,
    pub func: NativeFn,
    pub length: u32,
    /// Values the function reads through `Context::native_slot`
    pub slots: Vec<Value>,
    pub constructor: bool,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish()
    }
}

#[derive(Clone)]
pub struct AsyncNativeFunction {
    pub name: JsString,
    pub func: AsyncNativeFn,
    pub length: u32,
}

impl fmt::Debug for AsyncNativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncNativeFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// Outcome of one stage of an async native function
#[derive(Debug)]
pub enum Stage {
    /// Suspend on `value`; re-enter at stage `next` with the settled value
    Await { value: Value, next: u32 },
    /// Finished; the returned promise resolves with this value
    Done(Value),
}

/// Saved state of an async native function between stages
#[derive(Clone)]
pub struct NativeFrame {
    pub func: AsyncNativeFn,
    pub this: Value,
    pub args: Vec<Value>,
    pub stage: u32,
    /// Value the last await settled with
    pub value: Value,
    /// Scratch values carried across stages
    pub locals: Vec<Value>,
}

impl NativeFrame {
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Undefined)
    }

    pub fn references(&self) -> Vec<ChunkId> {
        let mut refs = Vec::new();
        push_values(&mut refs, [&self.this, &self.value]);
        push_values(&mut refs, &self.args);
        push_values(&mut refs, &self.locals);
        refs
    }
}

impl fmt::Debug for NativeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFrame")
            .field("stage", &self.stage)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BoundFunction {
    pub target: ObjectRef,
    pub this: Value,
    pub args: Vec<Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Promise, generator and coroutine payloads
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

#[derive(Debug)]
pub struct PromiseState {
    pub status: PromiseStatus,
    pub result: Value,
    pub reactions: Vec<PromiseReaction>,
    /// A rejection handler was attached at some point
    pub handled: bool,
    /// Resolved with a thenable; only the adoption job may settle it now
    pub locked: bool,
}

impl PromiseState {
    pub fn pending() -> Self {
        Self {
            status: PromiseStatus::Pending,
            result: Value::Undefined,
            reactions: Vec::new(),
            handled: false,
            locked: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromiseReaction {
    pub on_fulfilled: Value,
    pub on_rejected: Value,
    pub derived: Option<ObjectRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStatus {
    SuspendedStart,
    SuspendedYield,
    Running,
    Completed,
}

#[derive(Debug)]
pub struct GeneratorState {
    pub status: GeneratorStatus,
    pub vm: Option<Box<Vm>>,
}

/// What a caller asked an async generator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Next,
    Return,
    Throw,
}

/// A queued `next`/`return`/`throw` call and the promise it settles
#[derive(Debug)]
pub struct AsyncGeneratorRequest {
    pub kind: RequestKind,
    pub value: Value,
    pub promise: ObjectRef,
}

/// `Running` covers both an executing body and one waiting on a promise;
/// requests arriving meanwhile wait in the queue
#[derive(Debug)]
pub struct AsyncGeneratorState {
    pub status: GeneratorStatus,
    pub vm: Option<Box<Vm>>,
    pub queue: VecDeque<AsyncGeneratorRequest>,
}

/// Suspended body of an async function (bytecode or native stages)
#[derive(Debug)]
pub enum CoroutineBody {
    Vm(Box<Vm>),
    Native(NativeFrame),
}

impl CoroutineBody {
    pub fn references(&self) -> Vec<ChunkId> {
        match self {
            CoroutineBody::Vm(vm) => vm.references(),
            CoroutineBody::Native(frame) => frame.references(),
        }
    }
}

/// An in-flight async evaluation and the promise it settles
#[derive(Debug)]
pub struct Coroutine {
    pub body: Option<CoroutineBody>,
    pub promise: ObjectRef,
    /// Fulfillment value used instead of the body's return value
    pub result: Option<Value>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Iterators
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    Keys,
    Values,
    Entries,
}

/// Live iterator over an array
#[derive(Debug, Clone)]
pub struct ArrayIterator {
    pub array: ObjectRef,
    pub index: u32,
    pub mode: IterationMode,
}

/// Iterator over a snapshot of values (Set/Map iteration, for-in keys)
#[derive(Debug, Clone)]
pub struct ListIterator {
    pub items: Vec<Value>,
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kind_order_is_ordinal_order() {
        for pair in Kind::ALL.windows(2) {
            if let [a, b] = pair {
                assert!(a < b, "{:?} should sort before {:?}", a, b);
                assert_eq!(a.ordinal() + 1, b.ordinal());
            }
        }
    }

    #[test]
    fn test_capability_thresholds() {
        assert!(!Kind::Symbol.is_object());
        assert!(Kind::Object.is_object());
        assert!(Kind::Array.is_object());
        assert!(!Kind::Array.is_callable());
        assert!(Kind::Callable.is_callable());
        assert!(Kind::NativeFunction.is_callable());
        assert!(Kind::Function.is_callable());
    }

    fn any_kind() -> impl Strategy<Value = Kind> {
        prop::sample::select(Kind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_kind_order_is_total(a in any_kind(), b in any_kind()) {
            let forward = a.cmp(&b);
            prop_assert_eq!(forward, b.cmp(&a).reverse());
            prop_assert_eq!(forward == std::cmp::Ordering::Equal, a == b);
        }

        #[test]
        fn prop_callable_implies_object(k in any_kind()) {
            if k.is_callable() {
                prop_assert!(k.is_object());
            }
        }
    }

    #[test]
    fn test_same_value_zero_vs_strict_equality() {
        let nan = Value::Number(f64::NAN);
        assert!(!nan.strict_equals(&nan));
        assert!(nan.same_value_zero(&nan));
        assert!(Value::Number(0.0).same_value_zero(&Value::Number(-0.0)));
        assert_eq!(
            ValueKey::from_value(&Value::Number(-0.0)),
            ValueKey::from_value(&Value::Number(0.0))
        );
        assert_eq!(
            ValueKey::from_value(&Value::Number(f64::NAN)),
            ValueKey::from_value(&Value::Number(-f64::NAN))
        );
    }

    #[test]
    fn test_property_key_index_normalization() {
        assert_eq!(PropertyKey::from("1"), PropertyKey::Index(1));
        assert_eq!(PropertyKey::from("0"), PropertyKey::Index(0));
        assert!(matches!(PropertyKey::from("01"), PropertyKey::String(_)));
        assert!(matches!(PropertyKey::from("4294967295"), PropertyKey::String(_)));
        assert_eq!(PropertyKey::from_number(2.0), PropertyKey::Index(2));
        assert!(matches!(PropertyKey::from_number(1.5), PropertyKey::String(_)));
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(6.0), "6");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }
}
