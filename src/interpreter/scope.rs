//! Lexical scope tree
//!
//! Scopes form a parent-linked tree addressed by generational [`ScopeId`]s.
//! Each scope owns a root chunk in the heap: its bindings, pending
//! disposables and the temporaries allocated while it is current hang off
//! that root. Tearing a scope down frees the root and sweeps whatever it
//! alone kept alive right away, cycles included.

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};

use super::Context;
use crate::compiler::{BindingKind, ScopeKind};
use crate::error::JsError;
use crate::gc::{ChunkId, Heap};
use crate::value::{Capture, CheapClone, JsString, PropertyKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: u32,
    generation: u32,
}

/// A named binding: the chunk holding its value and how it was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub chunk: ChunkId,
    pub kind: BindingKind,
    /// Installed from a closure's captures; an own declaration shadows it
    pub captured: bool,
}

/// A resource registered by `using` / `await using`
#[derive(Debug, Clone)]
pub struct Disposable {
    pub value: Value,
    pub method: Value,
    pub is_async: bool,
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub root: ChunkId,
    pub kind: ScopeKind,
    pub bindings: IndexMap<JsString, Binding, FxBuildHasher>,
    /// In registration order; disposed in reverse
    pub disposables: Vec<Disposable>,
    /// Error accumulated by disposals that already ran
    pub pending_error: Option<JsError>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    scope: Option<Scope>,
}

/// Arena of scopes
#[derive(Debug)]
pub struct ScopeTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: ScopeId,
}

impl ScopeTree {
    /// Create a tree holding only the global scope
    pub fn new(heap: &mut Heap) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: ScopeId {
                index: 0,
                generation: 0,
            },
        };
        tree.root = tree.insert(heap, None, ScopeKind::Root);
        tree
    }

    pub fn root(&self) -> ScopeId {
        self.root
    }

    fn insert(&mut self, heap: &mut Heap, parent: Option<ScopeId>, kind: ScopeKind) -> ScopeId {
        let scope = Scope {
            parent,
            children: Vec::new(),
            root: heap.alloc_root(),
            kind,
            bindings: IndexMap::default(),
            disposables: Vec::new(),
            pending_error: None,
        };
        if let Some(index) = self.free.pop()
            && let Some(slot) = self.slots.get_mut(index as usize)
        {
            slot.scope = Some(scope);
            return ScopeId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            scope: Some(scope),
        });
        ScopeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Create a child of `parent`
    pub fn push(&mut self, heap: &mut Heap, parent: ScopeId, kind: ScopeKind) -> Result<ScopeId, JsError> {
        if !self.contains(parent) {
            return Err(JsError::internal_error("push onto a dead scope"));
        }
        let id = self.insert(heap, Some(parent), kind);
        self.get_mut(parent)?.children.push(id);
        Ok(id)
    }

    pub fn contains(&self, id: ScopeId) -> bool {
        self.slots
            .get(id.index as usize)
            .is_some_and(|s| s.generation == id.generation && s.scope.is_some())
    }

    pub fn get(&self, id: ScopeId) -> Result<&Scope, JsError> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.scope.as_ref())
            .ok_or_else(|| JsError::internal_error("stale scope id"))
    }

    pub fn get_mut(&mut self, id: ScopeId) -> Result<&mut Scope, JsError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.scope.as_mut())
            .ok_or_else(|| JsError::internal_error("stale scope id"))
    }

    /// Number of live scopes, the global scope included
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.scope.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `id` and every scope below it, deepest first
    pub fn subtree(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Ok(scope) = self.get(current) {
                stack.extend(scope.children.iter().copied());
            }
        }
        order.reverse();
        order
    }

    /// Remove a scope from the tree. Its children must already be gone.
    pub fn detach(&mut self, id: ScopeId) -> Result<Scope, JsError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| JsError::internal_error("detach of a stale scope"))?;
        let scope = slot
            .scope
            .take()
            .ok_or_else(|| JsError::internal_error("detach of a stale scope"))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        if let Some(parent) = scope.parent
            && let Ok(p) = self.get_mut(parent)
        {
            p.children.retain(|c| *c != id);
        }
        Ok(scope)
    }

    /// Scope that receives a declaration of `kind` made from `from`.
    /// Script scopes declare into the global scope.
    pub fn declare_target(&self, from: ScopeId, kind: BindingKind) -> Result<ScopeId, JsError> {
        let mut id = from;
        loop {
            let scope = self.get(id)?;
            match scope.kind {
                ScopeKind::Script | ScopeKind::Root => return Ok(self.root),
                k if k.is_function_boundary() => return Ok(id),
                _ if kind.is_lexical() => return Ok(id),
                _ => {}
            }
            match scope.parent {
                Some(parent) => id = parent,
                None => return Ok(self.root),
            }
        }
    }

    /// Resolve `name` from `from`: walk up to and including the nearest
    /// function or module boundary, then try the global scope.
    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<Binding> {
        let owner = self.owner_of(from, name)?;
        self.get(owner).ok()?.bindings.get(name).copied()
    }

    /// Scope holding the binding `name` resolves to from `from`
    fn owner_of(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.get(id).ok()?;
            if scope.bindings.contains_key(name) {
                return Some(id);
            }
            if scope.kind.is_function_boundary() {
                break;
            }
            current = scope.parent;
        }
        self.get(self.root)
            .ok()?
            .bindings
            .contains_key(name)
            .then_some(self.root)
    }

    /// Bindings a closure created in `from` captures: everything visible
    /// up to the function boundary, innermost first. Globals are left out
    /// and resolved when used.
    pub fn captures(&self, from: ScopeId) -> Vec<Capture> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            if id == self.root {
                break;
            }
            let Ok(scope) = self.get(id) else { break };
            for (name, binding) in &scope.bindings {
                if seen.insert(name.cheap_clone()) {
                    out.push(Capture {
                        name: name.cheap_clone(),
                        chunk: binding.chunk,
                        kind: binding.kind,
                    });
                }
            }
            if scope.kind.is_function_boundary() {
                break;
            }
            current = scope.parent;
        }
        out
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context operations on scopes and bindings
// ═══════════════════════════════════════════════════════════════════════════════

impl Context {
    /// Root chunk of the current scope. New temporaries attach here.
    pub(crate) fn current_root(&self) -> ChunkId {
        self.scopes
            .get(self.current_scope)
            .map(|s| s.root)
            .unwrap_or(self.roots.realm)
    }

    /// Push a child of the current scope and make it current
    pub fn push_scope(&mut self, kind: ScopeKind) -> Result<ScopeId, JsError> {
        let id = self.scopes.push(&mut self.heap, self.current_scope, kind)?;
        self.current_scope = id;
        Ok(id)
    }

    pub(crate) fn push_scope_under(&mut self, parent: ScopeId, kind: ScopeKind) -> Result<ScopeId, JsError> {
        self.scopes.push(&mut self.heap, parent, kind)
    }

    /// Pop the current scope, disposing its resources synchronously.
    pub fn pop_scope(&mut self) -> Result<(), JsError> {
        let id = self.current_scope;
        let parent = self
            .scopes
            .get(id)?
            .parent
            .ok_or_else(|| JsError::internal_error("cannot pop the global scope"))?;
        self.current_scope = parent;
        let result = self.teardown_scope(id);
        self.collect()?;
        result
    }

    /// Dispose and destroy scope `id` and every scope still open below it.
    ///
    /// Disposal errors are aggregated and returned once the whole subtree is
    /// gone.
    pub(crate) fn teardown_scope(&mut self, id: ScopeId) -> Result<(), JsError> {
        let keep = match self.scopes.get(id)?.parent {
            Some(parent) => self.holding_root(parent),
            None => self.roots.transit,
        };
        let mut error = None;
        for current in self.scopes.subtree(id) {
            // reclaiming a suspended body may already have taken it
            if !self.scopes.contains(current) {
                continue;
            }
            if let Err(e) = self.dispose_resources(current) {
                if e.is_internal() {
                    return Err(e);
                }
                let e = self.suppress(e, error)?;
                if let JsError::Thrown { value } = &e {
                    self.heap.link(keep, value);
                }
                error = Some(e);
            }
            self.release_scope(current)?;
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroy scope `id` and its subtree without running disposers.
    /// Used for bodies that will never resume.
    pub(crate) fn discard_scope(&mut self, id: ScopeId) -> Result<(), JsError> {
        for current in self.scopes.subtree(id) {
            if self.scopes.contains(current) {
                self.release_scope(current)?;
            }
        }
        Ok(())
    }

    fn release_scope(&mut self, id: ScopeId) -> Result<(), JsError> {
        let scope = self.scopes.detach(id)?;
        if self.current_scope == id {
            self.current_scope = scope.parent.unwrap_or(self.scopes.root());
        }
        let marked = self.heap.sweep_root(scope.root);
        self.finish_collection(marked)
    }

    /// Root that keeps values alive once `scope` is gone: the scope that
    /// called into it, or the transit root when that is the global or task
    /// scope
    pub(crate) fn holding_root(&self, scope: ScopeId) -> ChunkId {
        if scope == self.scopes.root() || scope == self.task_scope {
            return self.roots.transit;
        }
        self.scopes.get(scope).map(|s| s.root).unwrap_or(self.roots.transit)
    }

    /// Run every pending disposer of `id` in reverse order, synchronously.
    /// Results of async disposers are not awaited here.
    pub(crate) fn dispose_resources(&mut self, id: ScopeId) -> Result<(), JsError> {
        let mut error = self.scopes.get_mut(id)?.pending_error.take();
        loop {
            let Some(d) = self.scopes.get_mut(id)?.disposables.pop() else {
                break;
            };
            if let Err(e) = self.call_function(d.method, d.value, &[]) {
                if e.is_internal() {
                    return Err(e);
                }
                error = Some(self.suppress(e, error)?);
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Combine a new disposal error with an earlier one:
    /// `SuppressedError { error: new, suppressed: previous }`.
    pub(crate) fn suppress(&mut self, error: JsError, previous: Option<JsError>) -> Result<JsError, JsError> {
        let Some(previous) = previous else {
            return Ok(error);
        };
        let error = self.error_to_value(error)?;
        let suppressed = self.error_to_value(previous)?;
        let obj = self.create_suppressed_error(error, suppressed)?;
        Ok(JsError::thrown(Value::Object(obj)))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Bindings
    // ───────────────────────────────────────────────────────────────────────────

    /// Declare `name` as seen from the current scope
    pub fn declare(&mut self, name: &JsString, kind: BindingKind) -> Result<(), JsError> {
        let target = self.scopes.declare_target(self.current_scope, kind)?;
        self.declare_in(target, name, kind, None)
    }

    /// Declare a binding directly in `target`, optionally initialized
    pub(crate) fn declare_in(
        &mut self,
        target: ScopeId,
        name: &JsString,
        kind: BindingKind,
        init: Option<Value>,
    ) -> Result<(), JsError> {
        if let Some(existing) = self.scopes.get(target)?.bindings.get(name.as_str()).copied()
            && !existing.captured
        {
            if kind == BindingKind::Var && existing.kind == BindingKind::Var {
                if let Some(value) = init {
                    self.heap.set_binding(existing.chunk, value)?;
                }
                return Ok(());
            }
            return Err(JsError::syntax_error(
                format!("Identifier '{}' has already been declared", name),
                0,
                0,
            ));
        }
        let initial = match init {
            Some(value) => value,
            None if kind.is_lexical() => Value::Uninitialized,
            None => Value::Undefined,
        };
        let chunk = self.heap.alloc_binding(initial);
        let name = self.strings.insert(name.cheap_clone());
        let scope = self.scopes.get_mut(target)?;
        let root = scope.root;
        let shadowed = scope.bindings.insert(
            name,
            Binding {
                chunk,
                kind,
                captured: false,
            },
        );
        self.heap.add_edge(root, chunk);
        if let Some(old) = shadowed {
            self.heap.remove_edge(root, old.chunk);
        }
        Ok(())
    }

    fn resolve(&self, name: &JsString) -> Result<Binding, JsError> {
        self.scopes
            .lookup(self.current_scope, name.as_str())
            .ok_or_else(|| JsError::reference_error(name.as_str()))
    }

    /// Give a declared binding its first value; `using` bindings register
    /// their disposer in the declaring scope.
    pub fn initialize(&mut self, name: &JsString, value: Value) -> Result<(), JsError> {
        let binding = self.resolve(name)?;
        if matches!(binding.kind, BindingKind::Using | BindingKind::AwaitUsing) {
            self.register_disposable(name, &value, binding.kind == BindingKind::AwaitUsing)?;
        }
        self.heap.set_binding(binding.chunk, value)
    }

    fn register_disposable(&mut self, name: &JsString, value: &Value, is_async: bool) -> Result<(), JsError> {
        if value.is_nullish() {
            return Ok(());
        }
        let mut method = Value::Undefined;
        if is_async {
            let key = PropertyKey::Symbol(self.intrinsics.async_dispose_symbol.clone());
            method = self.get_field(value, &key)?;
        }
        if method.is_nullish() {
            let key = PropertyKey::Symbol(self.intrinsics.dispose_symbol.clone());
            method = self.get_field(value, &key)?;
        }
        if !self.is_callable(&method) {
            return Err(JsError::type_error(format!(
                "The value of '{}' is not disposable",
                name
            )));
        }
        let owner = self
            .scopes
            .owner_of(self.current_scope, name.as_str())
            .unwrap_or(self.current_scope);
        let scope = self.scopes.get_mut(owner)?;
        let root = scope.root;
        scope.disposables.push(Disposable {
            value: value.clone(),
            method: method.clone(),
            is_async,
        });
        self.heap.link(root, value);
        self.heap.link(root, &method);
        Ok(())
    }

    /// Read a binding visible from the current scope
    pub fn load(&mut self, name: &JsString) -> Result<Value, JsError> {
        let binding = self.resolve(name)?;
        match self.heap.binding(binding.chunk)? {
            Value::Uninitialized => Err(JsError::reference_error_with_message(format!(
                "Cannot access '{}' before initialization",
                name
            ))),
            value => Ok(value.clone()),
        }
    }

    /// Assign an initialized, mutable binding
    pub fn store(&mut self, name: &JsString, value: Value) -> Result<(), JsError> {
        let binding = self.resolve(name)?;
        if self.heap.binding(binding.chunk)?.is_uninitialized() {
            return Err(JsError::reference_error_with_message(format!(
                "Cannot access '{}' before initialization",
                name
            )));
        }
        if binding.kind.is_immutable() {
            return Err(JsError::type_error("Assignment to constant variable."));
        }
        self.heap.set_binding(binding.chunk, value)
    }

    /// `typeof name`: unknown names are "undefined" instead of an error
    pub fn type_of_name(&mut self, name: &JsString) -> Result<Value, JsError> {
        if self.scopes.lookup(self.current_scope, name.as_str()).is_none() {
            return Ok(Value::from("undefined"));
        }
        let value = self.load(name)?;
        Ok(Value::from(self.type_of(&value)))
    }

    /// Install captured bindings into a fresh function scope
    pub(crate) fn install_captures(&mut self, scope: ScopeId, captures: &[Capture]) -> Result<(), JsError> {
        let target = self.scopes.get_mut(scope)?;
        let root = target.root;
        for capture in captures {
            target.bindings.insert(
                capture.name.cheap_clone(),
                Binding {
                    chunk: capture.chunk,
                    kind: capture.kind,
                    captured: true,
                },
            );
        }
        for capture in captures {
            self.heap.add_edge(root, capture.chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Heap, ScopeTree) {
        let mut heap = Heap::new();
        let tree = ScopeTree::new(&mut heap);
        (heap, tree)
    }

    fn own(chunk: ChunkId) -> Binding {
        Binding {
            chunk,
            kind: BindingKind::Let,
            captured: false,
        }
    }

    #[test]
    fn test_var_goes_to_function_scope() {
        let (mut heap, mut tree) = tree();
        let f = tree.push(&mut heap, tree.root(), ScopeKind::Function).unwrap();
        let block = tree.push(&mut heap, f, ScopeKind::Block).unwrap();
        assert_eq!(tree.declare_target(block, BindingKind::Var).unwrap(), f);
        assert_eq!(tree.declare_target(block, BindingKind::Let).unwrap(), block);
    }

    #[test]
    fn test_script_declarations_are_global() {
        let (mut heap, mut tree) = tree();
        let script = tree.push(&mut heap, tree.root(), ScopeKind::Script).unwrap();
        assert_eq!(tree.declare_target(script, BindingKind::Let).unwrap(), tree.root());
        assert_eq!(tree.declare_target(script, BindingKind::Var).unwrap(), tree.root());
    }

    #[test]
    fn test_lookup_stops_at_function_boundary() {
        let (mut heap, mut tree) = tree();
        let caller = tree.push(&mut heap, tree.root(), ScopeKind::Function).unwrap();
        let x = heap.alloc_binding(Value::Number(1.0));
        tree.get_mut(caller)
            .unwrap()
            .bindings
            .insert(JsString::from("x"), own(x));
        // a callee is parented to its caller but must not see its locals
        let callee = tree.push(&mut heap, caller, ScopeKind::Function).unwrap();
        assert!(tree.lookup(callee, "x").is_none());
        assert!(tree.lookup(caller, "x").is_some());

        let block = tree.push(&mut heap, caller, ScopeKind::Block).unwrap();
        assert_eq!(tree.lookup(block, "x").map(|b| b.chunk), Some(x));
    }

    #[test]
    fn test_lookup_falls_back_to_globals() {
        let (mut heap, mut tree) = tree();
        let g = heap.alloc_binding(Value::Number(1.0));
        let root = tree.root();
        tree.get_mut(root)
            .unwrap()
            .bindings
            .insert(JsString::from("g"), own(g));
        let f = tree.push(&mut heap, root, ScopeKind::Function).unwrap();
        let inner = tree.push(&mut heap, f, ScopeKind::Function).unwrap();
        assert_eq!(tree.lookup(inner, "g").map(|b| b.chunk), Some(g));
        assert!(tree.lookup(inner, "missing").is_none());
    }

    #[test]
    fn test_captures_shadowing_innermost_first() {
        let (mut heap, mut tree) = tree();
        let f = tree.push(&mut heap, tree.root(), ScopeKind::Function).unwrap();
        let block = tree.push(&mut heap, f, ScopeKind::Block).unwrap();
        let outer = heap.alloc_binding(Value::Number(1.0));
        let inner = heap.alloc_binding(Value::Number(2.0));
        tree.get_mut(f).unwrap().bindings.insert(JsString::from("x"), own(outer));
        tree.get_mut(block)
            .unwrap()
            .bindings
            .insert(JsString::from("x"), own(inner));

        let captures = tree.captures(block);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures.first().map(|c| c.chunk), Some(inner));
    }

    #[test]
    fn test_subtree_lists_children_before_parent() {
        let (mut heap, mut tree) = tree();
        let a = tree.push(&mut heap, tree.root(), ScopeKind::Block).unwrap();
        let b = tree.push(&mut heap, a, ScopeKind::Block).unwrap();
        let c = tree.push(&mut heap, b, ScopeKind::Block).unwrap();
        assert_eq!(tree.subtree(a), vec![c, b, a]);
    }

    #[test]
    fn test_detach_bumps_generation() {
        let (mut heap, mut tree) = tree();
        let block = tree.push(&mut heap, tree.root(), ScopeKind::Block).unwrap();
        let scope = tree.detach(block).unwrap();
        assert_eq!(scope.kind, ScopeKind::Block);
        assert!(!tree.contains(block));
        assert!(tree.get(tree.root()).unwrap().children.is_empty());

        let reused = tree.push(&mut heap, tree.root(), ScopeKind::Block).unwrap();
        assert_ne!(reused, block);
        assert_eq!(tree.len(), 2);
    }
}
