//! Chunk graph and scoped cycle collection.
//!
//! Every heap value lives in a chunk addressed by a generational [`ChunkId`].
//! Chunks record who references them (`parents`) and what they reference
//! (`children`) as edge multisets. A chunk is alive while some chain of
//! parents reaches a root chunk. Reclamation is driven by scope teardown:
//! when a root dies its children are re-checked, and anything that can no
//! longer reach a live root (cycles included) is freed.

use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};

use crate::error::JsError;
use crate::value::{JsObject, Kind, Value};

// ============================================================================
// ChunkId
// ============================================================================

/// Generational chunk address. A stale id never aliases a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

impl ChunkId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// ============================================================================
// Chunks
// ============================================================================

/// Contents of a live chunk
#[derive(Debug)]
pub enum Payload {
    /// Root sentinel: reachability from here means alive
    Root,
    /// A variable cell
    Binding(Value),
    Object(JsObject),
}

type EdgeSet = IndexMap<ChunkId, u32, FxBuildHasher>;

#[derive(Debug, Default)]
struct Chunk {
    generation: u32,
    payload: Option<Payload>,
    parents: EdgeSet,
    children: EdgeSet,
}

impl Chunk {
    fn is_root(&self) -> bool {
        matches!(self.payload, Some(Payload::Root))
    }
}

fn bump(set: &mut EdgeSet, id: ChunkId) {
    *set.entry(id).or_insert(0) += 1;
}

/// Decrement one edge count; returns true if the edge existed
fn drop_one(set: &mut EdgeSet, id: ChunkId) -> bool {
    match set.get_mut(&id) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            set.swap_remove(&id);
            true
        }
        None => false,
    }
}

// ============================================================================
// GcStats
// ============================================================================

/// Statistics about the chunk heap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Slots ever allocated (live + free)
    pub total_chunks: usize,
    /// Chunks currently holding a payload, roots included
    pub live_chunks: usize,
    /// Slots available for reuse
    pub free_slots: usize,
    /// Live root chunks
    pub roots: usize,
    /// Collection passes run
    pub collections: usize,
    /// Chunks freed over the heap's lifetime
    pub freed_total: usize,
}

// ============================================================================
// Heap
// ============================================================================

#[derive(Debug, Default)]
pub struct Heap {
    chunks: Vec<Chunk>,
    free: Vec<u32>,
    /// Non-root chunks that lost their last parent since the last sweep
    orphans: Vec<ChunkId>,
    roots: usize,
    collections: usize,
    freed_total: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, payload: Payload) -> ChunkId {
        if let Some(index) = self.free.pop()
            && let Some(chunk) = self.chunks.get_mut(index as usize)
        {
            chunk.payload = Some(payload);
            return ChunkId {
                index,
                generation: chunk.generation,
            };
        }
        let index = self.chunks.len() as u32;
        self.chunks.push(Chunk {
            generation: 0,
            payload: Some(payload),
            parents: EdgeSet::default(),
            children: EdgeSet::default(),
        });
        ChunkId {
            index,
            generation: 0,
        }
    }

    pub fn alloc_root(&mut self) -> ChunkId {
        self.roots += 1;
        self.alloc(Payload::Root)
    }

    /// Allocate a binding cell. The caller attaches it to a scope root.
    pub fn alloc_binding(&mut self, value: Value) -> ChunkId {
        let child = value.as_object();
        let id = self.alloc(Payload::Binding(value));
        if let Some(child) = child {
            self.add_edge(id, child);
        }
        id
    }

    /// Allocate an object and link every chunk it references.
    /// The caller must give the new chunk a parent before the next sweep.
    pub fn alloc_object(&mut self, object: JsObject) -> ChunkId {
        let refs = object.references();
        let id = self.alloc(Payload::Object(object));
        for child in refs {
            self.add_edge(id, child);
        }
        id
    }

    fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks
            .get(id.index as usize)
            .filter(|c| c.generation == id.generation && c.payload.is_some())
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks
            .get_mut(id.index as usize)
            .filter(|c| c.generation == id.generation && c.payload.is_some())
    }

    /// Check whether `id` addresses a live chunk
    pub fn contains(&self, id: ChunkId) -> bool {
        self.chunk(id).is_some()
    }

    pub fn is_root(&self, id: ChunkId) -> bool {
        self.chunk(id).is_some_and(Chunk::is_root)
    }

    pub fn object(&self, id: ChunkId) -> Result<&JsObject, JsError> {
        match self.chunk(id).and_then(|c| c.payload.as_ref()) {
            Some(Payload::Object(obj)) => Ok(obj),
            Some(_) => Err(JsError::internal_error(format!("chunk {} is not an object", id.index))),
            None => Err(JsError::internal_error(format!("dangling chunk {}", id.index))),
        }
    }

    pub fn object_mut(&mut self, id: ChunkId) -> Result<&mut JsObject, JsError> {
        match self.chunk_mut(id).and_then(|c| c.payload.as_mut()) {
            Some(Payload::Object(obj)) => Ok(obj),
            Some(_) => Err(JsError::internal_error(format!("chunk {} is not an object", id.index))),
            None => Err(JsError::internal_error(format!("dangling chunk {}", id.index))),
        }
    }

    /// Kind of the value referring to object `id`
    pub fn kind_of(&self, id: ChunkId) -> Result<Kind, JsError> {
        Ok(self.object(id)?.value_kind())
    }

    pub fn binding(&self, id: ChunkId) -> Result<&Value, JsError> {
        match self.chunk(id).and_then(|c| c.payload.as_ref()) {
            Some(Payload::Binding(value)) => Ok(value),
            Some(_) => Err(JsError::internal_error(format!("chunk {} is not a binding", id.index))),
            None => Err(JsError::internal_error(format!("dangling binding {}", id.index))),
        }
    }

    /// Overwrite a binding cell, moving its edge to the new value
    pub fn set_binding(&mut self, id: ChunkId, value: Value) -> Result<(), JsError> {
        self.link(id, &value);
        let old = match self.chunk_mut(id).and_then(|c| c.payload.as_mut()) {
            Some(Payload::Binding(slot)) => std::mem::replace(slot, value),
            _ => return Err(JsError::internal_error(format!("dangling binding {}", id.index))),
        };
        self.unlink(id, &old);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------------

    pub fn add_edge(&mut self, parent: ChunkId, child: ChunkId) {
        if !self.contains(parent) || !self.contains(child) {
            return;
        }
        if let Some(p) = self.chunk_mut(parent) {
            bump(&mut p.children, child);
        }
        if let Some(c) = self.chunk_mut(child) {
            bump(&mut c.parents, parent);
        }
    }

    pub fn remove_edge(&mut self, parent: ChunkId, child: ChunkId) {
        if let Some(p) = self.chunk_mut(parent) {
            drop_one(&mut p.children, child);
        }
        let orphaned = match self.chunk_mut(child) {
            Some(c) => drop_one(&mut c.parents, parent) && c.parents.is_empty() && !c.is_root(),
            None => false,
        };
        if orphaned {
            self.orphans.push(child);
        }
    }

    /// Add an edge from `parent` to the object `value` refers to, if any
    pub fn link(&mut self, parent: ChunkId, value: &Value) {
        if let Some(child) = value.as_object() {
            self.add_edge(parent, child);
        }
    }

    pub fn unlink(&mut self, parent: ChunkId, value: &Value) {
        if let Some(child) = value.as_object() {
            self.remove_edge(parent, child);
        }
    }

    pub fn link_all(&mut self, parent: ChunkId, children: &[ChunkId]) {
        for &child in children {
            self.add_edge(parent, child);
        }
    }

    pub fn unlink_all(&mut self, parent: ChunkId, children: &[ChunkId]) {
        for &child in children {
            self.remove_edge(parent, child);
        }
    }

    /// Edge count from `parent` to `child`
    pub fn edge_count(&self, parent: ChunkId, child: ChunkId) -> u32 {
        self.chunk(parent)
            .and_then(|p| p.children.get(&child).copied())
            .unwrap_or(0)
    }

    pub fn parent_count(&self, id: ChunkId) -> usize {
        self.chunk(id).map_or(0, |c| c.parents.values().map(|n| *n as usize).sum())
    }

    pub fn take_orphans(&mut self) -> Vec<ChunkId> {
        std::mem::take(&mut self.orphans)
    }

    pub fn has_orphans(&self) -> bool {
        !self.orphans.is_empty()
    }

    // ------------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------------

    /// Check whether any chain of parents from `id` reaches a root.
    pub fn is_alive(&self, id: ChunkId) -> bool {
        self.is_alive_cached(id, &FxHashSet::default())
    }

    fn is_alive_cached(&self, id: ChunkId, alive: &FxHashSet<ChunkId>) -> bool {
        let mut visited = FxHashSet::default();
        let mut work = vec![id];
        while let Some(current) = work.pop() {
            if !visited.insert(current) {
                continue;
            }
            if alive.contains(&current) {
                return true;
            }
            let Some(chunk) = self.chunk(current) else {
                continue;
            };
            if chunk.is_root() {
                return true;
            }
            work.extend(chunk.parents.keys().filter(|p| !visited.contains(*p)));
        }
        false
    }

    /// Detach every child of `dead_root` and mark whatever became
    /// unreachable. Returns the marked chunks; nothing is freed yet.
    pub fn collect(&mut self, dead_root: ChunkId) -> Vec<ChunkId> {
        let children: Vec<(ChunkId, u32)> = match self.chunk_mut(dead_root) {
            Some(chunk) => chunk.children.drain(..).collect(),
            None => return Vec::new(),
        };
        let mut queue = Vec::with_capacity(children.len());
        for (child, _) in children {
            if let Some(c) = self.chunk_mut(child) {
                c.parents.swap_remove(&dead_root);
            }
            queue.push(child);
        }
        self.sweep(queue)
    }

    /// Check each queued chunk; unreachable ones are detached from their
    /// children (which are queued in turn) and returned as marked.
    pub fn sweep(&mut self, queue: Vec<ChunkId>) -> Vec<ChunkId> {
        self.sweep_from(queue, FxHashSet::default())
    }

    /// [`sweep`](Self::sweep) with `alive` already known to be reachable
    fn sweep_from(&mut self, mut queue: Vec<ChunkId>, mut alive: FxHashSet<ChunkId>) -> Vec<ChunkId> {
        self.collections += 1;
        let mut marked = FxHashSet::default();
        let mut order = Vec::new();
        while let Some(id) = queue.pop() {
            if marked.contains(&id) || alive.contains(&id) {
                continue;
            }
            match self.chunk(id) {
                Some(chunk) if !chunk.is_root() => {}
                _ => continue,
            }
            if self.is_alive_cached(id, &alive) {
                alive.insert(id);
                continue;
            }
            marked.insert(id);
            order.push(id);
            let children: Vec<(ChunkId, u32)> = match self.chunk_mut(id) {
                Some(chunk) => chunk.children.drain(..).collect(),
                None => continue,
            };
            for (child, _) in children {
                if let Some(c) = self.chunk_mut(child) {
                    c.parents.swap_remove(&id);
                }
                queue.push(child);
            }
        }
        order
    }

    /// Free marked chunks. Remaining edges are removed from both sides.
    pub fn free(&mut self, marked: &[ChunkId]) -> usize {
        let mut freed = 0;
        for &id in marked {
            let Some(chunk) = self.chunk_mut(id) else {
                continue;
            };
            let was_root = chunk.is_root();
            let parents: Vec<ChunkId> = chunk.parents.drain(..).map(|(p, _)| p).collect();
            let children: Vec<ChunkId> = chunk.children.drain(..).map(|(c, _)| c).collect();
            chunk.payload = None;
            chunk.generation = chunk.generation.wrapping_add(1);
            for parent in parents {
                if let Some(p) = self.chunk_mut(parent) {
                    p.children.swap_remove(&id);
                }
            }
            for child in children {
                let orphaned = match self.chunk_mut(child) {
                    Some(c) => {
                        c.parents.swap_remove(&id);
                        c.parents.is_empty() && !c.is_root()
                    }
                    None => false,
                };
                if orphaned {
                    self.orphans.push(child);
                }
            }
            if was_root {
                self.roots = self.roots.saturating_sub(1);
            }
            self.free.push(id.index);
            freed += 1;
        }
        self.freed_total += freed;
        freed
    }

    /// Free `root` and mark whatever it alone kept alive.
    ///
    /// Chunks still queued as orphans count as reachable here: they may be
    /// held outside the graph until the next quiescent point, where a full
    /// [`sweep`](Self::sweep) decides them.
    pub fn sweep_root(&mut self, root: ChunkId) -> Vec<ChunkId> {
        let children: Vec<ChunkId> = match self.chunk_mut(root) {
            Some(chunk) if chunk.is_root() => chunk.children.drain(..).map(|(c, _)| c).collect(),
            _ => return Vec::new(),
        };
        for &child in &children {
            if let Some(c) = self.chunk_mut(child) {
                c.parents.swap_remove(&root);
            }
        }
        self.free(&[root]);
        let pending = self.orphans.iter().copied().collect();
        self.sweep_from(children, pending)
    }

    /// Drop every edge out of `root`, keeping the root. The children are
    /// checked at the next sweep.
    pub fn clear_root(&mut self, root: ChunkId) {
        let children: Vec<ChunkId> = match self.chunk_mut(root) {
            Some(chunk) if chunk.is_root() => chunk.children.drain(..).map(|(c, _)| c).collect(),
            _ => return,
        };
        for child in children {
            if let Some(c) = self.chunk_mut(child) {
                c.parents.swap_remove(&root);
            }
            self.orphans.push(child);
        }
    }

    /// Collect everything hanging off `root`, then free the root itself.
    pub fn free_root(&mut self, root: ChunkId) -> usize {
        let marked = self.collect(root);
        self.free(&marked) + self.free(&[root])
    }

    pub fn stats(&self) -> GcStats {
        let live = self.chunks.iter().filter(|c| c.payload.is_some()).count();
        GcStats {
            total_chunks: self.chunks.len(),
            live_chunks: live,
            free_slots: self.free.len(),
            roots: self.roots,
            collections: self.collections,
            freed_total: self.freed_total,
        }
    }

    /// Check that every edge is recorded on both sides and that each object
    /// holds at least one edge per reference it contains.
    pub fn verify_edges(&self) -> Result<(), String> {
        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.payload.is_none() {
                continue;
            }
            let id = ChunkId {
                index: index as u32,
                generation: chunk.generation,
            };
            for (child, count) in &chunk.children {
                let back = self.chunk(*child).and_then(|c| c.parents.get(&id).copied());
                if back != Some(*count) {
                    return Err(format!(
                        "edge {} -> {} has count {} but back edge {:?}",
                        index, child.index, count, back
                    ));
                }
            }
            if let Some(Payload::Object(obj)) = &chunk.payload {
                let mut expected = EdgeSet::default();
                for r in obj.references() {
                    bump(&mut expected, r);
                }
                for (child, count) in expected {
                    let have = chunk.children.get(&child).copied().unwrap_or(0);
                    if have < count {
                        return Err(format!(
                            "object {} references {} {} times but holds {} edges",
                            index, child.index, count, have
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
