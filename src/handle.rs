//! Host-side references into the heap.
//!
//! A [`Handle`] keeps its value alive from outside the interpreter. Creating
//! one adds an edge from the context's handle root; dropping the last clone
//! queues the edge for removal. The queue is drained at the next collection,
//! so dropping a handle never needs access to the heap.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::gc::ChunkId;
use crate::value::{CheapClone, Value};

/// Chunks whose handle edges should be removed at the next collection.
///
/// The epoch advances when the context replaces its heap; handles from an
/// older epoch point into a heap that no longer exists and queue nothing.
#[derive(Default)]
pub(crate) struct ReleaseQueue {
    pending: Cell<Vec<ChunkId>>,
    epoch: Cell<u64>,
}

impl ReleaseQueue {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    fn push(&self, epoch: u64, id: ChunkId) {
        if epoch != self.epoch.get() {
            return;
        }
        let mut pending = self.pending.take();
        pending.push(id);
        self.pending.set(pending);
    }

    pub(crate) fn drain(&self) -> Vec<ChunkId> {
        self.pending.take()
    }

    /// Forget queued releases and start a new epoch
    pub(crate) fn reset(&self) {
        self.pending.take();
        self.epoch.set(self.epoch.get().wrapping_add(1));
    }
}

struct HandleInner {
    value: Value,
    releases: Rc<ReleaseQueue>,
    epoch: u64,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(id) = self.value.as_object() {
            self.releases.push(self.epoch, id);
        }
    }
}

/// Reference-counted root for a value returned to the host.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<HandleInner>,
}

impl CheapClone for Handle {}

impl Handle {
    /// The caller has already added the handle-root edge for `value`.
    pub(crate) fn new(value: Value, releases: Rc<ReleaseQueue>) -> Self {
        let epoch = releases.epoch.get();
        Self {
            inner: Rc::new(HandleInner { value, releases, epoch }),
        }
    }

    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    /// Copy of the referenced value. Object copies are only safe to use
    /// while this handle is alive.
    pub fn get(&self) -> Value {
        self.inner.value.clone()
    }

    pub fn as_object(&self) -> Option<ChunkId> {
        self.inner.value.as_object()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:?})", self.inner.value)
    }
}
