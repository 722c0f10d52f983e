//! Closure cells and the per-thread closure stack.
//!
//! A variable whose descriptor is marked `closure_use` never lives in the
//! stack arena. Each activation is a `ClosureCell`: a heap cell with its own
//! reference count and its own mutex, because closures running on other
//! threads may read and write it long after the declaring frame returned.
//!
//! The closure stack holds handles to the cells visible to the thread, in
//! lexical order, so lookup and frame boundaries work exactly as they do
//! for the arena.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use quill_ir::{DeclaredType, Name};
use quill_value::Value;

use crate::arena::FindScope;
use crate::block_stack::BlockStack;
use crate::cell::{CellFlags, CellState, Load, Store};

struct ClosureCellInner {
    name: Name,
    state: Mutex<CellState>,
}

/// Shared storage for one activation of a captured variable.
///
/// Cloning is `acquire`, dropping is `release`; the payload is dropped when
/// the last handle goes away, on whichever thread that is.
#[derive(Clone)]
pub struct ClosureCell(Arc<ClosureCellInner>);

impl ClosureCell {
    pub fn new(name: Name, ty: DeclaredType, value: Value) -> Self {
        ClosureCell(Arc::new(ClosureCellInner {
            name,
            state: Mutex::new(CellState::new(ty, value)),
        }))
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.0.name
    }

    /// Take another reference to the cell.
    #[must_use]
    pub fn acquire(&self) -> ClosureCell {
        self.clone()
    }

    /// Give up this reference.
    pub fn release(self) {
        drop(self);
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn ptr_eq(&self, other: &ClosureCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stored value without following references.
    pub fn peek(&self) -> Value {
        self.0.state.lock().payload().to_value()
    }

    pub fn is_skipped(&self) -> bool {
        self.0.state.lock().flags().contains(CellFlags::SKIP)
    }

    pub fn is_finalized(&self) -> bool {
        self.0.state.lock().flags().contains(CellFlags::FINALIZED)
    }

    /// Finalize the cell for every holder.
    ///
    /// The payload is dropped after the cell's lock is released. Returns
    /// `false` if the cell had already been finalized.
    pub fn finalize(&self) -> bool {
        let value = self.0.state.lock().finalize();
        value.is_some()
    }

    pub(crate) fn load(&self) -> Load {
        self.0.state.lock().load()
    }

    pub(crate) fn store(&self, value: Value) -> Store {
        self.0.state.lock().store(value)
    }

    pub(crate) fn clear_skip(&self) {
        self.0.state.lock().clear_skip();
    }
}

impl fmt::Debug for ClosureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCell")
            .field("name", &self.0.name)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Clears a closure cell's `SKIP` flag when dropped.
///
/// The flag is set under the cell's lock by `load`/`store`; the lock itself
/// is not held while the reference is followed.
pub(crate) struct SkippedCell<'c>(pub(crate) &'c ClosureCell);

impl Drop for SkippedCell<'_> {
    fn drop(&mut self) {
        self.0.clear_skip();
    }
}

/// Entry on the closure stack.
#[derive(Clone, Debug)]
pub enum ClosureEntry {
    Cell(ClosureCell),
    FrameBoundary,
}

/// Per-thread LIFO of closure cell handles, mirroring the stack arena.
pub struct ClosureStack {
    entries: BlockStack<ClosureEntry>,
}

impl ClosureStack {
    pub fn new(block_size: usize) -> Self {
        ClosureStack {
            entries: BlockStack::new(block_size),
        }
    }

    /// Push a handle; the stack owns one reference to the cell from now on.
    pub fn push(&mut self, cell: ClosureCell) {
        self.entries.push(ClosureEntry::Cell(cell));
    }

    pub fn pop(&mut self) -> Option<ClosureEntry> {
        self.entries.pop()
    }

    pub fn top(&self) -> Option<&ClosureEntry> {
        self.entries.top()
    }

    /// Most recent visible cell named `name`, passing over cells that are
    /// resolving their own reference.
    pub fn find(&self, name: Name, scope: FindScope) -> Option<ClosureCell> {
        let mut frame = 0;
        for (_, entry) in self.entries.iter_rev() {
            let cell = match entry {
                ClosureEntry::FrameBoundary => {
                    frame += 1;
                    continue;
                }
                ClosureEntry::Cell(cell) => cell,
            };
            match scope.admits(frame) {
                None => return None,
                Some(false) => {}
                Some(true) => {
                    if cell.name() == name && !cell.is_skipped() {
                        return Some(cell.acquire());
                    }
                }
            }
        }
        None
    }

    /// Cells of one frame, most recent first.
    pub fn frame(&self, frame: usize) -> impl Iterator<Item = &ClosureCell> + '_ {
        let mut depth = 0;
        self.entries
            .iter_rev()
            .filter_map(move |(_, entry)| match entry {
                ClosureEntry::FrameBoundary => {
                    depth += 1;
                    None
                }
                ClosureEntry::Cell(cell) => (depth == frame).then_some(cell),
            })
    }

    pub fn push_frame_boundary(&mut self) {
        self.entries.push(ClosureEntry::FrameBoundary);
    }

    /// # Panics
    /// Panics if the top entry is a cell.
    pub fn pop_frame_boundary(&mut self) {
        match self.entries.pop() {
            Some(ClosureEntry::FrameBoundary) => {}
            Some(ClosureEntry::Cell(cell)) => panic!(
                "frame boundary expected on top of closure stack, found cell {:?}",
                cell.name()
            ),
            None => panic!("frame boundary expected on top of closure stack, found empty stack"),
        }
    }

    /// Finalize every cell this stack is the last holder of.
    ///
    /// Cells still shared with a live closure keep their value; they are
    /// finalized by whoever drops the last handle. Returns the number of
    /// cells finalized.
    pub fn finalize_unshared(&mut self) -> usize {
        let mut finalized = 0;
        for entry in self.entries.iter_mut() {
            if let ClosureEntry::Cell(cell) = entry {
                if cell.ref_count() == 1 && cell.finalize() {
                    finalized += 1;
                }
            }
        }
        finalized
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests;
