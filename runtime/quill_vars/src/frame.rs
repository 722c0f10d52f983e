//! Call frame guards and captured environments.

use std::ops::{Deref, DerefMut};

use smallvec::SmallVec;

use crate::closure::ClosureCell;
use crate::storage::LocalStorage;

/// One function activation on a thread's storage.
///
/// Created by `LocalStorage::call_frame` with the frame boundary already
/// pushed. Derefs to the storage; on drop everything above the boundary is
/// finalized and popped together with the boundary itself, so an early
/// return or a panic in the callee leaves the caller's frame intact.
pub struct CallFrame<'s> {
    storage: &'s mut LocalStorage,
}

impl<'s> CallFrame<'s> {
    pub(crate) fn new(storage: &'s mut LocalStorage) -> Self {
        CallFrame { storage }
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        self.storage.unwind_frame();
    }
}

impl Deref for CallFrame<'_> {
    type Target = LocalStorage;

    fn deref(&self) -> &LocalStorage {
        self.storage
    }
}

impl DerefMut for CallFrame<'_> {
    fn deref_mut(&mut self) -> &mut LocalStorage {
        self.storage
    }
}

/// Closure cells captured when a closure value was created.
///
/// Each cell is held by one reference for as long as the environment lives.
/// Entering the environment makes the cells visible in a fresh frame, on
/// whichever thread runs the closure.
#[derive(Clone, Debug, Default)]
pub struct ClosureEnv {
    cells: SmallVec<[ClosureCell; 4]>,
}

impl ClosureEnv {
    pub(crate) fn new(cells: impl IntoIterator<Item = ClosureCell>) -> Self {
        ClosureEnv {
            cells: cells.into_iter().collect(),
        }
    }

    /// Push a frame boundary and the captured cells onto `storage`.
    pub fn enter<'s>(&self, storage: &'s mut LocalStorage) -> CallFrame<'s> {
        let mut frame = storage.call_frame();
        for cell in &self.cells {
            frame.push_captured(cell.acquire());
        }
        frame
    }

    pub fn cells(&self) -> &[ClosureCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
