//! Stack arena for non-captured local variables.
//!
//! One arena per thread per Program. Only the owning thread touches it, so
//! it carries no locks of its own.

use quill_ir::{DeclaredType, Name};
use quill_value::Value;

use crate::block_stack::{BlockStack, SlotId};
use crate::cell::ValueCell;

/// How far a lookup may walk down the stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FindScope {
    /// Stop at the nearest frame boundary.
    CurrentFrame,
    /// Only the given frame: 0 is the innermost, each boundary adds one.
    Frame(usize),
    /// Walk the whole stack, passing over boundaries.
    AllFrames,
}

impl FindScope {
    /// Whether items in `frame` (counted from the top) are visible.
    /// Returns `None` once the walk has passed every visible frame.
    #[inline]
    pub(crate) fn admits(self, frame: usize) -> Option<bool> {
        match self {
            FindScope::CurrentFrame => (frame == 0).then_some(true),
            FindScope::Frame(n) if frame > n => None,
            FindScope::Frame(n) => Some(frame == n),
            FindScope::AllFrames => Some(true),
        }
    }
}

pub struct StackArena {
    slots: BlockStack<ValueCell>,
}

impl StackArena {
    pub fn new(block_size: usize) -> Self {
        StackArena {
            slots: BlockStack::new(block_size),
        }
    }

    /// Claim a new slot at the top of the stack.
    pub fn push(&mut self, name: Name, ty: DeclaredType, value: Value) -> &mut ValueCell {
        let slot = self.slots.push(ValueCell::new(name, ty, value));
        match self.slots.get_mut(slot) {
            Some(cell) => cell,
            None => unreachable!("slot pushed an instant ago is live"),
        }
    }

    /// Remove the most recently pushed slot.
    pub fn pop(&mut self) -> Option<ValueCell> {
        self.slots.pop()
    }

    pub fn top(&self) -> Option<&ValueCell> {
        self.slots.top()
    }

    pub fn top_mut(&mut self) -> Option<&mut ValueCell> {
        self.slots.top_mut()
    }

    pub fn get(&self, slot: SlotId) -> Option<&ValueCell> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut ValueCell> {
        self.slots.get_mut(slot)
    }

    /// Most recent live slot named `name`, passing over skipped slots.
    pub fn find(&self, name: Name, scope: FindScope) -> Option<SlotId> {
        let mut frame = 0;
        for (slot, cell) in self.slots.iter_rev() {
            if cell.is_frame_boundary() {
                frame += 1;
                continue;
            }
            match scope.admits(frame) {
                None => return None,
                Some(false) => {}
                Some(true) => {
                    if cell.name() == name && !cell.is_skipped() {
                        return Some(slot);
                    }
                }
            }
        }
        None
    }

    /// Variables of one frame, most recent first. Frame 0 is the innermost.
    pub fn frame(&self, frame: usize) -> impl Iterator<Item = &ValueCell> + '_ {
        let mut depth = 0;
        self.slots
            .iter_rev()
            .map(|(_, cell)| cell)
            .filter(move |cell| {
                if cell.is_frame_boundary() {
                    depth += 1;
                    false
                } else {
                    depth == frame
                }
            })
    }

    pub fn push_frame_boundary(&mut self) {
        self.slots.push(ValueCell::frame_boundary());
    }

    /// Pop the boundary at the top of the stack.
    ///
    /// # Panics
    /// Panics if the top slot is a variable: the frame still has live
    /// activations, which means the evaluator skipped an uninstantiate.
    pub fn pop_frame_boundary(&mut self) {
        match self.slots.pop() {
            Some(cell) if cell.is_frame_boundary() => {}
            Some(cell) => panic!(
                "frame boundary expected on top of stack, found variable {:?}",
                cell.name()
            ),
            None => panic!("frame boundary expected on top of stack, found empty stack"),
        }
    }

    /// Finalize every live slot in place, without popping.
    ///
    /// The stack stays structurally intact so that code running while the
    /// payloads are dropped still finds every slot (finalized slots reject
    /// writes). Returns the number of slots finalized by this call.
    pub fn finalize_all(&mut self) -> usize {
        let mut finalized = 0;
        for cell in self.slots.iter_mut() {
            if cell.is_frame_boundary() {
                continue;
            }
            if let Some(value) = cell.state.finalize() {
                drop(value);
                finalized += 1;
            }
        }
        finalized
    }

    /// Live slots, boundaries included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn allocated_blocks(&self) -> usize {
        self.slots.allocated_blocks()
    }
}
