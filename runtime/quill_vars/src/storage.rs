//! Per-thread variable storage and descriptor dispatch.
//!
//! `LocalStorage` is the pair of stacks one thread owns inside one Program.
//! The evaluator drives it with variable descriptors; the descriptor's
//! `closure_use` flag picks the backing store and the rest of the access
//! path is the same for both:
//!
//! - a payload that is a `Reference` is followed instead of returned, with
//!   the cell marked `SKIP` for the duration so the lookup of the target
//!   passes over it;
//! - the `SKIP` flag is cleared by a guard's `Drop`, so every exit path,
//!   including an error or a panic while resolving, restores the cell.

use std::ops::{Deref, DerefMut};

use quill_ir::{Name, SharedInterner, VariableDescriptor};
use quill_value::{Reference, RuntimeError, RuntimeResult, Storage, Value};

use crate::arena::{FindScope, StackArena};
use crate::block_stack::SlotId;
use crate::cell::{Load, Store, ValueCell};
use crate::closure::{ClosureCell, ClosureEntry, ClosureStack, SkippedCell};
use crate::frame::{CallFrame, ClosureEnv};
use crate::stack::ensure_sufficient_stack;

/// Block sizes for the two per-thread stacks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StorageLayout {
    pub stack_block_size: usize,
    pub closure_block_size: usize,
}

impl StorageLayout {
    pub const DEFAULT_STACK_BLOCK: usize = 64;
    pub const DEFAULT_CLOSURE_BLOCK: usize = 16;
}

impl Default for StorageLayout {
    fn default() -> Self {
        StorageLayout {
            stack_block_size: Self::DEFAULT_STACK_BLOCK,
            closure_block_size: Self::DEFAULT_CLOSURE_BLOCK,
        }
    }
}

/// A live variable as seen by introspection.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameVariable {
    pub name: Name,
    /// Stored value; references are reported as-is, not followed.
    pub value: Value,
    pub captured: bool,
}

pub struct LocalStorage {
    interner: SharedInterner,
    stack: StackArena,
    closures: ClosureStack,
    /// Frame boundaries currently pushed.
    depth: usize,
    /// Outermost-frame variables waiting for every call frame to return.
    deferred: Vec<VariableDescriptor>,
}

impl LocalStorage {
    pub fn new(interner: SharedInterner, layout: StorageLayout) -> Self {
        LocalStorage {
            interner,
            stack: StackArena::new(layout.stack_block_size),
            closures: ClosureStack::new(layout.closure_block_size),
            depth: 0,
            deferred: Vec::new(),
        }
    }

    pub fn stack(&self) -> &StackArena {
        &self.stack
    }

    pub fn closures(&self) -> &ClosureStack {
        &self.closures
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty() && self.closures.is_empty()
    }

    /// Number of call frames above the outermost one.
    pub fn frame_depth(&self) -> usize {
        self.depth
    }

    /// Outermost-frame variables not instantiated yet because a call frame
    /// is active.
    pub fn deferred(&self) -> &[VariableDescriptor] {
        &self.deferred
    }

    // Evaluator entry points

    /// Start a new activation of `var` holding `value`.
    pub fn instantiate(&mut self, var: &VariableDescriptor, value: Value) {
        if var.closure_use() {
            self.closures
                .push(ClosureCell::new(var.name(), var.declared_type(), value));
        } else {
            self.stack.push(var.name(), var.declared_type(), value);
        }
    }

    /// Instantiate `var` as `Nothing` in the outermost frame.
    ///
    /// Happens at once when no call frame is active; otherwise it waits
    /// until the last call frame has been popped.
    pub fn instantiate_outermost(&mut self, var: &VariableDescriptor) {
        if self.depth == 0 {
            self.instantiate(var, Value::Nothing);
        } else {
            self.deferred.push(*var);
        }
    }

    pub fn read(&mut self, var: &VariableDescriptor) -> RuntimeResult<Value> {
        if var.closure_use() {
            let cell = self.closure_cell(var);
            self.read_cell(&cell)
        } else {
            let slot = self.local_slot(var);
            self.read_slot(slot)
        }
    }

    pub fn write(&mut self, var: &VariableDescriptor, value: Value) -> RuntimeResult<()> {
        if var.closure_use() {
            let cell = self.closure_cell(var);
            self.write_cell(&cell, value)
        } else {
            let slot = self.local_slot(var);
            self.write_slot(slot, value)
        }
    }

    /// End the most recent activation of `var`: finalize, then pop.
    ///
    /// # Panics
    /// Panics if `var` is not the most recently instantiated variable of its
    /// store.
    pub fn uninstantiate(&mut self, var: &VariableDescriptor) {
        if var.closure_use() {
            match self.closures.pop() {
                Some(ClosureEntry::Cell(cell)) => {
                    debug_assert_eq!(cell.name(), var.name(), "closure stack out of order");
                    cell.release();
                }
                _ => self.lifo_violation(var),
            }
            return;
        }

        let live = self
            .stack
            .top()
            .is_some_and(|top| !top.is_frame_boundary());
        if !live {
            self.lifo_violation(var);
        }
        if let Some(top) = self.stack.top_mut() {
            debug_assert_eq!(top.name(), var.name(), "stack arena out of order");
            drop(top.state.finalize());
        }
        self.stack.pop();
    }

    pub fn push_frame_boundary(&mut self) {
        self.stack.push_frame_boundary();
        self.closures.push_frame_boundary();
        self.depth += 1;
    }

    pub fn pop_frame_boundary(&mut self) {
        self.closures.pop_frame_boundary();
        self.stack.pop_frame_boundary();
        self.leave_frame();
    }

    /// Push a frame boundary and return a guard that unwinds the frame.
    pub fn call_frame(&mut self) -> CallFrame<'_> {
        self.push_frame_boundary();
        CallFrame::new(self)
    }

    pub(crate) fn push_captured(&mut self, cell: ClosureCell) {
        self.closures.push(cell);
    }

    /// Take a reference to the current activation of each captured variable.
    ///
    /// # Panics
    /// Panics if a descriptor is not marked `closure_use` or has no live
    /// activation in the current frame.
    pub fn capture(&self, vars: &[VariableDescriptor]) -> ClosureEnv {
        ClosureEnv::new(vars.iter().map(|var| {
            assert!(
                var.closure_use(),
                "`{}` is captured but was not marked for closure use",
                self.name_of(var.name())
            );
            self.closure_cell(var)
        }))
    }

    // Teardown

    /// First teardown phase: drop payloads, keep every slot in place.
    ///
    /// Afterwards reads see `Nothing` and writes fail with a late-assignment
    /// error. Closure cells still shared with a live closure are left alone.
    pub fn finalize(&mut self) -> usize {
        self.stack.finalize_all() + self.closures.finalize_unshared()
    }

    /// Second teardown phase: pop everything, releasing closure handles.
    pub fn clear(&mut self) {
        while self.closures.pop().is_some() {}
        while self.stack.pop().is_some() {}
        self.depth = 0;
        self.deferred.clear();
    }

    /// Pop everything down to and including the nearest frame boundary.
    pub(crate) fn unwind_frame(&mut self) {
        while let Some(entry) = self.closures.pop() {
            if matches!(entry, ClosureEntry::FrameBoundary) {
                break;
            }
        }
        while let Some(top) = self.stack.top_mut() {
            let boundary = top.is_frame_boundary();
            if !boundary {
                drop(top.state.finalize());
            }
            self.stack.pop();
            if boundary {
                break;
            }
        }
        self.leave_frame();
    }

    fn leave_frame(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth > 0 || self.deferred.is_empty() {
            return;
        }
        let deferred = std::mem::take(&mut self.deferred);
        tracing::trace!(count = deferred.len(), "instantiating deferred outermost variables");
        for var in &deferred {
            self.instantiate(var, Value::Nothing);
        }
    }

    // Introspection

    /// Live variables of frame `frame` (0 is innermost), most recent first,
    /// arena variables before captured ones.
    pub fn frame_variables(&self, frame: usize) -> Vec<FrameVariable> {
        let locals = self.stack.frame(frame).map(|cell| FrameVariable {
            name: cell.name(),
            value: cell.value(),
            captured: false,
        });
        let captured = self.closures.frame(frame).map(|cell| FrameVariable {
            name: cell.name(),
            value: cell.peek(),
            captured: true,
        });
        locals.chain(captured).collect()
    }

    /// Assign to the variable `name` of frame `frame` through the ordinary
    /// write path.
    pub fn assign_in_frame(&mut self, frame: usize, name: Name, value: Value) -> RuntimeResult<()> {
        if let Some(slot) = self.stack.find(name, FindScope::Frame(frame)) {
            return self.write_slot(slot, value);
        }
        if let Some(cell) = self.closures.find(name, FindScope::Frame(frame)) {
            return self.write_cell(&cell, value);
        }
        Err(RuntimeError::UnknownVariable {
            name: self.name_of(name),
            frame,
        })
    }

    // Access paths

    fn local_slot(&self, var: &VariableDescriptor) -> SlotId {
        match self.stack.find(var.name(), FindScope::CurrentFrame) {
            Some(slot) => slot,
            None => self.missing_activation(var),
        }
    }

    fn closure_cell(&self, var: &VariableDescriptor) -> ClosureCell {
        match self.closures.find(var.name(), FindScope::CurrentFrame) {
            Some(cell) => cell,
            None => self.missing_activation(var),
        }
    }

    fn cell_mut(&mut self, slot: SlotId) -> &mut ValueCell {
        match self.stack.get_mut(slot) {
            Some(cell) => cell,
            None => panic!("stack slot {} is no longer live", slot.index()),
        }
    }

    fn read_slot(&mut self, slot: SlotId) -> RuntimeResult<Value> {
        match self.cell_mut(slot).state.load() {
            Load::Value(value) => Ok(value),
            Load::Redirect(target) => {
                let mut skipped = SkippedSlot::new(self, slot);
                skipped.read_reference(target)
            }
        }
    }

    fn read_cell(&mut self, cell: &ClosureCell) -> RuntimeResult<Value> {
        match cell.load() {
            Load::Value(value) => Ok(value),
            Load::Redirect(target) => {
                let _skipped = SkippedCell(cell);
                self.read_reference(target)
            }
        }
    }

    fn read_reference(&mut self, target: Reference) -> RuntimeResult<Value> {
        ensure_sufficient_stack(|| -> RuntimeResult<Value> {
            match target.storage() {
                Storage::Local => {
                    let slot = self
                        .stack
                        .find(target.target(), FindScope::AllFrames)
                        .ok_or_else(|| self.unresolved(target))?;
                    self.read_slot(slot)
                }
                Storage::Closure => {
                    let cell = self
                        .closures
                        .find(target.target(), FindScope::AllFrames)
                        .ok_or_else(|| self.unresolved(target))?;
                    self.read_cell(&cell)
                }
            }
        })
    }

    fn write_slot(&mut self, slot: SlotId, value: Value) -> RuntimeResult<()> {
        let cell = self.cell_mut(slot);
        let name = cell.name();
        match cell.state.store(value) {
            Store::Stored(previous) => {
                drop(previous);
                Ok(())
            }
            Store::Finalized(_) => Err(self.late_assignment(name)),
            Store::Redirect(target, value) => {
                let mut skipped = SkippedSlot::new(self, slot);
                skipped.write_reference(target, value)
            }
        }
    }

    fn write_cell(&mut self, cell: &ClosureCell, value: Value) -> RuntimeResult<()> {
        match cell.store(value) {
            Store::Stored(previous) => {
                drop(previous);
                Ok(())
            }
            Store::Finalized(_) => Err(self.late_assignment(cell.name())),
            Store::Redirect(target, value) => {
                let _skipped = SkippedCell(cell);
                self.write_reference(target, value)
            }
        }
    }

    fn write_reference(&mut self, target: Reference, value: Value) -> RuntimeResult<()> {
        ensure_sufficient_stack(|| -> RuntimeResult<()> {
            match target.storage() {
                Storage::Local => {
                    let slot = self
                        .stack
                        .find(target.target(), FindScope::AllFrames)
                        .ok_or_else(|| self.unresolved(target))?;
                    self.write_slot(slot, value)
                }
                Storage::Closure => {
                    let cell = self
                        .closures
                        .find(target.target(), FindScope::AllFrames)
                        .ok_or_else(|| self.unresolved(target))?;
                    self.write_cell(&cell, value)
                }
            }
        })
    }

    // Diagnostics

    fn name_of(&self, name: Name) -> String {
        self.interner.lookup(name).to_owned()
    }

    fn unresolved(&self, target: Reference) -> RuntimeError {
        RuntimeError::UnresolvedReference {
            name: self.name_of(target.target()),
        }
    }

    fn late_assignment(&self, name: Name) -> RuntimeError {
        tracing::debug!(variable = self.interner.lookup(name), "assignment after finalize");
        RuntimeError::LateAssignment {
            name: self.name_of(name),
        }
    }

    #[cold]
    fn missing_activation(&self, var: &VariableDescriptor) -> ! {
        panic!(
            "no live activation of `{}` in the current frame",
            self.name_of(var.name())
        )
    }

    #[cold]
    fn lifo_violation(&self, var: &VariableDescriptor) -> ! {
        panic!(
            "uninstantiate of `{}` does not match the top of its stack",
            self.name_of(var.name())
        )
    }
}

/// Storage borrowed while one arena slot resolves its reference.
///
/// Derefs to the storage so the resolution can keep walking it; dropping the
/// guard clears the slot's `SKIP` flag.
struct SkippedSlot<'s> {
    storage: &'s mut LocalStorage,
    slot: SlotId,
}

impl<'s> SkippedSlot<'s> {
    fn new(storage: &'s mut LocalStorage, slot: SlotId) -> Self {
        SkippedSlot { storage, slot }
    }
}

impl Drop for SkippedSlot<'_> {
    fn drop(&mut self) {
        if let Some(cell) = self.storage.stack.get_mut(self.slot) {
            cell.state.clear_skip();
        }
    }
}

impl Deref for SkippedSlot<'_> {
    type Target = LocalStorage;

    fn deref(&self) -> &LocalStorage {
        self.storage
    }
}

impl DerefMut for SkippedSlot<'_> {
    fn deref_mut(&mut self) -> &mut LocalStorage {
        self.storage
    }
}
