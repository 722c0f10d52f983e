//! Value cells: one activation's storage for one variable.
//!
//! `CellState` holds the payload and flags shared by both storage kinds.
//! A `ValueCell` owns its state directly and lives in the stack arena; a
//! closure cell wraps the same state in its own mutex.

use bitflags::bitflags;
use quill_ir::{DeclaredType, Name};
use quill_value::{Reference, Value};

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CellFlags: u8 {
        /// Cell is resolving its own reference; lookups must pass over it.
        const SKIP = 1;
        /// Payload has been dropped; the cell only awaits removal.
        const FINALIZED = 1 << 1;
        /// Sentinel separating one call frame from its caller.
        const FRAME_BOUNDARY = 1 << 2;
    }
}

/// Stored representation of a value.
///
/// A value matching the cell's declared fast-path type is kept unboxed;
/// anything else falls back to `Generic`.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Int(i64),
    Float(f64),
    Bool(bool),
    Generic(Value),
}

impl Payload {
    pub fn tagged(ty: DeclaredType, value: Value) -> Self {
        if !ty.has_fast_path() {
            return Payload::Generic(value);
        }
        match (ty, value) {
            (DeclaredType::Int, Value::Int(n)) => Payload::Int(n),
            (DeclaredType::Float, Value::Float(x)) => Payload::Float(x),
            (DeclaredType::Bool, Value::Bool(b)) => Payload::Bool(b),
            (_, value) => Payload::Generic(value),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Payload::Int(n) => Value::Int(*n),
            Payload::Float(x) => Value::Float(*x),
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Generic(v) => v.clone(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Int(n) => Value::Int(n),
            Payload::Float(x) => Value::Float(x),
            Payload::Bool(b) => Value::Bool(b),
            Payload::Generic(v) => v,
        }
    }

    pub fn is_fast_path(&self) -> bool {
        !matches!(self, Payload::Generic(_))
    }

    fn reference(&self) -> Option<Reference> {
        match self {
            Payload::Generic(v) => v.as_reference(),
            _ => None,
        }
    }
}

/// Result of loading a cell.
pub(crate) enum Load {
    Value(Value),
    /// The payload aliases another variable. `SKIP` has been set and must be
    /// cleared by the caller once the target has been read.
    Redirect(Reference),
}

/// Result of storing into a cell.
pub(crate) enum Store {
    /// Stored; holds the displaced value so it can be dropped outside any lock.
    Stored(Value),
    /// The payload aliases another variable. `SKIP` has been set; the value
    /// must be written to the reference target instead.
    Redirect(Reference, Value),
    /// The cell was already finalized; the value is handed back untouched.
    Finalized(Value),
}

#[derive(Debug)]
pub(crate) struct CellState {
    ty: DeclaredType,
    payload: Payload,
    flags: CellFlags,
}

impl CellState {
    pub(crate) fn new(ty: DeclaredType, value: Value) -> Self {
        CellState {
            ty,
            payload: Payload::tagged(ty, value),
            flags: CellFlags::empty(),
        }
    }

    fn boundary() -> Self {
        CellState {
            ty: DeclaredType::Any,
            payload: Payload::Generic(Value::Nothing),
            flags: CellFlags::FRAME_BOUNDARY,
        }
    }

    #[inline]
    pub(crate) fn flags(&self) -> CellFlags {
        self.flags
    }

    #[inline]
    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn load(&mut self) -> Load {
        match self.payload.reference() {
            Some(r) => {
                self.flags.insert(CellFlags::SKIP);
                Load::Redirect(r)
            }
            None => Load::Value(self.payload.to_value()),
        }
    }

    pub(crate) fn store(&mut self, value: Value) -> Store {
        if self.flags.contains(CellFlags::FINALIZED) {
            return Store::Finalized(value);
        }
        if let Some(r) = self.payload.reference() {
            self.flags.insert(CellFlags::SKIP);
            return Store::Redirect(r, value);
        }
        let previous = std::mem::replace(&mut self.payload, Payload::tagged(self.ty, value));
        Store::Stored(previous.into_value())
    }

    pub(crate) fn clear_skip(&mut self) {
        self.flags.remove(CellFlags::SKIP);
    }

    /// Mark the cell finalized and hand back its payload for dropping.
    ///
    /// Returns `None` if the cell was already finalized.
    pub(crate) fn finalize(&mut self) -> Option<Value> {
        if self.flags.contains(CellFlags::FINALIZED) {
            return None;
        }
        self.flags.insert(CellFlags::FINALIZED);
        let payload = std::mem::replace(&mut self.payload, Payload::Generic(Value::Nothing));
        Some(payload.into_value())
    }
}

/// One activation of a non-captured variable, or a frame boundary.
#[derive(Debug)]
pub struct ValueCell {
    name: Name,
    pub(crate) state: CellState,
}

impl ValueCell {
    pub(crate) fn new(name: Name, ty: DeclaredType, value: Value) -> Self {
        ValueCell {
            name,
            state: CellState::new(ty, value),
        }
    }

    pub(crate) fn frame_boundary() -> Self {
        ValueCell {
            name: Name::EMPTY,
            state: CellState::boundary(),
        }
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.state.ty
    }

    /// Stored value without following references.
    pub fn value(&self) -> Value {
        self.state.payload().to_value()
    }

    pub fn payload(&self) -> &Payload {
        self.state.payload()
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        self.state.flags().contains(CellFlags::SKIP)
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.state.flags().contains(CellFlags::FINALIZED)
    }

    #[inline]
    pub fn is_frame_boundary(&self) -> bool {
        self.state.flags().contains(CellFlags::FRAME_BOUNDARY)
    }
}
