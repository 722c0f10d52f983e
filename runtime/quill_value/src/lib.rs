//! Quill Value - runtime values and runtime errors.
//!
//! This crate provides:
//! - `Value`: the dynamically typed value stored in variable cells
//! - `Heap<T>`: the shared, reference-counted wrapper behind generic values
//! - `Reference`: a value that aliases another variable
//! - `RuntimeError`: recoverable errors raised by variable access
//!
//! Arithmetic, string behaviour and the object model live outside the
//! runtime core; values here only need to be stored, shared and dropped.

mod errors;
mod value;

pub use errors::{RuntimeError, RuntimeResult};
pub use value::{Heap, Reference, Storage, Value};
