//! Quill IR - compile-time records consumed by the runtime core.
//!
//! The compiler hands the runtime three kinds of data:
//! - `Name`: interned identifiers, compared by `u32` identity
//! - `DeclaredType`: the resolved type of a declaration
//! - `VariableDescriptor`: one record per local-variable declaration site,
//!   carrying the closure-capture decision made by escape analysis
//!
//! Everything here is immutable once the compiler has finished with it and
//! is freely shared between threads.

mod declared_type;
mod descriptor;
mod interner;
mod name;

pub use declared_type::DeclaredType;
pub use descriptor::VariableDescriptor;
pub use interner::{InternError, SharedInterner, StringInterner, StringLookup};
pub use name::Name;
