//! Resolved declaration types.

use std::fmt;

/// The type a declaration was given by the compiler.
///
/// Only the distinction between fast-path primitives and everything else
/// matters to the runtime core: `Int`, `Float` and `Bool` declarations let a
/// cell store its payload unboxed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// No declared type; any value is accepted.
    #[default]
    Any,
    Int,
    Float,
    Bool,
    String,
    List,
    /// A class or other object-model type the runtime treats opaquely.
    Object,
}

impl DeclaredType {
    /// Whether values of this type can be stored without boxing.
    #[inline]
    pub fn has_fast_path(self) -> bool {
        matches!(self, DeclaredType::Int | DeclaredType::Float | DeclaredType::Bool)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredType::Any => "any",
            DeclaredType::Int => "int",
            DeclaredType::Float => "float",
            DeclaredType::Bool => "bool",
            DeclaredType::String => "string",
            DeclaredType::List => "list",
            DeclaredType::Object => "object",
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
