//! Runtime values.
//!
//! # Representation
//!
//! Primitives (`Int`, `Float`, `Bool`) are stored inline. Everything else
//! is a `Heap<T>` handle, so cloning a value never deep-copies and dropping
//! the last handle frees the node on whatever thread that happens.
//!
//! `Reference` is the one value the variable core interprets itself: a cell
//! whose payload is a reference reads and writes through to the named
//! variable instead of its own payload.

mod heap;

use std::fmt;

use quill_ir::{Name, VariableDescriptor};

pub use heap::Heap;

/// Which backing store a referenced variable lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Storage {
    /// The thread's stack arena.
    Local,
    /// A heap closure cell reachable from the thread's closure stack.
    Closure,
}

/// An alias to another variable, resolved by name at access time.
///
/// Resolution walks the accessing thread's stacks across frame boundaries,
/// so a reference created in a caller's frame reaches the caller's variable
/// even when the callee has a variable of the same name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference {
    target: Name,
    storage: Storage,
}

impl Reference {
    /// Reference to the current activation of `var`.
    pub fn to(var: &VariableDescriptor) -> Self {
        Reference {
            target: var.name(),
            storage: if var.closure_use() {
                Storage::Closure
            } else {
                Storage::Local
            },
        }
    }

    #[inline]
    pub fn target(self) -> Name {
        self.target
    }

    #[inline]
    pub fn storage(self) -> Storage {
        self.storage
    }
}

/// Runtime value held by a variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// No value. Fresh top-level variables and finalized cells hold this.
    #[default]
    Nothing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Heap<String>),
    List(Heap<Vec<Value>>),
    /// Alias to another variable.
    Reference(Reference),
}

impl Value {
    #[inline]
    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    #[inline]
    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    #[inline]
    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(Heap::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Heap::new(items))
    }

    /// Value aliasing the current activation of `var`.
    pub fn reference(var: &VariableDescriptor) -> Self {
        Value::Reference(Reference::to(var))
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Value::Reference(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Reference(_) => "reference",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => f.write_str("NOTHING"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Reference(r) => write!(f, "\\{:?}", r.target()),
        }
    }
}
