//! Variable descriptors.

use crate::{DeclaredType, Name};

/// Compile-time record for one local-variable declaration site.
///
/// Every runtime activation of the variable is located through this record.
/// `closure_use` is set by escape analysis before the code is committed and
/// decides, for every activation, whether storage lives in the thread's
/// stack arena or in a heap closure cell. It never changes afterwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariableDescriptor {
    name: Name,
    ty: DeclaredType,
    closure_use: bool,
}

impl VariableDescriptor {
    pub fn new(name: Name, ty: DeclaredType) -> Self {
        VariableDescriptor {
            name,
            ty,
            closure_use: false,
        }
    }

    /// Descriptor for a variable some closure captures.
    pub fn captured(name: Name, ty: DeclaredType) -> Self {
        VariableDescriptor {
            name,
            ty,
            closure_use: true,
        }
    }

    /// Record that a closure references this variable.
    ///
    /// Only meaningful while the compiler still owns the descriptor.
    pub fn mark_closure_use(&mut self) {
        self.closure_use = true;
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    #[inline]
    pub fn declared_type(&self) -> DeclaredType {
        self.ty
    }

    #[inline]
    pub fn closure_use(&self) -> bool {
        self.closure_use
    }
}
