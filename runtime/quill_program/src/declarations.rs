//! Declaration tables.
//!
//! The committed tables are an immutable snapshot behind an `Arc`; commit
//! builds the next snapshot from the current one plus the pending
//! declarations and swaps it in. Readers holding an older snapshot keep a
//! consistent view. Globals are shared between snapshots, so their values
//! survive every commit.

use std::sync::Arc;

use parking_lot::Mutex;
use quill_ir::{DeclaredType, Name, StringLookup, VariableDescriptor};
use quill_value::Value;
use rustc_hash::FxHashMap;

use crate::errors::ParseError;

/// A compiled function as the variable core sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDecl {
    name: Name,
    namespace: Option<Name>,
    locals: Vec<VariableDescriptor>,
}

impl FunctionDecl {
    pub fn new(name: Name) -> Self {
        FunctionDecl {
            name,
            namespace: None,
            locals: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: Name) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Descriptors of the function's local-variable declaration sites.
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<VariableDescriptor>) -> Self {
        self.locals = locals;
        self
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn namespace(&self) -> Option<Name> {
        self.namespace
    }

    pub fn locals(&self) -> &[VariableDescriptor] {
        &self.locals
    }
}

/// A program-wide variable with a single, lock-protected value.
#[derive(Debug)]
pub struct GlobalDecl {
    name: Name,
    ty: DeclaredType,
    value: Mutex<Value>,
}

impl GlobalDecl {
    pub fn new(name: Name, ty: DeclaredType, initial: Value) -> Self {
        GlobalDecl {
            name,
            ty,
            value: Mutex::new(initial),
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.ty
    }

    pub fn get(&self) -> Value {
        self.value.lock().clone()
    }

    /// Store `value` and return the previous one, released after unlocking.
    pub fn set(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.value.lock(), value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceDecl {
    name: Name,
    parent: Option<Name>,
}

impl NamespaceDecl {
    pub fn new(name: Name) -> Self {
        NamespaceDecl { name, parent: None }
    }

    #[must_use]
    pub fn nested_in(mut self, parent: Name) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn parent(&self) -> Option<Name> {
        self.parent
    }
}

/// One declaration produced while parsing.
#[derive(Debug)]
pub enum Declaration {
    Function(FunctionDecl),
    Global(GlobalDecl),
    Namespace(NamespaceDecl),
    /// A variable of the Program's outermost scope. Every bound thread gets
    /// its own activation, starting as `Nothing`.
    TopLevel(VariableDescriptor),
}

#[derive(Clone, Debug, Default)]
pub struct Declarations {
    functions: FxHashMap<Name, Arc<FunctionDecl>>,
    globals: FxHashMap<Name, Arc<GlobalDecl>>,
    namespaces: FxHashMap<Name, Arc<NamespaceDecl>>,
    top_level: Vec<VariableDescriptor>,
}

impl Declarations {
    pub fn function(&self, name: Name) -> Option<&FunctionDecl> {
        self.functions.get(&name).map(|f| &**f)
    }

    pub fn global(&self, name: Name) -> Option<&GlobalDecl> {
        self.globals.get(&name).map(|g| &**g)
    }

    pub fn namespace(&self, name: Name) -> Option<&NamespaceDecl> {
        self.namespaces.get(&name).map(|ns| &**ns)
    }

    /// Top-level variables in declaration order.
    pub fn top_level(&self) -> &[VariableDescriptor] {
        &self.top_level
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Build the snapshot that results from committing `pending`.
    ///
    /// Namespaces are resolved first so that functions and nested
    /// namespaces of the same span may refer to them. Re-declaring a
    /// top-level variable that already exists is a no-op. Returns the new
    /// snapshot and the top-level variables it adds.
    pub(crate) fn merged(
        &self,
        pending: Vec<Declaration>,
        names: &impl StringLookup,
    ) -> Result<(Declarations, Vec<VariableDescriptor>), ParseError> {
        let render = |name: Name| names.lookup(name).to_owned();
        let mut next = self.clone();
        let mut added = Vec::new();

        let (namespaces, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|decl| matches!(decl, Declaration::Namespace(_)));

        for decl in namespaces {
            let Declaration::Namespace(ns) = decl else {
                continue;
            };
            if next.namespaces.contains_key(&ns.name) {
                return Err(ParseError::DuplicateNamespace {
                    name: render(ns.name),
                });
            }
            next.namespaces.insert(ns.name, Arc::new(ns));
        }
        for ns in next.namespaces.values() {
            if let Some(parent) = ns.parent {
                if !next.namespaces.contains_key(&parent) {
                    return Err(ParseError::UnknownNamespace {
                        name: render(parent),
                    });
                }
            }
        }

        for decl in rest {
            match decl {
                Declaration::Function(function) => {
                    if let Some(ns) = function.namespace {
                        if !next.namespaces.contains_key(&ns) {
                            return Err(ParseError::UnknownNamespace { name: render(ns) });
                        }
                    }
                    if next.functions.contains_key(&function.name) {
                        return Err(ParseError::DuplicateFunction {
                            name: render(function.name),
                        });
                    }
                    next.functions.insert(function.name, Arc::new(function));
                }
                Declaration::Global(global) => {
                    if next.globals.contains_key(&global.name) {
                        return Err(ParseError::DuplicateGlobal {
                            name: render(global.name),
                        });
                    }
                    next.globals.insert(global.name, Arc::new(global));
                }
                Declaration::TopLevel(var) => {
                    if !next.top_level.iter().any(|v| v.name() == var.name()) {
                        next.top_level.push(var);
                        added.push(var);
                    }
                }
                Declaration::Namespace(_) => {}
            }
        }

        Ok((next, added))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_ir::StringInterner;

    #[test]
    fn merge_adds_every_kind() {
        let interner = StringInterner::new();
        let ns = interner.intern("util");
        let f = interner.intern("f");
        let g = interner.intern("counter");
        let x = VariableDescriptor::new(interner.intern("x"), DeclaredType::Any);

        let (next, added) = Declarations::default()
            .merged(
                vec![
                    Declaration::Function(FunctionDecl::new(f).in_namespace(ns)),
                    Declaration::Namespace(NamespaceDecl::new(ns)),
                    Declaration::Global(GlobalDecl::new(g, DeclaredType::Int, Value::int(0))),
                    Declaration::TopLevel(x),
                ],
                &interner,
            )
            .unwrap_or_else(|err| panic!("merge failed: {err}"));

        assert_eq!(next.function(f).and_then(FunctionDecl::namespace), Some(ns));
        assert_eq!(next.global(g).map(GlobalDecl::get), Some(Value::int(0)));
        assert_eq!(next.namespace_count(), 1);
        assert_eq!(next.top_level(), &[x]);
        assert_eq!(added, vec![x]);
    }

    #[test]
    fn duplicate_function_is_rejected_without_touching_base() {
        let interner = StringInterner::new();
        let f = interner.intern("f");
        let (base, _) = Declarations::default()
            .merged(vec![Declaration::Function(FunctionDecl::new(f))], &interner)
            .unwrap_or_else(|err| panic!("merge failed: {err}"));

        let err = base
            .merged(vec![Declaration::Function(FunctionDecl::new(f))], &interner)
            .err();
        assert_eq!(err, Some(ParseError::DuplicateFunction { name: "f".into() }));
        assert_eq!(base.function_count(), 1);
    }

    #[test]
    fn unknown_parent_namespace_is_rejected() {
        let interner = StringInterner::new();
        let inner = NamespaceDecl::new(interner.intern("inner")).nested_in(interner.intern("outer"));

        let err = Declarations::default()
            .merged(vec![Declaration::Namespace(inner)], &interner)
            .err();
        assert_eq!(err, Some(ParseError::UnknownNamespace { name: "outer".into() }));
    }

    #[test]
    fn redeclared_top_level_is_not_added_twice() {
        let interner = StringInterner::new();
        let x = VariableDescriptor::new(interner.intern("x"), DeclaredType::Any);
        let (base, _) = Declarations::default()
            .merged(vec![Declaration::TopLevel(x)], &interner)
            .unwrap_or_else(|err| panic!("merge failed: {err}"));

        let (next, added) = base
            .merged(vec![Declaration::TopLevel(x)], &interner)
            .unwrap_or_else(|err| panic!("merge failed: {err}"));
        assert_eq!(next.top_level().len(), 1);
        assert!(added.is_empty());
    }

    #[test]
    fn globals_are_shared_between_snapshots() {
        let interner = StringInterner::new();
        let g = interner.intern("g");
        let (base, _) = Declarations::default()
            .merged(
                vec![Declaration::Global(GlobalDecl::new(g, DeclaredType::Any, Value::Nothing))],
                &interner,
            )
            .unwrap_or_else(|err| panic!("merge failed: {err}"));
        let (next, _) = base
            .merged(vec![Declaration::Function(FunctionDecl::new(interner.intern("f")))], &interner)
            .unwrap_or_else(|err| panic!("merge failed: {err}"));

        let _ = next.global(g).map(|global| global.set(Value::int(9)));
        assert_eq!(base.global(g).map(GlobalDecl::get), Some(Value::int(9)));
    }
}
