use super::*;
use pretty_assertions::assert_eq;
use quill_ir::StringInterner;

#[test]
fn acquire_and_release_track_references() {
    let interner = StringInterner::new();
    let cell = ClosureCell::new(interner.intern("x"), DeclaredType::Int, Value::int(5));
    assert_eq!(cell.ref_count(), 1);

    let other = cell.acquire();
    assert_eq!(cell.ref_count(), 2);
    assert!(cell.ptr_eq(&other));

    other.release();
    assert_eq!(cell.ref_count(), 1);
}

#[test]
fn payload_dropped_with_last_handle() {
    let interner = StringInterner::new();
    let shared = Value::string("captured");
    let cell = ClosureCell::new(interner.intern("s"), DeclaredType::Any, shared.clone());
    let other = cell.acquire();

    let Value::Str(node) = &shared else {
        panic!("expected string");
    };
    assert_eq!(node.ref_count(), 2);

    drop(cell);
    assert_eq!(node.ref_count(), 2);
    drop(other);
    assert_eq!(node.ref_count(), 1);
}

#[test]
fn writes_are_visible_across_threads() {
    let interner = StringInterner::new();
    let cell = ClosureCell::new(interner.intern("n"), DeclaredType::Int, Value::int(0));

    std::thread::scope(|s| {
        for _ in 0..4 {
            let cell = cell.acquire();
            s.spawn(move || {
                for _ in 0..100 {
                    let mut state = cell.0.state.lock();
                    let next = state.payload().to_value().as_int().unwrap_or(0) + 1;
                    let _ = state.store(Value::int(next));
                }
            });
        }
    });

    assert_eq!(cell.peek(), Value::int(400));
    assert_eq!(cell.ref_count(), 1);
}

#[test]
fn skipped_cell_guard_clears_flag() {
    let interner = StringInterner::new();
    let x = interner.intern("x");
    let target = quill_ir::VariableDescriptor::captured(x, DeclaredType::Any);
    let cell = ClosureCell::new(x, DeclaredType::Any, Value::reference(&target));

    assert!(matches!(cell.load(), Load::Redirect(_)));
    {
        let _guard = SkippedCell(&cell);
        assert!(cell.is_skipped());
    }
    assert!(!cell.is_skipped());
}

#[test]
fn stack_find_respects_frames_and_skip() {
    let interner = StringInterner::new();
    let x = interner.intern("x");
    let mut stack = ClosureStack::new(2);

    let outer = ClosureCell::new(x, DeclaredType::Int, Value::int(1));
    stack.push(outer.acquire());
    stack.push_frame_boundary();
    let inner = ClosureCell::new(x, DeclaredType::Int, Value::int(2));
    stack.push(inner.acquire());

    let found = stack.find(x, FindScope::CurrentFrame);
    assert!(found.is_some_and(|c| c.ptr_eq(&inner)));

    let target = quill_ir::VariableDescriptor::captured(x, DeclaredType::Any);
    let _ = inner.store(Value::reference(&target));
    assert!(matches!(inner.load(), Load::Redirect(_)));
    assert!(stack.find(x, FindScope::CurrentFrame).is_none());
    assert!(stack
        .find(x, FindScope::AllFrames)
        .is_some_and(|c| c.ptr_eq(&outer)));
    inner.clear_skip();
}

#[test]
fn finalize_unshared_leaves_shared_cells_alone() {
    let interner = StringInterner::new();
    let mut stack = ClosureStack::new(4);
    let shared = ClosureCell::new(interner.intern("a"), DeclaredType::Int, Value::int(1));
    stack.push(shared.acquire());
    stack.push(ClosureCell::new(interner.intern("b"), DeclaredType::Int, Value::int(2)));

    assert_eq!(stack.finalize_unshared(), 1);
    assert!(!shared.is_finalized());
    assert_eq!(shared.peek(), Value::int(1));
    assert_eq!(stack.len(), 2);
}

#[test]
fn frame_lists_cells_of_one_frame() {
    let interner = StringInterner::new();
    let mut stack = ClosureStack::new(2);
    let a = ClosureCell::new(interner.intern("a"), DeclaredType::Any, Value::Nothing);
    let b = ClosureCell::new(interner.intern("b"), DeclaredType::Any, Value::Nothing);
    stack.push(a.acquire());
    stack.push_frame_boundary();
    stack.push(b.acquire());

    let inner: Vec<Name> = stack.frame(0).map(ClosureCell::name).collect();
    let outer: Vec<Name> = stack.frame(1).map(ClosureCell::name).collect();
    assert_eq!(inner, vec![b.name()]);
    assert_eq!(outer, vec![a.name()]);

    stack.pop();
    stack.pop_frame_boundary();
    assert_eq!(stack.len(), 1);
}
