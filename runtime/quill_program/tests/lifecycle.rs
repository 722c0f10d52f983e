//! Multi-threaded Program lifecycle: bindings, closure sharing across
//! threads, and commit exclusivity.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Barrier};
use std::thread;

use pretty_assertions::assert_eq;
use quill_ir::{DeclaredType, SharedInterner, VariableDescriptor};
use quill_program::{
    Declaration, FunctionDecl, GlobalDecl, ParsePhase, Program, ProgramError, RuntimeConfig,
};
use quill_value::Value;

fn program() -> Program {
    quill_program::init_tracing();
    Program::new(SharedInterner::new(), RuntimeConfig::default())
}

fn declare_function(program: &Program, name: &str) -> Declaration {
    Declaration::Function(FunctionDecl::new(program.interner().intern(name)))
}

#[test]
fn captured_variable_shared_with_second_thread_then_commit() {
    let program = program();
    let x = VariableDescriptor::captured(program.interner().intern("x"), DeclaredType::Int);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    let span = program.enter();
    assert_eq!(program.running_threads(), 1);

    let env = {
        let mut locals = span.locals();
        locals.instantiate(&x, Value::int(5));
        assert_eq!(locals.read(&x), Ok(Value::int(5)));
        locals.capture(&[x])
    };
    assert_eq!(env.cells()[0].ref_count(), 2);

    thread::scope(|s| {
        let (program, env) = (&program, &env);
        s.spawn(move || {
            let span = program.enter();
            let mut locals = span.locals();
            let mut frame = env.enter(&mut locals);
            assert_eq!(frame.read(&x), Ok(Value::int(5)));

            entered_tx.send(()).unwrap_or_else(|_| panic!("main thread gone"));
            let _ = resume_rx.recv();

            assert_eq!(frame.write(&x, Value::int(6)), Ok(()));
        });

        let _ = entered_rx.recv();
        assert_eq!(program.running_threads(), 2);

        // Not exclusive while the second thread runs; nothing is lost.
        let mut session = program.begin_parse();
        session.declare(declare_function(&program, "late"));
        assert_eq!(
            session.commit(),
            Err(ProgramError::ParseConflict { running: 2 })
        );
        assert_eq!(session.pending_len(), 1);
        assert_eq!(session.phase(), ParsePhase::Parsing);
        drop(session);

        let _ = resume_tx.send(());
    });

    {
        let mut locals = span.locals();
        assert_eq!(locals.read(&x), Ok(Value::int(6)));
        locals.uninstantiate(&x);
    }
    assert_eq!(env.cells()[0].ref_count(), 1);

    drop(span);
    assert_eq!(program.running_threads(), 0);
    assert!(program.registry().is_empty());

    let mut session = program.begin_parse();
    session.declare(declare_function(&program, "late"));
    assert!(session.commit().is_ok());
}

#[test]
fn commit_conflicts_with_every_running_thread() {
    let program = program();
    let workers = 3;
    let entered = Barrier::new(workers + 1);
    let release = Barrier::new(workers + 1);

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                let _span = program.enter();
                entered.wait();
                release.wait();
            });
        }

        entered.wait();
        let mut session = program.begin_parse();
        session.declare(declare_function(&program, "f"));
        assert_eq!(
            session.commit(),
            Err(ProgramError::ParseConflict { running: workers })
        );
        drop(session);
        release.wait();
    });

    program.wait_for_drain();
    let mut session = program.begin_parse();
    session.declare(declare_function(&program, "f"));
    assert!(session.commit().is_ok());
}

#[test]
fn commit_when_exclusive_waits_for_other_thread() {
    let program = program();
    let f = program.interner().intern("f");
    let (entered_tx, entered_rx) = mpsc::channel();

    thread::scope(|s| {
        let program = &program;
        s.spawn(move || {
            let _span = program.enter();
            entered_tx.send(()).unwrap_or_else(|_| panic!("main thread gone"));
            thread::sleep(std::time::Duration::from_millis(20));
        });

        let _ = entered_rx.recv();
        let mut session = program.begin_parse();
        session.declare(Declaration::Function(FunctionDecl::new(f)));
        assert!(session.commit_when_exclusive().is_ok());
        assert_eq!(program.running_threads(), 0);
    });

    assert!(program.declarations().function(f).is_some());
}

#[test]
fn committed_top_level_variables_reach_committer_and_new_threads() {
    let program = program();
    let y = VariableDescriptor::new(program.interner().intern("y"), DeclaredType::Any);

    let span = program.enter();
    let mut session = program.begin_parse();
    session.declare(Declaration::TopLevel(y));
    let summary = session.commit();
    assert_eq!(summary.map(|s| s.top_level), Ok(1));
    drop(session);

    assert_eq!(span.locals().read(&y), Ok(Value::Nothing));
    assert_eq!(span.locals().write(&y, Value::int(1)), Ok(()));

    thread::scope(|s| {
        s.spawn(|| {
            let span = program.enter();
            let mut locals = span.locals();
            // Each thread has its own activation.
            assert_eq!(locals.read(&y), Ok(Value::Nothing));
        });
    });

    assert_eq!(span.locals().read(&y), Ok(Value::int(1)));
}

#[test]
fn thread_bound_before_commit_sees_new_top_level_variables() {
    let program = program();
    let y = VariableDescriptor::new(program.interner().intern("y"), DeclaredType::Any);
    let (bound_tx, bound_rx) = mpsc::channel();
    let (committed_tx, committed_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        let program = &program;
        s.spawn(move || {
            let binding = program.bind(thread::current().id());
            assert!(binding.lock().top_level().is_empty());
            bound_tx.send(()).unwrap_or_else(|_| panic!("main thread gone"));
            let _ = committed_rx.recv();

            let span = program.enter();
            let mut locals = span.locals();
            assert_eq!(locals.read(&y), Ok(Value::Nothing));
            assert_eq!(locals.write(&y, Value::int(2)), Ok(()));
            assert_eq!(locals.read(&y), Ok(Value::int(2)));
        });

        let _ = bound_rx.recv();
        let mut session = program.begin_parse();
        session.declare(Declaration::TopLevel(y));
        assert_eq!(session.commit().map(|s| s.top_level), Ok(1));
        drop(session);
        let _ = committed_tx.send(());
    });

    assert!(program.registry().is_empty());
}

#[test]
fn top_level_committed_inside_a_call_frame_appears_when_it_returns() {
    let program = program();
    let y = VariableDescriptor::new(program.interner().intern("y"), DeclaredType::Any);

    let span = program.enter();
    span.locals().push_frame_boundary();

    let mut session = program.begin_parse();
    session.declare(Declaration::TopLevel(y));
    assert_eq!(session.commit().map(|s| s.top_level), Ok(1));
    drop(session);

    let mut locals = span.locals();
    assert_eq!(locals.deferred(), &[y]);
    locals.pop_frame_boundary();
    assert_eq!(locals.read(&y), Ok(Value::Nothing));
    assert_eq!(locals.write(&y, Value::int(1)), Ok(()));
    assert_eq!(locals.read(&y), Ok(Value::int(1)));
}

#[test]
fn panicking_span_still_leaves_the_program() {
    let program = program();
    let me = thread::current().id();
    let x = VariableDescriptor::new(program.interner().intern("x"), DeclaredType::Any);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let span = program.enter();
        let _inner = program.enter();
        let mut locals = span.locals();
        let mut frame = locals.call_frame();
        frame.instantiate(&x, Value::int(1));
        panic!("evaluation failed");
    }));
    assert!(result.is_err());

    assert_eq!(program.running_threads(), 0);
    assert!(!program.registry().is_bound(me));

    let mut session = program.begin_parse();
    session.declare(declare_function(&program, "after_panic"));
    assert!(session.commit().is_ok());
}

#[test]
fn nested_spans_keep_binding_until_outermost_ends() {
    let program = program();
    let me = thread::current().id();
    let x = VariableDescriptor::new(program.interner().intern("x"), DeclaredType::Any);

    let outer = program.enter();
    outer.locals().instantiate(&x, Value::int(1));
    {
        let inner = program.enter();
        assert_eq!(program.running_threads(), 1);
        assert_eq!(inner.locals().read(&x), Ok(Value::int(1)));
    }
    assert!(program.registry().is_bound(me));
    assert_eq!(outer.locals().read(&x), Ok(Value::int(1)));

    drop(outer);
    assert!(!program.registry().is_bound(me));
    assert_eq!(program.running_threads(), 0);
}

#[test]
fn globals_are_shared_by_all_threads() {
    let program = program();
    let counter = program.interner().intern("counter");

    let mut session = program.begin_parse();
    session.declare(Declaration::Global(GlobalDecl::new(
        counter,
        DeclaredType::Int,
        Value::int(0),
    )));
    assert!(session.commit().is_ok());
    drop(session);

    thread::scope(|s| {
        for n in 1..=4 {
            let program = &program;
            s.spawn(move || {
                let _span = program.enter();
                let _ = program.set_global(counter, Value::int(n));
            });
        }
    });

    let last = program.global(counter).and_then(|v| v.as_int());
    assert!(matches!(last, Some(1..=4)));
    assert_eq!(program.set_global(program.interner().intern("missing"), Value::Nothing), None);
}

#[test]
fn shutdown_tears_down_leftover_bindings() {
    let program = program();
    let x = VariableDescriptor::new(program.interner().intern("x"), DeclaredType::Any);

    let mut session = program.begin_parse();
    session.declare(Declaration::TopLevel(x));
    assert!(session.commit().is_ok());
    drop(session);

    // Bound by a lifecycle manager without an execution span.
    let ids: Vec<_> = (0..2)
        .map(|_| {
            thread::spawn(|| thread::current().id())
                .join()
                .unwrap_or_else(|_| panic!("id thread panicked"))
        })
        .collect();
    let bindings: Vec<_> = ids.iter().map(|&id| program.bind(id)).collect();
    assert_eq!(program.registry().len(), 2);

    assert_eq!(program.shutdown(), 2);
    assert!(program.registry().is_empty());
    for binding in bindings {
        assert!(binding.lock().storage().is_empty());
    }
}
