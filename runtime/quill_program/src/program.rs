//! The `Program` handle and execution spans.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{MappedMutexGuard, MutexGuard, ReentrantMutex, RwLock};
use quill_ir::{Name, SharedInterner};
use quill_value::Value;
use quill_vars::LocalStorage;

use crate::config::RuntimeConfig;
use crate::counter::ThreadCounter;
use crate::declarations::{Declarations, GlobalDecl};
use crate::parse::{ParseSession, ParseState};
use crate::registry::{SharedBinding, ThreadBinding, ThreadRegistry};

pub(crate) struct ProgramState {
    pub(crate) interner: SharedInterner,
    pub(crate) config: RuntimeConfig,
    pub(crate) parse: ReentrantMutex<RefCell<ParseState>>,
    pub(crate) counter: ThreadCounter,
    pub(crate) tables: RwLock<Arc<Declarations>>,
    pub(crate) registry: ThreadRegistry,
}

impl ProgramState {
    pub(crate) fn declarations(&self) -> Arc<Declarations> {
        Arc::clone(&*self.tables.read())
    }
}

/// A compiled program that threads execute and that may be extended while
/// they do.
///
/// Cheap to clone; every clone refers to the same Program.
#[derive(Clone)]
pub struct Program(Arc<ProgramState>);

impl Program {
    pub fn new(interner: SharedInterner, config: RuntimeConfig) -> Self {
        Program(Arc::new(ProgramState {
            registry: ThreadRegistry::new(interner.clone(), config.layout()),
            interner,
            config,
            parse: ReentrantMutex::new(RefCell::new(ParseState::default())),
            counter: ThreadCounter::new(),
            tables: RwLock::new(Arc::new(Declarations::default())),
        }))
    }

    pub fn interner(&self) -> &SharedInterner {
        &self.0.interner
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    /// Start executing the Program's code on the current thread.
    ///
    /// Blocks while another thread is committing.
    pub fn enter(&self) -> ProgramThread<'_> {
        ProgramThread::new(self)
    }

    /// Open a parse span, blocking while another thread has one open.
    pub fn begin_parse(&self) -> ParseSession<'_> {
        ParseSession::begin(&self.0)
    }

    /// Snapshot of the committed tables.
    pub fn declarations(&self) -> Arc<Declarations> {
        self.0.declarations()
    }

    pub fn global(&self, name: Name) -> Option<Value> {
        self.declarations().global(name).map(GlobalDecl::get)
    }

    /// Store into a committed global; returns the previous value, or `None`
    /// if no such global exists.
    pub fn set_global(&self, name: Name, value: Value) -> Option<Value> {
        let tables = self.declarations();
        let global = tables.global(name)?;
        Some(global.set(value))
    }

    /// Binding of `thread`, created if it does not exist yet, holding every
    /// committed top-level variable.
    pub fn bind(&self, thread: ThreadId) -> SharedBinding {
        let tables = self.declarations();
        self.0.registry.bind(thread, tables.top_level())
    }

    pub fn unbind(&self, thread: ThreadId) -> bool {
        self.0.registry.unbind(thread)
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.0.registry
    }

    pub fn running_threads(&self) -> usize {
        self.0.counter.thread_count()
    }

    /// Block until no thread is executing the Program's code.
    pub fn wait_for_drain(&self) {
        self.0.counter.wait_for_drain();
    }

    /// Wait for drain, then tear down every binding still registered.
    /// Returns the number of bindings torn down.
    pub fn shutdown(&self) -> usize {
        self.wait_for_drain();
        let bindings = self.0.registry.clear();
        tracing::debug!(bindings, "program shut down");
        bindings
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("running", &self.running_threads())
            .field("bindings", &self.0.registry.len())
            .finish_non_exhaustive()
    }
}

/// The current thread executing a Program's code.
///
/// Counts the thread as running and keeps it bound for as long as it lives.
/// Spans nest: the binding is torn down when the outermost span on the
/// thread is dropped. Tied to the thread that created it.
pub struct ProgramThread<'p> {
    program: &'p Program,
    thread: ThreadId,
    binding: SharedBinding,
    _not_send: PhantomData<*const ()>,
}

impl<'p> ProgramThread<'p> {
    fn new(program: &'p Program) -> Self {
        let thread = thread::current().id();
        let depth = program.0.counter.enter(thread);
        let binding = program.bind(thread);
        tracing::trace!(?thread, depth, "entered program");
        ProgramThread {
            program,
            thread,
            binding,
            _not_send: PhantomData,
        }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// This thread's variable storage.
    ///
    /// Holds the binding's lock; release it before committing or entering
    /// the Program again from this thread, since both may instantiate new
    /// top-level variables here.
    pub fn locals(&self) -> MappedMutexGuard<'_, LocalStorage> {
        MutexGuard::map(self.binding.lock(), ThreadBinding::storage_mut)
    }
}

impl Drop for ProgramThread<'_> {
    fn drop(&mut self) {
        let counter = &self.program.0.counter;
        if counter.depth(self.thread) == 1 {
            self.program.0.registry.unbind(self.thread);
        }
        counter.exit(self.thread);
        tracing::trace!(thread = ?self.thread, "left program");
    }
}
