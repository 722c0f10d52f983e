//! Thread-to-Program registry.
//!
//! Maps each thread running a Program's code to that thread's variable
//! storage. The map lock is only held to look up, insert or remove a
//! binding; tearing a binding down happens after it has been removed.

use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use quill_ir::{SharedInterner, VariableDescriptor};
use quill_vars::{LocalStorage, StorageLayout};
use rustc_hash::FxHashMap;

/// One thread's variables for one Program.
pub struct ThreadBinding {
    storage: LocalStorage,
    top_level: Vec<VariableDescriptor>,
}

impl ThreadBinding {
    fn new(storage: LocalStorage) -> Self {
        ThreadBinding {
            storage,
            top_level: Vec::new(),
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.storage
    }

    /// Top-level variables instantiated for this thread.
    pub fn top_level(&self) -> &[VariableDescriptor] {
        &self.top_level
    }

    /// Instantiate the top-level variables this binding does not have yet.
    ///
    /// Top-level variables belong to the outermost frame: while a call frame
    /// is active they are instantiated once it returns. Returns how many
    /// variables were new to this binding.
    pub(crate) fn instantiate_top_level(&mut self, vars: &[VariableDescriptor]) -> usize {
        let mut added = 0;
        for var in vars {
            if self.top_level.iter().any(|known| known.name() == var.name()) {
                continue;
            }
            self.storage.instantiate_outermost(var);
            self.top_level.push(*var);
            added += 1;
        }
        added
    }

    /// Finalize every variable, then pop everything.
    fn teardown(&mut self) -> usize {
        let finalized = self.storage.finalize();
        self.storage.clear();
        self.top_level.clear();
        finalized
    }
}

pub type SharedBinding = Arc<Mutex<ThreadBinding>>;

pub struct ThreadRegistry {
    bindings: Mutex<FxHashMap<ThreadId, SharedBinding>>,
    interner: SharedInterner,
    layout: StorageLayout,
}

impl ThreadRegistry {
    pub fn new(interner: SharedInterner, layout: StorageLayout) -> Self {
        ThreadRegistry {
            bindings: Mutex::new(FxHashMap::default()),
            interner,
            layout,
        }
    }

    /// Binding for `thread`, created if the thread has none yet. Every
    /// variable of `top_level` the binding lacks is instantiated.
    ///
    /// Locks an existing binding; the thread must not be holding it.
    pub fn bind(&self, thread: ThreadId, top_level: &[VariableDescriptor]) -> SharedBinding {
        let mut bindings = self.bindings.lock();
        if let Some(binding) = bindings.get(&thread).map(Arc::clone) {
            drop(bindings);
            if !top_level.is_empty() {
                let added = binding.lock().instantiate_top_level(top_level);
                if added > 0 {
                    tracing::debug!(?thread, added, "caught up on top-level variables");
                }
            }
            return binding;
        }

        let mut binding = ThreadBinding::new(LocalStorage::new(self.interner.clone(), self.layout));
        binding.instantiate_top_level(top_level);
        tracing::debug!(?thread, top_level = top_level.len(), "bound thread");

        let binding = Arc::new(Mutex::new(binding));
        bindings.insert(thread, Arc::clone(&binding));
        binding
    }

    /// Remove and tear down `thread`'s binding. Returns `false` if the
    /// thread was not bound.
    pub fn unbind(&self, thread: ThreadId) -> bool {
        let removed = self.bindings.lock().remove(&thread);
        match removed {
            Some(binding) => {
                let finalized = binding.lock().teardown();
                tracing::debug!(?thread, finalized, "unbound thread");
                true
            }
            None => false,
        }
    }

    pub fn binding(&self, thread: ThreadId) -> Option<SharedBinding> {
        self.bindings.lock().get(&thread).map(Arc::clone)
    }

    pub fn is_bound(&self, thread: ThreadId) -> bool {
        self.bindings.lock().contains_key(&thread)
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every binding. Returns how many there were.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.bindings.lock().drain().collect();
        for (thread, binding) in &drained {
            let finalized = binding.lock().teardown();
            tracing::debug!(?thread, finalized, "tore down leftover binding");
        }
        drained.len()
    }
}
