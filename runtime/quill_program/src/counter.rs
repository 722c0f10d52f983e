//! Running-thread counter.
//!
//! Tracks which threads are executing code of a Program. A thread may nest
//! execution spans; only distinct threads count towards `thread_count`.
//! Every exit wakes the waiters so they can re-check their condition.

use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;

/// Snapshot of the running threads, read under the counter's lock.
#[derive(Debug, Default)]
pub struct RunningThreads {
    depth: FxHashMap<ThreadId, usize>,
}

impl RunningThreads {
    pub fn count(&self) -> usize {
        self.depth.len()
    }

    /// Nesting depth of `thread`'s execution spans; 0 if not running.
    pub fn depth(&self, thread: ThreadId) -> usize {
        self.depth.get(&thread).copied().unwrap_or(0)
    }

    /// Whether a commit from `caller` would race with running code.
    ///
    /// No running thread, or `caller` being the only one, is exclusive.
    pub fn conflict(&self, caller: ThreadId) -> bool {
        let count = self.count();
        count > 1 || (count == 1 && !self.depth.contains_key(&caller))
    }
}

#[derive(Default)]
pub struct ThreadCounter {
    running: Mutex<RunningThreads>,
    changed: Condvar,
}

impl ThreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an execution span on `thread`; returns the new nesting depth.
    pub fn enter(&self, thread: ThreadId) -> usize {
        let mut running = self.running.lock();
        let depth = running.depth.entry(thread).or_insert(0);
        *depth += 1;
        *depth
    }

    /// End an execution span on `thread`; returns the remaining depth.
    pub fn exit(&self, thread: ThreadId) -> usize {
        let remaining = {
            let mut running = self.running.lock();
            match running.depth.get_mut(&thread) {
                Some(depth) if *depth > 1 => {
                    *depth -= 1;
                    *depth
                }
                Some(_) => {
                    running.depth.remove(&thread);
                    0
                }
                None => {
                    tracing::warn!(?thread, "execution span exit without a matching enter");
                    0
                }
            }
        };
        self.changed.notify_all();
        remaining
    }

    pub fn thread_count(&self) -> usize {
        self.running.lock().count()
    }

    pub fn depth(&self, thread: ThreadId) -> usize {
        self.running.lock().depth(thread)
    }

    pub fn conflict(&self, caller: ThreadId) -> bool {
        self.running.lock().conflict(caller)
    }

    /// Block until no thread is running.
    ///
    /// Deadlocks if called from inside an execution span.
    pub fn wait_for_drain(&self) {
        let mut running = self.running.lock();
        while running.count() > 0 {
            self.changed.wait(&mut running);
        }
    }

    /// Block until a commit from `caller` would not conflict, and return
    /// with the counter locked so no thread can start in the meantime.
    pub fn wait_for_exclusive(&self, caller: ThreadId) -> MutexGuard<'_, RunningThreads> {
        let mut running = self.running.lock();
        while running.conflict(caller) {
            self.changed.wait(&mut running);
        }
        running
    }

    /// Lock the counter; threads trying to enter block until released.
    pub fn lock(&self) -> MutexGuard<'_, RunningThreads> {
        self.running.lock()
    }
}
