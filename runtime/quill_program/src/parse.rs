//! Parse/commit/rollback controller.
//!
//! A parse span is opened with `Program::begin_parse`, which takes the
//! Program's recursive parse lock: other threads trying to parse block,
//! while the same thread may open nested spans (an include inside an eval).
//! Nested spans share one list of pending declarations.
//!
//! ```text
//!          begin_parse / declare
//!   Idle ───────────────────────────► Parsing
//!    ▲                                 │   │ commit (exclusive)
//!    │ merged                          │   ▼
//!    ├──────────────────────────── Committing
//!    │ discarded                       │   │ resolution error
//!    └──────────── RollingBack ◄───────┴───┘ parse error / rollback
//! ```
//!
//! Commit requires that no other thread is executing the Program's code.
//! A conflicting commit fails at once and leaves the pending declarations in
//! place, so it can be retried.

use std::cell::{RefCell, RefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{MutexGuard, ReentrantMutexGuard};

use crate::counter::RunningThreads;
use crate::declarations::Declaration;
use crate::errors::{ParseError, ProgramError};
use crate::program::ProgramState;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ParsePhase {
    #[default]
    Idle,
    Parsing,
    Committing,
    RollingBack,
}

#[derive(Debug, Default)]
pub(crate) struct ParseState {
    phase: ParsePhase,
    /// Open sessions on the thread holding the parse lock.
    depth: usize,
    pending: Vec<Declaration>,
}

/// What a successful commit added to the tables.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub functions: usize,
    pub globals: usize,
    pub namespaces: usize,
    pub top_level: usize,
}

/// An open parse span. Holds the Program's parse lock until dropped.
///
/// Dropping the outermost session without committing discards whatever is
/// still pending.
pub struct ParseSession<'p> {
    program: &'p ProgramState,
    guard: ReentrantMutexGuard<'p, RefCell<ParseState>>,
}

impl<'p> ParseSession<'p> {
    pub(crate) fn begin(program: &'p ProgramState) -> Self {
        let guard = program.parse.lock();
        {
            let mut state = guard.borrow_mut();
            state.depth += 1;
            if state.phase == ParsePhase::Idle {
                state.phase = ParsePhase::Parsing;
            }
            tracing::trace!(depth = state.depth, "parse span opened");
        }
        ParseSession { program, guard }
    }

    fn state(&self) -> RefMut<'_, ParseState> {
        self.guard.borrow_mut()
    }

    pub fn phase(&self) -> ParsePhase {
        self.guard.borrow().phase
    }

    /// Number of sessions open on this thread, this one included.
    pub fn depth(&self) -> usize {
        self.guard.borrow().depth
    }

    pub fn pending_len(&self) -> usize {
        self.guard.borrow().pending.len()
    }

    /// Append a declaration to the span.
    pub fn declare(&self, decl: Declaration) {
        let mut state = self.state();
        if state.phase == ParsePhase::Idle {
            state.phase = ParsePhase::Parsing;
        }
        state.pending.push(decl);
    }

    /// Run the compiler over this span. If it reports an error, the span is
    /// rolled back and the error returned.
    pub fn parse_with<F>(&mut self, compile: F) -> Result<(), ProgramError>
    where
        F: FnOnce(&Self) -> Result<(), ParseError>,
    {
        match compile(self) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.roll_back(&err);
                Err(err.into())
            }
        }
    }

    /// Merge the pending declarations into the live tables.
    ///
    /// Fails with `ParseConflict` if another thread is executing the
    /// Program's code; nothing is discarded in that case. Fails with a
    /// `ParseError`, after rolling back, if the declarations do not resolve
    /// against the committed tables.
    pub fn commit(&mut self) -> Result<CommitSummary, ProgramError> {
        let caller = thread::current().id();
        let running = self.program.counter.lock();
        if running.conflict(caller) {
            let count = running.count();
            drop(running);
            tracing::warn!(
                running = count,
                pending = self.pending_len(),
                "commit conflicts with running threads"
            );
            return Err(ProgramError::ParseConflict { running: count });
        }
        self.commit_exclusive(caller, running)
    }

    /// Like `commit`, but waits until no other thread is running instead of
    /// failing.
    ///
    /// The parse lock stays held while waiting, so a running thread that
    /// tries to open a parse span of its own never finishes.
    pub fn commit_when_exclusive(&mut self) -> Result<CommitSummary, ProgramError> {
        let caller = thread::current().id();
        let running = self.program.counter.wait_for_exclusive(caller);
        self.commit_exclusive(caller, running)
    }

    /// Discard the pending declarations. Returns how many there were.
    pub fn rollback(&mut self) -> usize {
        self.roll_back(&"rollback requested")
    }

    fn commit_exclusive(
        &mut self,
        caller: ThreadId,
        running: MutexGuard<'_, RunningThreads>,
    ) -> Result<CommitSummary, ProgramError> {
        let pending = {
            let mut state = self.state();
            state.phase = ParsePhase::Committing;
            std::mem::take(&mut state.pending)
        };

        let current = self.program.declarations();
        let (next, added) = match current.merged(pending, &self.program.interner) {
            Ok(merged) => merged,
            Err(err) => {
                drop(running);
                self.roll_back(&err);
                return Err(err.into());
            }
        };

        let summary = CommitSummary {
            functions: next.function_count() - current.function_count(),
            globals: next.global_count() - current.global_count(),
            namespaces: next.namespace_count() - current.namespace_count(),
            top_level: added.len(),
        };
        *self.program.tables.write() = Arc::new(next);
        // Threads blocked in `enter` read the new tables once this is released.
        drop(running);

        if !added.is_empty() {
            if let Some(binding) = self.program.registry.binding(caller) {
                let mut binding = binding.lock();
                binding.instantiate_top_level(&added);
                if binding.storage().frame_depth() > 0 {
                    tracing::debug!(
                        count = added.len(),
                        "committer is inside a call frame; new top-level variables wait for it to return"
                    );
                }
            }
        }

        self.state().phase = ParsePhase::Idle;
        tracing::debug!(?summary, "committed parse span");
        Ok(summary)
    }

    fn roll_back(&self, reason: &dyn std::fmt::Display) -> usize {
        let discarded = {
            let mut state = self.state();
            state.phase = ParsePhase::RollingBack;
            std::mem::take(&mut state.pending)
        };
        let count = discarded.len();
        drop(discarded);
        self.state().phase = ParsePhase::Idle;
        tracing::debug!(discarded = count, %reason, "rolled back parse span");
        count
    }
}

impl Drop for ParseSession<'_> {
    fn drop(&mut self) {
        let discarded = {
            let mut state = self.state();
            state.depth = state.depth.saturating_sub(1);
            if state.depth > 0 {
                return;
            }
            state.phase = ParsePhase::Idle;
            std::mem::take(&mut state.pending)
        };
        if !discarded.is_empty() {
            tracing::debug!(
                discarded = discarded.len(),
                "parse span closed without commit"
            );
        }
    }
}
