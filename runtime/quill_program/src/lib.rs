//! Quill Program - the unit of live recompilation.
//!
//! A `Program` owns the committed declaration tables, one variable binding
//! per thread running its code, and the machinery that lets new code be
//! parsed and committed while those threads exist:
//!
//! - `ThreadRegistry`: thread id to `ThreadBinding` (the thread's
//!   `LocalStorage` plus its top-level variables)
//! - `ThreadCounter`: which threads are currently executing, with a
//!   condition variable for drain and exclusivity waits
//! - `ParseSession`: a recursive parse span that accumulates pending
//!   declarations and either commits or rolls them back
//!
//! # Lock order
//!
//! parse lock, then the thread counter, then the declaration tables, then
//! the registry map, then a single binding. Running code never takes the
//! parse lock.

mod config;
mod counter;
mod declarations;
mod errors;
mod parse;
mod program;
mod registry;

use std::sync::Once;

pub use config::RuntimeConfig;
pub use counter::{RunningThreads, ThreadCounter};
pub use declarations::{Declaration, Declarations, FunctionDecl, GlobalDecl, NamespaceDecl};
pub use errors::{ParseError, ProgramError};
pub use parse::{CommitSummary, ParsePhase, ParseSession};
pub use program::{Program, ProgramThread};
pub use registry::{SharedBinding, ThreadBinding, ThreadRegistry};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber for runtime diagnostics.
///
/// Does nothing unless `RUST_LOG` is set; safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
