//! Quill Vars - per-thread variable storage.
//!
//! Every thread that runs code of a Program owns one `LocalStorage`:
//!
//! - a `StackArena` of value cells for variables no closure captures
//! - a `ClosureStack` of handles to heap `ClosureCell`s for the ones that are
//!
//! Both are chunked LIFO stacks with frame boundaries. Access goes through
//! a `VariableDescriptor`; its `closure_use` flag picks the store.
//!
//! Neither stack is locked: only the owning thread touches them. Closure
//! cells carry their own mutex since other threads share them.

mod arena;
mod block_stack;
mod cell;
mod closure;
mod frame;
mod stack;
mod storage;

pub use arena::{FindScope, StackArena};
pub use block_stack::SlotId;
pub use cell::{CellFlags, Payload, ValueCell};
pub use closure::{ClosureCell, ClosureEntry, ClosureStack};
pub use frame::{CallFrame, ClosureEnv};
pub use storage::{FrameVariable, LocalStorage, StorageLayout};
