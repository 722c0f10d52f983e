//! Runtime configuration.

use quill_vars::StorageLayout;

const STACK_BLOCK_VAR: &str = "QUILL_STACK_BLOCK_SIZE";
const CLOSURE_BLOCK_VAR: &str = "QUILL_CLOSURE_BLOCK_SIZE";

/// Tunables for a Program's per-thread storage.
///
/// ```text
/// let config = RuntimeConfig::new().stack_block_size(128);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    stack_block_size: usize,
    closure_block_size: usize,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        RuntimeConfig {
            stack_block_size: StorageLayout::DEFAULT_STACK_BLOCK,
            closure_block_size: StorageLayout::DEFAULT_CLOSURE_BLOCK,
        }
    }

    /// Defaults, overridden by `QUILL_STACK_BLOCK_SIZE` and
    /// `QUILL_CLOSURE_BLOCK_SIZE` when they hold a positive integer.
    pub fn from_env() -> Self {
        Self::new().with_overrides(|key| std::env::var(key).ok())
    }

    /// Slots per stack arena block.
    #[must_use]
    pub fn stack_block_size(mut self, slots: usize) -> Self {
        self.stack_block_size = slots.max(1);
        self
    }

    /// Handles per closure stack block.
    #[must_use]
    pub fn closure_block_size(mut self, handles: usize) -> Self {
        self.closure_block_size = handles.max(1);
        self
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout {
            stack_block_size: self.stack_block_size,
            closure_block_size: self.closure_block_size,
        }
    }

    fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let stack = block_size(&lookup, STACK_BLOCK_VAR, self.stack_block_size);
        let closure = block_size(&lookup, CLOSURE_BLOCK_VAR, self.closure_block_size);
        self.stack_block_size(stack).closure_block_size(closure)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn block_size(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<usize>() {
        Ok(size) if size > 0 => size,
        _ => {
            tracing::warn!(key, value = %raw, default, "ignoring invalid block size");
            default
        }
    }
}
