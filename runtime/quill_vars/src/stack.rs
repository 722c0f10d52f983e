//! Native stack headroom for reference resolution.
//!
//! Following a chain of references recurses once per link, and chains can
//! be built by user code to arbitrary length.

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Grow when less than this much stack remains.
    const RED_ZONE: usize = 64 * 1024;

    /// Size of each newly allocated stack segment.
    const SEGMENT: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, SEGMENT, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
