//! Recoverable errors raised by variable access.
//!
//! Assert-level inconsistencies (a descriptor with no live activation) are
//! not represented here; they panic at the point of detection.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Assignment to a variable whose cell was already finalized, usually
    /// from a destructor running during thread teardown.
    #[error("cannot assign to `{name}` after it has been finalized")]
    LateAssignment { name: String },

    /// A reference whose target has no live activation outside the
    /// referencing cell itself.
    #[error("reference to `{name}` does not resolve to a live variable")]
    UnresolvedReference { name: String },

    /// Introspection asked for a variable that is not in the given frame.
    #[error("no variable `{name}` in frame {frame}")]
    UnknownVariable { name: String, frame: usize },
}

impl RuntimeError {
    /// Stable category name embedding applications can match on.
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::LateAssignment { .. } => "LATE-ASSIGNMENT",
            RuntimeError::UnresolvedReference { .. } => "UNRESOLVED-REFERENCE",
            RuntimeError::UnknownVariable { .. } => "UNKNOWN-VARIABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_assignment_message_names_variable() {
        let err = RuntimeError::LateAssignment { name: "x".into() };
        assert_eq!(err.to_string(), "cannot assign to `x` after it has been finalized");
        assert_eq!(err.category(), "LATE-ASSIGNMENT");
    }
}
