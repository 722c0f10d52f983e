//! Errors raised by the Program lifecycle.

use thiserror::Error;

/// A parse span could not be committed as written.
///
/// Any of these rolls the span back; the committed tables are untouched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("function `{name}` is already defined")]
    DuplicateFunction { name: String },

    #[error("global `{name}` is already defined")]
    DuplicateGlobal { name: String },

    #[error("namespace `{name}` is already defined")]
    DuplicateNamespace { name: String },

    #[error("namespace `{name}` is not defined")]
    UnknownNamespace { name: String },

    /// Reported by the compiler while the span was being parsed.
    #[error("{message}")]
    Compile { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProgramError {
    /// Other threads are executing code of the Program. Pending
    /// declarations are kept; the commit may be retried.
    #[error("cannot commit while {running} thread(s) run code of this program")]
    ParseConflict { running: usize },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ProgramError {
    /// Whether retrying the same commit later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProgramError::ParseConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_convert_and_are_final() {
        let err: ProgramError = ParseError::DuplicateFunction { name: "f".into() }.into();
        assert_eq!(err.to_string(), "function `f` is already defined");
        assert!(!err.is_retryable());
        assert!(ProgramError::ParseConflict { running: 2 }.is_retryable());
    }
}
