use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by engine entry points and model setters.
///
/// Solver outcomes (infeasible, unbounded, stopped, ...) are not errors; they
/// are reported through [`crate::Status`] and [`crate::ReturnCode`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// An argument is malformed (non-finite value, inverted bounds, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A row or column index is outside the current problem.
    #[error("{kind} index {index} out of range (problem has {len})")]
    IndexOutOfRange {
        /// `"row"` or `"column"`.
        kind: &'static str,
        /// Offending 0-based index.
        index: usize,
        /// Number of rows or columns in the problem.
        len: usize,
    },

    /// A model file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A model file is malformed.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Another engine entry point is already executing.
    #[error("engine is busy; `{0}` was entered while another call was in progress")]
    Busy(&'static str),
}
