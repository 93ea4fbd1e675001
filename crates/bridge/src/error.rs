use lpbridge_engine::EngineError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad arguments to a model setter or a solver.
    ModelDefinition,
    /// A model file could not be read or parsed.
    Io,
    /// The session or the worker is no longer usable.
    Resource,
    /// The engine itself failed.
    Engine,
}

/// Errors surfaced by the bridge.
///
/// Solver outcomes are not errors; they arrive as a
/// [`crate::SolveReport`] with a status and a return code.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A setter or solver rejected its arguments.
    #[error("model definition error: {0}")]
    ModelDefinition(#[source] EngineError),

    /// A model file could not be read or parsed.
    #[error("model file error: {0}")]
    Io(#[source] EngineError),

    /// The session was destroyed, or another resource is unavailable.
    #[error("resource error: {0}")]
    Resource(String),

    /// The engine reported a failure of its own.
    #[error("engine error: {0}")]
    Engine(#[source] EngineError),

    /// The worker thread exited before the call finished.
    #[error("bridge worker is gone")]
    WorkerGone,

    /// The engine panicked while running the call.
    #[error("engine panicked: {0}")]
    Panicked(String),
}

impl BridgeError {
    /// Which category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::ModelDefinition(_) => ErrorCategory::ModelDefinition,
            BridgeError::Io(_) => ErrorCategory::Io,
            BridgeError::Resource(_) | BridgeError::WorkerGone => ErrorCategory::Resource,
            BridgeError::Engine(_) | BridgeError::Panicked(_) => ErrorCategory::Engine,
        }
    }

    pub(crate) fn destroyed(session: u64) -> Self {
        BridgeError::Resource(format!("session {session} has been destroyed"))
    }
}

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(_) | EngineError::IndexOutOfRange { .. } => {
                BridgeError::ModelDefinition(err)
            }
            EngineError::Io { .. } | EngineError::Parse { .. } => BridgeError::Io(err),
            EngineError::Busy(_) => BridgeError::Engine(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_categories() {
        let bad = BridgeError::from(EngineError::InvalidInput("nan".into()));
        assert_eq!(bad.category(), ErrorCategory::ModelDefinition);

        let range = BridgeError::from(EngineError::IndexOutOfRange {
            kind: "row",
            index: 4,
            len: 2,
        });
        assert_eq!(range.category(), ErrorCategory::ModelDefinition);

        let parse = BridgeError::from(EngineError::Parse {
            path: "x.lp".into(),
            line: 3,
            message: "unexpected token".into(),
        });
        assert_eq!(parse.category(), ErrorCategory::Io);
        assert!(parse.to_string().contains("x.lp:3"));

        let busy = BridgeError::from(EngineError::Busy("simplex"));
        assert_eq!(busy.category(), ErrorCategory::Engine);

        assert_eq!(BridgeError::destroyed(7).category(), ErrorCategory::Resource);
        assert_eq!(BridgeError::WorkerGone.category(), ErrorCategory::Resource);
    }
}
