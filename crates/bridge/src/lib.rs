#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Asynchronous bridge to the `lpbridge-engine` solver.
//!
//! The engine blocks, keeps its output and allocation hooks in global state
//! and tolerates one call at a time. This crate puts a FIFO lock in front of
//! it, runs async calls on a single worker thread, streams every call's log
//! lines to a per-session observer in order, drives branch-and-bound one
//! node at a time through a user callback, and keeps allocation counters.
//!
//! ```no_run
//! # async fn demo() -> Result<(), lpbridge_bridge::BridgeError> {
//! use lpbridge_bridge::{ExecMode, SolverSession};
//!
//! let session = SolverSession::new()?;
//! session.read_model("model.lp", ExecMode::Async).await.into_result()?;
//! let outcome = session.simplex(ExecMode::Async).await;
//! println!("{:?}", outcome.report());
//! # Ok(())
//! # }
//! ```

/// Public API types for the bridge.
pub mod api;

mod error;
mod gateway;
mod lock;
mod memory;
mod relay;
mod search;
mod session;

pub use api::{
    CallOutcome, CallOutput, ExecMode, FactorReport, FailureSite, LogEvent, LogObserver,
    MemorySnapshot, Method, ModelReport, NodeCallback, ObserverFailure, ObserverResult, Operation,
    OperationKind, SolveReport,
};
pub use error::{BridgeError, ErrorCategory};
pub use gateway::{CallGateway, PendingCall};
pub use memory::MemoryMonitor;
pub use search::{SearchControl, SearchNode};
pub use session::{Dispatch, SearchCall, SolverSession};
