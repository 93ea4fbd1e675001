use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lpbridge_engine::{InteriorOptions, MipOptions, ReturnCode, SimplexOptions, Solution, Status};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::search::{SearchControl, SearchNode};

/// Where a call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// On the caller's thread; log lines reach the observer before the call
    /// returns.
    Sync,
    /// On the bridge worker; the caller gets a [`crate::PendingCall`].
    Async,
}

/// Solver that produced a [`SolveReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Primal simplex.
    Simplex,
    /// Simplex followed by exact vertex refinement.
    Exact,
    /// Interior point.
    Interior,
    /// Branch and bound.
    BranchAndBound,
}

/// Kind of engine operation, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// See [`Operation::Simplex`].
    Simplex,
    /// See [`Operation::Exact`].
    Exact,
    /// See [`Operation::Interior`].
    Interior,
    /// See [`Operation::BranchAndBound`].
    BranchAndBound,
    /// See [`Operation::Factorize`].
    Factorize,
    /// See [`Operation::ReadModel`].
    ReadModel,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Simplex => "simplex",
            OperationKind::Exact => "exact",
            OperationKind::Interior => "interior",
            OperationKind::BranchAndBound => "branch_and_bound",
            OperationKind::Factorize => "factorize",
            OperationKind::ReadModel => "read_model",
        })
    }
}

/// Called once per explored branch-and-bound node and once more after the
/// search ends. Runs on the engine's thread and must not call back into the
/// bridge.
pub type NodeCallback = Box<dyn FnMut(&mut SearchNode<'_>) + Send>;

/// One engine operation and its parameters.
pub enum Operation {
    /// Primal simplex.
    Simplex(SimplexOptions),
    /// Simplex with exact refinement.
    Exact(SimplexOptions),
    /// Interior point.
    Interior(InteriorOptions),
    /// Branch and bound, with an optional per-node callback.
    BranchAndBound {
        /// Search parameters.
        options: MipOptions,
        /// Per-node callback.
        callback: Option<NodeCallback>,
        /// Stops the search from another thread.
        control: Option<SearchControl>,
    },
    /// Factorize the current basis.
    Factorize,
    /// Replace the model with one read from a CPLEX LP file.
    ReadModel(PathBuf),
}

impl Operation {
    /// Kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Simplex(_) => OperationKind::Simplex,
            Operation::Exact(_) => OperationKind::Exact,
            Operation::Interior(_) => OperationKind::Interior,
            Operation::BranchAndBound { .. } => OperationKind::BranchAndBound,
            Operation::Factorize => OperationKind::Factorize,
            Operation::ReadModel(_) => OperationKind::ReadModel,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Simplex(o) => f.debug_tuple("Simplex").field(o).finish(),
            Operation::Exact(o) => f.debug_tuple("Exact").field(o).finish(),
            Operation::Interior(o) => f.debug_tuple("Interior").field(o).finish(),
            Operation::BranchAndBound {
                options,
                callback,
                control,
            } => f
                .debug_struct("BranchAndBound")
                .field("options", options)
                .field("callback", &callback.is_some())
                .field("control", control)
                .finish(),
            Operation::Factorize => f.write_str("Factorize"),
            Operation::ReadModel(path) => f.debug_tuple("ReadModel").field(path).finish(),
        }
    }
}

/// One line of engine output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Call that produced the line.
    pub call_id: u64,
    /// 0-based position of the line within its call.
    pub seq: u64,
    /// Line text, without the trailing newline.
    pub text: String,
}

/// Result of an observer invocation.
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives the log lines of every call made on a session.
///
/// Sync calls invoke it on the calling thread while the engine runs; async
/// calls invoke it on the task that awaits the [`crate::PendingCall`]. It
/// must not call back into the bridge.
pub type LogObserver = Arc<dyn Fn(&LogEvent) -> ObserverResult + Send + Sync>;

/// Where an observer or callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureSite {
    /// While handling a log line.
    Line {
        /// Sequence number of the line.
        seq: u64,
    },
    /// In the node callback.
    Node {
        /// Node id.
        id: u64,
    },
    /// In the terminal invocation of the node callback.
    Terminal,
}

/// A failed observer or callback invocation. Recorded; never aborts the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverFailure {
    /// Call during which it happened.
    pub call_id: u64,
    /// Where it happened.
    pub site: FailureSite,
    /// Error message or panic payload.
    pub message: String,
}

/// Allocation counters. `cpeak >= count` and `tpeak >= total` always hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Live allocations.
    pub count: u64,
    /// Highest `count` observed.
    pub cpeak: u64,
    /// Live bytes.
    pub total: u64,
    /// Highest `total` observed.
    pub tpeak: u64,
}

/// Solver result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    /// Solver used.
    pub method: Method,
    /// Solution status.
    pub status: Status,
    /// Whether the solver ran to completion.
    pub code: ReturnCode,
    /// Objective value.
    pub objective: f64,
    /// Column values.
    pub columns: Vec<f64>,
    /// Row activities.
    pub rows: Vec<f64>,
    /// Nodes explored (branch and bound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
}

impl SolveReport {
    pub(crate) fn new(
        method: Method,
        code: ReturnCode,
        solution: Option<&Solution>,
        nodes: Option<u64>,
    ) -> Self {
        match solution {
            Some(s) => Self {
                method,
                status: s.status,
                code,
                objective: s.objective,
                columns: s.columns.clone(),
                rows: s.rows.clone(),
                nodes,
            },
            None => Self {
                method,
                status: Status::Undefined,
                code,
                objective: 0.0,
                columns: Vec::new(),
                rows: Vec::new(),
                nodes,
            },
        }
    }
}

/// Factorization result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorReport {
    /// [`ReturnCode::Ok`] or [`ReturnCode::Singular`].
    pub code: ReturnCode,
    /// Whether a factorization now exists.
    pub factored: bool,
}

/// Model file result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReport {
    /// Lines in the file.
    pub lines: usize,
    /// Rows read.
    pub rows: usize,
    /// Columns read.
    pub columns: usize,
    /// Constraint coefficients read.
    pub nonzeros: usize,
}

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutput {
    /// From a solver.
    Solution(SolveReport),
    /// From [`Operation::Factorize`].
    Factorization(FactorReport),
    /// From [`Operation::ReadModel`].
    ModelRead(ModelReport),
}

/// Final result of one call.
///
/// Solver statuses such as infeasible or unbounded are successful results;
/// `result` is an error only for structural problems.
#[derive(Debug)]
pub struct CallOutcome {
    /// Call id, matching [`LogEvent::call_id`].
    pub call_id: u64,
    /// Output or error.
    pub result: Result<CallOutput, BridgeError>,
    /// Observer and callback failures, in the order they happened.
    pub observer_failures: Vec<ObserverFailure>,
    /// Wall time from submission to completion.
    pub elapsed: Duration,
}

impl CallOutcome {
    /// The solver report, if this call produced one.
    pub fn report(&self) -> Option<&SolveReport> {
        match &self.result {
            Ok(CallOutput::Solution(r)) => Some(r),
            _ => None,
        }
    }

    /// Drop the bookkeeping and keep the result.
    pub fn into_result(self) -> Result<CallOutput, BridgeError> {
        self.result
    }
}
