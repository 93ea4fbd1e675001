//! One problem instance and the calls made on it.

use std::future::{Future, IntoFuture};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lpbridge_engine::{
    exact, factorize, interior, read_lp, simplex, Bound, ColKind, Direction, EngineError,
    MipOptions, Problem, ReturnCode, Solution,
};
use parking_lot::{Mutex, MutexGuard};

use crate::api::{
    CallOutcome, CallOutput, ExecMode, FactorReport, LogObserver, MemorySnapshot, Method,
    ModelReport, NodeCallback, Operation, SolveReport,
};
use crate::error::BridgeError;
use crate::gateway::{CallContext, CallGateway, Owner, PendingCall};
use crate::lock::EngineLock;
use crate::memory::{Attribution, MemoryMonitor};
use crate::search::{CallbackBridge, SearchControl};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionInner {
    id: u64,
    gateway: Arc<CallGateway>,
    problem: Mutex<Option<Problem>>,
    observer: Mutex<Option<LogObserver>>,
    memory: Attribution,
}

impl SessionInner {
    fn problem(&self) -> MutexGuard<'_, Option<Problem>> {
        self.problem.lock()
    }

    fn observer(&self) -> Option<LogObserver> {
        self.observer.lock().clone()
    }

    /// Run `op` on this session's problem. The caller holds the engine lock.
    fn execute(&self, op: Operation, cx: &mut CallContext) -> Result<CallOutput, BridgeError> {
        let mut slot = self.problem();
        let problem = slot
            .as_mut()
            .ok_or_else(|| BridgeError::destroyed(self.id))?;
        let (result, window) = MemoryMonitor::global().window(|| perform(problem, op, cx));
        self.memory.charge(&window);
        result
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let Some(problem) = self.problem.get_mut().take() else {
            return;
        };
        let _engine = EngineLock::global().acquire();
        let ((), window) = MemoryMonitor::global().window(|| drop(problem));
        self.memory.charge(&window);
        tracing::debug!(session = self.id, "session released without destroy");
    }
}

fn solved(method: Method, code: ReturnCode, solution: Option<&Solution>) -> CallOutput {
    CallOutput::Solution(SolveReport::new(method, code, solution, None))
}

fn perform(
    problem: &mut Problem,
    op: Operation,
    cx: &mut CallContext,
) -> Result<CallOutput, BridgeError> {
    match op {
        Operation::Simplex(options) => {
            let code = simplex(problem, &options)?;
            Ok(solved(Method::Simplex, code, problem.lp_solution()))
        }
        Operation::Exact(options) => {
            let code = exact(problem, &options)?;
            Ok(solved(Method::Exact, code, problem.lp_solution()))
        }
        Operation::Interior(options) => {
            let code = interior(problem, &options)?;
            Ok(solved(Method::Interior, code, problem.interior_solution()))
        }
        Operation::BranchAndBound {
            options,
            callback,
            control,
        } => {
            let mut search =
                CallbackBridge::start(problem, &options, callback, control, cx.call_id)?;
            let outcome = search.run();
            tracing::debug!(
                state = ?search.state(),
                invocations = search.invocations(),
                nodes = outcome.nodes,
                "search finished"
            );
            cx.failures.extend(search.into_failures());
            Ok(CallOutput::Solution(SolveReport::new(
                Method::BranchAndBound,
                outcome.code,
                problem.mip_solution(),
                Some(outcome.nodes),
            )))
        }
        Operation::Factorize => {
            let code = factorize(problem)?;
            Ok(CallOutput::Factorization(FactorReport {
                code,
                factored: problem.basis_factored(),
            }))
        }
        Operation::ReadModel(path) => {
            let lines = read_lp(problem, &path)?;
            Ok(CallOutput::ModelRead(ModelReport {
                lines,
                rows: problem.num_rows(),
                columns: problem.num_cols(),
                nonzeros: problem.num_nonzeros(),
            }))
        }
    }
}

/// How [`SolverSession::run`] handed back a call.
#[derive(Debug)]
pub enum Dispatch {
    /// A sync call, already finished.
    Completed(CallOutcome),
    /// An async call, still queued or running.
    Pending(PendingCall),
}

impl IntoFuture for Dispatch {
    type Output = CallOutcome;
    type IntoFuture = Pin<Box<dyn Future<Output = CallOutcome> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Dispatch::Completed(outcome) => Box::pin(std::future::ready(outcome)),
            Dispatch::Pending(pending) => Box::pin(pending.wait()),
        }
    }
}

/// A problem instance bound to a [`CallGateway`].
///
/// Model setters take the engine lock and fail with a
/// [`BridgeError::ModelDefinition`] error on a bad index or value. Read
/// queries wait for a running call on this session to finish. Indices are
/// 0-based.
///
/// Log observers and node callbacks run while the engine lock is held and
/// must not call back into any session. A sync call made from the task that
/// still owes an unfinished [`PendingCall`] its drain will wait forever.
///
/// Dropping the last handle to a live session frees its problem under the
/// engine lock, so the drop waits like a sync call would.
pub struct SolverSession {
    inner: Arc<SessionInner>,
}

impl SolverSession {
    /// Create a session on the process-wide gateway.
    pub fn new() -> Result<Self, BridgeError> {
        Ok(Self::with_gateway(CallGateway::global()?))
    }

    /// Create a session whose calls go through `gateway`.
    pub fn with_gateway(gateway: Arc<CallGateway>) -> Self {
        let monitor = MemoryMonitor::global();
        let memory = Attribution::default();
        let problem = {
            let _engine = EngineLock::global().acquire();
            let (problem, window) = monitor.window(Problem::new);
            memory.charge(&window);
            problem
        };
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, "session created");

        Self {
            inner: Arc::new(SessionInner {
                id,
                gateway,
                problem: Mutex::new(Some(problem)),
                observer: Mutex::new(None),
                memory,
            }),
        }
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Gateway this session's calls go through.
    pub fn gateway(&self) -> &Arc<CallGateway> {
        &self.inner.gateway
    }

    /// Release the problem. Every later operation, including a second
    /// `destroy`, fails with [`BridgeError::Resource`].
    pub fn destroy(&self) -> Result<(), BridgeError> {
        let _engine = EngineLock::global().acquire();
        let problem = self
            .inner
            .problem()
            .take()
            .ok_or_else(|| BridgeError::destroyed(self.inner.id))?;
        let ((), window) = MemoryMonitor::global().window(|| drop(problem));
        self.inner.memory.charge(&window);
        tracing::debug!(session = self.inner.id, "session destroyed");
        Ok(())
    }

    /// Whether [`SolverSession::destroy`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.problem().is_none()
    }

    /// Observer for the log lines of every later call on this session.
    pub fn set_log_observer(&self, observer: Option<LogObserver>) {
        *self.inner.observer.lock() = observer;
    }

    /// Memory attributed to this session's calls.
    ///
    /// The engine only accounts memory process-wide; this is an estimate
    /// built from what changed while this session held the engine. Use
    /// [`MemoryMonitor::snapshot`] for the exact global numbers.
    pub fn memory(&self) -> MemorySnapshot {
        self.inner.memory.snapshot()
    }

    fn define<R>(
        &self,
        f: impl FnOnce(&mut Problem) -> Result<R, EngineError>,
    ) -> Result<R, BridgeError> {
        let _engine = EngineLock::global().acquire();
        let mut slot = self.inner.problem();
        let problem = slot
            .as_mut()
            .ok_or_else(|| BridgeError::destroyed(self.inner.id))?;
        let (result, window) = MemoryMonitor::global().window(|| f(problem));
        self.inner.memory.charge(&window);
        Ok(result?)
    }

    /// Read the problem without entering the engine.
    pub fn inspect<R>(&self, f: impl FnOnce(&Problem) -> R) -> Result<R, BridgeError> {
        let slot = self.inner.problem();
        let problem = slot
            .as_ref()
            .ok_or_else(|| BridgeError::destroyed(self.inner.id))?;
        Ok(f(problem))
    }

    /// Set or clear the problem name.
    pub fn set_name(&self, name: Option<&str>) -> Result<(), BridgeError> {
        self.define(|p| {
            p.set_name(name);
            Ok(())
        })
    }

    /// Set the optimization direction.
    pub fn set_direction(&self, direction: Direction) -> Result<(), BridgeError> {
        self.define(|p| {
            p.set_direction(direction);
            Ok(())
        })
    }

    /// Append `count` free rows; returns the index of the first one.
    pub fn add_rows(&self, count: usize) -> Result<usize, BridgeError> {
        self.define(|p| Ok(p.add_rows(count)))
    }

    /// Append `count` continuous columns fixed at zero; returns the index of
    /// the first one.
    pub fn add_cols(&self, count: usize) -> Result<usize, BridgeError> {
        self.define(|p| Ok(p.add_cols(count)))
    }

    /// Name row `i`.
    pub fn set_row_name(&self, i: usize, name: Option<&str>) -> Result<(), BridgeError> {
        self.define(|p| p.set_row_name(i, name))
    }

    /// Name column `j`.
    pub fn set_col_name(&self, j: usize, name: Option<&str>) -> Result<(), BridgeError> {
        self.define(|p| p.set_col_name(j, name))
    }

    /// Bound row `i`.
    pub fn set_row_bounds(&self, i: usize, bound: Bound) -> Result<(), BridgeError> {
        self.define(|p| p.set_row_bounds(i, bound))
    }

    /// Bound column `j`.
    pub fn set_col_bounds(&self, j: usize, bound: Bound) -> Result<(), BridgeError> {
        self.define(|p| p.set_col_bounds(j, bound))
    }

    /// Set the kind of column `j`.
    pub fn set_col_kind(&self, j: usize, kind: ColKind) -> Result<(), BridgeError> {
        self.define(|p| p.set_col_kind(j, kind))
    }

    /// Objective coefficient of column `j`.
    pub fn set_obj_coef(&self, j: usize, coef: f64) -> Result<(), BridgeError> {
        self.define(|p| p.set_obj_coef(j, coef))
    }

    /// Constant term of the objective.
    pub fn set_obj_constant(&self, value: f64) -> Result<(), BridgeError> {
        self.define(|p| p.set_obj_constant(value))
    }

    /// Replace the constraint matrix with `(rows[k], cols[k], values[k])`
    /// triplets. Repeated positions are summed. Returns the number of stored
    /// coefficients.
    pub fn load_matrix(
        &self,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Result<usize, BridgeError> {
        self.define(|p| p.load_matrix(rows, cols, values))
    }

    /// Number of rows.
    pub fn num_rows(&self) -> Result<usize, BridgeError> {
        self.inspect(Problem::num_rows)
    }

    /// Number of columns.
    pub fn num_cols(&self) -> Result<usize, BridgeError> {
        self.inspect(Problem::num_cols)
    }

    /// Number of stored constraint coefficients.
    pub fn num_nonzeros(&self) -> Result<usize, BridgeError> {
        self.inspect(Problem::num_nonzeros)
    }

    /// Last solution stored by `method`, if any.
    pub fn last_solution(&self, method: Method) -> Result<Option<Solution>, BridgeError> {
        self.inspect(|p| {
            match method {
                Method::Simplex | Method::Exact => p.lp_solution(),
                Method::Interior => p.interior_solution(),
                Method::BranchAndBound => p.mip_solution(),
            }
            .cloned()
        })
    }

    /// Run `op` in `mode`. Await the result to get the [`CallOutcome`] either
    /// way.
    pub fn run(&self, op: Operation, mode: ExecMode) -> Dispatch {
        match mode {
            ExecMode::Sync => Dispatch::Completed(self.run_sync(op)),
            ExecMode::Async => Dispatch::Pending(self.submit(op)),
        }
    }

    /// Run `op` on the calling thread, blocking until it finishes.
    pub fn run_sync(&self, op: Operation) -> CallOutcome {
        let kind = op.kind();
        let inner = &self.inner;
        inner
            .gateway
            .run_sync(kind, inner.observer(), |cx| inner.execute(op, cx))
    }

    /// Queue `op` on the gateway's worker.
    pub fn submit(&self, op: Operation) -> PendingCall {
        let kind = op.kind();
        if self.is_destroyed() {
            return CallGateway::reject(kind, BridgeError::destroyed(self.inner.id));
        }
        let inner = Arc::clone(&self.inner);
        let owner: Owner = Arc::clone(&self.inner) as Owner;
        self.inner.gateway.submit_owned(
            kind,
            self.inner.observer(),
            Box::new(move |cx: &mut CallContext| inner.execute(op, cx)),
            Some(owner),
        )
    }

    /// Primal simplex with the gateway's default options.
    pub fn simplex(&self, mode: ExecMode) -> Dispatch {
        let options = self.inner.gateway.config().simplex.clone();
        self.run(Operation::Simplex(options), mode)
    }

    /// Exact simplex with the gateway's default options.
    pub fn exact(&self, mode: ExecMode) -> Dispatch {
        let options = self.inner.gateway.config().simplex.clone();
        self.run(Operation::Exact(options), mode)
    }

    /// Interior point with the gateway's default options.
    pub fn interior(&self, mode: ExecMode) -> Dispatch {
        let options = self.inner.gateway.config().interior.clone();
        self.run(Operation::Interior(options), mode)
    }

    /// Branch and bound with the gateway's default options.
    pub fn branch_and_bound(&self, callback: Option<NodeCallback>, mode: ExecMode) -> Dispatch {
        self.start_search(callback).run(mode)
    }

    /// Prepare a branch-and-bound call that can be stopped from outside its
    /// callback. Nothing reaches the engine until [`SearchCall::run`].
    pub fn start_search(&self, callback: Option<NodeCallback>) -> SearchCall<'_> {
        SearchCall {
            session: self,
            options: self.inner.gateway.config().mip.clone(),
            callback,
            control: SearchControl::new(),
        }
    }

    /// Factorize the current basis.
    pub fn factorize(&self, mode: ExecMode) -> Dispatch {
        self.run(Operation::Factorize, mode)
    }

    /// Replace the model with one read from a CPLEX LP file. The model is
    /// left unchanged if the file cannot be read.
    pub fn read_model(&self, path: impl Into<PathBuf>, mode: ExecMode) -> Dispatch {
        self.run(Operation::ReadModel(path.into()), mode)
    }
}

/// A branch-and-bound call made by [`SolverSession::start_search`].
pub struct SearchCall<'s> {
    session: &'s SolverSession,
    options: MipOptions,
    callback: Option<NodeCallback>,
    control: SearchControl,
}

impl SearchCall<'_> {
    /// Replace the search parameters.
    pub fn with_options(mut self, options: MipOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an existing control instead of the call's own.
    pub fn with_control(mut self, control: SearchControl) -> Self {
        self.control = control;
        self
    }

    /// Handle that stops this call once it runs. Cheap to clone and `Send`.
    pub fn control(&self) -> SearchControl {
        self.control.clone()
    }

    /// Stop the search before its next node; before `run`, the search ends
    /// without exploring any.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Start exploring in `mode`.
    pub fn run(self, mode: ExecMode) -> Dispatch {
        let op = Operation::BranchAndBound {
            options: self.options,
            callback: self.callback,
            control: Some(self.control),
        };
        self.session.run(op, mode)
    }
}

impl std::fmt::Debug for SearchCall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCall")
            .field("session", &self.session.id())
            .field("options", &self.options)
            .field("stopped", &self.control.is_stopped())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SolverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverSession")
            .field("id", &self.inner.id)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lpbridge_engine::{ReturnCode, Status};

    use super::*;
    use crate::error::ErrorCategory;

    fn session() -> SolverSession {
        SolverSession::new().unwrap()
    }

    fn sample(s: &SolverSession) {
        s.set_direction(Direction::Maximize).unwrap();
        assert_eq!(s.add_rows(3).unwrap(), 0);
        for (i, ub) in [100.0, 600.0, 300.0].into_iter().enumerate() {
            s.set_row_bounds(i, Bound::Upper(ub)).unwrap();
        }
        assert_eq!(s.add_cols(3).unwrap(), 0);
        for (j, c) in [10.0, 6.0, 4.0].into_iter().enumerate() {
            s.set_col_bounds(j, Bound::Lower(0.0)).unwrap();
            s.set_obj_coef(j, c).unwrap();
        }
        s.load_matrix(
            &[0, 0, 0, 1, 1, 1, 2, 2, 2],
            &[0, 1, 2, 0, 1, 2, 0, 1, 2],
            &[1.0, 1.0, 1.0, 10.0, 4.0, 5.0, 2.0, 2.0, 6.0],
        )
        .unwrap();
    }

    #[test]
    fn out_of_range_setters_are_model_errors() {
        let s = session();
        s.add_rows(2).unwrap();
        let err = s.set_row_bounds(2, Bound::Upper(1.0)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ModelDefinition);
        let err = s.set_col_kind(0, ColKind::Integer).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ModelDefinition);
        let err = s.load_matrix(&[0], &[0], &[1.0]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ModelDefinition);
    }

    #[test]
    fn second_destroy_is_a_resource_error() {
        let s = session();
        sample(&s);
        s.destroy().unwrap();
        assert!(s.is_destroyed());

        let err = s.destroy().unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Resource);
        assert_eq!(s.add_rows(1).unwrap_err().category(), ErrorCategory::Resource);
        assert_eq!(s.num_rows().unwrap_err().category(), ErrorCategory::Resource);

        let outcome = s.run_sync(Operation::Factorize);
        assert_eq!(
            outcome.result.unwrap_err().category(),
            ErrorCategory::Resource
        );

        let m = s.memory();
        assert_eq!(m.count, 0);
        assert_eq!(m.total, 0);
        assert!(m.tpeak > 0);
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let s = session();
        s.add_rows(1).unwrap();
        s.add_cols(2).unwrap();
        assert_eq!(s.load_matrix(&[0, 0, 0], &[1, 0, 1], &[1.5, 2.0, 2.5]).unwrap(), 2);
        assert_eq!(s.inspect(|p| p.coef(0, 1)).unwrap(), 4.0);
        assert_eq!(s.inspect(|p| p.coef(0, 0)).unwrap(), 2.0);
    }

    #[test]
    fn sync_simplex_reports_solution() {
        let s = session();
        sample(&s);
        let outcome = s.run_sync(Operation::Simplex(Default::default()));
        let report = outcome.report().unwrap();
        assert_eq!(report.method, Method::Simplex);
        assert_eq!(report.status, Status::Optimal);
        assert_eq!(report.code, ReturnCode::Ok);
        assert!((report.objective - 2200.0 / 3.0).abs() < 1e-6);
        assert_eq!(report.nodes, None);

        let stored = s.last_solution(Method::Simplex).unwrap().unwrap();
        assert_eq!(stored.objective, report.objective);
        assert!(s.last_solution(Method::Interior).unwrap().is_none());
    }

    #[test]
    fn factorize_after_simplex() {
        let s = session();
        sample(&s);
        s.run_sync(Operation::Simplex(Default::default()));
        let out = s.run_sync(Operation::Factorize).into_result().unwrap();
        assert_eq!(
            out,
            CallOutput::Factorization(FactorReport {
                code: ReturnCode::Ok,
                factored: true,
            })
        );
    }

    #[test]
    fn session_memory_follows_model_size() {
        let s = session();
        let empty = s.memory();
        assert!(empty.count > 0);
        sample(&s);
        let built = s.memory();
        assert!(built.total > empty.total);
        for m in [empty, built, MemoryMonitor::global().snapshot()] {
            assert!(m.cpeak >= m.count);
            assert!(m.tpeak >= m.total);
        }
    }

    #[test]
    fn dropped_session_waits_for_the_engine_lock() {
        let s = session();
        sample(&s);
        let lock = EngineLock::global();
        let held = lock.acquire();
        let dropper = std::thread::spawn(move || drop(s));
        while lock.waiting() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(
            !dropper.is_finished(),
            "problem freed while another caller held the engine"
        );
        drop(held);
        dropper.join().unwrap();
    }

    #[tokio::test]
    async fn session_dropped_during_async_call_is_released_by_the_worker() {
        let s = session();
        sample(&s);
        let pending = s.submit(Operation::Simplex(Default::default()));
        drop(s);
        let outcome = pending.await;
        assert_eq!(outcome.report().unwrap().status, Status::Optimal);

        let next = session();
        sample(&next);
        let outcome = next.submit(Operation::Factorize).await;
        assert!(outcome.result.is_ok());
    }

    #[tokio::test]
    async fn search_call_stopped_before_run_explores_nothing() {
        let s = session();
        sample(&s);
        for j in [1, 2] {
            s.set_col_kind(j, ColKind::Integer).unwrap();
        }
        s.run_sync(Operation::Simplex(Default::default()));

        let call = s.start_search(None);
        let control = call.control();
        call.stop();
        assert!(control.is_stopped());
        let outcome = call.run(ExecMode::Async).await;
        let report = outcome.report().unwrap();
        assert_eq!(report.code, ReturnCode::Stopped);
        assert_eq!(report.nodes, Some(0));
    }

    #[tokio::test]
    async fn submit_on_destroyed_session_fails_without_queueing() {
        let s = session();
        s.destroy().unwrap();
        let outcome = s.submit(Operation::Factorize).await;
        assert!(matches!(outcome.result, Err(BridgeError::Resource(_))));
        assert!(outcome.observer_failures.is_empty());
    }
}
