//! Branch-and-bound driven node by node, with a user callback at every node.
//!
//! ```text
//! Init -> Running -> (Suspended(node) -> Resumed)* -> Terminal(outcome)
//! ```
//!
//! The callback runs once per explored node while the search is suspended,
//! then exactly once more after the search has ended. `Terminal` is
//! absorbing: further `run`/`stop` calls return the same outcome and do not
//! invoke the callback again.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lpbridge_engine::{MipOptions, NodeInfo, NodeView, Problem, Search, SearchOutcome, Step};

use crate::api::{FailureSite, NodeCallback, ObserverFailure};
use crate::error::BridgeError;
use crate::relay::panic_message;

/// Handle passed to a [`NodeCallback`].
///
/// Valid only for the duration of the callback; the borrow checker rejects
/// any attempt to keep it.
pub struct SearchNode<'a> {
    inner: NodeInner<'a>,
}

enum NodeInner<'a> {
    Live(NodeView<'a>),
    Terminal(SearchOutcome),
}

impl SearchNode<'_> {
    /// Whether this is the final invocation, made after the search ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self.inner, NodeInner::Terminal(_))
    }

    /// Details of the node just explored. `None` on the terminal invocation.
    pub fn info(&self) -> Option<&NodeInfo> {
        match &self.inner {
            NodeInner::Live(view) => Some(view.info()),
            NodeInner::Terminal(_) => None,
        }
    }

    /// How the search ended. `None` while it is still running.
    pub fn outcome(&self) -> Option<SearchOutcome> {
        match &self.inner {
            NodeInner::Live(_) => None,
            NodeInner::Terminal(outcome) => Some(*outcome),
        }
    }

    /// Nodes explored so far.
    pub fn explored(&self) -> u64 {
        match &self.inner {
            NodeInner::Live(view) => view.info().explored,
            NodeInner::Terminal(outcome) => outcome.nodes,
        }
    }

    /// Stop the search before it explores another node. Ignored on the
    /// terminal invocation.
    pub fn terminate(&mut self) {
        if let NodeInner::Live(view) = &mut self.inner {
            view.terminate();
        }
    }

    /// Whether [`SearchNode::terminate`] has been called for this search.
    pub fn stop_requested(&self) -> bool {
        match &self.inner {
            NodeInner::Live(view) => view.terminating(),
            NodeInner::Terminal(_) => false,
        }
    }
}

impl std::fmt::Debug for SearchNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            NodeInner::Live(view) => f.debug_tuple("SearchNode").field(view.info()).finish(),
            NodeInner::Terminal(outcome) => f.debug_tuple("SearchNode").field(outcome).finish(),
        }
    }
}

/// Stops a branch-and-bound call from outside its node callback.
///
/// Clones share one flag. The search checks it before exploring each node,
/// so a stop requested before the call reaches the engine ends the search
/// before its first node.
#[derive(Debug, Clone, Default)]
pub struct SearchControl {
    stop: Arc<AtomicBool>,
}

impl SearchControl {
    /// A control that has not been stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the search to end before its next node. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether [`SearchControl::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchState {
    Init,
    Running,
    Suspended { node: u64 },
    Resumed,
    Terminal(SearchOutcome),
}

enum Phase<'p> {
    Live(Box<Search<'p>>),
    Done(SearchOutcome),
}

pub(crate) struct CallbackBridge<'p> {
    phase: Phase<'p>,
    state: SearchState,
    callback: Option<NodeCallback>,
    control: Option<SearchControl>,
    stopping: bool,
    call_id: u64,
    invocations: u64,
    failures: Vec<ObserverFailure>,
}

fn invoke(
    callback: &mut Option<NodeCallback>,
    node: &mut SearchNode<'_>,
    site: FailureSite,
    call_id: u64,
    invocations: &mut u64,
    failures: &mut Vec<ObserverFailure>,
) {
    let Some(cb) = callback.as_mut() else {
        return;
    };
    *invocations += 1;
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| cb(node))) {
        let message = panic_message(payload.as_ref());
        tracing::warn!(call_id, ?site, %message, "node callback panicked");
        failures.push(ObserverFailure {
            call_id,
            site,
            message,
        });
    }
}

impl<'p> CallbackBridge<'p> {
    // The engine stays entered until the search reaches `Terminal`.
    pub(crate) fn start(
        problem: &'p mut Problem,
        options: &MipOptions,
        callback: Option<NodeCallback>,
        control: Option<SearchControl>,
        call_id: u64,
    ) -> Result<Self, BridgeError> {
        let search = Search::start(problem, options)?;
        Ok(Self {
            phase: Phase::Live(Box::new(search)),
            state: SearchState::Init,
            callback,
            control,
            stopping: false,
            call_id,
            invocations: 0,
            failures: Vec::new(),
        })
    }

    pub(crate) fn run(&mut self) -> SearchOutcome {
        loop {
            if self.stop_pending() {
                tracing::debug!(call_id = self.call_id, "search stop requested");
                return self.stop();
            }
            let search = match &mut self.phase {
                Phase::Live(search) => search,
                Phase::Done(outcome) => return *outcome,
            };
            self.state = SearchState::Running;
            let finished = match search.step() {
                Step::Node(view) => {
                    let id = view.info().id;
                    self.state = SearchState::Suspended { node: id };
                    let mut node = SearchNode {
                        inner: NodeInner::Live(view),
                    };
                    invoke(
                        &mut self.callback,
                        &mut node,
                        FailureSite::Node { id },
                        self.call_id,
                        &mut self.invocations,
                        &mut self.failures,
                    );
                    self.state = SearchState::Resumed;
                    None
                }
                Step::Finished(outcome) => Some(outcome),
            };
            if let Some(outcome) = finished {
                self.finish(outcome);
            }
        }
    }

    fn stop_pending(&self) -> bool {
        !self.stopping
            && matches!(self.phase, Phase::Live(_))
            && self.control.as_ref().is_some_and(SearchControl::is_stopped)
    }

    pub(crate) fn stop(&mut self) -> SearchOutcome {
        self.stopping = true;
        if let Phase::Live(search) = &mut self.phase {
            search.terminate();
        }
        self.run()
    }

    fn finish(&mut self, outcome: SearchOutcome) {
        // Leaving the engine before the terminal callback.
        self.phase = Phase::Done(outcome);
        self.state = SearchState::Terminal(outcome);
        let mut node = SearchNode {
            inner: NodeInner::Terminal(outcome),
        };
        invoke(
            &mut self.callback,
            &mut node,
            FailureSite::Terminal,
            self.call_id,
            &mut self.invocations,
            &mut self.failures,
        );
    }

    pub(crate) fn state(&self) -> SearchState {
        self.state
    }

    pub(crate) fn invocations(&self) -> u64 {
        self.invocations
    }

    pub(crate) fn into_failures(self) -> Vec<ObserverFailure> {
        self.failures
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use lpbridge_engine::{Bound, ColKind, Direction, MsgLevel, ReturnCode, Status};

    use super::*;
    use crate::lock::EngineLock;

    pub(crate) fn sample_mip() -> Problem {
        let mut lp = Problem::new();
        lp.set_direction(Direction::Maximize);
        lp.add_rows(3);
        for (i, ub) in [100.0, 600.0, 300.0].into_iter().enumerate() {
            lp.set_row_bounds(i, Bound::Upper(ub)).unwrap();
        }
        lp.add_cols(3);
        for (j, c) in [10.0, 6.0, 4.0].into_iter().enumerate() {
            lp.set_obj_coef(j, c).unwrap();
            lp.set_col_bounds(j, Bound::Lower(0.0)).unwrap();
        }
        for j in [1, 2] {
            lp.set_col_kind(j, ColKind::Integer).unwrap();
            lp.set_col_bounds(j, Bound::Lower(10.0)).unwrap();
        }
        let ia = [0, 0, 0, 1, 1, 1, 2, 2, 2];
        let ja = [0, 1, 2, 0, 1, 2, 0, 1, 2];
        let ar = [1.0, 1.0, 1.0, 10.0, 4.0, 5.0, 2.0, 2.0, 6.0];
        lp.load_matrix(&ia, &ja, &ar).unwrap();
        lp
    }

    fn quiet() -> MipOptions {
        MipOptions {
            msg_level: MsgLevel::Off,
            presolve: true,
            ..MipOptions::default()
        }
    }

    fn recorder() -> (NodeCallback, Arc<Mutex<Vec<(bool, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: NodeCallback = Box::new(move |node: &mut SearchNode<'_>| {
            sink.lock().unwrap().push((node.is_terminal(), node.explored()));
        });
        (cb, seen)
    }

    #[test]
    fn callback_fires_once_per_node_plus_terminal() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let (cb, seen) = recorder();

        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), Some(cb), None, 1).unwrap();
        assert_eq!(bridge.state(), SearchState::Init);
        let outcome = bridge.run();

        assert_eq!(outcome.status, Status::Optimal);
        assert_eq!(bridge.invocations(), outcome.nodes + 1);
        assert_eq!(bridge.state(), SearchState::Terminal(outcome));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len() as u64, outcome.nodes + 1);
        assert!(seen[..seen.len() - 1].iter().all(|(terminal, _)| !terminal));
        assert_eq!(seen.last(), Some(&(true, outcome.nodes)));
        drop(bridge);
        assert!((lp.mip_solution().unwrap().objective - 706.0).abs() < 1e-6);
    }

    #[test]
    fn terminal_state_is_absorbing() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let (cb, seen) = recorder();

        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), Some(cb), None, 1).unwrap();
        let first = bridge.run();
        let calls = bridge.invocations();
        assert_eq!(bridge.run(), first);
        assert_eq!(bridge.stop(), first);
        assert_eq!(bridge.invocations(), calls);
        assert_eq!(seen.lock().unwrap().len() as u64, calls);
    }

    #[test]
    fn stop_directive_at_node_k() {
        let _engine = EngineLock::global().acquire();
        let k = 3;
        let mut lp = sample_mip();
        let invocations = Arc::new(Mutex::new(0u64));
        let counter = Arc::clone(&invocations);
        let cb: NodeCallback = Box::new(move |node: &mut SearchNode<'_>| {
            *counter.lock().unwrap() += 1;
            if node.explored() == k {
                node.terminate();
                assert!(node.stop_requested());
            }
        });

        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), Some(cb), None, 1).unwrap();
        let outcome = bridge.run();
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.nodes, k);
        assert!(matches!(outcome.status, Status::Feasible | Status::Undefined));
        assert_eq!(*invocations.lock().unwrap(), k + 1);
    }

    #[test]
    fn stop_before_run_still_calls_terminal_once() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let (cb, seen) = recorder();

        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), Some(cb), None, 1).unwrap();
        let outcome = bridge.stop();
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.nodes, 0);
        assert_eq!(*seen.lock().unwrap(), vec![(true, 0)]);
    }

    #[test]
    fn control_stopped_before_run_explores_nothing() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let (cb, seen) = recorder();
        let control = SearchControl::new();
        control.stop();

        let mut bridge =
            CallbackBridge::start(&mut lp, &quiet(), Some(cb), Some(control), 1).unwrap();
        let outcome = bridge.run();
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.nodes, 0);
        assert_eq!(bridge.invocations(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(true, 0)]);
    }

    #[test]
    fn control_stopped_mid_search_ends_before_next_node() {
        let _engine = EngineLock::global().acquire();
        let k = 2;
        let mut lp = sample_mip();
        let control = SearchControl::new();
        let remote = control.clone();
        let (mut inner, seen) = recorder();
        let cb: NodeCallback = Box::new(move |node: &mut SearchNode<'_>| {
            inner(node);
            if node.explored() == k {
                remote.stop();
            }
        });

        let mut bridge =
            CallbackBridge::start(&mut lp, &quiet(), Some(cb), Some(control.clone()), 1).unwrap();
        let outcome = bridge.run();
        assert!(control.is_stopped());
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.nodes, k);
        assert_eq!(bridge.invocations(), k + 1);
        assert_eq!(seen.lock().unwrap().last(), Some(&(true, k)));
    }

    #[test]
    fn panicking_callback_is_recorded_and_search_continues() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let cb: NodeCallback = Box::new(|node: &mut SearchNode<'_>| {
            if node.info().is_some_and(|info| info.id == 1) {
                panic!("root node rejected");
            }
        });

        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), Some(cb), None, 5).unwrap();
        let outcome = bridge.run();
        assert_eq!(outcome.status, Status::Optimal);
        let failures = bridge.into_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].call_id, 5);
        assert_eq!(failures[0].site, FailureSite::Node { id: 1 });
        assert_eq!(failures[0].message, "root node rejected");
    }

    #[test]
    fn without_callback_nothing_is_counted() {
        let _engine = EngineLock::global().acquire();
        let mut lp = sample_mip();
        let mut bridge = CallbackBridge::start(&mut lp, &quiet(), None, None, 1).unwrap();
        let outcome = bridge.run();
        assert!(outcome.nodes > 0);
        assert_eq!(bridge.invocations(), 0);
    }
}
