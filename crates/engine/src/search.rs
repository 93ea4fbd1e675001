//! Branch-and-bound search, driven one node at a time.
//!
//! [`Search::start`] enters the engine and prints the optimizer header,
//! [`Search::step`] explores one node and hands back a [`NodeView`] for it,
//! and [`Search::stop`] ends the search early. The engine stays entered for
//! the whole lifetime of a [`Search`].

use serde::{Deserialize, Serialize};

use crate::env::{plural, sci, Block, CallGuard, Terminal};
use crate::error::EngineError;
use crate::params::{Branching, MipOptions, Scaling};
use crate::problem::{Direction, Problem, ReturnCode, Solution, Status};
use crate::simplex::{solve_relaxation, LpOutcome, FEAS_TOL};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Why the search stopped at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeReason {
    /// The node relaxation had a fractional integer column; two children
    /// were queued.
    Branched,
    /// The node relaxation cannot beat the incumbent.
    Fathomed,
    /// The node relaxation is infeasible.
    Infeasible,
    /// The node relaxation is integral and improves the incumbent.
    Incumbent,
}

/// Final result of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Status of the stored integer solution.
    pub status: Status,
    /// Whether the search ran to completion.
    pub code: ReturnCode,
    /// Nodes explored.
    pub nodes: u64,
}

/// Snapshot of one explored node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeInfo {
    /// 1-based node number; the root is node 1.
    pub id: u64,
    /// Depth in the tree; the root has depth 0.
    pub depth: usize,
    /// What happened at the node.
    pub reason: NodeReason,
    /// Objective of the node relaxation, if it was solved to optimality.
    pub objective: Option<f64>,
    /// Objective of the best integer solution found so far.
    pub incumbent: Option<f64>,
    /// Nodes explored so far, this one included.
    pub explored: u64,
    /// Nodes still waiting to be explored.
    pub active: usize,
}

/// The node just explored. Lives until the next call into the search.
#[derive(Debug)]
pub struct NodeView<'s> {
    info: &'s NodeInfo,
    stop: &'s mut bool,
}

impl NodeView<'_> {
    /// Node details.
    pub fn info(&self) -> &NodeInfo {
        self.info
    }

    /// Ask the search to stop before exploring another node.
    pub fn terminate(&mut self) {
        *self.stop = true;
    }

    /// Whether [`NodeView::terminate`] has been called.
    pub fn terminating(&self) -> bool {
        *self.stop
    }
}

/// Result of [`Search::step`].
#[derive(Debug)]
pub enum Step<'s> {
    /// One more node was explored.
    Node(NodeView<'s>),
    /// The search is over. Repeated steps return the same outcome.
    Finished(SearchOutcome),
}

#[derive(Debug)]
struct Pending {
    id: u64,
    depth: usize,
    limits: Vec<(f64, f64)>,
    _mem: Block,
}

impl Pending {
    fn new(id: u64, depth: usize, limits: Vec<(f64, f64)>) -> Self {
        let mem = Block::alloc(64 + limits.len() * size_of::<(f64, f64)>());
        Self {
            id,
            depth,
            limits,
            _mem: mem,
        }
    }
}

/// A branch-and-bound search over one problem.
#[derive(Debug)]
pub struct Search<'p> {
    problem: &'p mut Problem,
    options: MipOptions,
    term: Terminal,
    _call: CallGuard,
    integer: Vec<usize>,
    stack: Vec<Pending>,
    next_id: u64,
    explored: u64,
    incumbent: Option<(f64, Vec<f64>)>,
    relaxed: bool,
    root: Option<LpOutcome>,
    stop: bool,
    current: Option<NodeInfo>,
    finished: Option<SearchOutcome>,
}

pub(crate) fn integer_line(ni: usize, nb: usize) -> String {
    let head = plural(ni, "integer variable");
    if ni == 1 {
        return format!("{head}, which {} binary", if nb == 0 { "is not" } else { "is" });
    }
    let which = match nb {
        0 => "none of".to_string(),
        1 => "one of".to_string(),
        _ if nb == ni => "all of".to_string(),
        _ => format!("{nb} of"),
    };
    format!("{head}, {which} which {} binary", if nb == 1 { "is" } else { "are" })
}

impl<'p> Search<'p> {
    /// Enter the engine and prepare the search.
    ///
    /// With `presolve` the preprocessor runs first; a problem whose columns
    /// are all fixed is solved right there and the search finishes without
    /// exploring any node. Without `presolve` the problem must carry an
    /// optimal LP solution, otherwise the search finishes immediately with
    /// [`ReturnCode::NoRootBasis`].
    pub fn start(problem: &'p mut Problem, options: &MipOptions) -> Result<Self, EngineError> {
        let call = CallGuard::enter("intopt")?;
        let term = Terminal::new(options.msg_level);

        term.all(format!("GLPK Integer Optimizer, v{VERSION}"));
        term.all(format!(
            "{}, {}, {}",
            plural(problem.num_rows(), "row"),
            plural(problem.num_cols(), "column"),
            plural(problem.num_nonzeros(), "non-zero")
        ));
        term.all(integer_line(problem.num_int(), problem.num_bin()));

        let limits = problem.col_limits();
        let mut search = Self {
            integer: problem.integer_cols(),
            problem,
            options: options.clone(),
            term,
            _call: call,
            stack: Vec::new(),
            next_id: 1,
            explored: 0,
            incumbent: None,
            relaxed: false,
            root: None,
            stop: false,
            current: None,
            finished: None,
        };

        if options.presolve {
            search.term.all("Preprocessing...");
            if limits.iter().all(|&(lb, ub)| lb == ub) {
                search.solve_by_preprocessor(&limits);
                return Ok(search);
            }
            search.term.all("Solving LP relaxation...");
        } else if search.problem.lp_solution().map(|s| s.status) != Some(Status::Optimal) {
            search
                .term
                .err("intopt: optimal basis to initial LP relaxation not provided");
            search.finish(Status::Undefined, ReturnCode::NoRootBasis);
            return Ok(search);
        }

        search.term.all("Integer optimization begins...");
        search.stack.push(Pending::new(search.next_id, 0, limits));
        search.next_id += 1;
        Ok(search)
    }

    fn solve_by_preprocessor(&mut self, fixed: &[(f64, f64)]) {
        let x: Vec<f64> = fixed.iter().map(|&(v, _)| v).collect();
        let rows_ok = self
            .problem
            .row_limits()
            .into_iter()
            .zip(self.problem.activities(&x))
            .all(|((lb, ub), v)| v >= lb - FEAS_TOL && v <= ub + FEAS_TOL);
        let integral = self
            .integer
            .iter()
            .all(|&j| (x[j] - x[j].round()).abs() <= self.options.int_tolerance);

        if !rows_ok {
            self.term.on("PROBLEM HAS NO PRIMAL FEASIBLE SOLUTION");
            self.finish(Status::Infeasible, ReturnCode::Ok);
        } else if !integral {
            self.term.on("PROBLEM HAS NO INTEGER FEASIBLE SOLUTION");
            self.finish(Status::NoFeasibleInteger, ReturnCode::Ok);
        } else {
            let objective = self.problem.objective_of(&x);
            self.term.all(format!("Objective value = {:>17}", sci(objective)));
            self.term.all("INTEGER OPTIMAL SOLUTION FOUND BY MIP PREPROCESSOR");
            self.incumbent = Some((objective, x));
            self.finish(Status::Optimal, ReturnCode::Ok);
        }
    }

    /// The problem being searched.
    pub fn problem(&self) -> &Problem {
        self.problem
    }

    /// Nodes explored so far.
    pub fn explored(&self) -> u64 {
        self.explored
    }

    /// Explore the next node.
    pub fn step(&mut self) -> Step<'_> {
        if let Some(outcome) = self.finished {
            return Step::Finished(outcome);
        }
        if self.stop {
            self.term.on("SEARCH TERMINATED BY APPLICATION");
            return Step::Finished(self.finish_early(ReturnCode::Stopped));
        }
        if self.options.node_limit.is_some_and(|l| self.explored >= l) {
            self.term.on("NODE LIMIT EXCEEDED; SEARCH TERMINATED");
            return Step::Finished(self.finish_early(ReturnCode::NodeLimit));
        }
        let Some(node) = self.stack.pop() else {
            return Step::Finished(self.finish_complete());
        };

        self.explored += 1;
        let run = solve_relaxation(
            self.problem,
            &node.limits,
            Scaling::Auto,
            None,
            &Terminal::silent(),
        );
        if node.depth == 0 {
            self.root = Some(run.outcome);
        }

        let mut objective = None;
        let reason = match run.outcome {
            LpOutcome::Optimal => {
                self.relaxed = true;
                let value = self.problem.objective_of(&run.x);
                objective = Some(value);
                if !self.improves(value) {
                    NodeReason::Fathomed
                } else if let Some(j) = self.branching_column(&run.x) {
                    self.branch(&node, j, run.x[j]);
                    NodeReason::Branched
                } else {
                    let mut x = run.x;
                    for &j in &self.integer {
                        x[j] = x[j].round();
                    }
                    let value = self.problem.objective_of(&x);
                    self.term.on(format!(
                        "+{:>6}: >>>>> mip = {:>17}   ({}; {})",
                        self.explored,
                        sci(value),
                        self.stack.len(),
                        self.explored
                    ));
                    self.incumbent = Some((value, x));
                    NodeReason::Incumbent
                }
            }
            LpOutcome::Infeasible => NodeReason::Infeasible,
            LpOutcome::Unbounded | LpOutcome::IterationLimit => NodeReason::Fathomed,
        };

        let info = self.current.insert(NodeInfo {
            id: node.id,
            depth: node.depth,
            reason,
            objective,
            incumbent: self.incumbent.as_ref().map(|(v, _)| *v),
            explored: self.explored,
            active: self.stack.len(),
        });
        Step::Node(NodeView {
            info,
            stop: &mut self.stop,
        })
    }

    /// Ask the search to stop; the next [`Search::step`] finishes it.
    pub fn terminate(&mut self) {
        self.stop = true;
    }

    /// Stop the search now, keeping the best solution found so far.
    pub fn stop(mut self) -> SearchOutcome {
        match self.finished {
            Some(outcome) => outcome,
            None => {
                self.term.on("SEARCH TERMINATED BY APPLICATION");
                self.finish_early(ReturnCode::Stopped)
            }
        }
    }

    fn improves(&self, value: f64) -> bool {
        let Some((best, _)) = &self.incumbent else {
            return true;
        };
        let margin = self.options.obj_tolerance * (1.0 + best.abs());
        match self.problem.direction() {
            Direction::Maximize => value > best + margin,
            Direction::Minimize => value < best - margin,
        }
    }

    fn branching_column(&self, x: &[f64]) -> Option<usize> {
        let tol = self.options.int_tolerance;
        let mut fractional = self.integer.iter().copied().filter_map(|j| {
            let frac = x[j] - x[j].floor();
            let distance = frac.min(1.0 - frac);
            (distance > tol).then_some((j, distance))
        });
        match self.options.branching {
            Branching::FirstFractional => fractional.next().map(|(j, _)| j),
            Branching::LastFractional => fractional.last().map(|(j, _)| j),
            Branching::MostFractional => fractional
                .fold(None, |best: Option<(usize, f64)>, (j, d)| match best {
                    Some((_, bd)) if bd >= d => best,
                    _ => Some((j, d)),
                })
                .map(|(j, _)| j),
        }
    }

    /// Queue both children; the one nearer to `value` is explored first.
    fn branch(&mut self, node: &Pending, j: usize, value: f64) {
        let floor = value.floor();
        let mut down = node.limits.clone();
        down[j].1 = down[j].1.min(floor);
        let mut up = node.limits.clone();
        up[j].0 = up[j].0.max(floor + 1.0);

        let down_first = value - floor < 0.5;
        let (near, far) = if down_first { (down, up) } else { (up, down) };
        let depth = node.depth + 1;
        let far = Pending::new(self.next_id + 1, depth, far);
        let near = Pending::new(self.next_id, depth, near);
        self.next_id += 2;
        self.stack.push(far);
        self.stack.push(near);
    }

    fn finish_complete(&mut self) -> SearchOutcome {
        if self.incumbent.is_some() {
            self.term.on("INTEGER OPTIMAL SOLUTION FOUND");
            return self.finish(Status::Optimal, ReturnCode::Ok);
        }
        match self.root {
            Some(LpOutcome::Infeasible) => {
                self.term.on("PROBLEM HAS NO PRIMAL FEASIBLE SOLUTION");
                self.finish(Status::Infeasible, ReturnCode::Ok)
            }
            Some(LpOutcome::Unbounded) if !self.relaxed => {
                self.term.on("PROBLEM HAS UNBOUNDED SOLUTION");
                self.finish(Status::Unbounded, ReturnCode::Ok)
            }
            _ => {
                self.term.on("PROBLEM HAS NO INTEGER FEASIBLE SOLUTION");
                self.finish(Status::NoFeasibleInteger, ReturnCode::Ok)
            }
        }
    }

    fn finish_early(&mut self, code: ReturnCode) -> SearchOutcome {
        let status = if self.incumbent.is_some() {
            Status::Feasible
        } else {
            Status::Undefined
        };
        self.finish(status, code)
    }

    fn finish(&mut self, status: Status, code: ReturnCode) -> SearchOutcome {
        self.stack.clear();
        let x = match &self.incumbent {
            Some((_, x)) => x.clone(),
            None => vec![0.0; self.problem.num_cols()],
        };
        let solution = Solution {
            status,
            objective: self.problem.objective_of(&x),
            rows: self.problem.activities(&x),
            columns: x,
        };
        self.problem.store_mip(solution);

        let outcome = SearchOutcome {
            status,
            code,
            nodes: self.explored,
        };
        self.finished = Some(outcome);
        outcome
    }
}

/// Run a branch-and-bound search to completion.
pub fn intopt(problem: &mut Problem, options: &MipOptions) -> Result<SearchOutcome, EngineError> {
    let mut search = Search::start(problem, options)?;
    loop {
        if let Step::Finished(outcome) = search.step() {
            return Ok(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{set_term_hook, testing::serial};
    use crate::params::{MsgLevel, SimplexOptions};
    use crate::problem::{Bound, ColKind};
    use crate::simplex::{simplex, tests::sample};
    use std::sync::{Arc, Mutex};

    fn mip_sample() -> Problem {
        let mut lp = sample();
        for j in [1, 2] {
            lp.set_col_kind(j, ColKind::Integer).unwrap();
            lp.set_col_bounds(j, Bound::Lower(10.0)).unwrap();
        }
        lp
    }

    fn quiet() -> MipOptions {
        MipOptions {
            msg_level: MsgLevel::Off,
            presolve: true,
            ..MipOptions::default()
        }
    }

    #[test]
    fn empty_problem_is_solved_by_preprocessor() {
        let _serial = serial();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let previous = set_term_hook(Some(Box::new(move |l: &str| {
            sink.lock().unwrap().push(l.to_string());
        })));

        let mut lp = Problem::new();
        let opts = MipOptions {
            presolve: true,
            ..MipOptions::default()
        };
        let outcome = intopt(&mut lp, &opts).unwrap();
        set_term_hook(previous);

        assert_eq!(outcome.status, Status::Optimal);
        assert_eq!(outcome.nodes, 0);
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("GLPK Integer Optimizer"));
        assert_eq!(lines[1], "0 rows, 0 columns, 0 non-zeros");
        assert_eq!(lines[2], "0 integer variables, none of which are binary");
        assert_eq!(lines[3], "Preprocessing...");
        assert_eq!(lines[4], "Objective value =   0.000000000e+00");
        assert_eq!(lines[5], "INTEGER OPTIMAL SOLUTION FOUND BY MIP PREPROCESSOR");
    }

    #[test]
    fn integer_line_wording() {
        assert_eq!(integer_line(1, 0), "1 integer variable, which is not binary");
        assert_eq!(integer_line(1, 1), "1 integer variable, which is binary");
        assert_eq!(integer_line(3, 3), "3 integer variables, all of which are binary");
        assert_eq!(integer_line(3, 1), "3 integer variables, one of which is binary");
        assert_eq!(integer_line(4, 2), "4 integer variables, 2 of which are binary");
    }

    #[test]
    fn solves_sample_mip() {
        let _serial = serial();
        let mut lp = mip_sample();
        let outcome = intopt(&mut lp, &quiet()).unwrap();
        assert_eq!(outcome.status, Status::Optimal);
        assert_eq!(outcome.code, ReturnCode::Ok);
        assert!(outcome.nodes > 1);
        let sol = lp.mip_solution().unwrap();
        assert!((sol.objective - 706.0).abs() < 1e-6);
        assert_eq!(sol.columns[1], 58.0);
        assert_eq!(sol.columns[2], 10.0);
    }

    #[test]
    fn branching_rules_agree_on_optimum() {
        let _serial = serial();
        for branching in [
            Branching::FirstFractional,
            Branching::LastFractional,
            Branching::MostFractional,
        ] {
            let mut lp = mip_sample();
            let opts = MipOptions {
                branching,
                ..quiet()
            };
            let outcome = intopt(&mut lp, &opts).unwrap();
            assert_eq!(outcome.status, Status::Optimal);
            assert!((lp.mip_solution().unwrap().objective - 706.0).abs() < 1e-6);
        }
    }

    #[test]
    fn requires_optimal_basis_without_presolve() {
        let _serial = serial();
        let mut lp = mip_sample();
        let opts = MipOptions {
            presolve: false,
            ..quiet()
        };
        let outcome = intopt(&mut lp, &opts).unwrap();
        assert_eq!(outcome.code, ReturnCode::NoRootBasis);
        assert_eq!(outcome.nodes, 0);

        let lp_opts = SimplexOptions {
            msg_level: MsgLevel::Off,
            ..SimplexOptions::default()
        };
        simplex(&mut lp, &lp_opts).unwrap();
        let outcome = intopt(&mut lp, &opts).unwrap();
        assert_eq!(outcome.status, Status::Optimal);
    }

    #[test]
    fn terminate_is_honored_at_next_step() {
        let _serial = serial();
        let mut lp = mip_sample();
        let mut search = Search::start(&mut lp, &quiet()).unwrap();
        let mut seen = 0;
        loop {
            match search.step() {
                Step::Node(mut node) => {
                    seen += 1;
                    if node.info().explored == 2 {
                        node.terminate();
                    }
                }
                Step::Finished(outcome) => {
                    assert_eq!(outcome.code, ReturnCode::Stopped);
                    assert_eq!(outcome.nodes, 2);
                    break;
                }
            }
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn terminate_before_first_step_explores_nothing() {
        let _serial = serial();
        let mut lp = mip_sample();
        let mut search = Search::start(&mut lp, &quiet()).unwrap();
        search.terminate();
        let Step::Finished(outcome) = search.step() else {
            panic!("search kept going after terminate");
        };
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.status, Status::Undefined);
        assert_eq!(outcome.nodes, 0);
        drop(search);
        assert_eq!(lp.mip_solution().unwrap().status, Status::Undefined);
    }

    #[test]
    fn stop_after_first_node_ends_the_search() {
        let _serial = serial();
        let mut lp = mip_sample();
        let mut search = Search::start(&mut lp, &quiet()).unwrap();
        assert!(matches!(search.step(), Step::Node(_)));
        let outcome = search.stop();
        assert_eq!(outcome.code, ReturnCode::Stopped);
        assert_eq!(outcome.nodes, 1);
        assert!(!crate::env::is_busy());
    }

    #[test]
    fn node_limit_keeps_incumbent_as_feasible() {
        let _serial = serial();
        let mut lp = mip_sample();
        let full = intopt(&mut lp, &quiet()).unwrap();
        let limit = full.nodes - 1;
        let opts = MipOptions {
            node_limit: Some(limit),
            ..quiet()
        };
        let outcome = intopt(&mut lp, &opts).unwrap();
        assert_eq!(outcome.code, ReturnCode::NodeLimit);
        assert_eq!(outcome.nodes, limit);
        assert!(matches!(outcome.status, Status::Feasible | Status::Undefined));
    }

    #[test]
    fn infeasible_integrality_reports_no_integer_solution() {
        let _serial = serial();
        // 2x = 1 with x integer
        let mut lp = Problem::new();
        lp.add_rows(1);
        lp.set_row_bounds(0, Bound::Fixed(1.0)).unwrap();
        lp.add_cols(1);
        lp.set_col_bounds(0, Bound::Double(0.0, 5.0)).unwrap();
        lp.set_col_kind(0, ColKind::Integer).unwrap();
        lp.load_matrix(&[0], &[0], &[2.0]).unwrap();
        let outcome = intopt(&mut lp, &quiet()).unwrap();
        assert_eq!(outcome.status, Status::NoFeasibleInteger);
        assert_eq!(outcome.nodes, 3);
    }
}
