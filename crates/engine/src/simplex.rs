//! Vertex solvers: the primal simplex, its exact refinement and the
//! interior-point entry point.
//!
//! All three share one dense two-phase tableau with Bland's rule. The
//! branch-and-bound search reuses the same core with per-node column bounds.

use num_rational::BigRational;
use num_traits::{ToPrimitive, Zero};

use crate::env::{plural, sci, Block, CallGuard, Terminal};
use crate::error::EngineError;
use crate::factor::solve_exact;
use crate::params::{InteriorOptions, Scaling, SimplexOptions};
use crate::problem::{Direction, Problem, ReturnCode, Solution, Status};

pub(crate) const EPS: f64 = 1e-9;
pub(crate) const FEAS_TOL: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LpOutcome {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
}

/// Result of one relaxation solve. `x` is the last primal point, in the
/// problem's own column space.
#[derive(Debug)]
pub(crate) struct LpRun {
    pub(crate) outcome: LpOutcome,
    pub(crate) x: Vec<f64>,
    pub(crate) pivots: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
    Le,
    Ge,
    Eq,
}

/// `x_j = offset + sum(sign * y_k)` with every `y_k >= 0`.
#[derive(Debug)]
struct Substitution {
    offset: f64,
    vars: Vec<(usize, f64)>,
}

#[derive(Debug)]
struct StandardForm {
    subs: Vec<Substitution>,
    nvars: usize,
    cost: Vec<f64>,
    rows: Vec<(Vec<f64>, Sense, f64)>,
}

impl StandardForm {
    /// `None` when the bounds alone are contradictory.
    fn build(problem: &Problem, cols: &[(f64, f64)], scaling: Scaling) -> Option<Self> {
        let sign = match problem.direction() {
            Direction::Maximize => 1.0,
            Direction::Minimize => -1.0,
        };
        let obj = problem.objective_coefs();

        let mut subs = Vec::with_capacity(cols.len());
        let mut cost = Vec::new();
        let mut ranges = Vec::new();
        let mut nvars = 0;
        for (j, &(lb, ub)) in cols.iter().enumerate() {
            if lb > ub + FEAS_TOL {
                return None;
            }
            let sub = match (lb.is_finite(), ub.is_finite()) {
                (false, false) => Substitution {
                    offset: 0.0,
                    vars: vec![(nvars, 1.0), (nvars + 1, -1.0)],
                },
                (true, false) => Substitution {
                    offset: lb,
                    vars: vec![(nvars, 1.0)],
                },
                (false, true) => Substitution {
                    offset: ub,
                    vars: vec![(nvars, -1.0)],
                },
                (true, true) if ub - lb <= EPS => Substitution {
                    offset: lb,
                    vars: Vec::new(),
                },
                (true, true) => {
                    ranges.push((nvars, ub - lb));
                    Substitution {
                        offset: lb,
                        vars: vec![(nvars, 1.0)],
                    }
                }
            };
            cost.extend(sub.vars.iter().map(|&(_, s)| sign * obj[j] * s));
            nvars += sub.vars.len();
            subs.push(sub);
        }

        let m = problem.num_rows();
        let mut dense = vec![vec![0.0; nvars]; m];
        let mut shift = vec![0.0; m];
        for (i, j, v) in problem.entries() {
            shift[i] += v * subs[j].offset;
            for &(k, s) in &subs[j].vars {
                dense[i][k] += v * s;
            }
        }

        let mut rows = Vec::new();
        for (i, ((lb, ub), coefs)) in problem.row_limits().into_iter().zip(dense).enumerate() {
            if lb.is_finite() && ub.is_finite() && ub - lb <= EPS {
                rows.push((coefs, Sense::Eq, lb - shift[i]));
                continue;
            }
            if lb.is_finite() {
                rows.push((coefs.clone(), Sense::Ge, lb - shift[i]));
            }
            if ub.is_finite() {
                rows.push((coefs, Sense::Le, ub - shift[i]));
            }
        }
        for (k, range) in ranges {
            let mut coefs = vec![0.0; nvars];
            coefs[k] = 1.0;
            rows.push((coefs, Sense::Le, range));
        }

        let mut kept = Vec::with_capacity(rows.len());
        for (mut coefs, mut sense, mut rhs) in rows {
            let peak = coefs.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if peak <= EPS {
                let satisfied = match sense {
                    Sense::Le => rhs >= -FEAS_TOL,
                    Sense::Ge => rhs <= FEAS_TOL,
                    Sense::Eq => rhs.abs() <= FEAS_TOL,
                };
                if !satisfied {
                    return None;
                }
                continue;
            }
            if scaling == Scaling::Auto {
                coefs.iter_mut().for_each(|v| *v /= peak);
                rhs /= peak;
            }
            if rhs < 0.0 {
                coefs.iter_mut().for_each(|v| *v = -*v);
                rhs = -rhs;
                sense = match sense {
                    Sense::Le => Sense::Ge,
                    Sense::Ge => Sense::Le,
                    Sense::Eq => Sense::Eq,
                };
            }
            kept.push((coefs, sense, rhs));
        }

        Some(Self {
            subs,
            nvars,
            cost,
            rows: kept,
        })
    }

    /// Initial tableau and the index of the first artificial column.
    /// Artificial columns are always last.
    fn tableau(&self) -> (Tableau, usize) {
        let slacks = self.rows.iter().filter(|r| r.1 != Sense::Eq).count();
        let artificials = self.rows.iter().filter(|r| r.1 != Sense::Le).count();
        let first_art = self.nvars + slacks;
        let width = first_art + artificials;

        let mut t = Tableau {
            rows: Vec::with_capacity(self.rows.len()),
            rhs: Vec::with_capacity(self.rows.len()),
            basis: Vec::with_capacity(self.rows.len()),
            width,
        };
        let mut slack = self.nvars;
        let mut art = first_art;
        for (coefs, sense, rhs) in &self.rows {
            let mut row = coefs.clone();
            row.resize(width, 0.0);
            let basic = match sense {
                Sense::Le => {
                    row[slack] = 1.0;
                    slack += 1;
                    slack - 1
                }
                Sense::Ge => {
                    row[slack] = -1.0;
                    slack += 1;
                    row[art] = 1.0;
                    art += 1;
                    art - 1
                }
                Sense::Eq => {
                    row[art] = 1.0;
                    art += 1;
                    art - 1
                }
            };
            t.rows.push(row);
            t.rhs.push(*rhs);
            t.basis.push(basic);
        }
        (t, first_art)
    }

    fn point(&self, t: &Tableau) -> Vec<f64> {
        let mut y = vec![0.0; self.nvars];
        for (&b, &v) in t.basis.iter().zip(&t.rhs) {
            if b < self.nvars {
                y[b] = v;
            }
        }
        self.subs
            .iter()
            .map(|s| s.offset + s.vars.iter().map(|&(k, sign)| sign * y[k]).sum::<f64>())
            .collect()
    }
}

enum Phase {
    Optimal,
    Unbounded,
    Limit,
}

#[derive(Debug)]
struct Tableau {
    rows: Vec<Vec<f64>>,
    rhs: Vec<f64>,
    basis: Vec<usize>,
    width: usize,
}

impl Tableau {
    fn pivot(&mut self, r: usize, c: usize) {
        let p = self.rows[r][c];
        self.rows[r].iter_mut().for_each(|v| *v /= p);
        self.rhs[r] /= p;

        let (pivot_row, pivot_rhs) = (self.rows[r].clone(), self.rhs[r]);
        for i in 0..self.rows.len() {
            let f = self.rows[i][c];
            if i == r || f == 0.0 {
                continue;
            }
            for (v, p) in self.rows[i].iter_mut().zip(&pivot_row) {
                *v -= f * p;
            }
            self.rhs[i] -= f * pivot_rhs;
            if self.rhs[i] < 0.0 && self.rhs[i] > -EPS {
                self.rhs[i] = 0.0;
            }
        }
        self.basis[r] = c;
    }

    fn objective(&self, cost: &[f64]) -> f64 {
        self.basis.iter().zip(&self.rhs).map(|(&b, &v)| cost[b] * v).sum()
    }

    /// Maximize `cost` letting only columns below `eligible` enter.
    fn optimize(
        &mut self,
        cost: &[f64],
        eligible: usize,
        pivots: &mut u64,
        limit: Option<u64>,
    ) -> Phase {
        loop {
            let mut basic = vec![false; self.width];
            for &b in &self.basis {
                basic[b] = true;
            }
            let entering = (0..eligible).filter(|&j| !basic[j]).find(|&j| {
                let priced: f64 = self
                    .basis
                    .iter()
                    .enumerate()
                    .map(|(r, &b)| cost[b] * self.rows[r][j])
                    .sum();
                cost[j] - priced > EPS
            });
            let Some(c) = entering else {
                return Phase::Optimal;
            };

            let mut leaving: Option<(usize, f64)> = None;
            for r in 0..self.rows.len() {
                let a = self.rows[r][c];
                if a <= EPS {
                    continue;
                }
                let ratio = self.rhs[r] / a;
                leaving = match leaving {
                    Some((best, q))
                        if ratio > q + EPS
                            || (ratio > q - EPS && self.basis[r] > self.basis[best]) =>
                    {
                        Some((best, q))
                    }
                    _ => Some((r, ratio)),
                };
            }
            let Some((r, _)) = leaving else {
                return Phase::Unbounded;
            };
            if limit.is_some_and(|l| *pivots >= l) {
                return Phase::Limit;
            }
            self.pivot(r, c);
            *pivots += 1;
        }
    }

    /// Pivot basic artificials at zero level out of the basis where a
    /// non-artificial column can replace them.
    fn expel_artificials(&mut self, first_art: usize) {
        for r in 0..self.rows.len() {
            if self.basis[r] < first_art {
                continue;
            }
            if let Some(c) = (0..first_art).find(|&c| self.rows[r][c].abs() > EPS) {
                self.pivot(r, c);
            }
        }
    }
}

fn resting_point(cols: &[(f64, f64)]) -> Vec<f64> {
    cols.iter()
        .map(|&(lb, ub)| {
            if lb.is_finite() {
                lb
            } else if ub.is_finite() {
                ub
            } else {
                0.0
            }
        })
        .collect()
}

/// Solve the LP relaxation of `problem` with column bounds replaced by `cols`.
pub(crate) fn solve_relaxation(
    problem: &Problem,
    cols: &[(f64, f64)],
    scaling: Scaling,
    limit: Option<u64>,
    term: &Terminal,
) -> LpRun {
    let Some(form) = StandardForm::build(problem, cols, scaling) else {
        return LpRun {
            outcome: LpOutcome::Infeasible,
            x: resting_point(cols),
            pivots: 0,
        };
    };
    let (mut t, first_art) = form.tableau();
    let _work = Block::alloc(t.rows.len() * t.width * size_of::<f64>());

    let progress = |mark: char, pivots: u64, t: &Tableau, infeas: f64| {
        let x = form.point(t);
        term.on(format!(
            "{mark}{pivots:>6}:   objval = {:>17}   infeas = {:>17} (0)",
            sci(problem.objective_of(&x)),
            sci(infeas)
        ));
    };

    let mut pivots = 0;
    if first_art < t.width {
        let mut phase_one = vec![0.0; t.width];
        phase_one[first_art..].iter_mut().for_each(|c| *c = -1.0);
        progress(' ', pivots, &t, -t.objective(&phase_one));

        if let Phase::Limit = t.optimize(&phase_one, t.width, &mut pivots, limit) {
            return LpRun {
                outcome: LpOutcome::IterationLimit,
                x: form.point(&t),
                pivots,
            };
        }
        let infeas = -t.objective(&phase_one);
        if infeas > FEAS_TOL {
            progress(' ', pivots, &t, infeas);
            return LpRun {
                outcome: LpOutcome::Infeasible,
                x: form.point(&t),
                pivots,
            };
        }
        t.expel_artificials(first_art);
    } else {
        progress('*', pivots, &t, 0.0);
    }

    let mut cost = form.cost.clone();
    cost.resize(t.width, 0.0);
    let phase = t.optimize(&cost, first_art, &mut pivots, limit);
    progress('*', pivots, &t, 0.0);

    let outcome = match phase {
        Phase::Optimal => LpOutcome::Optimal,
        Phase::Unbounded => LpOutcome::Unbounded,
        Phase::Limit => LpOutcome::IterationLimit,
    };
    LpRun {
        outcome,
        x: form.point(&t),
        pivots,
    }
}

fn strictly_inside((lb, ub): (f64, f64), v: f64) -> bool {
    v > lb + FEAS_TOL && v < ub - FEAS_TOL
}

fn nearest_bound((lb, ub): (f64, f64), v: f64) -> f64 {
    match (lb.is_finite(), ub.is_finite()) {
        (true, true) if (v - lb).abs() <= (ub - v).abs() => lb,
        (true, true) => ub,
        (true, false) => lb,
        (false, true) => ub,
        (false, false) => 0.0,
    }
}

/// Basis header for a vertex: variables strictly between their bounds are
/// basic, then the header is padded or trimmed with rows to exactly `m`
/// basic variables.
pub(crate) fn derive_basis(problem: &Problem, x: &[f64]) -> (Vec<bool>, Vec<bool>) {
    let act = problem.activities(x);
    let mut rows: Vec<bool> = problem
        .row_limits()
        .into_iter()
        .zip(&act)
        .map(|(lim, &v)| strictly_inside(lim, v))
        .collect();
    let mut cols: Vec<bool> = problem
        .col_limits()
        .into_iter()
        .zip(x)
        .map(|(lim, &v)| strictly_inside(lim, v))
        .collect();

    let m = rows.len();
    let mut basic = rows.iter().chain(&cols).filter(|&&b| b).count();
    for flag in rows.iter_mut().rev().chain(cols.iter_mut().rev()) {
        if basic <= m {
            break;
        }
        if *flag {
            *flag = false;
            basic -= 1;
        }
    }
    for flag in rows.iter_mut() {
        if basic >= m {
            break;
        }
        if !*flag {
            *flag = true;
            basic += 1;
        }
    }
    (rows, cols)
}

/// A vertex recomputed in rational arithmetic, each value rounded once.
#[derive(Debug)]
struct ExactVertex {
    columns: Vec<f64>,
    rows: Vec<f64>,
    objective: f64,
}

fn rounded(v: &BigRational) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}

/// Re-solve the active constraint system of a vertex exactly. Returns
/// `None` when the system is not square, is singular, or its solution is
/// worse than `x`.
fn refine_vertex(problem: &Problem, x: &[f64]) -> Option<ExactVertex> {
    let n = problem.num_cols();
    let (row_basic, col_basic) = derive_basis(problem, x);
    let act = problem.activities(x);
    let col_limits = problem.col_limits();
    let row_limits = problem.row_limits();

    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for j in (0..n).filter(|&j| !col_basic[j]) {
        let mut eq = vec![0.0; n];
        eq[j] = 1.0;
        a.push(eq);
        b.push(nearest_bound(col_limits[j], x[j]));
    }
    let mut dense = vec![vec![0.0; n]; problem.num_rows()];
    for (i, j, v) in problem.entries() {
        dense[i][j] = v;
    }
    for (i, eq) in dense.into_iter().enumerate() {
        if !row_basic[i] {
            a.push(eq);
            b.push(nearest_bound(row_limits[i], act[i]));
        }
    }
    if a.len() != n {
        return None;
    }

    let exact = solve_exact(&a, &b)?;
    let mut rows = vec![BigRational::zero(); problem.num_rows()];
    for (i, j, v) in problem.entries() {
        rows[i] += BigRational::from_float(v)? * &exact[j];
    }
    let mut objective = BigRational::from_float(problem.obj_constant())?;
    for (c, xj) in problem.objective_coefs().into_iter().zip(&exact) {
        objective += BigRational::from_float(c)? * xj;
    }
    let vertex = ExactVertex {
        columns: exact.iter().map(rounded).collect(),
        rows: rows.iter().map(rounded).collect(),
        objective: rounded(&objective),
    };

    let within = |(lb, ub): (f64, f64), v: f64| v >= lb - FEAS_TOL && v <= ub + FEAS_TOL;
    let feasible = col_limits
        .iter()
        .zip(&vertex.columns)
        .all(|(&l, &v)| within(l, v))
        && row_limits
            .iter()
            .zip(&vertex.rows)
            .all(|(&l, &v)| within(l, v));
    let before = problem.objective_of(x);
    let after = vertex.objective;
    let no_worse = match problem.direction() {
        Direction::Maximize => after >= before - FEAS_TOL * (1.0 + before.abs()),
        Direction::Minimize => after <= before + FEAS_TOL * (1.0 + before.abs()),
    };
    (feasible && no_worse).then_some(vertex)
}

fn conclude(run: &LpRun, term: &Terminal) -> (Status, ReturnCode) {
    let (status, code, line) = match run.outcome {
        LpOutcome::Optimal => (Status::Optimal, ReturnCode::Ok, "OPTIMAL SOLUTION FOUND"),
        LpOutcome::Infeasible => (
            Status::Infeasible,
            ReturnCode::Ok,
            "PROBLEM HAS NO PRIMAL FEASIBLE SOLUTION",
        ),
        LpOutcome::Unbounded => (
            Status::Unbounded,
            ReturnCode::Ok,
            "PROBLEM HAS UNBOUNDED SOLUTION",
        ),
        LpOutcome::IterationLimit => (
            Status::Undefined,
            ReturnCode::IterationLimit,
            "ITERATION LIMIT EXCEEDED; SEARCH TERMINATED",
        ),
    };
    term.on(line);
    (status, code)
}

fn record_vertex(problem: &mut Problem, status: Status, x: Vec<f64>) {
    let (row_basic, col_basic) = derive_basis(problem, &x);
    let solution = Solution {
        status,
        objective: problem.objective_of(&x),
        rows: problem.activities(&x),
        columns: x,
    };
    problem.store_lp(solution, row_basic, col_basic);
}

fn record_exact(problem: &mut Problem, vertex: ExactVertex) {
    let (row_basic, col_basic) = derive_basis(problem, &vertex.columns);
    let solution = Solution {
        status: Status::Optimal,
        objective: vertex.objective,
        rows: vertex.rows,
        columns: vertex.columns,
    };
    problem.store_lp(solution, row_basic, col_basic);
}

fn size_line(problem: &Problem) -> String {
    format!(
        "{}, {}, {}",
        plural(problem.num_rows(), "row"),
        plural(problem.num_cols(), "column"),
        plural(problem.num_nonzeros(), "non-zero")
    )
}

/// Solve the LP relaxation with the primal simplex method.
///
/// The outcome is stored as the problem's LP solution; the return code only
/// says whether the solver ran to completion.
pub fn simplex(problem: &mut Problem, options: &SimplexOptions) -> Result<ReturnCode, EngineError> {
    let _call = CallGuard::enter("simplex")?;
    let term = Terminal::new(options.msg_level);
    if options.presolve {
        term.all(format!("lpx_simplex: original LP has {}", size_line(problem)));
    }
    let run = solve_relaxation(
        problem,
        &problem.col_limits(),
        options.scaling,
        options.iteration_limit,
        &term,
    );
    let (status, code) = conclude(&run, &term);
    record_vertex(problem, status, run.x);
    Ok(code)
}

/// Solve with the simplex method, then recompute the optimal vertex directly
/// from its active constraints.
pub fn exact(problem: &mut Problem, options: &SimplexOptions) -> Result<ReturnCode, EngineError> {
    let _call = CallGuard::enter("exact")?;
    let term = Terminal::new(options.msg_level);
    term.all(format!("lpx_exact: {}", size_line(problem)));

    let run = solve_relaxation(
        problem,
        &problem.col_limits(),
        Scaling::Off,
        options.iteration_limit,
        &term,
    );
    let refined = if run.outcome == LpOutcome::Optimal {
        let _work = Block::alloc(problem.num_cols() * problem.num_cols() * size_of::<f64>());
        refine_vertex(problem, &run.x)
    } else {
        None
    };
    let (status, code) = conclude(&run, &term);
    match refined {
        Some(vertex) => record_exact(problem, vertex),
        None => record_vertex(problem, status, run.x),
    }
    Ok(code)
}

/// Solve with the interior-point calling convention. The result is stored as
/// the problem's interior solution and leaves the LP solution untouched.
pub fn interior(problem: &mut Problem, options: &InteriorOptions) -> Result<ReturnCode, EngineError> {
    let _call = CallGuard::enter("interior")?;
    let term = Terminal::new(options.msg_level);
    term.all(format!(
        "lpx_interior: original LP problem has {} and {}",
        plural(problem.num_rows(), "row"),
        plural(problem.num_cols(), "column")
    ));
    term.all("Guessing initial point...");
    term.all("Optimization begins...");

    let run = solve_relaxation(
        problem,
        &problem.col_limits(),
        Scaling::Auto,
        None,
        &Terminal::silent(),
    );
    let objective = problem.objective_of(&run.x);
    let status = match run.outcome {
        LpOutcome::Optimal => {
            term.on(format!("{:>3}: obj = {:>17}", run.pivots, sci(objective)));
            term.on("OPTIMAL SOLUTION FOUND");
            Status::Optimal
        }
        LpOutcome::Infeasible => {
            term.on("PROBLEM HAS NO FEASIBLE SOLUTION");
            Status::Infeasible
        }
        LpOutcome::Unbounded => {
            term.on("PROBLEM HAS UNBOUNDED SOLUTION");
            Status::Unbounded
        }
        LpOutcome::IterationLimit => Status::Undefined,
    };
    let solution = Solution {
        status,
        objective,
        rows: problem.activities(&run.x),
        columns: run.x,
    };
    problem.store_interior(solution);
    Ok(ReturnCode::Ok)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::env::testing::serial;
    use crate::problem::Bound;

    /// max 10x1 + 6x2 + 4x3 over three `<=` rows; optimum 733 1/3.
    pub(crate) fn sample() -> Problem {
        let mut lp = Problem::new();
        lp.set_name(Some("sample"));
        lp.set_direction(Direction::Maximize);
        lp.add_rows(3);
        lp.set_row_bounds(0, Bound::Upper(100.0)).unwrap();
        lp.set_row_bounds(1, Bound::Upper(600.0)).unwrap();
        lp.set_row_bounds(2, Bound::Upper(300.0)).unwrap();
        lp.add_cols(3);
        for (j, c) in [10.0, 6.0, 4.0].into_iter().enumerate() {
            lp.set_col_bounds(j, Bound::Lower(0.0)).unwrap();
            lp.set_obj_coef(j, c).unwrap();
        }
        lp.load_matrix(
            &[0, 0, 0, 1, 1, 1, 2, 2, 2],
            &[0, 1, 2, 0, 1, 2, 0, 1, 2],
            &[1.0, 1.0, 1.0, 10.0, 4.0, 5.0, 2.0, 2.0, 6.0],
        )
        .unwrap();
        lp
    }

    fn quiet() -> SimplexOptions {
        SimplexOptions {
            msg_level: crate::MsgLevel::Off,
            ..SimplexOptions::default()
        }
    }

    #[test]
    fn simplex_solves_sample() {
        let _serial = serial();
        let mut lp = sample();
        assert_eq!(simplex(&mut lp, &quiet()).unwrap(), ReturnCode::Ok);
        let sol = lp.lp_solution().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 2200.0 / 3.0).abs() < 1e-6);
        assert!((sol.columns[0] - 100.0 / 3.0).abs() < 1e-6);
        assert!((sol.columns[1] - 200.0 / 3.0).abs() < 1e-6);
        assert!(sol.columns[2].abs() < 1e-6);
    }

    #[test]
    fn exact_lands_on_the_same_vertex() {
        let _serial = serial();
        let mut lp = sample();
        exact(&mut lp, &quiet()).unwrap();
        let sol = lp.lp_solution().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 2200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn exact_values_are_correctly_rounded_thirds() {
        let _serial = serial();
        let mut lp = sample();
        assert_eq!(exact(&mut lp, &quiet()).unwrap(), ReturnCode::Ok);
        let sol = lp.lp_solution().unwrap();
        assert_eq!(sol.objective, 733.0 + 1.0 / 3.0);
        assert_eq!(sol.columns[0], 33.0 + 1.0 / 3.0);
        assert_eq!(sol.columns[1], 66.0 + 2.0 / 3.0);
        assert_eq!(sol.columns[2], 0.0);
        assert_eq!(sol.rows, vec![100.0, 600.0, 200.0]);
    }

    #[test]
    fn interior_keeps_lp_slot_untouched() {
        let _serial = serial();
        let mut lp = sample();
        let opts = InteriorOptions {
            msg_level: crate::MsgLevel::Off,
        };
        interior(&mut lp, &opts).unwrap();
        assert!(lp.lp_solution().is_none());
        let sol = lp.interior_solution().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - 2200.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn detects_infeasible_and_unbounded() {
        let _serial = serial();
        let mut lp = Problem::new();
        lp.add_rows(1);
        lp.add_cols(1);
        lp.set_col_bounds(0, Bound::Lower(0.0)).unwrap();
        lp.set_row_bounds(0, Bound::Upper(-1.0)).unwrap();
        lp.load_matrix(&[0], &[0], &[1.0]).unwrap();
        simplex(&mut lp, &quiet()).unwrap();
        assert_eq!(lp.lp_solution().unwrap().status, Status::Infeasible);

        lp.set_row_bounds(0, Bound::Lower(1.0)).unwrap();
        lp.set_direction(Direction::Maximize);
        lp.set_obj_coef(0, 1.0).unwrap();
        simplex(&mut lp, &quiet()).unwrap();
        assert_eq!(lp.lp_solution().unwrap().status, Status::Unbounded);
    }

    #[test]
    fn handles_free_and_double_bounded_columns() {
        let _serial = serial();
        // min x - y, x free, 1 <= y <= 4, x + y >= 2
        let mut lp = Problem::new();
        lp.add_rows(1);
        lp.set_row_bounds(0, Bound::Lower(2.0)).unwrap();
        lp.add_cols(2);
        lp.set_col_bounds(0, Bound::Free).unwrap();
        lp.set_col_bounds(1, Bound::Double(1.0, 4.0)).unwrap();
        lp.set_obj_coef(0, 1.0).unwrap();
        lp.set_obj_coef(1, -1.0).unwrap();
        lp.load_matrix(&[0, 0], &[0, 1], &[1.0, 1.0]).unwrap();
        simplex(&mut lp, &quiet()).unwrap();
        let sol = lp.lp_solution().unwrap();
        assert_eq!(sol.status, Status::Optimal);
        assert!((sol.objective - (-6.0)).abs() < 1e-9);
        assert!((sol.columns[0] - (-2.0)).abs() < 1e-9);
        assert!((sol.columns[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn iteration_limit_stops_early() {
        let _serial = serial();
        let mut lp = sample();
        let opts = SimplexOptions {
            iteration_limit: Some(0),
            ..quiet()
        };
        assert_eq!(simplex(&mut lp, &opts).unwrap(), ReturnCode::IterationLimit);
        assert_eq!(lp.lp_solution().unwrap().status, Status::Undefined);
    }

    #[test]
    fn structural_change_clears_solution() {
        let _serial = serial();
        let mut lp = sample();
        simplex(&mut lp, &quiet()).unwrap();
        assert!(lp.lp_solution().is_some());
        lp.add_cols(1);
        assert!(lp.lp_solution().is_none());
    }

    #[test]
    fn sample_basis_has_one_basic_variable_per_row() {
        let _serial = serial();
        let mut lp = sample();
        simplex(&mut lp, &quiet()).unwrap();
        let (rows, cols) = lp.basis();
        assert_eq!(rows, &[false, false, true]);
        assert_eq!(cols, &[true, true, false]);
    }
}
