//! The problem object: rows, columns, constraint matrix, objective and the
//! solutions written back by the solvers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::env::Block;
use crate::error::EngineError;

const PROBLEM_BYTES: usize = 512;
const ROW_BYTES: usize = 96;
const COL_BYTES: usize = 112;
const ELEM_BYTES: usize = 48;

/// Bounds of a row activity or a column value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bound {
    /// `-inf < x < +inf`
    Free,
    /// `lb <= x < +inf`
    Lower(f64),
    /// `-inf < x <= ub`
    Upper(f64),
    /// `lb <= x <= ub`
    Double(f64, f64),
    /// `x = value`
    Fixed(f64),
}

impl Bound {
    /// Lower and upper limits, using infinities for missing sides.
    pub fn limits(&self) -> (f64, f64) {
        match *self {
            Bound::Free => (f64::NEG_INFINITY, f64::INFINITY),
            Bound::Lower(lb) => (lb, f64::INFINITY),
            Bound::Upper(ub) => (f64::NEG_INFINITY, ub),
            Bound::Double(lb, ub) => (lb, ub),
            Bound::Fixed(v) => (v, v),
        }
    }

    /// Inverse of [`Bound::limits`].
    pub fn from_limits(lb: f64, ub: f64) -> Self {
        match (lb.is_finite(), ub.is_finite()) {
            (false, false) => Bound::Free,
            (true, false) => Bound::Lower(lb),
            (false, true) => Bound::Upper(ub),
            (true, true) if lb == ub => Bound::Fixed(lb),
            (true, true) => Bound::Double(lb, ub),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        let finite_or_none = |v: f64| !v.is_nan() && !v.is_infinite();
        let ok = match *self {
            Bound::Free => true,
            Bound::Lower(v) | Bound::Upper(v) | Bound::Fixed(v) => finite_or_none(v),
            Bound::Double(lb, ub) => finite_or_none(lb) && finite_or_none(ub) && lb <= ub,
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::InvalidInput(format!("malformed bounds {self:?}")))
        }
    }
}

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Minimize the objective.
    #[default]
    Minimize,
    /// Maximize the objective.
    Maximize,
}

/// Column kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColKind {
    /// Continuous variable.
    #[default]
    Continuous,
    /// Integer variable.
    Integer,
    /// Integer variable restricted to `[0, 1]`. Setting this kind also sets
    /// the column bounds.
    Binary,
}

/// Solution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Proven optimal.
    Optimal,
    /// Feasible, optimality not proven (search stopped early).
    Feasible,
    /// No feasible solution exists.
    Infeasible,
    /// The objective is unbounded.
    Unbounded,
    /// Nothing is known about the solution.
    Undefined,
    /// The relaxation is feasible but no integer solution exists.
    NoFeasibleInteger,
}

/// Return code of a solver entry point. Anything other than [`ReturnCode::Ok`]
/// means the solver stopped before reaching a conclusion on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnCode {
    /// The solver ran to completion.
    Ok,
    /// The pivot limit was reached.
    IterationLimit,
    /// The branch-and-bound node limit was reached.
    NodeLimit,
    /// The search was stopped by the application.
    Stopped,
    /// Branch-and-bound without presolve needs an optimal LP solution first.
    NoRootBasis,
    /// The basis matrix is singular.
    Singular,
}

/// A primal solution written back by a solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    /// Solution status.
    pub status: Status,
    /// Objective value, including the constant term.
    pub objective: f64,
    /// Column values, by column index.
    pub columns: Vec<f64>,
    /// Row activities, by row index.
    pub rows: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Row {
    name: Option<String>,
    bound: Bound,
}

#[derive(Debug, Clone)]
struct Col {
    name: Option<String>,
    bound: Bound,
    kind: ColKind,
    obj: f64,
}

/// One linear (or mixed-integer) program.
///
/// Indices are 0-based. New rows are free; new columns are fixed at zero and
/// continuous, so callers set bounds explicitly.
#[derive(Debug)]
pub struct Problem {
    name: Option<String>,
    direction: Direction,
    obj_constant: f64,
    rows: Vec<Row>,
    cols: Vec<Col>,
    matrix: BTreeMap<(usize, usize), f64>,
    lp: Option<Solution>,
    interior: Option<Solution>,
    mip: Option<Solution>,
    row_basic: Vec<bool>,
    col_basic: Vec<bool>,
    factored: bool,
    _header: Block,
    row_mem: Block,
    col_mem: Block,
    matrix_mem: Block,
}

impl Default for Problem {
    fn default() -> Self {
        Self::new()
    }
}

impl Problem {
    /// Create an empty problem.
    pub fn new() -> Self {
        Self {
            name: None,
            direction: Direction::Minimize,
            obj_constant: 0.0,
            rows: Vec::new(),
            cols: Vec::new(),
            matrix: BTreeMap::new(),
            lp: None,
            interior: None,
            mip: None,
            row_basic: Vec::new(),
            col_basic: Vec::new(),
            factored: false,
            _header: Block::alloc(PROBLEM_BYTES),
            row_mem: Block::alloc(0),
            col_mem: Block::alloc(0),
            matrix_mem: Block::alloc(0),
        }
    }

    /// Problem name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set or clear the problem name.
    pub fn set_name(&mut self, name: Option<&str>) {
        self.name = name.map(str::to_string);
    }

    /// Optimization direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Set the optimization direction.
    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Append `count` free rows; returns the index of the first new row.
    pub fn add_rows(&mut self, count: usize) -> usize {
        let first = self.rows.len();
        self.rows.extend((0..count).map(|_| Row {
            name: None,
            bound: Bound::Free,
        }));
        self.row_basic.extend(std::iter::repeat_n(true, count));
        self.row_mem.resize(self.rows.len() * ROW_BYTES);
        self.invalidate();
        first
    }

    /// Append `count` continuous columns fixed at zero; returns the index of
    /// the first new column.
    pub fn add_cols(&mut self, count: usize) -> usize {
        let first = self.cols.len();
        self.cols.extend((0..count).map(|_| Col {
            name: None,
            bound: Bound::Fixed(0.0),
            kind: ColKind::Continuous,
            obj: 0.0,
        }));
        self.col_basic.extend(std::iter::repeat_n(false, count));
        self.col_mem.resize(self.cols.len() * COL_BYTES);
        self.invalidate();
        first
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    /// Number of stored constraint coefficients.
    pub fn num_nonzeros(&self) -> usize {
        self.matrix.len()
    }

    /// Number of integer (including binary) columns.
    pub fn num_int(&self) -> usize {
        self.cols.iter().filter(|c| c.kind != ColKind::Continuous).count()
    }

    /// Number of integer columns whose bounds are exactly `[0, 1]`.
    pub fn num_bin(&self) -> usize {
        self.cols
            .iter()
            .filter(|c| c.kind != ColKind::Continuous && c.bound.limits() == (0.0, 1.0))
            .count()
    }

    fn check_row(&self, i: usize) -> Result<(), EngineError> {
        if i < self.rows.len() {
            Ok(())
        } else {
            Err(EngineError::IndexOutOfRange {
                kind: "row",
                index: i,
                len: self.rows.len(),
            })
        }
    }

    fn check_col(&self, j: usize) -> Result<(), EngineError> {
        if j < self.cols.len() {
            Ok(())
        } else {
            Err(EngineError::IndexOutOfRange {
                kind: "column",
                index: j,
                len: self.cols.len(),
            })
        }
    }

    /// Name of row `i`.
    pub fn row_name(&self, i: usize) -> Result<Option<&str>, EngineError> {
        self.check_row(i)?;
        Ok(self.rows[i].name.as_deref())
    }

    /// Set or clear the name of row `i`.
    pub fn set_row_name(&mut self, i: usize, name: Option<&str>) -> Result<(), EngineError> {
        self.check_row(i)?;
        self.rows[i].name = name.map(str::to_string);
        Ok(())
    }

    /// Name of column `j`.
    pub fn col_name(&self, j: usize) -> Result<Option<&str>, EngineError> {
        self.check_col(j)?;
        Ok(self.cols[j].name.as_deref())
    }

    /// Set or clear the name of column `j`.
    pub fn set_col_name(&mut self, j: usize, name: Option<&str>) -> Result<(), EngineError> {
        self.check_col(j)?;
        self.cols[j].name = name.map(str::to_string);
        Ok(())
    }

    /// Index of the first column called `name`.
    pub fn find_col(&self, name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c.name.as_deref() == Some(name))
    }

    /// Bounds of row `i`.
    pub fn row_bounds(&self, i: usize) -> Result<Bound, EngineError> {
        self.check_row(i)?;
        Ok(self.rows[i].bound)
    }

    /// Set the bounds of row `i`.
    pub fn set_row_bounds(&mut self, i: usize, bound: Bound) -> Result<(), EngineError> {
        self.check_row(i)?;
        bound.validate()?;
        self.rows[i].bound = bound;
        Ok(())
    }

    /// Bounds of column `j`.
    pub fn col_bounds(&self, j: usize) -> Result<Bound, EngineError> {
        self.check_col(j)?;
        Ok(self.cols[j].bound)
    }

    /// Set the bounds of column `j`.
    pub fn set_col_bounds(&mut self, j: usize, bound: Bound) -> Result<(), EngineError> {
        self.check_col(j)?;
        bound.validate()?;
        self.cols[j].bound = bound;
        Ok(())
    }

    /// Kind of column `j`.
    pub fn col_kind(&self, j: usize) -> Result<ColKind, EngineError> {
        self.check_col(j)?;
        Ok(self.cols[j].kind)
    }

    /// Set the kind of column `j`.
    pub fn set_col_kind(&mut self, j: usize, kind: ColKind) -> Result<(), EngineError> {
        self.check_col(j)?;
        if kind == ColKind::Binary {
            self.cols[j].bound = Bound::Double(0.0, 1.0);
        }
        self.cols[j].kind = kind;
        Ok(())
    }

    /// Objective coefficient of column `j`.
    pub fn obj_coef(&self, j: usize) -> Result<f64, EngineError> {
        self.check_col(j)?;
        Ok(self.cols[j].obj)
    }

    /// Set the objective coefficient of column `j`.
    pub fn set_obj_coef(&mut self, j: usize, coef: f64) -> Result<(), EngineError> {
        self.check_col(j)?;
        if !coef.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "objective coefficient {coef} is not finite"
            )));
        }
        self.cols[j].obj = coef;
        Ok(())
    }

    /// Constant term of the objective.
    pub fn obj_constant(&self) -> f64 {
        self.obj_constant
    }

    /// Set the constant term of the objective.
    pub fn set_obj_constant(&mut self, value: f64) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "objective constant {value} is not finite"
            )));
        }
        self.obj_constant = value;
        Ok(())
    }

    /// Replace the whole constraint matrix with the given triplets.
    ///
    /// Entries that share a position are summed; entries whose sum is zero
    /// are not stored. Returns the number of stored coefficients. On error
    /// the previous matrix is kept.
    pub fn load_matrix(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        values: &[f64],
    ) -> Result<usize, EngineError> {
        if rows.len() != cols.len() || rows.len() != values.len() {
            return Err(EngineError::InvalidInput(format!(
                "triplet arrays differ in length ({}, {}, {})",
                rows.len(),
                cols.len(),
                values.len()
            )));
        }
        let mut matrix = BTreeMap::new();
        for ((&i, &j), &v) in rows.iter().zip(cols).zip(values) {
            self.check_row(i)?;
            self.check_col(j)?;
            if !v.is_finite() {
                return Err(EngineError::InvalidInput(format!(
                    "coefficient {v} at ({i}, {j}) is not finite"
                )));
            }
            *matrix.entry((i, j)).or_insert(0.0) += v;
        }
        matrix.retain(|_, v| *v != 0.0);

        self.matrix = matrix;
        self.matrix_mem.resize(self.matrix.len() * ELEM_BYTES);
        self.invalidate();
        Ok(self.matrix.len())
    }

    /// Stored coefficient at `(i, j)`, zero if absent.
    pub fn coef(&self, i: usize, j: usize) -> f64 {
        self.matrix.get(&(i, j)).copied().unwrap_or(0.0)
    }

    /// All stored coefficients in row-major order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.matrix.iter().map(|(&(i, j), &v)| (i, j, v))
    }

    /// Last simplex / exact-simplex solution.
    pub fn lp_solution(&self) -> Option<&Solution> {
        self.lp.as_ref()
    }

    /// Last interior-point solution.
    pub fn interior_solution(&self) -> Option<&Solution> {
        self.interior.as_ref()
    }

    /// Last branch-and-bound solution.
    pub fn mip_solution(&self) -> Option<&Solution> {
        self.mip.as_ref()
    }

    /// Whether a factorization of the current basis exists.
    pub fn basis_factored(&self) -> bool {
        self.factored
    }

    /// Drop everything and return to the state of [`Problem::new`].
    pub fn erase(&mut self) {
        *self = Problem::new();
    }

    fn invalidate(&mut self) {
        self.lp = None;
        self.interior = None;
        self.mip = None;
        self.factored = false;
    }

    pub(crate) fn objective_of(&self, x: &[f64]) -> f64 {
        self.cols
            .iter()
            .zip(x)
            .fold(self.obj_constant, |acc, (c, v)| acc + c.obj * v)
    }

    pub(crate) fn activities(&self, x: &[f64]) -> Vec<f64> {
        let mut act = vec![0.0; self.rows.len()];
        for (&(i, j), &v) in &self.matrix {
            act[i] += v * x[j];
        }
        act
    }

    pub(crate) fn col_limits(&self) -> Vec<(f64, f64)> {
        self.cols.iter().map(|c| c.bound.limits()).collect()
    }

    pub(crate) fn row_limits(&self) -> Vec<(f64, f64)> {
        self.rows.iter().map(|r| r.bound.limits()).collect()
    }

    pub(crate) fn objective_coefs(&self) -> Vec<f64> {
        self.cols.iter().map(|c| c.obj).collect()
    }

    pub(crate) fn integer_cols(&self) -> Vec<usize> {
        self.cols
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind != ColKind::Continuous)
            .map(|(j, _)| j)
            .collect()
    }

    pub(crate) fn basis(&self) -> (&[bool], &[bool]) {
        (&self.row_basic, &self.col_basic)
    }

    pub(crate) fn store_lp(&mut self, solution: Solution, row_basic: Vec<bool>, col_basic: Vec<bool>) {
        self.lp = Some(solution);
        self.row_basic = row_basic;
        self.col_basic = col_basic;
        self.factored = false;
    }

    pub(crate) fn store_interior(&mut self, solution: Solution) {
        self.interior = Some(solution);
    }

    pub(crate) fn store_mip(&mut self, solution: Solution) {
        self.mip = Some(solution);
    }

    pub(crate) fn set_factored(&mut self, factored: bool) {
        self.factored = factored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_triplets_accumulate() {
        let mut lp = Problem::new();
        lp.add_rows(2);
        lp.add_cols(2);
        let nz = lp
            .load_matrix(&[0, 1, 0, 0], &[0, 1, 0, 1], &[1.0, 2.0, 3.0, 0.0])
            .unwrap();
        assert_eq!(nz, 2);
        assert_eq!(lp.coef(0, 0), 4.0);
        assert_eq!(lp.coef(1, 1), 2.0);
        assert_eq!(lp.coef(0, 1), 0.0);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut lp = Problem::new();
        lp.add_rows(1);
        lp.add_cols(1);
        assert!(matches!(
            lp.set_col_bounds(3, Bound::Lower(0.0)),
            Err(EngineError::IndexOutOfRange { kind: "column", index: 3, len: 1 })
        ));
        assert!(matches!(
            lp.load_matrix(&[1], &[0], &[1.0]),
            Err(EngineError::IndexOutOfRange { kind: "row", .. })
        ));
        assert_eq!(lp.num_nonzeros(), 0);
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        let mut lp = Problem::new();
        lp.add_rows(1);
        assert!(lp.set_row_bounds(0, Bound::Double(2.0, 1.0)).is_err());
        assert!(lp.set_row_bounds(0, Bound::Lower(f64::NAN)).is_err());
        assert_eq!(lp.row_bounds(0).unwrap(), Bound::Free);
    }

    #[test]
    fn binary_kind_sets_unit_bounds() {
        let mut lp = Problem::new();
        lp.add_cols(2);
        lp.set_col_kind(1, ColKind::Binary).unwrap();
        assert_eq!(lp.col_bounds(1).unwrap(), Bound::Double(0.0, 1.0));
        assert_eq!(lp.num_int(), 1);
        assert_eq!(lp.num_bin(), 1);
    }

    #[test]
    fn limits_round_trip_through_bounds() {
        for b in [
            Bound::Free,
            Bound::Lower(1.0),
            Bound::Upper(-2.0),
            Bound::Double(0.0, 4.0),
            Bound::Fixed(3.0),
        ] {
            let (lb, ub) = b.limits();
            assert_eq!(Bound::from_limits(lb, ub), b);
        }
    }
}
