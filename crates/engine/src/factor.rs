//! Basis factorization and dense linear solves.

use num_rational::BigRational;
use num_traits::Zero;

use crate::env::{Block, CallGuard};
use crate::error::EngineError;
use crate::problem::{Problem, ReturnCode};

const SINGULAR_TOL: f64 = 1e-10;

/// Gaussian elimination with partial pivoting; `false` if the matrix is
/// numerically singular.
fn nonsingular(mut a: Vec<Vec<f64>>) -> bool {
    let n = a.len();
    let scale = a
        .iter()
        .flatten()
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);

    for k in 0..n {
        let Some(p) = (k..n).max_by(|&i, &j| a[i][k].abs().total_cmp(&a[j][k].abs())) else {
            return false;
        };
        if a[p][k].abs() <= SINGULAR_TOL * scale {
            return false;
        }
        a.swap(k, p);

        let (top, bottom) = a.split_at_mut(k + 1);
        let pivot = &top[k];
        for row in bottom.iter_mut() {
            let f = row[k] / pivot[k];
            for j in k..n {
                row[j] -= f * pivot[j];
            }
        }
    }
    true
}

/// Solve `a x = b` in rational arithmetic, taking every input at its exact
/// binary value. `None` if `a` is singular or holds a non-finite value.
pub(crate) fn solve_exact(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<BigRational>> {
    let n = a.len();
    let mut m = a
        .iter()
        .zip(b)
        .map(|(row, &bi)| {
            row.iter()
                .chain(std::iter::once(&bi))
                .map(|&v| BigRational::from_float(v))
                .collect::<Option<Vec<_>>>()
        })
        .collect::<Option<Vec<_>>>()?;

    for k in 0..n {
        let p = (k..n).find(|&i| !m[i][k].is_zero())?;
        m.swap(k, p);

        let (top, bottom) = m.split_at_mut(k + 1);
        let pivot = &top[k];
        for row in bottom.iter_mut().filter(|row| !row[k].is_zero()) {
            let f = &row[k] / &pivot[k];
            for j in k..=n {
                let d = &f * &pivot[j];
                row[j] -= d;
            }
        }
    }

    let mut x = vec![BigRational::zero(); n];
    for i in (0..n).rev() {
        let mut acc = m[i][n].clone();
        for j in i + 1..n {
            acc -= &m[i][j] * &x[j];
        }
        x[i] = acc / &m[i][i];
    }
    Some(x)
}

/// Factorize the basis matrix described by the problem's basis header.
///
/// A fresh problem has every row basic, so its basis is the identity. On
/// success the problem reports [`Problem::basis_factored`]; a header that
/// does not name exactly one basic variable per row, or whose columns are
/// dependent, yields [`ReturnCode::Singular`].
pub fn factorize(problem: &mut Problem) -> Result<ReturnCode, EngineError> {
    let _call = CallGuard::enter("factorize")?;
    let m = problem.num_rows();

    let columns: Vec<Vec<f64>> = {
        let (row_basic, col_basic) = problem.basis();
        let units = row_basic.iter().enumerate().filter(|(_, b)| **b).map(|(i, _)| {
            let mut e = vec![0.0; m];
            e[i] = 1.0;
            e
        });
        let structurals = col_basic
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(j, _)| (0..m).map(|i| problem.coef(i, j)).collect::<Vec<f64>>());
        units.chain(structurals).collect()
    };
    if columns.len() != m {
        problem.set_factored(false);
        return Ok(ReturnCode::Singular);
    }

    let _work = Block::alloc(m * m * size_of::<f64>());
    let mut basis = vec![vec![0.0; m]; m];
    for (k, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            basis[i][k] = v;
        }
    }
    let factored = nonsingular(basis);
    problem.set_factored(factored);
    Ok(if factored {
        ReturnCode::Ok
    } else {
        ReturnCode::Singular
    })
}
