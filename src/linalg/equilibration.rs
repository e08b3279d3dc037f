//! Ruiz and diagonal equilibration kernels.
//!
//! Ruiz scaling iteratively divides rows and columns by the square roots
//! of their infinity norms, converging toward a matrix whose row and
//! column norms are all one. The rectangular variant works through
//! [`ConstraintMatrix`] so it applies to both dense and sparse problems;
//! the symmetric variants return a single scaling vector for the KKT
//! matrix without mutating it.

use faer::Col;
use faer::sparse::SparseColMatRef;

use crate::linalg::matrix::ConstraintMatrix;
use crate::{E, I};

/// Norm deviation below which the Ruiz iteration stops early.
const BALANCE_SLACK: E = 1e-2;

fn sqrt_or_one(v: E) -> E {
    if v > 0.0 { v.sqrt() } else { 1.0 }
}

/// Ruiz-equilibrates `a` in place.
///
/// Returns `(row_scale, col_scale)` such that the scaled matrix satisfies
/// `a_out[i][j] = a_in[i][j] / (row_scale[i] * col_scale[j])`. Zero rows
/// and columns are left untouched with unit scales.
pub fn ruiz<M: ConstraintMatrix>(a: &mut M, max_iter: usize) -> (Col<E>, Col<E>) {
    let (nrows, ncols) = a.shape();
    let mut row_scale = Col::<E>::ones(nrows);
    let mut col_scale = Col::<E>::ones(ncols);

    for _ in 0..max_iter {
        let row_norms = a.row_max_abs();
        let mut step = Col::<E>::zeros(nrows);
        let mut deviation = 0.0f64;
        for i in 0..nrows {
            let f = sqrt_or_one(row_norms[i]);
            row_scale[i] *= f;
            step[i] = 1.0 / f;
            deviation = deviation.max((row_norms[i] - 1.0).abs());
        }
        a.scale_rows(step.as_ref());

        let col_norms = a.col_max_abs();
        let mut step = Col::<E>::zeros(ncols);
        for j in 0..ncols {
            let f = sqrt_or_one(col_norms[j]);
            col_scale[j] *= f;
            step[j] = 1.0 / f;
            deviation = deviation.max((col_norms[j] - 1.0).abs());
        }
        a.scale_cols(step.as_ref());

        if deviation < BALANCE_SLACK {
            break;
        }
    }

    (row_scale, col_scale)
}

/// Symmetric Ruiz equilibration of `j`.
///
/// Returns `d` such that `diag(d) * J * diag(d)` has row infinity norms
/// close to one. `j` itself is not modified.
pub fn ruiz_symmetric(j: SparseColMatRef<'_, I, E>, max_iter: usize) -> Col<E> {
    let n = j.ncols();
    let col_ptr = j.symbolic().col_ptr();
    let row_idx = j.symbolic().row_idx();
    let val = j.val();

    let mut d = Col::<E>::ones(n);

    for _ in 0..max_iter {
        let mut norms = Col::<E>::zeros(n);
        for col in 0..n {
            for k in col_ptr[col]..col_ptr[col + 1] {
                let row = row_idx[k];
                let v = (d[row] * val[k] * d[col]).abs();
                norms[row] = E::max(norms[row], v);
                norms[col] = E::max(norms[col], v);
            }
        }

        let mut deviation = 0.0f64;
        for i in 0..n {
            deviation = deviation.max((norms[i] - 1.0).abs());
            d[i] /= sqrt_or_one(norms[i]);
        }

        if deviation < BALANCE_SLACK {
            break;
        }
    }

    d
}

/// Jacobi scaling of a symmetric matrix: `d_i = 1 / sqrt(|J_ii|)`.
///
/// Rows with a zero (or missing) diagonal keep a unit scale.
pub fn diagonal_symmetric(j: SparseColMatRef<'_, I, E>) -> Col<E> {
    let n = j.ncols();
    let col_ptr = j.symbolic().col_ptr();
    let row_idx = j.symbolic().row_idx();
    let val = j.val();

    let mut d = Col::<E>::ones(n);
    for col in 0..n {
        for k in col_ptr[col]..col_ptr[col + 1] {
            if row_idx[k] == col {
                d[col] = 1.0 / sqrt_or_one(val[k].abs());
            }
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::{SparseColMat, Triplet};

    #[test]
    fn test_ruiz_balances_norms() {
        let mut a = SparseColMat::try_new_from_triplets(
            2,
            2,
            &[
                Triplet::new(0usize, 0usize, 1e6),
                Triplet::new(0, 1, 2.0),
                Triplet::new(1, 0, 3.0),
                Triplet::new(1, 1, 4e-6),
            ],
        )
        .unwrap();
        let original = a.clone();

        let (row_scale, col_scale) = ruiz(&mut a, 10);

        for i in 0..2 {
            assert!((a.row_max_abs()[i] - 1.0).abs() < 0.1);
            assert!((a.col_max_abs()[i] - 1.0).abs() < 0.1);
        }

        // The scales reproduce the original entries.
        let col_ptr = original.symbolic().col_ptr();
        let row_idx = original.symbolic().row_idx();
        for j in 0..2 {
            for k in col_ptr[j]..col_ptr[j + 1] {
                let i = row_idx[k];
                let rebuilt = a.val()[k] * row_scale[i] * col_scale[j];
                assert!((rebuilt - original.val()[k]).abs() <= 1e-12 * original.val()[k].abs());
            }
        }
    }

    #[test]
    fn test_ruiz_leaves_zero_column_alone() {
        let mut a = SparseColMat::try_new_from_triplets(
            2,
            2,
            &[Triplet::new(0usize, 1usize, 5.0), Triplet::new(1, 1, -1.0)],
        )
        .unwrap();
        let (_, col_scale) = ruiz(&mut a, 4);
        assert_eq!(col_scale[0], 1.0);
    }

    #[test]
    fn test_symmetric_scalings() {
        let j = SparseColMat::try_new_from_triplets(
            2,
            2,
            &[
                Triplet::new(0usize, 0usize, 100.0),
                Triplet::new(1, 0, 1.0),
                Triplet::new(0, 1, 1.0),
                Triplet::new(1, 1, 0.01),
            ],
        )
        .unwrap();

        let d = ruiz_symmetric(j.as_ref(), 10);
        // Scaled diagonal entries end up near one.
        assert!((d[0] * 100.0 * d[0] - 1.0).abs() < 0.2);
        assert!((d[1] * 0.01 * d[1] - 1.0).abs() < 0.2);

        let d = diagonal_symmetric(j.as_ref());
        assert!((d[0] - 0.1).abs() < 1e-15);
        assert!((d[1] - 10.0).abs() < 1e-15);
    }
}
