//! Storage-kind abstraction over the constraint matrix.
//!
//! The interior-point driver, the residual updates, and the outer
//! equilibration only touch the constraint matrix through matrix-vector
//! products, row/column norms, and diagonal scalings. This trait captures
//! that surface so the same driver monomorphizes over dense
//! ([`faer::Mat`]) and sparse ([`faer::sparse::SparseColMat`]) problems.

use faer::sparse::SparseColMat;
use faer::{Col, ColRef, Mat};

use crate::{E, I};

pub trait ConstraintMatrix: Clone {
    /// `(rows, cols)` of the matrix.
    fn shape(&self) -> (usize, usize);

    /// `A x`.
    fn mul_vec(&self, x: ColRef<'_, E>) -> Col<E>;

    /// `A^T y`.
    fn mul_transpose_vec(&self, y: ColRef<'_, E>) -> Col<E>;

    /// Infinity norm of each row.
    fn row_max_abs(&self) -> Col<E>;

    /// Infinity norm of each column.
    fn col_max_abs(&self) -> Col<E>;

    /// Multiplies row `i` by `s[i]`.
    fn scale_rows(&mut self, s: ColRef<'_, E>);

    /// Multiplies column `j` by `s[j]`.
    fn scale_cols(&mut self, s: ColRef<'_, E>);

    /// Power-iteration estimate of the spectral norm, using `basis_size`
    /// applications of `A^T A`.
    fn two_norm_estimate(&self, basis_size: usize) -> E {
        let (nrows, ncols) = self.shape();
        if nrows == 0 || ncols == 0 {
            return 0.0;
        }

        let scale = 1.0 / (ncols as E).sqrt();
        let mut v = scale * Col::<E>::ones(ncols);
        let mut estimate = 0.0;

        for _ in 0..basis_size.max(1) {
            let u = self.mul_vec(v.as_ref());
            let w = self.mul_transpose_vec(u.as_ref());
            let norm = w.norm_l2();
            if norm == 0.0 {
                return 0.0;
            }
            // With ||v|| = 1, w = A^T A v has norm close to sigma_max^2.
            estimate = norm.sqrt();
            v = (1.0 / norm) * w;
        }

        estimate
    }
}

impl ConstraintMatrix for Mat<E> {
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn mul_vec(&self, x: ColRef<'_, E>) -> Col<E> {
        self.as_ref() * x
    }

    fn mul_transpose_vec(&self, y: ColRef<'_, E>) -> Col<E> {
        self.as_ref().transpose() * y
    }

    fn row_max_abs(&self) -> Col<E> {
        let mut out = Col::<E>::zeros(self.nrows());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                out[i] = E::max(out[i], self[(i, j)].abs());
            }
        }
        out
    }

    fn col_max_abs(&self) -> Col<E> {
        let mut out = Col::<E>::zeros(self.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                out[j] = E::max(out[j], self[(i, j)].abs());
            }
        }
        out
    }

    fn scale_rows(&mut self, s: ColRef<'_, E>) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] *= s[i];
            }
        }
    }

    fn scale_cols(&mut self, s: ColRef<'_, E>) {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                self[(i, j)] *= s[j];
            }
        }
    }
}

impl ConstraintMatrix for SparseColMat<I, E> {
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn mul_vec(&self, x: ColRef<'_, E>) -> Col<E> {
        let mut out = Col::<E>::zeros(self.nrows());
        let col_ptr = self.symbolic().col_ptr();
        let row_idx = self.symbolic().row_idx();
        let val = self.val();

        for j in 0..self.ncols() {
            for k in col_ptr[j]..col_ptr[j + 1] {
                out[row_idx[k]] += val[k] * x[j];
            }
        }
        out
    }

    fn mul_transpose_vec(&self, y: ColRef<'_, E>) -> Col<E> {
        let mut out = Col::<E>::zeros(self.ncols());
        let col_ptr = self.symbolic().col_ptr();
        let row_idx = self.symbolic().row_idx();
        let val = self.val();

        for j in 0..self.ncols() {
            let mut acc = 0.0;
            for k in col_ptr[j]..col_ptr[j + 1] {
                acc += val[k] * y[row_idx[k]];
            }
            out[j] = acc;
        }
        out
    }

    fn row_max_abs(&self) -> Col<E> {
        let mut out = Col::<E>::zeros(self.nrows());
        let row_idx = self.symbolic().row_idx();
        let val = self.val();

        for k in 0..val.len() {
            out[row_idx[k]] = E::max(out[row_idx[k]], val[k].abs());
        }
        out
    }

    fn col_max_abs(&self) -> Col<E> {
        let mut out = Col::<E>::zeros(self.ncols());
        let col_ptr = self.symbolic().col_ptr();
        let val = self.val();

        for j in 0..self.ncols() {
            for k in col_ptr[j]..col_ptr[j + 1] {
                out[j] = E::max(out[j], val[k].abs());
            }
        }
        out
    }

    fn scale_rows(&mut self, s: ColRef<'_, E>) {
        let row_idx = self.symbolic().row_idx().to_vec();
        let val = self.val_mut();

        for k in 0..val.len() {
            val[k] *= s[row_idx[k]];
        }
    }

    fn scale_cols(&mut self, s: ColRef<'_, E>) {
        let col_ptr = self.symbolic().col_ptr().to_vec();
        let ncols = self.ncols();
        let val = self.val_mut();

        for j in 0..ncols {
            for k in col_ptr[j]..col_ptr[j + 1] {
                val[k] *= s[j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    fn sample_sparse() -> SparseColMat<I, E> {
        SparseColMat::try_new_from_triplets(
            2,
            3,
            &[
                Triplet::new(0, 0, 1.0),
                Triplet::new(1, 0, -4.0),
                Triplet::new(0, 2, 2.0),
                Triplet::new(1, 2, 0.5),
            ],
        )
        .unwrap()
    }

    fn sample_dense() -> Mat<E> {
        Mat::from_fn(2, 3, |i, j| [[1.0, 0.0, 2.0], [-4.0, 0.0, 0.5]][i][j])
    }

    #[test]
    fn test_matvec_agreement() {
        let sp = sample_sparse();
        let de = sample_dense();
        let x = Col::from_fn(3, |i| [1.0, 2.0, 3.0][i]);
        let y = Col::from_fn(2, |i| [1.0, -1.0][i]);

        assert!((sp.mul_vec(x.as_ref()) - de.mul_vec(x.as_ref())).norm_l2() < 1e-14);
        assert!(
            (sp.mul_transpose_vec(y.as_ref()) - de.mul_transpose_vec(y.as_ref())).norm_l2()
                < 1e-14
        );
    }

    #[test]
    fn test_norms_and_scaling() {
        let mut sp = sample_sparse();
        let rows = sp.row_max_abs();
        assert_eq!(rows[0], 2.0);
        assert_eq!(rows[1], 4.0);
        let cols = sp.col_max_abs();
        assert_eq!(cols[0], 4.0);
        assert_eq!(cols[1], 0.0);
        assert_eq!(cols[2], 2.0);

        let s = Col::from_fn(2, |i| [0.5, 0.25][i]);
        sp.scale_rows(s.as_ref());
        assert_eq!(sp.row_max_abs()[1], 1.0);
    }

    #[test]
    fn test_two_norm_estimate_identity() {
        let eye = Mat::from_fn(4, 4, |i, j| if i == j { 3.0 } else { 0.0 });
        let est = eye.two_norm_estimate(8);
        assert!((est - 3.0).abs() < 1e-8);
    }
}
