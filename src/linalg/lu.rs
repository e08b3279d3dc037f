//! Dense LU factorization with complete pivoting.
//!
//! At each elimination step the pivot is the entry of largest magnitude in
//! the trailing block, so the unit-lower-triangular factor satisfies
//! `|l_ij| <= 1` and the growth factor stays small. The factorization
//! tracks the inverse row and column permutations in place and inverts
//! them on exit. A zero pivot means the trailing block is exactly zero and
//! surfaces as [`LinearSolverError::SingularMatrix`].

use faer::{Col, ColRef, Mat, MatRef};

use crate::linalg::solver::LinearSolverError;
use crate::{E, I};

/// Inverts a permutation given as `p[old] = new` (or vice versa).
///
/// Applying this twice returns the input exactly.
pub fn invert_permutation(p: &[I]) -> Vec<I> {
    let mut inv = vec![0; p.len()];
    for (i, &pi) in p.iter().enumerate() {
        inv[pi] = i;
    }
    inv
}

/// Factorizes `a` in place as `P a Q^T = L U`.
///
/// On success the strict lower trapezoid of `a` holds `L` (unit diagonal
/// implied) and the upper triangle holds `U`. Returns the forward
/// permutations `(p, q)`: `p[i]` is the pivoted position of original row
/// `i`, and likewise `q` for columns.
pub fn factorize_full_pivot(a: &mut Mat<E>) -> Result<(Vec<I>, Vec<I>), LinearSolverError> {
    let nrows = a.nrows();
    let ncols = a.ncols();
    let rank_bound = Ord::min(nrows, ncols);

    let mut p_inv: Vec<I> = (0..nrows).collect();
    let mut q_inv: Vec<I> = (0..ncols).collect();

    for k in 0..rank_bound {
        // Pivot search over the trailing (nrows - k) x (ncols - k) block.
        let mut i_piv = k;
        let mut j_piv = k;
        let mut max_abs = 0.0f64;
        for j in k..ncols {
            for i in k..nrows {
                let v = a[(i, j)].abs();
                if v > max_abs {
                    max_abs = v;
                    i_piv = i;
                    j_piv = j;
                }
            }
        }

        if i_piv != k {
            for j in 0..ncols {
                let tmp = a[(k, j)];
                a[(k, j)] = a[(i_piv, j)];
                a[(i_piv, j)] = tmp;
            }
            p_inv.swap(k, i_piv);
        }
        if j_piv != k {
            for i in 0..nrows {
                let tmp = a[(i, k)];
                a[(i, k)] = a[(i, j_piv)];
                a[(i, j_piv)] = tmp;
            }
            q_inv.swap(k, j_piv);
        }

        let pivot = a[(k, k)];
        if pivot == 0.0 {
            return Err(LinearSolverError::SingularMatrix { step: k });
        }

        for i in (k + 1)..nrows {
            a[(i, k)] /= pivot;
        }
        for j in (k + 1)..ncols {
            let u_kj = a[(k, j)];
            if u_kj != 0.0 {
                for i in (k + 1)..nrows {
                    let l_ik = a[(i, k)];
                    a[(i, j)] -= l_ik * u_kj;
                }
            }
        }
    }

    Ok((invert_permutation(&p_inv), invert_permutation(&q_inv)))
}

/// Owned LU factorization with complete pivoting.
pub struct FullPivLu {
    lu: Mat<E>,
    row_perm: Vec<I>,
    col_perm: Vec<I>,
}

impl FullPivLu {
    pub fn new(a: MatRef<'_, E>) -> Result<Self, LinearSolverError> {
        let mut lu = a.to_owned();
        let (row_perm, col_perm) = factorize_full_pivot(&mut lu)?;
        Ok(Self {
            lu,
            row_perm,
            col_perm,
        })
    }

    /// Packed `L`/`U` factors.
    pub fn factors(&self) -> MatRef<'_, E> {
        self.lu.as_ref()
    }

    /// Forward row permutation: `row_perm()[i]` is where original row `i`
    /// was pivoted to.
    pub fn row_perm(&self) -> &[I] {
        &self.row_perm
    }

    /// Forward column permutation.
    pub fn col_perm(&self) -> &[I] {
        &self.col_perm
    }

    /// Solves `a x = b` for square `a`.
    pub fn solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, LinearSolverError> {
        let n = self.lu.nrows();
        if self.lu.ncols() != n || b.nrows() != n {
            return Err(LinearSolverError::DimensionMismatch);
        }

        // P b, then unit-lower forward substitution.
        let mut w = Col::<E>::zeros(n);
        for i in 0..n {
            w[self.row_perm[i]] = b[i];
        }
        for i in 0..n {
            let mut acc = w[i];
            for j in 0..i {
                acc -= self.lu[(i, j)] * w[j];
            }
            w[i] = acc;
        }

        // Upper back substitution, then undo the column permutation.
        for i in (0..n).rev() {
            let mut acc = w[i];
            for j in (i + 1)..n {
                acc -= self.lu[(i, j)] * w[j];
            }
            w[i] = acc / self.lu[(i, i)];
        }

        let mut x = Col::<E>::zeros(n);
        for j in 0..n {
            x[j] = w[self.col_perm[j]];
        }
        Ok(x)
    }
}
