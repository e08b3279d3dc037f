//! Assembly and expansion of the linearized KKT systems.
//!
//! Linearizing the perturbed optimality conditions at the current iterate
//! gives
//!
//! ```text
//! gamma^2 dx + A^T dy - dz = -r_c
//! A dx - delta^2 dy        = -r_b
//! z o dx + x o dz          = -r_mu
//! ```
//!
//! which is factored in one of three symmetric forms. The full form keeps
//! all three blocks; the augmented form eliminates `dz` analytically; the
//! normal form eliminates `dx` as well, leaving the positive-definite
//! Schur complement `A W A^T + delta^2 I` with `W = (Z/X + gamma^2 I)^-1`.
//! The right-hand-side builders and direction expanders are shared between
//! the sparse and dense paths through [`ConstraintMatrix`]; the sparse
//! assemblers keep a fixed pattern so that only values change between
//! iterations.

use faer::sparse::{SparseColMat, SymbolicSparseColMat, Triplet};
use faer::{Col, ColRef, Mat};

use crate::linalg::matrix::ConstraintMatrix;
use crate::linalg::vector_ops::{cwise_multiply, cwise_quotient};
use crate::lp::mpc::{Direction, KktForm};
use crate::{E, I};

/// `w = (z/x + gamma^2)^-1`, the diagonal eliminated scaling.
fn elimination_weights(x: ColRef<'_, E>, z: ColRef<'_, E>, gamma2: E) -> Col<E> {
    Col::from_fn(x.nrows(), |j| 1.0 / (z[j] / x[j] + gamma2))
}

/// A sparse KKT matrix with a fixed pattern.
///
/// `diag_pos[i]` indexes the value slot of diagonal entry `(i, i)`, for
/// in-place updates of the iterate-dependent pivots and the temporary
/// regularization.
pub(super) struct SparseAssembly {
    pub(super) mat: SparseColMat<I, E>,
    pub(super) diag_pos: Vec<usize>,
}

/// Assembles the augmented form
/// `[ Z/X + gamma^2 I , A^T ; A , -delta^2 I ]`
/// with unit scaling (`x = z = 1`); call
/// [`update_augmented`] before each factorization.
pub(super) fn assemble_augmented(
    a: &SparseColMat<I, E>,
    gamma2: E,
    delta2: E,
) -> SparseAssembly {
    let n_cons = a.nrows();
    let n_vars = a.ncols();
    let size = n_vars + n_cons;
    let nnz = a.compute_nnz();

    let mut col_ptrs = Vec::with_capacity(size + 1);
    let mut row_indices = Vec::with_capacity(size + 2 * nnz);
    let mut values = Vec::with_capacity(size + 2 * nnz);
    let mut diag_pos = Vec::with_capacity(size);

    let a_col_ptr = a.symbolic().col_ptr();
    let a_row_idx = a.symbolic().row_idx();
    let a_values = a.val();

    // x-block columns: diagonal pivot first, then the column of A shifted
    // into the y-block rows.
    col_ptrs.push(0);
    for j in 0..n_vars {
        diag_pos.push(row_indices.len());
        row_indices.push(j);
        values.push(1.0 + gamma2);

        for k in a_col_ptr[j]..a_col_ptr[j + 1] {
            row_indices.push(a_row_idx[k] + n_vars);
            values.push(a_values[k]);
        }
        col_ptrs.push(row_indices.len());
    }

    // y-block columns: the rows of A (A^T), then the -delta^2 pivot.
    let a_csr = a.to_row_major().unwrap();
    let a_row_ptr = a_csr.symbolic().row_ptr();
    let a_col_idx = a_csr.symbolic().col_idx();
    let a_csr_values = a_csr.val();

    for i in 0..n_cons {
        for k in a_row_ptr[i]..a_row_ptr[i + 1] {
            row_indices.push(a_col_idx[k]);
            values.push(a_csr_values[k]);
        }
        diag_pos.push(row_indices.len());
        row_indices.push(n_vars + i);
        values.push(-delta2);
        col_ptrs.push(row_indices.len());
    }

    let mat = unsafe {
        let sym = SymbolicSparseColMat::new_unchecked(size, size, col_ptrs, None, row_indices);
        SparseColMat::<I, E>::new(sym, values)
    };

    SparseAssembly { mat, diag_pos }
}

/// Rewrites the iterate-dependent pivots of the augmented form.
pub(super) fn update_augmented(
    assembly: &mut SparseAssembly,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    gamma2: E,
) {
    let n_vars = x.nrows();
    let values = assembly.mat.val_mut();
    for j in 0..n_vars {
        values[assembly.diag_pos[j]] = z[j] / x[j] + gamma2;
    }
}

/// Assembles the full form over `(dx, dy, dz)` with unit scaling; call
/// [`update_full`] before each factorization.
pub(super) fn assemble_full(
    a: &SparseColMat<I, E>,
    gamma2: E,
    delta2: E,
    beta2: E,
) -> SparseAssembly {
    let n_cons = a.nrows();
    let n_vars = a.ncols();
    let size = 2 * n_vars + n_cons;
    let nnz = a.compute_nnz();

    let mut col_ptrs = Vec::with_capacity(size + 1);
    let mut row_indices = Vec::with_capacity(3 * n_vars + n_cons + 2 * nnz);
    let mut values = Vec::with_capacity(3 * n_vars + n_cons + 2 * nnz);
    let mut diag_pos = Vec::with_capacity(size);

    let a_col_ptr = a.symbolic().col_ptr();
    let a_row_idx = a.symbolic().row_idx();
    let a_values = a.val();

    // x-block columns: gamma^2 pivot, the column of A, and the -I link to
    // the z-block.
    col_ptrs.push(0);
    for j in 0..n_vars {
        diag_pos.push(row_indices.len());
        row_indices.push(j);
        values.push(gamma2);

        for k in a_col_ptr[j]..a_col_ptr[j + 1] {
            row_indices.push(a_row_idx[k] + n_vars);
            values.push(a_values[k]);
        }

        row_indices.push(n_vars + n_cons + j);
        values.push(-1.0);
        col_ptrs.push(row_indices.len());
    }

    // y-block columns: A^T rows, then the -delta^2 pivot.
    let a_csr = a.to_row_major().unwrap();
    let a_row_ptr = a_csr.symbolic().row_ptr();
    let a_col_idx = a_csr.symbolic().col_idx();
    let a_csr_values = a_csr.val();

    for i in 0..n_cons {
        for k in a_row_ptr[i]..a_row_ptr[i + 1] {
            row_indices.push(a_col_idx[k]);
            values.push(a_csr_values[k]);
        }
        diag_pos.push(row_indices.len());
        row_indices.push(n_vars + i);
        values.push(-delta2);
        col_ptrs.push(row_indices.len());
    }

    // z-block columns: the -I link back to the x-block and the
    // -(x/z + beta^2) pivot.
    for j in 0..n_vars {
        row_indices.push(j);
        values.push(-1.0);
        diag_pos.push(row_indices.len());
        row_indices.push(n_vars + n_cons + j);
        values.push(-(1.0 + beta2));
        col_ptrs.push(row_indices.len());
    }

    let mat = unsafe {
        let sym = SymbolicSparseColMat::new_unchecked(size, size, col_ptrs, None, row_indices);
        SparseColMat::<I, E>::new(sym, values)
    };

    SparseAssembly { mat, diag_pos }
}

/// Rewrites the iterate-dependent pivots of the full form.
pub(super) fn update_full(
    assembly: &mut SparseAssembly,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    beta2: E,
) {
    let n_vars = x.nrows();
    let n_cons = assembly.mat.ncols() - 2 * n_vars;
    let values = assembly.mat.val_mut();
    for j in 0..n_vars {
        values[assembly.diag_pos[n_vars + n_cons + j]] = -(x[j] / z[j] + beta2);
    }
}

/// Assembles the normal form `A W A^T + delta^2 I`.
///
/// Every value depends on the iterate, so the matrix is rebuilt from
/// triplets each call; the pattern is a function of `A`'s pattern alone
/// and is identical across iterations, which keeps the symbolic
/// factorization valid.
pub(super) fn assemble_normal(
    a: &SparseColMat<I, E>,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    gamma2: E,
    delta2: E,
) -> SparseColMat<I, E> {
    let n_cons = a.nrows();
    let n_vars = a.ncols();
    let w = elimination_weights(x, z, gamma2);

    let a_col_ptr = a.symbolic().col_ptr();
    let a_row_idx = a.symbolic().row_idx();
    let a_values = a.val();

    let mut triplets = Vec::with_capacity(n_cons + a.compute_nnz() * 4);
    for i in 0..n_cons {
        triplets.push(Triplet::new(i, i, delta2));
    }
    for j in 0..n_vars {
        for k1 in a_col_ptr[j]..a_col_ptr[j + 1] {
            for k2 in a_col_ptr[j]..a_col_ptr[j + 1] {
                triplets.push(Triplet::new(
                    a_row_idx[k1],
                    a_row_idx[k2],
                    w[j] * a_values[k1] * a_values[k2],
                ));
            }
        }
    }

    SparseColMat::try_new_from_triplets(n_cons, n_cons, &triplets).unwrap()
}

/// Dense assembly of any of the three forms.
pub(super) fn assemble_dense(
    a: &Mat<E>,
    form: KktForm,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    gamma2: E,
    delta2: E,
    beta2: E,
) -> Mat<E> {
    let n_cons = a.nrows();
    let n_vars = a.ncols();

    match form {
        KktForm::Full => {
            let size = 2 * n_vars + n_cons;
            let mut j_mat = Mat::<E>::zeros(size, size);
            for jj in 0..n_vars {
                j_mat[(jj, jj)] = gamma2;
                j_mat[(jj, n_vars + n_cons + jj)] = -1.0;
                j_mat[(n_vars + n_cons + jj, jj)] = -1.0;
                j_mat[(n_vars + n_cons + jj, n_vars + n_cons + jj)] = -(x[jj] / z[jj] + beta2);
            }
            for i in 0..n_cons {
                j_mat[(n_vars + i, n_vars + i)] = -delta2;
                for jj in 0..n_vars {
                    j_mat[(n_vars + i, jj)] = a[(i, jj)];
                    j_mat[(jj, n_vars + i)] = a[(i, jj)];
                }
            }
            j_mat
        }
        KktForm::Augmented => {
            let size = n_vars + n_cons;
            let mut j_mat = Mat::<E>::zeros(size, size);
            for jj in 0..n_vars {
                j_mat[(jj, jj)] = z[jj] / x[jj] + gamma2;
            }
            for i in 0..n_cons {
                j_mat[(n_vars + i, n_vars + i)] = -delta2;
                for jj in 0..n_vars {
                    j_mat[(n_vars + i, jj)] = a[(i, jj)];
                    j_mat[(jj, n_vars + i)] = a[(i, jj)];
                }
            }
            j_mat
        }
        KktForm::Normal => {
            let w = elimination_weights(x, z, gamma2);
            let mut scaled = a.clone();
            scaled.scale_cols(w.as_ref());
            let mut j_mat = scaled.as_ref() * a.as_ref().transpose();
            for i in 0..n_cons {
                j_mat[(i, i)] += delta2;
            }
            j_mat
        }
    }
}

/// Right-hand side of the full form: `(-r_c, -r_b, r_mu / z)`.
pub(super) fn full_rhs(
    r_c: ColRef<'_, E>,
    r_b: ColRef<'_, E>,
    r_mu: ColRef<'_, E>,
    z: ColRef<'_, E>,
) -> Col<E> {
    let n_vars = r_c.nrows();
    let n_cons = r_b.nrows();
    Col::from_fn(2 * n_vars + n_cons, |i| {
        if i < n_vars {
            -r_c[i]
        } else if i < n_vars + n_cons {
            -r_b[i - n_vars]
        } else {
            let j = i - n_vars - n_cons;
            r_mu[j] / z[j]
        }
    })
}

/// Right-hand side of the augmented form: `(-r_c - r_mu / x, -r_b)`.
pub(super) fn augmented_rhs(
    r_c: ColRef<'_, E>,
    r_b: ColRef<'_, E>,
    r_mu: ColRef<'_, E>,
    x: ColRef<'_, E>,
) -> Col<E> {
    let n_vars = r_c.nrows();
    let n_cons = r_b.nrows();
    Col::from_fn(n_vars + n_cons, |i| {
        if i < n_vars {
            -r_c[i] - r_mu[i] / x[i]
        } else {
            -r_b[i - n_vars]
        }
    })
}

/// Right-hand side of the normal form:
/// `A (w o (-r_c - r_mu / x)) + r_b`.
pub(super) fn normal_rhs<M: ConstraintMatrix>(
    a: &M,
    r_c: ColRef<'_, E>,
    r_b: ColRef<'_, E>,
    r_mu: ColRef<'_, E>,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    gamma2: E,
) -> Col<E> {
    let w = elimination_weights(x, z, gamma2);
    let f = Col::from_fn(r_c.nrows(), |j| w[j] * (-r_c[j] - r_mu[j] / x[j]));
    a.mul_vec(f.as_ref()) + r_b
}

/// Splits the solved full-system vector into a direction.
pub(super) fn expand_full(solution: Col<E>, n_vars: usize, n_cons: usize) -> Direction {
    let (dx, rest) = solution.split_at_row(n_vars);
    let (dy, dz) = rest.split_at_row(n_cons);
    Direction {
        dx: dx.to_owned(),
        dy: dy.to_owned(),
        dz: dz.to_owned(),
    }
}

/// Recovers `dz` from the solved augmented system:
/// `dz = -(r_mu + z o dx) / x`.
pub(super) fn expand_augmented(
    solution: Col<E>,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    r_mu: ColRef<'_, E>,
) -> Direction {
    let n_vars = x.nrows();
    let (dx, dy) = solution.split_at_row(n_vars);
    let dz = -1.0 * cwise_quotient((r_mu + cwise_multiply(z, dx)).as_ref(), x);
    Direction {
        dx: dx.to_owned(),
        dy: dy.to_owned(),
        dz,
    }
}

/// Recovers `dx` and `dz` from the solved normal system.
pub(super) fn expand_normal<M: ConstraintMatrix>(
    a: &M,
    dy: Col<E>,
    r_c: ColRef<'_, E>,
    r_mu: ColRef<'_, E>,
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    gamma2: E,
) -> Direction {
    let w = elimination_weights(x, z, gamma2);
    let at_dy = a.mul_transpose_vec(dy.as_ref());
    let dx = Col::from_fn(x.nrows(), |j| {
        w[j] * (-r_c[j] - r_mu[j] / x[j] - at_dy[j])
    });
    let dz = -1.0 * cwise_quotient((r_mu + cwise_multiply(z, dx.as_ref())).as_ref(), x);
    Direction { dx, dy, dz }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Side;
    use faer::linalg::solvers::Lblt;
    use faer::prelude::Solve;

    fn small_lp() -> (SparseColMat<I, E>, Mat<E>) {
        let triplets = [
            Triplet::new(0usize, 0usize, 1.0),
            Triplet::new(0, 1, 2.0),
            Triplet::new(1, 1, -1.0),
            Triplet::new(1, 2, 1.0),
        ];
        let sparse = SparseColMat::try_new_from_triplets(2, 3, &triplets).unwrap();
        let dense = Mat::from_fn(2, 3, |i, j| [[1.0, 2.0, 0.0], [0.0, -1.0, 1.0]][i][j]);
        (sparse, dense)
    }

    fn dense_of_sparse(mat: &SparseColMat<I, E>) -> Mat<E> {
        let mut out = Mat::<E>::zeros(mat.nrows(), mat.ncols());
        let col_ptr = mat.symbolic().col_ptr();
        let row_idx = mat.symbolic().row_idx();
        for j in 0..mat.ncols() {
            for k in col_ptr[j]..col_ptr[j + 1] {
                out[(row_idx[k], j)] += mat.val()[k];
            }
        }
        out
    }

    #[test]
    fn test_sparse_assembly_matches_dense() {
        let (sparse, dense) = small_lp();
        let x = Col::from_fn(3, |j| (j + 1) as E);
        let z = Col::from_fn(3, |j| 1.0 / (j + 1) as E);
        let (gamma2, delta2, beta2) = (1e-6, 1e-5, 1e-4);

        let mut aug = assemble_augmented(&sparse, gamma2, delta2);
        update_augmented(&mut aug, x.as_ref(), z.as_ref(), gamma2);
        let reference = assemble_dense(
            &dense,
            KktForm::Augmented,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            beta2,
        );
        assert!((dense_of_sparse(&aug.mat) - &reference).norm_l2() < 1e-14);

        let mut full = assemble_full(&sparse, gamma2, delta2, beta2);
        update_full(&mut full, x.as_ref(), z.as_ref(), beta2);
        let reference = assemble_dense(
            &dense,
            KktForm::Full,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            beta2,
        );
        assert!((dense_of_sparse(&full.mat) - &reference).norm_l2() < 1e-14);

        let normal = assemble_normal(&sparse, x.as_ref(), z.as_ref(), gamma2, delta2);
        let reference = assemble_dense(
            &dense,
            KktForm::Normal,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            beta2,
        );
        assert!((dense_of_sparse(&normal) - &reference).norm_l2() < 1e-13);
    }

    #[test]
    fn test_three_forms_agree_on_the_direction() {
        // With beta = 0 the three linearizations are algebraically
        // equivalent, so the expanded directions must coincide.
        let (_, dense) = small_lp();
        let x = Col::from_fn(3, |j| 0.5 + j as E);
        let z = Col::from_fn(3, |j| 2.0 - 0.5 * j as E);
        let r_c = Col::from_fn(3, |j| 0.1 * (j as E - 1.0));
        let r_b = Col::from_fn(2, |i| 0.2 * (i as E + 1.0));
        let r_mu = cwise_multiply(x.as_ref(), z.as_ref());
        let (gamma2, delta2) = (1e-8, 1e-8);

        let solve_sym = |j_mat: Mat<E>, rhs: Col<E>| -> Col<E> {
            let fact = Lblt::new(j_mat.as_ref(), Side::Lower);
            fact.solve(rhs.as_mat()).col(0).to_owned()
        };

        let j_full = assemble_dense(
            &dense,
            KktForm::Full,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            0.0,
        );
        let full = expand_full(
            solve_sym(
                j_full,
                full_rhs(r_c.as_ref(), r_b.as_ref(), r_mu.as_ref(), z.as_ref()),
            ),
            3,
            2,
        );

        let j_aug = assemble_dense(
            &dense,
            KktForm::Augmented,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            0.0,
        );
        let aug = expand_augmented(
            solve_sym(
                j_aug,
                augmented_rhs(r_c.as_ref(), r_b.as_ref(), r_mu.as_ref(), x.as_ref()),
            ),
            x.as_ref(),
            z.as_ref(),
            r_mu.as_ref(),
        );

        let j_normal = assemble_dense(
            &dense,
            KktForm::Normal,
            x.as_ref(),
            z.as_ref(),
            gamma2,
            delta2,
            0.0,
        );
        let dy = solve_sym(
            j_normal,
            normal_rhs(
                &dense,
                r_c.as_ref(),
                r_b.as_ref(),
                r_mu.as_ref(),
                x.as_ref(),
                z.as_ref(),
                gamma2,
            ),
        );
        let normal = expand_normal(
            &dense,
            dy,
            r_c.as_ref(),
            r_mu.as_ref(),
            x.as_ref(),
            z.as_ref(),
            gamma2,
        );

        for (lhs, rhs) in [(&full, &aug), (&aug, &normal)] {
            assert!((&lhs.dx - &rhs.dx).norm_l2() < 1e-6);
            assert!((&lhs.dy - &rhs.dy).norm_l2() < 1e-6);
            assert!((&lhs.dz - &rhs.dz).norm_l2() < 1e-6);
        }
    }
}
