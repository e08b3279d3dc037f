//! Outer equilibration of the problem data.
//!
//! Ruiz row/column scaling is applied to `A` and propagated to `(b, c)`
//! and, for warm starts, to the solution triple; `b` and `c` are then
//! normalized by their infinity norms. The scales are recorded so that
//! [`OuterScaling::undo`] restores the caller's coordinates exactly.

use faer::Col;

use crate::E;
use crate::linalg::equilibration::ruiz;
use crate::linalg::matrix::ConstraintMatrix;
use crate::lp::mpc::MehrotraCtrl;
use crate::lp::{LinearProgram, Solution};

pub(super) struct OuterScaling {
    row_scale: Col<E>,
    col_scale: Col<E>,
    b_scale: E,
    c_scale: E,
}

impl OuterScaling {
    pub(super) fn identity(n_cons: usize, n_vars: usize) -> Self {
        Self {
            row_scale: Col::ones(n_cons),
            col_scale: Col::ones(n_vars),
            b_scale: 1.0,
            c_scale: 1.0,
        }
    }

    /// Equilibrates `lp` (and the warm-started parts of `sol`) in place.
    pub(super) fn equilibrate<M: ConstraintMatrix>(
        lp: &mut LinearProgram<M>,
        sol: &mut Solution,
        ctrl: &MehrotraCtrl,
    ) -> Self {
        let (n_vars, n_cons) = lp.dims();
        let (row_scale, col_scale) = ruiz(&mut lp.a, ctrl.ruiz_max_iter);

        for i in 0..n_cons {
            lp.b[i] /= row_scale[i];
        }
        for j in 0..n_vars {
            lp.c[j] /= col_scale[j];
        }
        if ctrl.primal_init {
            for j in 0..n_vars {
                sol.x[j] *= col_scale[j];
            }
        }
        if ctrl.dual_init {
            for i in 0..n_cons {
                sol.y[i] *= row_scale[i];
            }
            for j in 0..n_vars {
                sol.z[j] /= col_scale[j];
            }
        }

        let b_scale = E::max(lp.b.norm_max(), 1.0);
        let c_scale = E::max(lp.c.norm_max(), 1.0);
        lp.b = (1.0 / b_scale) * &lp.b;
        lp.c = (1.0 / c_scale) * &lp.c;
        if ctrl.primal_init {
            sol.x = (1.0 / b_scale) * &sol.x;
        }
        if ctrl.dual_init {
            sol.y = (1.0 / c_scale) * &sol.y;
            sol.z = (1.0 / c_scale) * &sol.z;
        }

        Self {
            row_scale,
            col_scale,
            b_scale,
            c_scale,
        }
    }

    /// Inverts the transforms, restoring `sol` onto the caller's problem.
    pub(super) fn undo(&self, sol: &mut Solution) {
        for j in 0..sol.x.nrows() {
            sol.x[j] *= self.b_scale / self.col_scale[j];
            sol.z[j] *= self.c_scale * self.col_scale[j];
        }
        for i in 0..sol.y.nrows() {
            sol.y[i] *= self.c_scale / self.row_scale[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::{SparseColMat, Triplet};

    #[test]
    fn test_equilibrate_then_undo_is_identity() {
        let a = SparseColMat::try_new_from_triplets(
            2,
            3,
            &[
                Triplet::new(0usize, 0usize, 1e4),
                Triplet::new(0, 1, 2.0),
                Triplet::new(1, 1, -3e-3),
                Triplet::new(1, 2, 7.0),
            ],
        )
        .unwrap();
        let mut lp = LinearProgram::new(
            a,
            Col::from_fn(2, |i| [5.0, -2.0][i]),
            Col::from_fn(3, |j| [1.0, 40.0, 0.25][j]),
        )
        .unwrap();

        let original = Solution {
            x: Col::from_fn(3, |j| 1.0 + j as E),
            y: Col::from_fn(2, |i| -1.0 + 2.0 * i as E),
            z: Col::from_fn(3, |j| 0.5 * (j + 1) as E),
        };
        let mut sol = original.clone();

        let ctrl = MehrotraCtrl {
            primal_init: true,
            dual_init: true,
            ..MehrotraCtrl::default()
        };
        let scaling = OuterScaling::equilibrate(&mut lp, &mut sol, &ctrl);

        // The scaled problem sees a transformed triple.
        assert!((&sol.x - &original.x).norm_l2() > 0.0);

        scaling.undo(&mut sol);
        assert!((&sol.x - &original.x).norm_l2() < 1e-12);
        assert!((&sol.y - &original.y).norm_l2() < 1e-12);
        assert!((&sol.z - &original.z).norm_l2() < 1e-12);
    }

    #[test]
    fn test_scaled_problem_stays_consistent() {
        // If (x, y, z) satisfies A x = b and A^T y - z + c = 0, the scaled
        // triple must satisfy the scaled equalities.
        let a = SparseColMat::try_new_from_triplets(
            1,
            2,
            &[Triplet::new(0usize, 0usize, 100.0), Triplet::new(0, 1, 0.01)],
        )
        .unwrap();
        let x = Col::from_fn(2, |j| [0.005, 50.0][j]);
        let b = Col::from_fn(1, |_| 100.0 * 0.005 + 0.01 * 50.0);
        let y = Col::from_fn(1, |_| 2.0);
        let c = Col::from_fn(2, |j| [1.0, 3.0][j]);
        // z = A^T y + c.
        let z = Col::from_fn(2, |j| [100.0 * 2.0 + 1.0, 0.01 * 2.0 + 3.0][j]);

        let mut lp = LinearProgram::new(a, b, c).unwrap();
        let mut sol = Solution {
            x: x.clone(),
            y: y.clone(),
            z: z.clone(),
        };
        let ctrl = MehrotraCtrl {
            primal_init: true,
            dual_init: true,
            ..MehrotraCtrl::default()
        };
        OuterScaling::equilibrate(&mut lp, &mut sol, &ctrl);

        let r_b = lp.a.mul_vec(sol.x.as_ref()) - &lp.b;
        let r_c = lp.a.mul_transpose_vec(sol.y.as_ref()) + &lp.c - &sol.z;
        assert!(r_b.norm_l2() < 1e-12);
        assert!(r_c.norm_l2() < 1e-12);
    }
}
