//! Iteration-wide scalars and residual vectors.

use faer::Col;

use crate::E;
use crate::hooks::IterationRecord;
use crate::linalg::matrix::ConstraintMatrix;
use crate::linalg::vector_ops;
use crate::lp::{LinearProgram, Solution};
use crate::lp::mpc::MehrotraCtrl;

/// Residuals, objectives, and the composite convergence metric at the
/// current iterate.
///
/// [`IterationState::update`] runs once per outer iteration; everything
/// downstream (convergence tests, KKT right-hand sides, diagnostics)
/// reads from here rather than recomputing.
pub(super) struct IterationState {
    pub(super) b_norm: E,
    pub(super) c_norm: E,

    /// Barrier parameter after the balancing hold.
    pub(super) mu: E,
    mu_old: E,

    pub(super) primal_objective: E,
    pub(super) dual_objective: E,
    pub(super) relative_gap: E,

    /// `A x - b`, perturbed by `-delta_perm^2 y` once its norm is taken.
    pub(super) r_b: Col<E>,
    /// `A^T y + c - z`, perturbed by `+gamma_perm^2 x`.
    pub(super) r_c: Col<E>,
    /// `x o z`.
    pub(super) r_mu: Col<E>,

    pub(super) r_b_norm: E,
    pub(super) r_c_norm: E,
    pub(super) r_mu_norm: E,

    /// `||r_b|| / (1 + ||b||)`.
    pub(super) relative_primal: E,
    /// `||r_c|| / (1 + ||c||)`.
    pub(super) relative_dual: E,

    /// Composite DIMACS-style error: the max of the relative residuals and
    /// the relative gap.
    pub(super) error: E,
}

impl IterationState {
    pub(super) fn initialize<M: ConstraintMatrix>(lp: &LinearProgram<M>) -> Self {
        let (n_vars, n_cons) = lp.dims();
        Self {
            b_norm: lp.b().norm_l2(),
            c_norm: lp.c().norm_l2(),
            mu: 0.0,
            mu_old: 0.1,
            primal_objective: 0.0,
            dual_objective: 0.0,
            relative_gap: 0.0,
            r_b: Col::zeros(n_cons),
            r_c: Col::zeros(n_vars),
            r_mu: Col::zeros(n_vars),
            r_b_norm: 0.0,
            r_c_norm: 0.0,
            r_mu_norm: 0.0,
            relative_primal: 0.0,
            relative_dual: 0.0,
            error: E::INFINITY,
        }
    }

    pub(super) fn update<M: ConstraintMatrix>(
        &mut self,
        lp: &LinearProgram<M>,
        sol: &Solution,
        ctrl: &MehrotraCtrl,
    ) {
        let n_vars = lp.num_vars() as E;

        // Barrier parameter, held back while the pairwise products are
        // badly imbalanced and otherwise kept monotone.
        self.mu = (sol.x.transpose() * &sol.z) / n_vars;
        let comp_ratio =
            vector_ops::complement_ratio(sol.x.as_ref(), sol.z.as_ref(), self.mu);
        if comp_ratio > ctrl.balance_tol {
            self.mu = self.mu_old;
        } else {
            self.mu = E::min(self.mu, self.mu_old);
        }
        self.mu_old = self.mu;

        self.primal_objective = lp.c().transpose() * &sol.x;
        self.dual_objective = -(lp.b().transpose() * &sol.y);
        self.relative_gap = (self.primal_objective - self.dual_objective).abs()
            / (1.0 + self.primal_objective.abs());

        self.r_b = lp.a().mul_vec(sol.x.as_ref()) - lp.b();
        self.r_b_norm = self.r_b.norm_l2();
        self.relative_primal = self.r_b_norm / (1.0 + self.b_norm);
        self.r_b -= (ctrl.delta_perm * ctrl.delta_perm) * &sol.y;

        self.r_c = lp.a().mul_transpose_vec(sol.y.as_ref()) + lp.c() - &sol.z;
        self.r_c_norm = self.r_c.norm_l2();
        self.relative_dual = self.r_c_norm / (1.0 + self.c_norm);
        self.r_c += (ctrl.gamma_perm * ctrl.gamma_perm) * &sol.x;

        self.r_mu = vector_ops::cwise_multiply(sol.x.as_ref(), sol.z.as_ref());
        self.r_mu_norm = self.r_mu.norm_l2();

        self.error = self
            .relative_primal
            .max(self.relative_dual)
            .max(self.relative_gap);
    }

    pub(super) fn print_residuals(
        &self,
        iteration: usize,
        alpha_primal: E,
        alpha_dual: E,
        sigma: Option<E>,
    ) {
        println!(
            "| {:4} | mu {:<9.2e} | sigma {:<9} | a_pri {:<8.2e} | a_dual {:<8.2e} | r_pri {:<8.2e} | r_dual {:<8.2e} | gap {:<8.2e} | error {:<8.2e} |",
            iteration,
            self.mu,
            sigma.map_or_else(|| "-".to_string(), |s| format!("{:<9.2e}", s)),
            alpha_primal,
            alpha_dual,
            self.relative_primal,
            self.relative_dual,
            self.relative_gap,
            self.error,
        );
    }

    pub(super) fn record(
        &self,
        iteration: usize,
        alpha_primal: E,
        alpha_dual: E,
        sigma: Option<E>,
    ) -> IterationRecord {
        IterationRecord {
            iteration,
            mu: self.mu,
            sigma,
            alpha_primal,
            alpha_dual,
            primal_objective: self.primal_objective,
            dual_objective: self.dual_objective,
            relative_gap: self.relative_gap,
            primal_residual: self.relative_primal,
            dual_residual: self.relative_dual,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::{SparseColMat, Triplet};

    fn identity_lp(n: usize) -> LinearProgram<SparseColMat<usize, E>> {
        let triplets: Vec<_> = (0..n).map(|i| Triplet::new(i, i, 1.0)).collect();
        let a = SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();
        LinearProgram::new(a, Col::ones(n), Col::ones(n)).unwrap()
    }

    #[test]
    fn test_update_at_the_optimum() {
        let lp = identity_lp(3);
        // x = b = 1, y = 0, z = 1 is primal and dual feasible, so both
        // equality residuals vanish and the error reduces to the gap.
        let sol = Solution {
            x: Col::ones(3),
            y: Col::zeros(3),
            z: Col::ones(3),
        };
        let ctrl = MehrotraCtrl {
            gamma_perm: 0.0,
            delta_perm: 0.0,
            ..MehrotraCtrl::default()
        };

        let mut state = IterationState::initialize(&lp);
        state.update(&lp, &sol, &ctrl);

        assert!(state.r_b_norm < 1e-15);
        assert!(state.r_c_norm < 1e-15);
        assert!((state.primal_objective - 3.0).abs() < 1e-15);
        assert_eq!(state.dual_objective, 0.0);
        // The gap term dominates the composite error here: |3 - 0| / (1 + 3).
        assert!((state.error - 0.75).abs() < 1e-15);
        // mu = x^T z / n = 1, held down by mu_old = 0.1.
        assert!((state.mu - 0.1).abs() < 1e-15);
    }

    #[test]
    fn test_mu_hold_on_imbalance() {
        let lp = identity_lp(2);
        let sol = Solution {
            // Products are (1e6, 1e-6): comp ratio ~ 2, below the balance
            // tolerance, so mu moves down to min(mu, mu_old).
            x: Col::from_fn(2, |i| [1e6, 1e-6][i]),
            y: Col::zeros(2),
            z: Col::ones(2),
        };
        let mut ctrl = MehrotraCtrl::default();
        let mut state = IterationState::initialize(&lp);
        state.update(&lp, &sol, &ctrl);
        assert!((state.mu - 0.1).abs() < 1e-15);

        // With a tiny balance tolerance the same iterate trips the hold
        // and mu stays at its previous value.
        ctrl.balance_tol = 1.5;
        let mut state = IterationState::initialize(&lp);
        state.update(&lp, &sol, &ctrl);
        assert!((state.mu - 0.1).abs() < 1e-15);
        // A second update with balanced products resumes the descent.
        let balanced = Solution {
            x: Col::from_fn(2, |i| [1e-3, 1e-3][i]),
            y: Col::zeros(2),
            z: Col::ones(2),
        };
        state.update(&lp, &balanced, &ctrl);
        assert!((state.mu - 1e-3).abs() < 1e-12);
    }
}
