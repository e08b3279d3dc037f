//! Factor-once / solve-twice adapters around the KKT linearizations.
//!
//! [`SparseKkt`] owns the sparse assembly and a [`Factorization`] backend.
//! The symbolic analysis happens once at construction; each iteration
//! copies the current matrix, adds the signed temporary regularization to
//! its diagonal, refactorizes numerically, and then solves with iterative
//! refinement against the *unregularized* matrix, so the regularization
//! stabilizes the pivots without perturbing the computed direction. An
//! optional symmetric inner scaling of the KKT matrix is chosen once,
//! keyed to the infinity norm of the Nesterov-Todd scaling point.
//!
//! [`DenseKkt`] assembles densely and factors with faer's Bunch-Kaufman
//! (LBL^T) solver; one factorization serves both the predictor and the
//! corrector solve.

use faer::Side;
use faer::linalg::solvers::Lblt;
use faer::prelude::Solve;
use faer::sparse::SparseColMat;
use faer::{Col, ColRef, Mat};

use crate::linalg::equilibration::{diagonal_symmetric, ruiz_symmetric};
use crate::linalg::matrix::ConstraintMatrix;
use crate::linalg::solver::{Factorization, LinearSolverError};
use crate::linalg::vector_ops::{cwise_multiply, nt_scaling_point};
use crate::lp::LinearProgram;
use crate::lp::mpc::{KktForm, MehrotraCtrl, RefinementCtrl, kkt};
use crate::{E, I};

/// A primal-dual search direction.
#[derive(Debug, Clone)]
pub struct Direction {
    pub dx: Col<E>,
    pub dy: Col<E>,
    pub dz: Col<E>,
}

/// Factor-and-solve interface for one KKT linearization.
///
/// `factor` runs once per outer iteration; `solve` may then be called
/// repeatedly (predictor and corrector) against the same factors.
pub trait KktSolver<M: ConstraintMatrix>: Sized {
    fn new(
        lp: &LinearProgram<M>,
        form: KktForm,
        ctrl: &MehrotraCtrl,
    ) -> Result<Self, LinearSolverError>;

    /// Refactorizes at the current iterate.
    fn factor(
        &mut self,
        lp: &LinearProgram<M>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
    ) -> Result<(), LinearSolverError>;

    /// Factors at unit scaling (`X = Z = I`) for the initializer, without
    /// engaging the iterate-keyed inner equilibration.
    fn factor_init(&mut self, lp: &LinearProgram<M>) -> Result<(), LinearSolverError>;

    /// Solves for a direction from the residual triple.
    fn solve(
        &mut self,
        lp: &LinearProgram<M>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
        r_c: ColRef<'_, E>,
        r_b: ColRef<'_, E>,
        r_mu: ColRef<'_, E>,
    ) -> Result<Direction, LinearSolverError>;
}

fn scale_symmetric(mat: &mut SparseColMat<I, E>, d: ColRef<'_, E>) {
    let col_ptr = mat.symbolic().col_ptr().to_vec();
    let row_idx = mat.symbolic().row_idx().to_vec();
    let ncols = mat.ncols();
    let val = mat.val_mut();
    for j in 0..ncols {
        for k in col_ptr[j]..col_ptr[j + 1] {
            val[k] *= d[row_idx[k]] * d[j];
        }
    }
}

/// Sparse adapter, generic over the LDL^T backend.
pub struct SparseKkt<F: Factorization> {
    form: KktForm,
    factor: F,
    /// Fixed-pattern assembly for the full and augmented forms.
    assembly: Option<kkt::SparseAssembly>,
    /// Current system without temporary regularization, inner-scaled;
    /// refinement target.
    j_orig: Option<SparseColMat<I, E>>,
    /// Signed temporary regularization added to the factored diagonal.
    reg_tmp: Col<E>,
    /// Inner symmetric scaling, chosen on the first outer iteration.
    d_inner: Option<Col<E>>,
    gamma2: E,
    delta2: E,
    beta2: E,
    resolve_reg: bool,
    refine: RefinementCtrl,
    ruiz_equil_tol: E,
    diag_equil_tol: E,
    ruiz_max_iter: usize,
}

impl<F: Factorization> SparseKkt<F> {
    /// Picks the inner scaling for `j` from the max-norm of the
    /// Nesterov-Todd scaling point.
    fn choose_inner_scaling(
        &mut self,
        j: &SparseColMat<I, E>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
    ) {
        let w_max = nt_scaling_point(x, z).norm_max();
        let d = if w_max >= self.ruiz_equil_tol {
            ruiz_symmetric(j.as_ref(), self.ruiz_max_iter)
        } else if w_max >= self.diag_equil_tol {
            diagonal_symmetric(j.as_ref())
        } else {
            Col::ones(j.ncols())
        };
        self.d_inner = Some(d);
    }

    fn factorize_at(
        &mut self,
        lp: &LinearProgram<SparseColMat<I, E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
        select_scaling: bool,
    ) -> Result<(), LinearSolverError> {
        // Rebuild the unregularized system at the current iterate.
        let mut j_orig = match self.form {
            KktForm::Full => {
                let assembly = self.assembly.as_mut().ok_or(LinearSolverError::Uninitialized)?;
                kkt::update_full(assembly, x, z, self.beta2);
                assembly.mat.clone()
            }
            KktForm::Augmented => {
                let assembly = self.assembly.as_mut().ok_or(LinearSolverError::Uninitialized)?;
                kkt::update_augmented(assembly, x, z, self.gamma2);
                assembly.mat.clone()
            }
            KktForm::Normal => kkt::assemble_normal(lp.a(), x, z, self.gamma2, self.delta2),
        };

        if select_scaling && self.d_inner.is_none() {
            self.choose_inner_scaling(&j_orig, x, z);
        }
        if let Some(d) = &self.d_inner {
            scale_symmetric(&mut j_orig, d.as_ref());
        }

        // The factored matrix carries the temporary regularization; the
        // refinement loop solves against `j_orig`.
        let mut j_reg = j_orig.clone();
        if let Some(assembly) = &self.assembly {
            let values = j_reg.val_mut();
            for (i, &pos) in assembly.diag_pos.iter().enumerate() {
                values[pos] += self.reg_tmp[i];
            }
        }
        self.factor.factorize(j_reg.as_ref())?;
        self.j_orig = Some(j_orig);
        Ok(())
    }
}

impl<F: Factorization> KktSolver<SparseColMat<I, E>> for SparseKkt<F> {
    fn new(
        lp: &LinearProgram<SparseColMat<I, E>>,
        form: KktForm,
        ctrl: &MehrotraCtrl,
    ) -> Result<Self, LinearSolverError> {
        let (n_vars, n_cons) = lp.dims();
        let gamma2 = ctrl.gamma_perm * ctrl.gamma_perm;
        let delta2 = ctrl.delta_perm * ctrl.delta_perm;
        let beta2 = ctrl.beta_perm * ctrl.beta_perm;

        // Temporary regularization follows the inertia of each block and
        // scales with the problem.
        let scale = lp.a().two_norm_estimate(ctrl.basis_size) + 1.0;
        let gamma_tmp2 = ctrl.gamma_tmp * ctrl.gamma_tmp * scale;
        let delta_tmp2 = ctrl.delta_tmp * ctrl.delta_tmp * scale;
        let beta_tmp2 = ctrl.beta_tmp * ctrl.beta_tmp * scale;

        let (assembly, reg_tmp) = match form {
            KktForm::Full => (
                Some(kkt::assemble_full(lp.a(), gamma2, delta2, beta2)),
                Col::from_fn(2 * n_vars + n_cons, |i| {
                    if i < n_vars {
                        gamma_tmp2
                    } else if i < n_vars + n_cons {
                        -delta_tmp2
                    } else {
                        -beta_tmp2
                    }
                }),
            ),
            KktForm::Augmented => (
                Some(kkt::assemble_augmented(lp.a(), gamma2, delta2)),
                Col::from_fn(n_vars + n_cons, |i| {
                    if i < n_vars { gamma_tmp2 } else { -delta_tmp2 }
                }),
            ),
            // The normal form is positive definite; it is factored as-is
            // and refined without regularization.
            KktForm::Normal => (None, Col::zeros(n_cons)),
        };

        let mut factor = F::new();
        match &assembly {
            Some(assembly) => factor.analyze(assembly.mat.as_ref())?,
            None => {
                let ones = Col::<E>::ones(n_vars);
                let pattern =
                    kkt::assemble_normal(lp.a(), ones.as_ref(), ones.as_ref(), gamma2, delta2);
                factor.analyze(pattern.as_ref())?;
            }
        }

        Ok(Self {
            form,
            factor,
            assembly,
            j_orig: None,
            reg_tmp,
            d_inner: None,
            gamma2,
            delta2,
            beta2,
            resolve_reg: ctrl.resolve_reg,
            refine: ctrl.solve_ctrl.clone(),
            ruiz_equil_tol: ctrl.ruiz_equil_tol,
            diag_equil_tol: ctrl.diag_equil_tol,
            ruiz_max_iter: ctrl.ruiz_max_iter,
        })
    }

    fn factor(
        &mut self,
        lp: &LinearProgram<SparseColMat<I, E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
    ) -> Result<(), LinearSolverError> {
        self.factorize_at(lp, x, z, true)
    }

    fn factor_init(
        &mut self,
        lp: &LinearProgram<SparseColMat<I, E>>,
    ) -> Result<(), LinearSolverError> {
        let ones = Col::<E>::ones(lp.num_vars());
        self.factorize_at(lp, ones.as_ref(), ones.as_ref(), false)
    }

    fn solve(
        &mut self,
        lp: &LinearProgram<SparseColMat<I, E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
        r_c: ColRef<'_, E>,
        r_b: ColRef<'_, E>,
        r_mu: ColRef<'_, E>,
    ) -> Result<Direction, LinearSolverError> {
        let j_orig = self.j_orig.as_ref().ok_or(LinearSolverError::Uninitialized)?;

        let mut rhs = match self.form {
            KktForm::Full => kkt::full_rhs(r_c, r_b, r_mu, z),
            KktForm::Augmented => kkt::augmented_rhs(r_c, r_b, r_mu, x),
            KktForm::Normal => kkt::normal_rhs(lp.a(), r_c, r_b, r_mu, x, z, self.gamma2),
        };
        if let Some(d) = &self.d_inner {
            rhs = cwise_multiply(d.as_ref(), rhs.as_ref());
        }

        let mut u = self.factor.solve(rhs.as_mat())?.col(0).to_owned();

        // Refinement against the unregularized system. With `resolve_reg`
        // the loop continues to full precision (until stagnation);
        // otherwise it stops at the requested relative tolerance.
        let rhs_norm = rhs.norm_l2();
        if rhs_norm > 0.0 {
            let mut residual = &rhs - j_orig.mul_vec(u.as_ref());
            let mut residual_norm = residual.norm_l2();
            for sweep in 0..self.refine.max_refine_its {
                if !self.resolve_reg && residual_norm <= self.refine.rel_tol * rhs_norm {
                    break;
                }
                let du = self.factor.solve(residual.as_mat())?.col(0).to_owned();
                let u_next = &u + &du;
                let residual_next = &rhs - j_orig.mul_vec(u_next.as_ref());
                let next_norm = residual_next.norm_l2();
                if self.refine.progress {
                    println!("refine {}: {:.3e} -> {:.3e}", sweep, residual_norm, next_norm);
                }
                if next_norm >= residual_norm {
                    break;
                }
                u = u_next;
                residual = residual_next;
                residual_norm = next_norm;
            }
        }

        if !u.norm_l2().is_finite() {
            return Err(LinearSolverError::SolveFailed);
        }
        if let Some(d) = &self.d_inner {
            u = cwise_multiply(d.as_ref(), u.as_ref());
        }

        Ok(match self.form {
            KktForm::Full => kkt::expand_full(u, lp.num_vars(), lp.num_cons()),
            KktForm::Augmented => kkt::expand_augmented(u, x, z, r_mu),
            KktForm::Normal => kkt::expand_normal(lp.a(), u, r_c, r_mu, x, z, self.gamma2),
        })
    }
}

/// Dense adapter over faer's Bunch-Kaufman factorization.
pub struct DenseKkt {
    form: KktForm,
    gamma2: E,
    delta2: E,
    beta2: E,
    factors: Option<Lblt<E>>,
}

impl DenseKkt {
    fn factorize_at(
        &mut self,
        lp: &LinearProgram<Mat<E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
    ) -> Result<(), LinearSolverError> {
        let j = kkt::assemble_dense(
            lp.a(),
            self.form,
            x,
            z,
            self.gamma2,
            self.delta2,
            self.beta2,
        );
        self.factors = Some(Lblt::new(j.as_ref(), Side::Lower));
        Ok(())
    }
}

impl KktSolver<Mat<E>> for DenseKkt {
    fn new(
        _lp: &LinearProgram<Mat<E>>,
        form: KktForm,
        ctrl: &MehrotraCtrl,
    ) -> Result<Self, LinearSolverError> {
        Ok(Self {
            form,
            gamma2: ctrl.gamma_perm * ctrl.gamma_perm,
            delta2: ctrl.delta_perm * ctrl.delta_perm,
            beta2: ctrl.beta_perm * ctrl.beta_perm,
            factors: None,
        })
    }

    fn factor(
        &mut self,
        lp: &LinearProgram<Mat<E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
    ) -> Result<(), LinearSolverError> {
        self.factorize_at(lp, x, z)
    }

    fn factor_init(&mut self, lp: &LinearProgram<Mat<E>>) -> Result<(), LinearSolverError> {
        let ones = Col::<E>::ones(lp.num_vars());
        self.factorize_at(lp, ones.as_ref(), ones.as_ref())
    }

    fn solve(
        &mut self,
        lp: &LinearProgram<Mat<E>>,
        x: ColRef<'_, E>,
        z: ColRef<'_, E>,
        r_c: ColRef<'_, E>,
        r_b: ColRef<'_, E>,
        r_mu: ColRef<'_, E>,
    ) -> Result<Direction, LinearSolverError> {
        let factors = self.factors.as_ref().ok_or(LinearSolverError::Uninitialized)?;

        let rhs = match self.form {
            KktForm::Full => kkt::full_rhs(r_c, r_b, r_mu, z),
            KktForm::Augmented => kkt::augmented_rhs(r_c, r_b, r_mu, x),
            KktForm::Normal => kkt::normal_rhs(lp.a(), r_c, r_b, r_mu, x, z, self.gamma2),
        };

        let u = factors.solve(rhs.as_mat()).col(0).to_owned();
        // A breakdown of the LBL^T shows up as non-finite entries rather
        // than an error code.
        if !u.norm_l2().is_finite() {
            return Err(LinearSolverError::SolveFailed);
        }

        Ok(match self.form {
            KktForm::Full => kkt::expand_full(u, lp.num_vars(), lp.num_cons()),
            KktForm::Augmented => kkt::expand_augmented(u, x, z, r_mu),
            KktForm::Normal => kkt::expand_normal(lp.a(), u, r_c, r_mu, x, z, self.gamma2),
        })
    }
}
