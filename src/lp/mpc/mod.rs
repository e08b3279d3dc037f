//! Mehrotra predictor-corrector interior-point method.
//!
//! The driver follows the perturbed central path of the conic-form pair
//!
//! ```text
//! min c^T x                    max -b^T y
//! s.t. A x = b, x >= 0         s.t. A^T y - z + c = 0, z >= 0
//! ```
//!
//! by alternating an affine-scaling (predictor) solve and a centering
//! (corrector) solve against a single factorization of the chosen KKT
//! linearization per iteration. Each outer iteration:
//!
//! 1. check strict positivity of `(x, z)`,
//! 2. update the barrier parameter, objectives, and residuals,
//! 3. test convergence against the composite error,
//! 4. assemble and solve the predictor system,
//! 5. pick the centrality parameter from the affine step,
//! 6. solve the corrector system against the same factors,
//! 7. step back from the cone boundary and advance the iterate.

use std::marker::PhantomData;
use std::time::{Duration, Instant};

use derive_more::{Display, Error};
use faer::sparse::SparseColMat;
use faer::{Col, Mat};
use serde::{Deserialize, Serialize};

use crate::hooks::SolverHooks;
use crate::linalg::matrix::ConstraintMatrix;
use crate::linalg::solver::LinearSolverError;
use crate::linalg::{ldlt::SimplicialLdlt, vector_ops};
use crate::lp::{LinearProgram, Solution};
use crate::{E, I, Status};

mod kkt;
mod scaling;
mod state;
mod step;
pub mod system;

use scaling::OuterScaling;
use state::IterationState;
pub use system::{DenseKkt, Direction, KktSolver, SparseKkt};

/// Which linearization of the KKT conditions to factor each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KktForm {
    /// Symmetric indefinite system of size `2n + m` over `(dx, dy, dz)`.
    Full,
    /// `dz` eliminated analytically; size `n + m` over `(dx, dy)`.
    #[default]
    Augmented,
    /// `dx` eliminated as well; positive-definite system of size `m`.
    Normal,
}

/// Rule for the centrality parameter `sigma`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CentralityRule {
    /// `sigma = clamp((mu_aff / mu)^3, 0, 1)`.
    Mehrotra,
    /// `sigma = (1 - min(alpha_pri_aff, alpha_dual_aff))^3`.
    #[default]
    StepLength,
}

/// Control for the iterative refinement wrapped around the factorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementCtrl {
    /// Stop once the residual shrinks below `rel_tol * ||rhs||`.
    pub rel_tol: E,
    /// Cap on refinement sweeps per solve.
    pub max_refine_its: usize,
    /// Print the residual after each sweep.
    pub progress: bool,
}

impl Default for RefinementCtrl {
    fn default() -> Self {
        Self {
            rel_tol: E::EPSILON.sqrt(),
            max_refine_its: 50,
            progress: false,
        }
    }
}

/// Options recognized by [`MehrotraPredictorCorrector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MehrotraCtrl {
    /// Treat the caller's `x` as a valid interior warm start.
    pub primal_init: bool,
    /// Treat the caller's `(y, z)` as a valid interior warm start.
    pub dual_init: bool,
    /// Ruiz-equilibrate the problem before solving and undo on exit.
    pub outer_equil: bool,
    /// KKT linearization to factor.
    pub system: KktForm,
    /// Include the second-order cross term in the corrector right-hand side.
    pub mehrotra: bool,
    /// Rule for the centrality parameter.
    pub centrality: CentralityRule,
    /// Use the complementarity-balancing shift when synthesizing a start.
    pub standard_shift: bool,
    /// Force `alpha_primal == alpha_dual` each iteration.
    pub force_same_step: bool,
    /// Fraction of the step to the cone boundary actually taken.
    pub max_step_ratio: E,
    /// Outer iteration cap.
    pub max_its: usize,
    /// Composite error at which the solve is declared optimal.
    pub target_tol: E,
    /// Composite error below which failures degrade to benign stalls.
    pub min_tol: E,
    /// Complementarity-ratio threshold holding the barrier parameter.
    pub balance_tol: E,
    /// Permanent regularization of the x-block (`gamma^2` on the diagonal).
    pub gamma_perm: E,
    /// Permanent regularization of the y-block.
    pub delta_perm: E,
    /// Permanent regularization of the z-block (full KKT only).
    pub beta_perm: E,
    /// Temporary x-block regularization, removed by refinement.
    pub gamma_tmp: E,
    /// Temporary y-block regularization.
    pub delta_tmp: E,
    /// Temporary z-block regularization.
    pub beta_tmp: E,
    /// `||w||_inf` above which the KKT matrix gets inner Ruiz scaling.
    pub ruiz_equil_tol: E,
    /// `||w||_inf` above which it gets Jacobi scaling instead.
    pub diag_equil_tol: E,
    /// Sweep cap for both the outer and inner Ruiz iterations.
    pub ruiz_max_iter: usize,
    /// Power-iteration count for the spectral-norm estimate of `A`.
    pub basis_size: usize,
    /// Refine against the unregularized matrix to full precision.
    pub resolve_reg: bool,
    /// Nested refinement options.
    pub solve_ctrl: RefinementCtrl,
    /// Print a residual table each iteration.
    pub print: bool,
    /// Print accumulated factor/solve timings on exit.
    pub time: bool,
    /// Recompute and print residuals on the caller's data after the solve.
    pub check_residuals: bool,
}

impl Default for MehrotraCtrl {
    fn default() -> Self {
        let eps = E::EPSILON;
        Self {
            primal_init: false,
            dual_init: false,
            outer_equil: false,
            system: KktForm::default(),
            mehrotra: true,
            centrality: CentralityRule::default(),
            standard_shift: true,
            force_same_step: false,
            max_step_ratio: 0.99,
            max_its: 100,
            target_tol: 1e-8,
            min_tol: 1e-6,
            balance_tol: eps.powf(-0.19),
            gamma_perm: eps.powf(0.35),
            delta_perm: eps.powf(0.35),
            beta_perm: eps.powf(0.35),
            gamma_tmp: eps.powf(0.25),
            delta_tmp: eps.powf(0.25),
            beta_tmp: eps.powf(0.25),
            ruiz_equil_tol: eps.powf(-0.25),
            diag_equil_tol: eps.powf(-0.15),
            ruiz_max_iter: 3,
            basis_size: 15,
            resolve_reg: true,
            solve_ctrl: RefinementCtrl::default(),
            print: false,
            time: false,
            check_residuals: false,
        }
    }
}

/// Errors raised by the interior-point driver.
#[derive(Debug, Display, Error)]
pub enum MehrotraError {
    /// Logic error: the iterate must stay strictly inside the cone.
    #[display("iterate left the nonnegative cone ({count} nonpositive components)")]
    IterateOutsideCone { count: usize },

    /// Logic error: the solution triple does not match the program.
    #[display("solution dimensions do not match the program")]
    DimensionMismatch,

    /// The synthesized starting point could not be computed.
    #[display("failed to synthesize a starting point")]
    Initialization { source: LinearSolverError },

    /// Iteration cap reached with the composite error still above `min_tol`.
    #[display(
        "maximum iterations ({iterations}) exceeded with composite error {error:.3e} above the minimum tolerance {min_tol:.3e}"
    )]
    IterationCap {
        iterations: usize,
        error: E,
        min_tol: E,
    },

    /// Both step lengths collapsed to zero above `min_tol`.
    #[display(
        "zero step length with composite error {error:.3e} above the minimum tolerance {min_tol:.3e}"
    )]
    ZeroStep { error: E, min_tol: E },

    /// The KKT factorization or solve failed above `min_tol`.
    #[display(
        "KKT solve failed with composite error {error:.3e} above the minimum tolerance {min_tol:.3e}"
    )]
    KktSolve {
        error: E,
        min_tol: E,
        source: LinearSolverError,
    },
}

#[derive(Default)]
struct Timings {
    factor: Duration,
    solve: Duration,
    total: Duration,
}

/// The Mehrotra predictor-corrector driver, generic over the constraint
/// matrix kind `M` and the KKT solver `K`.
///
/// Use [`mehrotra_sparse`] / [`mehrotra_dense`] for the common
/// configurations.
pub struct MehrotraPredictorCorrector<M: ConstraintMatrix, K: KktSolver<M>> {
    ctrl: MehrotraCtrl,
    _marker: PhantomData<(M, K)>,
}

impl<M: ConstraintMatrix, K: KktSolver<M>> MehrotraPredictorCorrector<M, K> {
    pub fn new(ctrl: MehrotraCtrl) -> Self {
        Self {
            ctrl,
            _marker: PhantomData,
        }
    }

    /// Runs the solver, overwriting `sol` with the terminal iterate.
    ///
    /// Returns the terminal [`Status`] on any acceptable outcome; hard
    /// failures (non-convergence above `min_tol`, cone violations,
    /// unrecoverable factorization errors) surface as [`MehrotraError`].
    pub fn solve(
        &self,
        lp: &LinearProgram<M>,
        sol: &mut Solution,
        hooks: &mut SolverHooks,
    ) -> Result<Status, MehrotraError> {
        let ctrl = &self.ctrl;
        let started = Instant::now();
        let mut timings = Timings::default();

        if !sol.conforms_to(lp) {
            return Err(MehrotraError::DimensionMismatch);
        }
        if ctrl.primal_init && vector_ops::num_nonpositive(sol.x.as_ref()) > 0 {
            return Err(MehrotraError::IterateOutsideCone {
                count: vector_ops::num_nonpositive(sol.x.as_ref()),
            });
        }
        if ctrl.dual_init && vector_ops::num_nonpositive(sol.z.as_ref()) > 0 {
            return Err(MehrotraError::IterateOutsideCone {
                count: vector_ops::num_nonpositive(sol.z.as_ref()),
            });
        }

        // The core loop only ever sees the scaled copies; the caller's data
        // is restored onto `sol` at exit.
        let mut lp_s = lp.clone();
        let mut sol_s = sol.clone();
        let scaling = if ctrl.outer_equil {
            OuterScaling::equilibrate(&mut lp_s, &mut sol_s, ctrl)
        } else {
            OuterScaling::identity(lp.num_cons(), lp.num_vars())
        };

        let mut kkt = K::new(&lp_s, ctrl.system, ctrl)
            .map_err(|source| MehrotraError::Initialization { source })?;
        initialize(&lp_s, &mut sol_s, &mut kkt, ctrl)?;

        let mut st = IterationState::initialize(&lp_s);
        hooks.callback.begin();
        hooks.terminator.initialize();

        let mut status = Status::InProgress;
        let mut alpha_primal = 0.0;
        let mut alpha_dual = 0.0;
        let mut sigma = None;

        for iteration in 0..=ctrl.max_its {
            let outside = vector_ops::num_nonpositive(sol_s.x.as_ref())
                + vector_ops::num_nonpositive(sol_s.z.as_ref());
            if outside > 0 {
                return Err(MehrotraError::IterateOutsideCone { count: outside });
            }

            st.update(&lp_s, &sol_s, ctrl);
            if ctrl.print {
                st.print_residuals(iteration, alpha_primal, alpha_dual, sigma);
            }
            let record = st.record(iteration, alpha_primal, alpha_dual, sigma);
            hooks.callback.call(&record);

            if st.error <= ctrl.target_tol {
                status = Status::Optimal;
                break;
            }
            if iteration == ctrl.max_its {
                if st.error <= ctrl.min_tol {
                    status = Status::IterationLimit;
                    break;
                }
                return Err(MehrotraError::IterationCap {
                    iterations: ctrl.max_its,
                    error: st.error,
                    min_tol: ctrl.min_tol,
                });
            }
            if let Some(outcome) = hooks.terminator.terminate(&record) {
                status = outcome;
                break;
            }

            // Factor once, solve twice.
            let factor_started = Instant::now();
            let factored = kkt.factor(&lp_s, sol_s.x.as_ref(), sol_s.z.as_ref());
            timings.factor += factor_started.elapsed();
            match factored {
                Ok(()) => {}
                Err(source) => {
                    if st.error <= ctrl.min_tol {
                        status = Status::Stalled;
                        break;
                    }
                    return Err(MehrotraError::KktSolve {
                        error: st.error,
                        min_tol: ctrl.min_tol,
                        source,
                    });
                }
            }

            let solve_started = Instant::now();
            let affine = kkt.solve(
                &lp_s,
                sol_s.x.as_ref(),
                sol_s.z.as_ref(),
                st.r_c.as_ref(),
                st.r_b.as_ref(),
                st.r_mu.as_ref(),
            );
            timings.solve += solve_started.elapsed();
            let affine = match affine {
                Ok(direction) => direction,
                Err(source) => {
                    if st.error <= ctrl.min_tol {
                        status = Status::Stalled;
                        break;
                    }
                    return Err(MehrotraError::KktSolve {
                        error: st.error,
                        min_tol: ctrl.min_tol,
                        source,
                    });
                }
            };

            let (alpha_pri_aff, alpha_dual_aff) = step::affine_step_lengths(
                sol_s.x.as_ref(),
                sol_s.z.as_ref(),
                &affine,
                ctrl.force_same_step,
            );
            let mu_affine = step::affine_complementarity(
                sol_s.x.as_ref(),
                sol_s.z.as_ref(),
                &affine,
                alpha_pri_aff,
                alpha_dual_aff,
            );
            let sig = step::centrality(
                ctrl.centrality,
                st.mu,
                mu_affine,
                alpha_pri_aff,
                alpha_dual_aff,
            );
            sigma = Some(sig);

            let (r_c, r_b, r_mu) = step::combined_residuals(&st, sig, &affine, ctrl.mehrotra);
            let solve_started = Instant::now();
            let direction = kkt.solve(
                &lp_s,
                sol_s.x.as_ref(),
                sol_s.z.as_ref(),
                r_c.as_ref(),
                r_b.as_ref(),
                r_mu.as_ref(),
            );
            timings.solve += solve_started.elapsed();
            let direction = match direction {
                Ok(direction) => direction,
                Err(source) => {
                    if st.error <= ctrl.min_tol {
                        status = Status::Stalled;
                        break;
                    }
                    return Err(MehrotraError::KktSolve {
                        error: st.error,
                        min_tol: ctrl.min_tol,
                        source,
                    });
                }
            };

            (alpha_primal, alpha_dual) = step::step_lengths(
                sol_s.x.as_ref(),
                sol_s.z.as_ref(),
                &direction,
                ctrl.max_step_ratio,
                ctrl.force_same_step,
            );
            if alpha_primal == 0.0 && alpha_dual == 0.0 {
                if st.error <= ctrl.min_tol {
                    status = Status::Stalled;
                    break;
                }
                return Err(MehrotraError::ZeroStep {
                    error: st.error,
                    min_tol: ctrl.min_tol,
                });
            }
            step::advance(&mut sol_s, &direction, alpha_primal, alpha_dual);
        }

        scaling.undo(&mut sol_s);
        *sol = sol_s;

        if ctrl.check_residuals {
            let r_b = lp.a().mul_vec(sol.x.as_ref()) - lp.b();
            let r_c = lp.a().mul_transpose_vec(sol.y.as_ref()) + lp.c() - &sol.z;
            println!(
                "check: ||A x - b|| = {:.3e}, ||A^T y - z + c|| = {:.3e}",
                r_b.norm_l2(),
                r_c.norm_l2(),
            );
        }
        if ctrl.time {
            timings.total = started.elapsed();
            println!(
                "time: factor {:.3?}, solve {:.3?}, total {:.3?}",
                timings.factor, timings.solve, timings.total,
            );
        }

        Ok(status)
    }
}

/// Synthesizes any part of the starting triple the caller did not supply.
///
/// The primal start is the minimum-norm solution of `A x = b`; the dual
/// start is the least-squares `y` for `A^T y + c` with `z = A^T y + c`.
/// Both come from one augmented solve with unit scaling matrices, whose
/// symbolic work is shared with the main loop exactly when the loop itself
/// runs on the augmented form. Afterwards the triple is shifted into the
/// strict interior.
fn initialize<M: ConstraintMatrix, K: KktSolver<M>>(
    lp: &LinearProgram<M>,
    sol: &mut Solution,
    kkt: &mut K,
    ctrl: &MehrotraCtrl,
) -> Result<(), MehrotraError> {
    if ctrl.primal_init && ctrl.dual_init {
        return Ok(());
    }

    let (n_vars, n_cons) = lp.dims();
    let ones = Col::<E>::ones(n_vars);
    let zeros_vars = Col::<E>::zeros(n_vars);
    let zeros_cons = Col::<E>::zeros(n_cons);

    let mut scratch;
    let solver: &mut K = if ctrl.system == KktForm::Augmented {
        kkt
    } else {
        scratch = K::new(lp, KktForm::Augmented, ctrl)
            .map_err(|source| MehrotraError::Initialization { source })?;
        &mut scratch
    };

    solver
        .factor_init(lp)
        .map_err(|source| MehrotraError::Initialization { source })?;

    if !ctrl.primal_init {
        let r_b = -1.0 * lp.b();
        let direction = solver
            .solve(
                lp,
                ones.as_ref(),
                ones.as_ref(),
                zeros_vars.as_ref(),
                r_b.as_ref(),
                zeros_vars.as_ref(),
            )
            .map_err(|source| MehrotraError::Initialization { source })?;
        sol.x = direction.dx;
    }
    if !ctrl.dual_init {
        let direction = solver
            .solve(
                lp,
                ones.as_ref(),
                ones.as_ref(),
                lp.c().as_ref(),
                zeros_cons.as_ref(),
                zeros_vars.as_ref(),
            )
            .map_err(|source| MehrotraError::Initialization { source })?;
        sol.y = direction.dy;
        sol.z = direction.dz;
    }

    if ctrl.standard_shift {
        let shift_x = E::max(-1.5 * vector_ops::col_min(sol.x.as_ref()), 0.0);
        let shift_z = E::max(-1.5 * vector_ops::col_min(sol.z.as_ref()), 0.0);
        let shifted_x = &sol.x + shift_x * &ones;
        let shifted_z = &sol.z + shift_z * &ones;
        let cross = shifted_x.transpose() * &shifted_z;
        let sum_x = shifted_x.sum();
        let sum_z = shifted_z.sum();
        if cross > 0.0 && sum_x > 0.0 && sum_z > 0.0 {
            if !ctrl.primal_init {
                sol.x = &shifted_x + (0.5 * cross / sum_z) * &ones;
            }
            if !ctrl.dual_init {
                sol.z = &shifted_z + (0.5 * cross / sum_x) * &ones;
            }
        }
    } else {
        if !ctrl.primal_init {
            let shift = E::max(1.0 - vector_ops::col_min(sol.x.as_ref()), 0.0);
            sol.x += shift * &ones;
        }
        if !ctrl.dual_init {
            let shift = E::max(1.0 - vector_ops::col_min(sol.z.as_ref()), 0.0);
            sol.z += shift * &ones;
        }
    }

    // Degenerate data (b = 0, c = 0) can defeat the shifts; fall back to
    // the analytic center of the unit box.
    if !ctrl.primal_init && vector_ops::num_nonpositive(sol.x.as_ref()) > 0 {
        sol.x = ones.clone();
    }
    if !ctrl.dual_init && vector_ops::num_nonpositive(sol.z.as_ref()) > 0 {
        sol.z = ones;
    }

    Ok(())
}

/// Solves a sparse program with the default simplicial LDL^T backend.
pub fn mehrotra_sparse(
    lp: &LinearProgram<SparseColMat<I, E>>,
    sol: &mut Solution,
    ctrl: &MehrotraCtrl,
) -> Result<Status, MehrotraError> {
    MehrotraPredictorCorrector::<_, SparseKkt<SimplicialLdlt>>::new(ctrl.clone()).solve(
        lp,
        sol,
        &mut SolverHooks::default(),
    )
}

/// Solves a dense program with faer's dense Bunch-Kaufman factorization.
pub fn mehrotra_dense(
    lp: &LinearProgram<Mat<E>>,
    sol: &mut Solution,
    ctrl: &MehrotraCtrl,
) -> Result<Status, MehrotraError> {
    MehrotraPredictorCorrector::<_, DenseKkt>::new(ctrl.clone()).solve(
        lp,
        sol,
        &mut SolverHooks::default(),
    )
}

/// Positional-argument entry point retained for source compatibility.
#[deprecated(note = "construct a `LinearProgram` and `Solution` and call `mehrotra_sparse`")]
#[allow(non_snake_case)]
pub fn Mehrotra(
    a: SparseColMat<I, E>,
    b: Col<E>,
    c: Col<E>,
    x: &mut Col<E>,
    y: &mut Col<E>,
    z: &mut Col<E>,
    ctrl: &MehrotraCtrl,
) -> Result<Status, MehrotraError> {
    let lp = LinearProgram::new(a, b, c).map_err(|_| MehrotraError::DimensionMismatch)?;
    let mut sol = Solution {
        x: x.clone(),
        y: y.clone(),
        z: z.clone(),
    };
    let status = mehrotra_sparse(&lp, &mut sol, ctrl)?;
    *x = sol.x;
    *y = sol.y;
    *z = sol.z;
    Ok(status)
}
