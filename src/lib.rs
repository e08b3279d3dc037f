//! # conifer
//!
//! A primal-dual interior-point solver for linear programs in standard
//! conic form:
//!
//! ```text
//! min  c^T x
//! s.t. A x = b
//!      x >= 0
//! ```
//!
//! together with the dual pair `(y, z >= 0)` satisfying `A^T y - z + c = 0`.
//! The solver is a Mehrotra predictor-corrector method that follows the
//! perturbed central path, with selectable linearizations of the KKT
//! conditions (full, augmented, or normal equations) and a regularized
//! iterative-refinement scheme around the sparse factorization.
//!
//! ## Example
//! ```
//! use faer::Col;
//! use faer::sparse::{SparseColMat, Triplet};
//! use conifer::lp::{LinearProgram, Solution};
//! use conifer::lp::mpc::{MehrotraCtrl, mehrotra_sparse};
//!
//! // min x0 + x1  s.t.  x0 + x1 = 1,  x >= 0
//! let a = SparseColMat::try_new_from_triplets(
//!     1,
//!     2,
//!     &[Triplet::new(0, 0, 1.0), Triplet::new(0, 1, 1.0)],
//! )
//! .unwrap();
//! let lp = LinearProgram::new(a, Col::ones(1), Col::ones(2)).unwrap();
//!
//! let mut sol = Solution::zeros(2, 1);
//! let status = mehrotra_sparse(&lp, &mut sol, &MehrotraCtrl::default()).unwrap();
//! assert_eq!(status, conifer::Status::Optimal);
//! ```

/// Scalar element type used throughout the crate.
pub type E = f64;
/// Index type used throughout the crate.
pub type I = usize;

pub mod hooks;
pub mod linalg;
pub mod lp;


/// Status codes reported by the solver.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    /// The solver is still running.
    #[default]
    InProgress,
    /// Converged: the composite error dropped below the target tolerance.
    Optimal,
    /// The iterate stopped moving (zero step or benign factorization
    /// failure) with the composite error below the minimum tolerance.
    Stalled,
    /// The iteration cap was reached with the composite error below the
    /// minimum tolerance.
    IterationLimit,
    /// A terminator stopped the solver due to a time limit.
    TimeLimit,
    /// A terminator stopped the solver (e.g. Ctrl-C).
    Interrupted,
}

impl Status {
    /// Whether this status represents an acceptable terminal solution.
    pub fn is_acceptable(self) -> bool {
        matches!(
            self,
            Status::Optimal | Status::Stalled | Status::IterationLimit
        )
    }
}
