use derive_more::{Display, Error};
use faer::sparse::SparseColMatRef;
use faer::{Mat, MatMut, MatRef};

use crate::{E, I};

/// Errors raised by the factorization backends.
#[derive(Debug, Display, Error, PartialEq, Clone, Copy)]
pub enum LinearSolverError {
    #[display("Symbolic factorization error")]
    SymbolicFactorization,

    #[display("Numeric factorization error")]
    NumericFactorization,

    #[display("Singular matrix: zero pivot at elimination step {step}")]
    SingularMatrix { step: usize },

    #[display("Solver used before analyze/factorize")]
    Uninitialized,

    #[display("Memory reservation failed")]
    MemoryReservation,

    #[display("Memory allocation failed")]
    MemoryAllocation,

    #[display("Unable to solve linear system")]
    SolveFailed,

    #[display("Operand dimensions do not match")]
    DimensionMismatch,
}

/// Factor-then-solve interface for sparse symmetric systems.
///
/// The symbolic analysis (`analyze`) depends only on the sparsity pattern
/// and is meant to run once; `factorize` rebuilds the numeric factors for
/// new values with the same pattern, and `solve`/`solve_in_place` may be
/// called repeatedly against the current factors.
pub trait Factorization {
    fn new() -> Self
    where
        Self: Sized;

    /// Performs symbolic analysis of the given sparse matrix and prepares
    /// for numeric factorization.
    fn analyze(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError>;

    /// Performs numeric factorization after symbolic analysis.
    fn factorize(&mut self, mat: SparseColMatRef<I, E>) -> Result<(), LinearSolverError>;

    /// Solves the linear system in place for the given right-hand side.
    fn solve_in_place(&self, rhs: &mut MatMut<'_, E>) -> Result<(), LinearSolverError>;

    /// Solves the linear system and returns the solution.
    fn solve(&self, rhs: MatRef<'_, E>) -> Result<Mat<E>, LinearSolverError> {
        let mut sol = Mat::zeros(rhs.nrows(), rhs.ncols());
        sol.copy_from(rhs);
        self.solve_in_place(&mut sol.as_mut())?;
        Ok(sol)
    }
}
