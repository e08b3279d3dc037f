use derive_more::{Display, Error};
use faer::Col;

use crate::linalg::matrix::ConstraintMatrix;
use crate::E;

pub mod mpc;

/// A linear program in standard conic form:
///
/// ```text
/// min  c^T x
/// s.t. A x = b
///      x >= 0
/// ```
///
/// The constraint matrix kind `M` is either a dense [`faer::Mat`] or a
/// sparse [`faer::sparse::SparseColMat`]; the solver monomorphizes over
/// both.
#[derive(Clone)]
pub struct LinearProgram<M: ConstraintMatrix> {
    /// Constraint matrix of shape `n_cons x n_vars`.
    a: M,
    /// Right-hand side of the equality constraints.
    b: Col<E>,
    /// Objective function coefficients.
    c: Col<E>,
}

/// Error constructing a [`LinearProgram`] from mismatched operands.
#[derive(Debug, Display, Error, PartialEq, Eq, Clone, Copy)]
#[display("operand shapes do not describe a linear program")]
pub struct ShapeError;

impl<M: ConstraintMatrix> LinearProgram<M> {
    /// Creates a new linear program, checking operand shapes.
    pub fn new(a: M, b: Col<E>, c: Col<E>) -> Result<Self, ShapeError> {
        let (n_cons, n_vars) = a.shape();
        if b.nrows() != n_cons || c.nrows() != n_vars {
            return Err(ShapeError);
        }
        Ok(Self { a, b, c })
    }

    pub fn a(&self) -> &M {
        &self.a
    }

    pub fn b(&self) -> &Col<E> {
        &self.b
    }

    pub fn c(&self) -> &Col<E> {
        &self.c
    }

    /// Returns the number of variables (columns of `A`).
    pub fn num_vars(&self) -> usize {
        self.c.nrows()
    }

    /// Returns the number of constraints (rows of `A`).
    pub fn num_cons(&self) -> usize {
        self.b.nrows()
    }

    /// Returns `(n_vars, n_cons)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.num_vars(), self.num_cons())
    }
}

/// Primal-dual iterate `(x, y, z)`.
///
/// The solver maintains `x > 0` and `z > 0` componentwise across all
/// iterations; handing it an interior start that violates this is a logic
/// error, not a recoverable failure.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Primal variables, length `n_vars`.
    pub x: Col<E>,
    /// Dual variables of the equality constraints, length `n_cons`.
    pub y: Col<E>,
    /// Dual slacks of the cone constraint, length `n_vars`.
    pub z: Col<E>,
}

impl Solution {
    /// An all-zero triple, to be overwritten by the solver's initializer.
    pub fn zeros(n_vars: usize, n_cons: usize) -> Self {
        Self {
            x: Col::zeros(n_vars),
            y: Col::zeros(n_cons),
            z: Col::zeros(n_vars),
        }
    }

    /// Whether the triple matches the program's dimensions.
    pub fn conforms_to<M: ConstraintMatrix>(&self, lp: &LinearProgram<M>) -> bool {
        let (n_vars, n_cons) = lp.dims();
        self.x.nrows() == n_vars && self.y.nrows() == n_cons && self.z.nrows() == n_vars
    }
}
