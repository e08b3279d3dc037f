//! Sparse LDL^T factorization backends.
//!
//! Both solvers wrap faer's sparse Bunch-Kaufman-free LDL^T with an AMD
//! fill-reducing ordering. Symbolic analysis ([`Factorization::analyze`])
//! depends only on the sparsity pattern and is performed once; the numeric
//! factorization is rebuilt from new values on every call to
//! [`Factorization::factorize`]. The matrices handled here are symmetric
//! quasi-definite after regularization, which is exactly what the KKT
//! assembly produces.
//!
//! ## Example
//! ```
//! use faer::sparse::{SparseColMat, Triplet};
//! use conifer::linalg::ldlt::SimplicialLdlt;
//! use conifer::linalg::solver::Factorization;
//!
//! let triplets = vec![
//!     Triplet::new(0, 0, 2.0),
//!     Triplet::new(0, 1, -1.0),
//!     Triplet::new(1, 0, -1.0),
//!     Triplet::new(1, 1, 2.0),
//! ];
//! let mat = SparseColMat::try_new_from_triplets(2, 2, &triplets).unwrap();
//!
//! let mut solver = SimplicialLdlt::new();
//! solver.analyze(mat.as_ref()).unwrap();
//! solver.factorize(mat.as_ref()).unwrap();
//! let b = faer::Mat::from_fn(2, 1, |i, _| (i + 1) as f64);
//! let x = solver.solve(b.as_ref()).unwrap();
//! ```

use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::linalg::cholesky::ldlt::factor::LdltRegularization;
use faer::perm::{Perm, PermRef};
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::amd;
use faer::sparse::linalg::cholesky::simplicial::{
    self, SimplicialLdltRef, SymbolicSimplicialCholesky,
};
use faer::sparse::linalg::cholesky::supernodal::{
    self, SupernodalLdltRef, SymbolicSupernodalCholesky,
};
use faer::sparse::{SparseColMat, SparseColMatRef, SymbolicSparseColMat};
use faer::{MatMut, Side};

use crate::linalg::solver::{Factorization, LinearSolverError};
use crate::{E, I};

/// AMD fill-reducing permutation of the symmetric pattern.
fn amd_order(mat: SparseColMatRef<'_, I, E>) -> Result<Perm<I>, LinearSolverError> {
    let dim = mat.ncols();
    let nnz = mat.compute_nnz();

    let mut perm = Vec::new();
    let mut perm_inv = Vec::new();
    perm.try_reserve_exact(dim)
        .map_err(|_| LinearSolverError::MemoryReservation)?;
    perm_inv
        .try_reserve_exact(dim)
        .map_err(|_| LinearSolverError::MemoryReservation)?;
    perm.resize(dim, 0usize);
    perm_inv.resize(dim, 0usize);

    let mut mem = MemBuffer::try_new(amd::order_scratch::<I>(dim, nnz))
        .map_err(|_| LinearSolverError::MemoryAllocation)?;
    amd::order(
        &mut perm,
        &mut perm_inv,
        mat.symbolic(),
        amd::Control::default(),
        MemStack::new(&mut mem),
    )
    .map_err(|_| LinearSolverError::SymbolicFactorization)?;

    Ok(unsafe { Perm::new_unchecked(perm.into_boxed_slice(), perm_inv.into_boxed_slice()) })
}

/// Extracts one triangle of `P M P^T` as its own sparse matrix.
fn permute_triangle(
    mat: SparseColMatRef<'_, I, E>,
    perm: PermRef<'_, I>,
    side: Side,
) -> Result<SparseColMat<I, E>, LinearSolverError> {
    let dim = mat.ncols();
    let nnz = mat.compute_nnz();

    let mut col_ptrs = Vec::new();
    let mut row_indices = Vec::new();
    let mut values = Vec::new();

    col_ptrs
        .try_reserve_exact(dim + 1)
        .map_err(|_| LinearSolverError::MemoryReservation)?;
    col_ptrs.resize(dim + 1, 0usize);
    row_indices
        .try_reserve_exact(nnz)
        .map_err(|_| LinearSolverError::MemoryReservation)?;
    row_indices.resize(nnz, 0usize);
    values
        .try_reserve_exact(nnz)
        .map_err(|_| LinearSolverError::MemoryReservation)?;
    values.resize(nnz, 0.0f64);

    let mut mem = MemBuffer::try_new(faer::sparse::utils::permute_self_adjoint_scratch::<I>(dim))
        .map_err(|_| LinearSolverError::MemoryAllocation)?;
    faer::sparse::utils::permute_self_adjoint_to_unsorted(
        &mut values,
        &mut col_ptrs,
        &mut row_indices,
        mat.rb(),
        perm.rb(),
        side,
        side,
        MemStack::new(&mut mem),
    );

    Ok(SparseColMat::<I, E>::new(
        unsafe { SymbolicSparseColMat::new_unchecked(dim, dim, col_ptrs, None, row_indices) },
        values,
    ))
}

/// Sparse LDL^T solver using the simplicial (column-at-a-time) method.
///
/// Preferred for the thin, very sparse KKT systems produced by small and
/// medium problems.
pub struct SimplicialLdlt {
    symbolic: Option<SymbolicSimplicialCholesky<I>>,
    perm: Option<Perm<I>>,
    l_values: Vec<E>,
}

impl Factorization for SimplicialLdlt {
    fn new() -> Self {
        Self {
            symbolic: None,
            perm: None,
            l_values: Vec::new(),
        }
    }

    fn analyze(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), LinearSolverError> {
        let dim = mat.ncols();
        let nnz = mat.compute_nnz();

        let perm = amd_order(mat)?;
        let mat_upper = permute_triangle(mat, perm.as_ref(), Side::Upper)?;
        self.perm = Some(perm);

        self.symbolic = Some({
            let mut mem = MemBuffer::try_new(StackReq::any_of(&[
                simplicial::prefactorize_symbolic_cholesky_scratch::<I>(dim, nnz),
                simplicial::factorize_simplicial_symbolic_cholesky_scratch::<I>(dim),
            ]))
            .map_err(|_| LinearSolverError::MemoryAllocation)?;
            let stack = MemStack::new(&mut mem);

            let mut etree = Vec::new();
            let mut col_counts = Vec::new();
            etree
                .try_reserve_exact(dim)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            etree.resize(dim, 0isize);
            col_counts
                .try_reserve_exact(dim)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            col_counts.resize(dim, 0usize);

            simplicial::prefactorize_symbolic_cholesky(
                &mut etree,
                &mut col_counts,
                mat_upper.symbolic(),
                stack,
            );
            simplicial::factorize_simplicial_symbolic_cholesky(
                mat_upper.symbolic(),
                // SAFETY: `etree` was filled by
                // `simplicial::prefactorize_symbolic_cholesky` above.
                unsafe { simplicial::EliminationTreeRef::from_inner(&etree) },
                &col_counts,
                stack,
            )
            .map_err(|_| LinearSolverError::SymbolicFactorization)?
        });

        Ok(())
    }

    fn factorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), LinearSolverError> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        let dim = mat.ncols();

        let mat_upper = permute_triangle(mat, perm.as_ref(), Side::Upper)?;

        self.l_values = Vec::new();
        self.l_values
            .try_reserve_exact(symbolic.len_val())
            .map_err(|_| LinearSolverError::MemoryReservation)?;
        self.l_values.resize(symbolic.len_val(), 0.0f64);

        let mut mem = MemBuffer::try_new(
            simplicial::factorize_simplicial_numeric_ldlt_scratch::<I, E>(dim),
        )
        .map_err(|_| LinearSolverError::MemoryAllocation)?;

        simplicial::factorize_simplicial_numeric_ldlt::<I, E>(
            &mut self.l_values,
            mat_upper.rb(),
            LdltRegularization::default(),
            symbolic,
            MemStack::new(&mut mem),
        )
        .map_err(|_| LinearSolverError::NumericFactorization)?;

        Ok(())
    }

    fn solve_in_place(&self, sol: &mut MatMut<'_, E>) -> Result<(), LinearSolverError> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        if self.l_values.is_empty() {
            return Err(LinearSolverError::Uninitialized);
        }
        let ldlt = SimplicialLdltRef::<'_, I, E>::new(symbolic, &self.l_values);

        let dim = symbolic.ncols();
        let mut mem = MemBuffer::try_new(StackReq::all_of(&[
            faer::perm::permute_rows_in_place_scratch::<I, E>(dim, sol.ncols()),
            symbolic.solve_in_place_scratch::<E>(dim),
        ]))
        .map_err(|_| LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref(), stack);
        ldlt.solve_in_place_with_conj(faer::Conj::No, sol.rb_mut(), faer::Par::Seq, stack);
        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref().inverse(), stack);

        Ok(())
    }
}

/// Sparse LDL^T solver using the supernodal (blocked) method.
pub struct SupernodalLdlt {
    symbolic: Option<SymbolicSupernodalCholesky<I>>,
    perm: Option<Perm<I>>,
    l_values: Vec<E>,
}

impl Factorization for SupernodalLdlt {
    fn new() -> Self {
        Self {
            symbolic: None,
            perm: None,
            l_values: Vec::new(),
        }
    }

    fn analyze(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), LinearSolverError> {
        let dim = mat.ncols();
        let nnz = mat.compute_nnz();

        let perm = amd_order(mat)?;
        let mat_upper = permute_triangle(mat, perm.as_ref(), Side::Upper)?;
        self.perm = Some(perm);

        self.symbolic = Some({
            let mut mem = MemBuffer::try_new(StackReq::any_of(&[
                simplicial::prefactorize_symbolic_cholesky_scratch::<I>(dim, nnz),
                supernodal::factorize_supernodal_symbolic_cholesky_scratch::<I>(dim),
            ]))
            .map_err(|_| LinearSolverError::MemoryAllocation)?;
            let stack = MemStack::new(&mut mem);

            let mut etree = Vec::new();
            let mut col_counts = Vec::new();
            etree
                .try_reserve_exact(dim)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            etree.resize(dim, 0isize);
            col_counts
                .try_reserve_exact(dim)
                .map_err(|_| LinearSolverError::MemoryReservation)?;
            col_counts.resize(dim, 0usize);

            simplicial::prefactorize_symbolic_cholesky(
                &mut etree,
                &mut col_counts,
                mat_upper.symbolic(),
                stack,
            );
            supernodal::factorize_supernodal_symbolic_cholesky(
                mat_upper.symbolic(),
                // SAFETY: `etree` was filled by
                // `simplicial::prefactorize_symbolic_cholesky` above.
                unsafe { simplicial::EliminationTreeRef::from_inner(&etree) },
                &col_counts,
                stack,
                faer::sparse::linalg::SymbolicSupernodalParams { relax: None },
            )
            .map_err(|_| LinearSolverError::SymbolicFactorization)?
        });

        Ok(())
    }

    fn factorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), LinearSolverError> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;

        let mat_lower = permute_triangle(mat, perm.as_ref(), Side::Lower)?;

        self.l_values = Vec::new();
        self.l_values
            .try_reserve_exact(symbolic.len_val())
            .map_err(|_| LinearSolverError::MemoryReservation)?;
        self.l_values.resize(symbolic.len_val(), 0.0f64);

        let mut mem = MemBuffer::try_new(
            supernodal::factorize_supernodal_numeric_ldlt_scratch::<I, E>(
                symbolic,
                faer::Par::Seq,
                Default::default(),
            ),
        )
        .map_err(|_| LinearSolverError::MemoryAllocation)?;

        supernodal::factorize_supernodal_numeric_ldlt::<I, E>(
            &mut self.l_values,
            mat_lower.rb(),
            LdltRegularization::default(),
            symbolic,
            faer::Par::Seq,
            MemStack::new(&mut mem),
            Default::default(),
        )
        .map_err(|_| LinearSolverError::NumericFactorization)?;

        Ok(())
    }

    fn solve_in_place(&self, sol: &mut MatMut<'_, E>) -> Result<(), LinearSolverError> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        if self.l_values.is_empty() {
            return Err(LinearSolverError::Uninitialized);
        }
        let ldlt = SupernodalLdltRef::<'_, I, E>::new(symbolic, &self.l_values);

        let dim = symbolic.ncols();
        let mut mem = MemBuffer::try_new(StackReq::all_of(&[
            faer::perm::permute_rows_in_place_scratch::<I, E>(dim, sol.ncols()),
            symbolic.solve_in_place_scratch::<E>(dim, faer::Par::Seq),
        ]))
        .map_err(|_| LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref(), stack);
        ldlt.solve_in_place_with_conj(faer::Conj::No, sol.rb_mut(), faer::Par::Seq, stack);
        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref().inverse(), stack);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use faer::rand::SeedableRng;
    use faer::rand::rngs::StdRng;
    use faer::stats::DistributionExt;
    use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
    use rstest::rstest;
    use rstest_reuse::{apply, template};

    enum Backend {
        Simplicial,
        Supernodal,
    }

    fn check_backend(mat: SparseColMat<I, E>, backend: Backend, n_rhs: usize) {
        let mut solver: Box<dyn Factorization> = match backend {
            Backend::Simplicial => Box::new(SimplicialLdlt::new()),
            Backend::Supernodal => Box::new(SupernodalLdlt::new()),
        };
        solver.analyze(mat.as_ref()).unwrap();
        solver.factorize(mat.as_ref()).unwrap();

        let rng = &mut StdRng::seed_from_u64(0);
        let n = mat.ncols();

        for _ in 0..n_rhs {
            let col: Mat<E> = CwiseMatDistribution {
                nrows: n,
                ncols: 1,
                dist: StandardNormal,
            }
            .rand(rng);

            let result = solver.solve(col.as_ref()).expect("Unable to solve");
            assert!((&col - &mat * &result).norm_l2() < 1e-10);
        }
    }

    fn tridiagonal(n: usize, diag: E) -> SparseColMat<I, E> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(faer::sparse::Triplet::new(i, i, diag));
            if i + 1 < n {
                triplets.push(faer::sparse::Triplet::new(i, i + 1, -1.0));
                triplets.push(faer::sparse::Triplet::new(i + 1, i, -1.0));
            }
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    #[template]
    #[rstest]
    fn backends(#[values(Backend::Simplicial, Backend::Supernodal)] backend: Backend) {}

    #[apply(backends)]
    fn test_positive_definite(backend: Backend) {
        check_backend(tridiagonal(16, 4.0), backend, 5);
    }

    #[apply(backends)]
    fn test_quasi_definite_saddle_point(backend: Backend) {
        // [ I  a ; a^T  -1 ], the shape of a tiny augmented KKT system.
        let n = 5;
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(faer::sparse::Triplet::new(i, i, 1.0));
            triplets.push(faer::sparse::Triplet::new(i, n, (i + 1) as E));
            triplets.push(faer::sparse::Triplet::new(n, i, (i + 1) as E));
        }
        triplets.push(faer::sparse::Triplet::new(n, n, -1.0));
        let mat = SparseColMat::try_new_from_triplets(n + 1, n + 1, &triplets).unwrap();

        check_backend(mat, backend, 3);
    }

    #[apply(backends)]
    fn test_factorize_before_analyze_fails(backend: Backend) {
        let mat = tridiagonal(4, 4.0);
        let result = match backend {
            Backend::Simplicial => SimplicialLdlt::new().factorize(mat.as_ref()),
            Backend::Supernodal => SupernodalLdlt::new().factorize(mat.as_ref()),
        };
        assert_eq!(result, Err(LinearSolverError::Uninitialized));
    }
}
