//! Componentwise vector kernels and predicates on the non-negative orthant.

use faer::{Col, ColRef};

use crate::E;

pub(crate) fn cwise_multiply(x1: ColRef<'_, E>, x2: ColRef<'_, E>) -> Col<E> {
    Col::from_fn(x1.nrows(), |j| x1[j] * x2[j])
}

pub(crate) fn cwise_quotient(x1: ColRef<'_, E>, x2: ColRef<'_, E>) -> Col<E> {
    Col::from_fn(x1.nrows(), |j| x1[j] / x2[j])
}

pub(crate) fn col_min(x: ColRef<'_, E>) -> E {
    let mut minimum = E::INFINITY;
    for j in 0..x.nrows() {
        minimum = E::min(minimum, x[j]);
    }
    minimum
}

/// Number of components outside the strict interior of the cone.
pub(crate) fn num_nonpositive(x: ColRef<'_, E>) -> usize {
    (0..x.nrows()).filter(|&j| x[j] <= 0.0).count()
}

/// Largest `t >= 0` with `x + t * dx >= 0` componentwise, assuming `x > 0`.
///
/// Returns `E::INFINITY` when no component of `dx` is negative.
pub(crate) fn max_step(x: ColRef<'_, E>, dx: ColRef<'_, E>) -> E {
    let mut step = E::INFINITY;
    for j in 0..x.nrows() {
        if dx[j] < 0.0 {
            step = E::min(step, -x[j] / dx[j]);
        }
    }
    step
}

/// Maximum complementarity ratio `max_j x_j z_j / mu`.
///
/// Large values indicate that the pairwise products have drifted far from
/// their average; callers use this to hold the barrier parameter.
pub(crate) fn complement_ratio(x: ColRef<'_, E>, z: ColRef<'_, E>, mu: E) -> E {
    if mu <= 0.0 {
        return 1.0;
    }

    let mut ratio = 0.0f64;
    for j in 0..x.nrows() {
        ratio = E::max(ratio, x[j] * z[j] / mu);
    }
    ratio
}

/// Nesterov-Todd scaling point for the non-negative orthant:
/// `w_j = sqrt(x_j / z_j)`, the point with `X w^{-1} = Z w`.
pub(crate) fn nt_scaling_point(x: ColRef<'_, E>, z: ColRef<'_, E>) -> Col<E> {
    Col::from_fn(x.nrows(), |j| (x[j] / z[j]).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(data: &[E]) -> Col<E> {
        Col::from_fn(data.len(), |i| data[i])
    }

    // A representative strictly interior iterate: one variable pressed
    // toward the cone boundary, one far from it.
    fn iterate() -> (Col<E>, Col<E>) {
        (col(&[0.5, 2.0, 4.0]), col(&[2.0, 1.0, 0.25]))
    }

    #[test]
    fn test_complementarity_products_and_pivots() {
        let (x, z) = iterate();

        // r_mu = x o z.
        let r_mu = cwise_multiply(x.as_ref(), z.as_ref());
        assert_eq!(r_mu, col(&[1.0, 2.0, 1.0]));

        // z / x, the x-block pivots of the augmented system.
        let pivots = cwise_quotient(z.as_ref(), x.as_ref());
        assert_eq!(pivots, col(&[4.0, 0.5, 0.0625]));
    }

    #[test]
    fn test_cone_membership() {
        let (x, _) = iterate();
        assert_eq!(num_nonpositive(x.as_ref()), 0);
        assert_eq!(col_min(x.as_ref()), 0.5);

        // A dual slack that crossed the boundary after a bad step.
        let z = col(&[2.0, 0.0, -0.25]);
        assert_eq!(num_nonpositive(z.as_ref()), 2);
        assert_eq!(col_min(z.as_ref()), -0.25);
    }

    #[test]
    fn test_max_step_to_boundary() {
        let (x, _) = iterate();
        // x0 hits zero at t = 2, x1 at t = 0.5; x2 moves away.
        let dx = col(&[-0.25, -4.0, 1.0]);
        assert_eq!(max_step(x.as_ref(), dx.as_ref()), 0.5);

        // An interior-pointing direction never blocks.
        let dx_free = col(&[0.0, 1.0, 2.0]);
        assert_eq!(max_step(x.as_ref(), dx_free.as_ref()), E::INFINITY);
    }

    #[test]
    fn test_complement_ratio() {
        let (x, z) = iterate();
        // Products are (1, 2, 1), so mu = 4/3 and the worst ratio is 1.5.
        let mu = (x.transpose() * &z) / 3.0;
        assert!((complement_ratio(x.as_ref(), z.as_ref(), mu) - 1.5).abs() < 1e-15);
    }

    #[test]
    fn test_nt_scaling_point() {
        let (x, z) = iterate();
        let w = nt_scaling_point(x.as_ref(), z.as_ref());
        assert_eq!(w, col(&[0.5, 2.0f64.sqrt(), 4.0]));

        // X w^{-1} = Z w is what makes w the scaling point.
        for j in 0..3 {
            assert!((x[j] / w[j] - z[j] * w[j]).abs() < 1e-15);
        }
    }
}
