//! Step-length control and the combined corrector right-hand side.

use faer::{Col, ColRef};

use crate::E;
use crate::linalg::vector_ops::{cwise_multiply, max_step};
use crate::lp::Solution;
use crate::lp::mpc::{CentralityRule, Direction, state::IterationState};

/// Largest steps in `(0, 1]` keeping `x` and `z` nonnegative along the
/// affine direction, optionally forced equal.
pub(super) fn affine_step_lengths(
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    direction: &Direction,
    force_same_step: bool,
) -> (E, E) {
    let alpha_primal = E::min(max_step(x, direction.dx.as_ref()), 1.0);
    let alpha_dual = E::min(max_step(z, direction.dz.as_ref()), 1.0);
    if force_same_step {
        let alpha = E::min(alpha_primal, alpha_dual);
        (alpha, alpha)
    } else {
        (alpha_primal, alpha_dual)
    }
}

/// Average complementarity at the affine trial point
/// `(x + alpha_p dx, z + alpha_d dz)`.
pub(super) fn affine_complementarity(
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    direction: &Direction,
    alpha_primal: E,
    alpha_dual: E,
) -> E {
    let x_trial = x.to_owned() + alpha_primal * &direction.dx;
    let z_trial = z.to_owned() + alpha_dual * &direction.dz;
    (x_trial.transpose() * &z_trial) / x.nrows() as E
}

/// Centrality parameter `sigma` in `[0, 1]`.
pub(super) fn centrality(
    rule: CentralityRule,
    mu: E,
    mu_affine: E,
    alpha_primal_affine: E,
    alpha_dual_affine: E,
) -> E {
    match rule {
        CentralityRule::Mehrotra => {
            if mu <= 0.0 {
                return 0.0;
            }
            (mu_affine / mu).powi(3).clamp(0.0, 1.0)
        }
        CentralityRule::StepLength => {
            let alpha = E::min(alpha_primal_affine, alpha_dual_affine);
            (1.0 - alpha).powi(3).clamp(0.0, 1.0)
        }
    }
}

/// Right-hand-side residuals for the combined predictor-corrector solve:
/// the equality residuals scaled by `1 - sigma`, and the complementarity
/// residual shifted toward the central path, with the second-order
/// Mehrotra cross term when requested.
pub(super) fn combined_residuals(
    state: &IterationState,
    sigma: E,
    affine: &Direction,
    mehrotra: bool,
) -> (Col<E>, Col<E>, Col<E>) {
    let r_c = (1.0 - sigma) * &state.r_c;
    let r_b = (1.0 - sigma) * &state.r_b;

    let shift = sigma * state.mu;
    let mut r_mu = Col::from_fn(state.r_mu.nrows(), |j| state.r_mu[j] - shift);
    if mehrotra {
        r_mu += cwise_multiply(affine.dx.as_ref(), affine.dz.as_ref());
    }

    (r_c, r_b, r_mu)
}

/// Steps actually taken: `max_step_ratio` of the distance to the cone
/// boundary, capped at one.
pub(super) fn step_lengths(
    x: ColRef<'_, E>,
    z: ColRef<'_, E>,
    direction: &Direction,
    max_step_ratio: E,
    force_same_step: bool,
) -> (E, E) {
    let alpha_primal = E::min(max_step_ratio * max_step(x, direction.dx.as_ref()), 1.0);
    let alpha_dual = E::min(max_step_ratio * max_step(z, direction.dz.as_ref()), 1.0);
    if force_same_step {
        let alpha = E::min(alpha_primal, alpha_dual);
        (alpha, alpha)
    } else {
        (alpha_primal, alpha_dual)
    }
}

/// Advances the iterate along the combined direction.
pub(super) fn advance(sol: &mut Solution, direction: &Direction, alpha_primal: E, alpha_dual: E) {
    sol.x += alpha_primal * &direction.dx;
    sol.y += alpha_dual * &direction.dy;
    sol.z += alpha_dual * &direction.dz;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direction(dx: &[E], dz: &[E]) -> Direction {
        Direction {
            dx: Col::from_fn(dx.len(), |i| dx[i]),
            dy: Col::zeros(1),
            dz: Col::from_fn(dz.len(), |i| dz[i]),
        }
    }

    #[test]
    fn test_affine_step_lengths_clip_at_one() {
        let x = Col::from_fn(2, |_| 1.0);
        let z = Col::from_fn(2, |_| 1.0);
        let dir = direction(&[0.5, 0.5], &[-2.0, 1.0]);

        let (a_pri, a_dual) = affine_step_lengths(x.as_ref(), z.as_ref(), &dir, false);
        assert_eq!(a_pri, 1.0);
        assert_eq!(a_dual, 0.5);

        let (a_pri, a_dual) = affine_step_lengths(x.as_ref(), z.as_ref(), &dir, true);
        assert_eq!((a_pri, a_dual), (0.5, 0.5));
    }

    #[test]
    fn test_centrality_rules() {
        // Mehrotra: (mu_aff / mu)^3, clamped.
        assert!((centrality(CentralityRule::Mehrotra, 1.0, 0.5, 0.9, 0.9) - 0.125).abs() < 1e-15);
        assert_eq!(centrality(CentralityRule::Mehrotra, 1.0, 2.0, 0.9, 0.9), 1.0);
        // Step-length: (1 - min(alphas))^3.
        assert!((centrality(CentralityRule::StepLength, 1.0, 0.5, 0.9, 0.5) - 0.125).abs() < 1e-15);
    }
}
