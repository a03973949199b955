//! Batched preconditioned conjugate gradient.
//!
//! ** NOTE: We recommend using the high-level functions in [`crate::solvers`] instead. This
//! kernel expects an operator that is already symmetric positive semi-definite; the shifted
//! and possibly indefinite systems handled by the solver go through
//! [`crate::algorithms::shift::ShiftedSystem`] first.
//!
//! Every batch entry and every column is an independent CG run. They are advanced together,
//! with step sizes computed per `(batch, column)` pair by reducing only over the `n` axis. The
//! stopping test is global: the iteration ends once the largest preconditioned residual
//! `max |ρ|` over the whole batch is below the threshold.
//!
//! Non-convergence is not an error. When the iteration budget is exhausted the last iterate is
//! returned and [`CgOutput::converged`] is `false`.

use super::{
    CgCallback, CgOutput, SAFE_DIVIDE_EPS, ZERO_RHS_ATOL, column_dot, max_abs_coeff, safe_divide,
};
use crate::batch::Batch;
use log::{debug, info, trace};

/// Fully resolved parameters of a CG run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgConfig {
    /// Maximum number of iterations. `0` returns the initial zero iterate.
    pub max_iterations: usize,
    /// The iteration stops once `max |ρ|` falls below this value.
    pub min_residual: f64,
    /// Log every iteration at `info` level instead of `trace`.
    pub verbose: bool,
}

/// Solves `operator(X) = b` by preconditioned conjugate gradient, starting from `X = 0`.
///
/// # Arguments
/// * `operator`: A symmetric positive semi-definite operator.
/// * `b`: The right-hand side, of shape `(nbatch, n, ncols)`.
/// * `precond`: A symmetric positive definite preconditioner. Pass `|x| x.clone()` for none.
/// * `config`: Iteration budget, stopping threshold and verbosity.
/// * `callback`: An optional callback invoked after each non-final iteration with the
///   iteration count and `max |ρ|`; returning `false` stops the iteration.
///
/// # Returns
/// A [`CgOutput`] holding the last iterate and the convergence status.
pub fn conjugate_gradient<A, P>(
    operator: A,
    b: &Batch,
    precond: P,
    config: &CgConfig,
    mut callback: Option<&mut CgCallback<'_>>,
) -> CgOutput
where
    A: Fn(&Batch) -> Batch,
    P: Fn(&Batch) -> Batch,
{
    let (nbatch, n, ncols) = b.shape();
    let mut x = Batch::zeros(nbatch, n, ncols);

    // An all-zero right-hand side has the exact solution zero.
    if b.is_zero(ZERO_RHS_ATOL) {
        debug!("CG: zero right-hand side, skipping iteration");
        return CgOutput {
            x,
            iterations: 0,
            converged: true,
            residual: 0.0,
        };
    }

    // X_0 = 0, so R_0 = b.
    let mut r = b.clone();
    let mut p = precond(&r);
    let mut rho = column_dot(&r, &p);
    let mut residual = max_abs_coeff(&rho);
    let mut converged = false;
    let mut iterations = 0;

    for i in 0..config.max_iterations {
        let q = operator(&p);
        let alpha = safe_divide(&rho, &column_dot(&p, &q));
        x = x.add_scaled_columns(&alpha, &p);
        r = r.add_scaled_columns(&-&alpha, &q);

        let z = precond(&r);
        let rho_new = column_dot(&r, &z);
        iterations = i + 1;
        residual = max_abs_coeff(&rho_new);

        if config.verbose {
            info!("Iter {}: {:.3e}", iterations, residual);
        } else {
            trace!("Iter {}: {:.3e}", iterations, residual);
        }

        // A NaN residual never meets the threshold.
        if residual < config.min_residual {
            converged = true;
            break;
        }

        // The callback can signal for an early, graceful stop.
        if let Some(ref mut cb) = callback {
            if !cb(iterations, residual) {
                debug!("CG: stopped by callback after {} iterations", iterations);
                break;
            }
        }

        let beta = safe_divide(&rho_new, &rho);
        p = z.add_scaled_columns(&beta, &p);
        rho = rho_new;
    }

    if !converged {
        debug!(
            "CG: no convergence after {} iterations (max |rho| = {:.3e}, threshold {:.3e}, clamp {:.0e})",
            iterations, residual, config.min_residual, SAFE_DIVIDE_EPS
        );
    }

    CgOutput {
        x,
        iterations,
        converged,
        residual,
    }
}
