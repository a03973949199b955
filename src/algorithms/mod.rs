//! Numerical kernels of the solver and the helpers they share.
//!
//! ** NOTE: We recommend using the high-level functions in [`crate::solvers`] instead. The
//! kernels in this module skip all validation and option resolution.
//!
//! - [`cg`]: batched preconditioned conjugate gradient on an arbitrary unary operator.
//! - [`shift`]: the shift and symmetrization adapter that turns `A - bias ⊙ M` into the
//!   positive-semi-definite operator consumed by [`cg`].
//!
//! All coefficients produced here (step sizes, residual norms, dot products) are per batch
//! entry and per column, stored as `nbatch x ncols` matrices.

use crate::batch::Batch;
use faer::Mat;

pub mod cg;
pub mod shift;

/// Denominators smaller than this in magnitude are clamped before dividing.
pub const SAFE_DIVIDE_EPS: f64 = 1e-10;

/// Absolute tolerance below which a right-hand side is treated as identically zero.
pub const ZERO_RHS_ATOL: f64 = 1e-8;

/// Callback invoked after every CG iteration with the iteration count and the largest
/// absolute preconditioned residual `max |ρ|` over the batch.
///
/// Returning `false` stops the iteration early.
pub type CgCallback<'a> = dyn FnMut(usize, f64) -> bool + 'a;

/// Result of a run of [`cg::conjugate_gradient`].
#[derive(Debug, Clone)]
pub struct CgOutput {
    /// Final iterate.
    pub x: Batch,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether `max |ρ|` fell below the requested threshold.
    pub converged: bool,
    /// Last observed `max |ρ|`.
    pub residual: f64,
}

/// Elementwise `num / den`, with every `|den| < 1e-10` replaced by `+1e-10`.
///
/// The clamped value is always positive, the sign of a tiny negative denominator is dropped.
pub fn safe_divide(num: &Mat<f64>, den: &Mat<f64>) -> Mat<f64> {
    assert_eq!(
        (num.nrows(), num.ncols()),
        (den.nrows(), den.ncols()),
        "safe_divide: operand shapes differ."
    );
    Mat::from_fn(num.nrows(), num.ncols(), |i, j| {
        let d = den[(i, j)];
        let d = if d.abs() < SAFE_DIVIDE_EPS {
            SAFE_DIVIDE_EPS
        } else {
            d
        };
        num[(i, j)] / d
    })
}

/// Column-wise dot product reducing over the `n` axis: `out[(b, j)] = Σ_i c[b][i, j] d[b][i, j]`.
pub fn column_dot(c: &Batch, d: &Batch) -> Mat<f64> {
    assert_eq!(
        c.shape(),
        d.shape(),
        "column_dot: batch shapes differ ({:?} vs {:?}).",
        c.shape(),
        d.shape(),
    );
    let (nbatch, nrows, ncols) = c.shape();
    Mat::from_fn(nbatch, ncols, |b, j| {
        let (cb, db) = (c.block(b), d.block(b));
        (0..nrows).map(|i| cb[(i, j)] * db[(i, j)]).sum()
    })
}

/// Largest absolute entry of a coefficient matrix, NaN if any entry is NaN.
pub(crate) fn max_abs_coeff(m: &Mat<f64>) -> f64 {
    let mut out = 0.0_f64;
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let v = m[(i, j)].abs();
            if v.is_nan() {
                return f64::NAN;
            }
            out = out.max(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_safe_divide_clamps_small_denominators() {
        let num = mat![[1.0, 1.0, 6.0, 1.0]];
        let den = mat![[0.0, -1e-12, 3.0, -2.0]];
        let out = safe_divide(&num, &den);
        assert!((out[(0, 0)] / 1e10 - 1.0).abs() < 1e-12);
        // A tiny negative denominator is clamped to the positive epsilon.
        assert_eq!(out[(0, 1)], out[(0, 0)]);
        assert_eq!(out[(0, 2)], 2.0);
        assert_eq!(out[(0, 3)], -0.5);
    }

    #[test]
    fn test_column_dot_reduces_over_rows_only() {
        let c = Batch::from_fn(2, 3, 2, |b, i, j| (b + 1) as f64 * (i + j) as f64);
        let d = Batch::from_fn(2, 3, 2, |_, _, _| 1.0);
        let dot = column_dot(&c, &d);
        assert_eq!((dot.nrows(), dot.ncols()), (2, 2));
        // batch 0: column 0 sums 0+1+2, column 1 sums 1+2+3.
        assert_eq!(dot[(0, 0)], 3.0);
        assert_eq!(dot[(0, 1)], 6.0);
        assert_eq!(dot[(1, 0)], 6.0);
        assert_eq!(dot[(1, 1)], 12.0);
        assert_eq!(max_abs_coeff(&(-&dot)), 12.0);
    }

    #[test]
    fn test_max_abs_coeff_keeps_nan() {
        assert!(max_abs_coeff(&mat![[1.0, f64::NAN, 3.0]]).is_nan());
        assert_eq!(max_abs_coeff(&mat![[1.0, -4.0, 3.0]]), 4.0);
    }
}
