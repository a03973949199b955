//! Finite-difference gradient checking.
//!
//! Verifies adjoint gradients against numerical derivatives of a scalar loss. Each entry of the
//! input is perturbed in turn and the loss re-evaluated:
//!
//! - **Central difference**: `f'(x) ≈ [f(x+h) - f(x-h)] / (2h)` (default)
//! - **Forward difference**: `f'(x) ≈ [f(x+h) - f(x)] / h`
//!
//! An entry fails the check when both its absolute and its relative difference exceed the
//! configured tolerances.

use crate::batch::Batch;
use anyhow::{Result, ensure};
use faer::Mat;
use log::{info, warn};

/// Gradient checking configuration.
#[derive(Debug, Clone)]
pub struct GradCheckConfig {
    /// Step size for finite differences (default: 1e-5)
    pub epsilon: f64,

    /// Relative tolerance for gradient comparison (default: 1e-3)
    pub rtol: f64,

    /// Absolute tolerance for gradient comparison (default: 1e-5)
    pub atol: f64,

    /// Use central difference (more accurate but 2x slower)
    pub use_central_diff: bool,

    /// Log every mismatching entry
    pub verbose: bool,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            rtol: 1e-3,
            atol: 1e-5,
            use_central_diff: true,
            verbose: false,
        }
    }
}

/// Result of gradient checking.
#[derive(Debug, Clone, PartialEq)]
pub struct GradCheckResult {
    /// Maximum absolute difference between analytical and numerical gradients
    pub max_abs_diff: f64,

    /// Maximum relative difference
    pub max_rel_diff: f64,

    /// Whether the gradient check passed
    pub passed: bool,

    /// Number of elements checked
    pub num_elements: usize,

    /// Number of elements that failed the check
    pub num_failures: usize,
}

/// Numerical gradient of a scalar loss with respect to every entry of a matrix.
pub fn numerical_gradient_mat<F>(f: F, x: &Mat<f64>, config: &GradCheckConfig) -> Result<Mat<f64>>
where
    F: Fn(&Mat<f64>) -> Result<f64>,
{
    let base = if config.use_central_diff { None } else { Some(f(x)?) };
    let mut grad = Mat::zeros(x.nrows(), x.ncols());
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            let perturbed = |h: f64| {
                let mut xp = x.clone();
                xp[(i, j)] += h;
                f(&xp)
            };
            grad[(i, j)] = difference(perturbed, base, config)?;
        }
    }
    Ok(grad)
}

/// Numerical gradient of a scalar loss with respect to every entry of a batch.
pub fn numerical_gradient_batch<F>(f: F, x: &Batch, config: &GradCheckConfig) -> Result<Batch>
where
    F: Fn(&Batch) -> Result<f64>,
{
    let base = if config.use_central_diff { None } else { Some(f(x)?) };
    let (nbatch, nrows, ncols) = x.shape();
    let mut grad: Vec<Mat<f64>> = (0..nbatch).map(|_| Mat::zeros(nrows, ncols)).collect();
    for (b, block) in grad.iter_mut().enumerate() {
        for j in 0..ncols {
            for i in 0..nrows {
                let perturbed = |h: f64| {
                    let mut blocks = x.blocks().to_vec();
                    blocks[b][(i, j)] += h;
                    f(&Batch::from_blocks(blocks)?)
                };
                block[(i, j)] = difference(perturbed, base, config)?;
            }
        }
    }
    Ok(Batch::from_blocks(grad)?)
}

fn difference<P>(perturbed: P, base: Option<f64>, config: &GradCheckConfig) -> Result<f64>
where
    P: Fn(f64) -> Result<f64>,
{
    let h = config.epsilon;
    match base {
        // Forward difference: [f(x+h) - f(x)] / h
        Some(f0) => Ok((perturbed(h)? - f0) / h),
        // Central difference: [f(x+h) - f(x-h)] / (2h)
        None => Ok((perturbed(h)? - perturbed(-h)?) / (2.0 * h)),
    }
}

/// Compares two matrices of gradients entry by entry.
pub fn compare_mats(
    analytical: &Mat<f64>,
    numerical: &Mat<f64>,
    config: &GradCheckConfig,
) -> Result<GradCheckResult> {
    ensure!(
        (analytical.nrows(), analytical.ncols()) == (numerical.nrows(), numerical.ncols()),
        "Gradient shape {}x{} doesn't match numerical shape {}x{}",
        analytical.nrows(),
        analytical.ncols(),
        numerical.nrows(),
        numerical.ncols()
    );
    compare_gradients(&flatten(analytical), &flatten(numerical), config)
}

/// Compares two batches of gradients entry by entry.
pub fn compare_batches(
    analytical: &Batch,
    numerical: &Batch,
    config: &GradCheckConfig,
) -> Result<GradCheckResult> {
    ensure!(
        analytical.shape() == numerical.shape(),
        "Gradient shape {:?} doesn't match numerical shape {:?}",
        analytical.shape(),
        numerical.shape()
    );
    let a: Vec<f64> = analytical.blocks().iter().flat_map(flatten).collect();
    let n: Vec<f64> = numerical.blocks().iter().flat_map(flatten).collect();
    compare_gradients(&a, &n, config)
}

/// Compares analytical and numerical gradients given as flat slices.
pub fn compare_gradients(
    analytical: &[f64],
    numerical: &[f64],
    config: &GradCheckConfig,
) -> Result<GradCheckResult> {
    ensure!(
        analytical.len() == numerical.len(),
        "Length mismatch: {} vs {}",
        analytical.len(),
        numerical.len()
    );

    let mut max_abs_diff = 0.0_f64;
    let mut max_rel_diff = 0.0_f64;
    let mut num_failures = 0;

    for (idx, (&a_val, &n_val)) in analytical.iter().zip(numerical).enumerate() {
        let abs_diff = (a_val - n_val).abs();
        let rel_diff = if n_val.abs() > f64::EPSILON {
            abs_diff / n_val.abs()
        } else {
            abs_diff
        };

        max_abs_diff = max_abs_diff.max(abs_diff);
        max_rel_diff = max_rel_diff.max(rel_diff);

        if abs_diff > config.atol && rel_diff > config.rtol {
            num_failures += 1;
            if config.verbose {
                warn!(
                    "Gradient mismatch at {}: analytical={:e}, numerical={:e}, abs_diff={:.2e}, rel_diff={:.2e}",
                    idx, a_val, n_val, abs_diff, rel_diff
                );
            }
        }
    }

    let passed = num_failures == 0;
    if config.verbose {
        info!(
            "Gradient check {}: {}/{} failures, max abs diff {:.2e}, max rel diff {:.2e}",
            if passed { "passed" } else { "failed" },
            num_failures,
            analytical.len(),
            max_abs_diff,
            max_rel_diff
        );
    }

    Ok(GradCheckResult {
        max_abs_diff,
        max_rel_diff,
        passed,
        num_elements: analytical.len(),
        num_failures,
    })
}

// Column-major flattening, matching faer's storage order.
fn flatten(m: &Mat<f64>) -> Vec<f64> {
    (0..m.ncols())
        .flat_map(|j| (0..m.nrows()).map(move |i| m[(i, j)]))
        .collect()
}
