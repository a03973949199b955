//! Shared problem builders for the integration tests.
#![allow(dead_code)]

use adjoint_cg::{Batch, SolverOptions, operators::PerturbedDiagonalOperator};
use faer::Mat;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Seed of every random problem in the suite.
pub const SEED: u64 = 123;

/// The reference problem `(A1 + A1ᵀ + diag(1..n)) X = B` with a known solution.
pub struct ReferenceProblem {
    pub operator: PerturbedDiagonalOperator,
    pub params: Vec<Mat<f64>>,
    pub x_true: Batch,
    pub b: Batch,
    pub rng: StdRng,
}

/// Builds the reference problem with `A1` uniform in `[0, perturbation)` and a solution
/// uniform in `[0, 1)`.
pub fn reference_problem(
    n: usize,
    nbatch: usize,
    ncols: usize,
    perturbation: f64,
    preconditioned: bool,
) -> ReferenceProblem {
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut operator = PerturbedDiagonalOperator::new(n);
    if !preconditioned {
        operator = operator.without_preconditioner();
    }
    let params = operator.random_params(&mut rng, perturbation);
    let x_true = Batch::from_fn(nbatch, n, ncols, |_, _, _| rng.random());
    let amat = operator.assemble(&params);
    let b = x_true.map_blocks(|blk| &amat * blk);
    ReferenceProblem {
        operator,
        params,
        x_true,
        b,
        rng,
    }
}

/// Options for runs that should reach the accuracy floor of the solver.
pub fn precise_options() -> SolverOptions {
    SolverOptions::default()
        .with_max_iterations(200)
        .with_min_residual(1e-24)
}

pub fn max_abs_diff(a: &Batch, b: &Batch) -> f64 {
    (a - b).max_abs()
}

/// Frobenius norm `‖a - b‖₂` over the whole batch.
pub fn l2_diff(a: &Batch, b: &Batch) -> f64 {
    (a - b)
        .blocks()
        .iter()
        .map(|blk| blk.norm_l2().powi(2))
        .sum::<f64>()
        .sqrt()
}

/// A `rows x cols` matrix with entries uniform in `[lo, hi)`.
pub fn uniform_mat(rng: &mut StdRng, rows: usize, cols: usize, lo: f64, hi: f64) -> Mat<f64> {
    Mat::from_fn(rows, cols, |_, _| rng.random_range(lo..hi))
}
