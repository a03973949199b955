//! Experiment Runner for the Gradient Verification.
//!
//! This executable differentiates the loss `L = Σ X²`, where `X` solves the shifted reference
//! problem `(A1 + A1ᵀ + diag(d) - bias) X = B`, and compares the adjoint gradients with
//! respect to `A1`, `d`, `B` and `bias` against central finite differences.

use adjoint_cg::{
    Batch, LinearOperator, SolveRequest, SolverOptions,
    operators::PerturbedDiagonalOperator,
    solve, solve_differentiable,
    utils::gradcheck::{
        GradCheckConfig, GradCheckResult, compare_batches, compare_mats, numerical_gradient_batch,
        numerical_gradient_mat,
    },
};
use anyhow::{Context, Result};
use clap::Parser;
use faer::Mat;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the gradient verification.
#[derive(Parser, Debug)]
#[clap(
    name = "gradcheck-runner",
    about = "Compares adjoint gradients of a shifted solve against finite differences."
)]
struct GradCheckArgs {
    /// Dimension of the operator.
    #[clap(long, default_value_t = 20)]
    n: usize,

    /// Scale of the random symmetric perturbation `A1`.
    #[clap(long, default_value_t = 1e-2)]
    perturbation: f64,

    /// Shift applied to the system.
    #[clap(long, default_value_t = 1.2)]
    bias: f64,

    /// Finite-difference step.
    #[clap(long, default_value_t = 1e-5)]
    epsilon: f64,

    /// Relative tolerance of the comparison.
    #[clap(long, default_value_t = 1e-3)]
    rtol: f64,

    /// Absolute tolerance of the comparison.
    #[clap(long, default_value_t = 1e-6)]
    atol: f64,

    /// Iteration budget of both the forward and the adjoint solve.
    #[clap(long, default_value_t = 200)]
    max_iterations: usize,

    /// Residual threshold of both the forward and the adjoint solve.
    #[clap(long, default_value_t = 1e-24)]
    min_residual: f64,

    /// Seed of the random problem.
    #[clap(long, default_value_t = 123)]
    seed: u64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the gradient verification CSV.
#[derive(Debug, Serialize)]
struct GradCheckRecord {
    /// Name of the differentiated input.
    input: &'static str,
    num_elements: usize,
    num_failures: usize,
    max_abs_diff: f64,
    max_rel_diff: f64,
    passed: bool,
}

impl GradCheckRecord {
    fn new(input: &'static str, result: GradCheckResult) -> Self {
        log::info!(
            "{}: {}/{} failures, max abs diff {:.3e}, max rel diff {:.3e}",
            input,
            result.num_failures,
            result.num_elements,
            result.max_abs_diff,
            result.max_rel_diff
        );
        Self {
            input,
            num_elements: result.num_elements,
            num_failures: result.num_failures,
            max_abs_diff: result.max_abs_diff,
            max_rel_diff: result.max_rel_diff,
            passed: result.passed,
        }
    }
}

/// Sum of squares of the solution.
fn loss(
    operator: &PerturbedDiagonalOperator,
    params: &[Mat<f64>],
    b: &Batch,
    bias: &Mat<f64>,
    options: &SolverOptions,
) -> Result<f64> {
    let request = SolveRequest::new(operator, params, b).with_bias(bias);
    let x = solve(&request, options)?;
    Ok(x.blocks().iter().map(|m| m.norm_l2().powi(2)).sum())
}

/// The main entry point for the gradient verification.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = GradCheckArgs::parse();
    log::info!(
        "Starting gradient verification: n = {}, bias = {}, epsilon = {:e}",
        args.n,
        args.bias,
        args.epsilon
    );

    // 1. Setup the reference problem.
    let mut rng = StdRng::seed_from_u64(args.seed);
    let operator = PerturbedDiagonalOperator::new(args.n);
    let params = operator.random_params(&mut rng, args.perturbation);
    let x_true = Batch::from_fn(1, args.n, 1, |_, _, _| rng.random());
    let b = operator.apply(&x_true, &params);
    let bias = Mat::full(1, 1, args.bias);
    let options = SolverOptions::default()
        .with_max_iterations(args.max_iterations)
        .with_min_residual(args.min_residual);
    let config = GradCheckConfig {
        epsilon: args.epsilon,
        rtol: args.rtol,
        atol: args.atol,
        ..Default::default()
    };

    // 2. Adjoint gradients of L = Σ x², so ∂L/∂x = 2x.
    let request = SolveRequest::new(&operator, &params, &b).with_bias(&bias);
    let (x, node) = solve_differentiable(request, &options, &options)?;
    let grads = node.backward(&x.scale(2.0))?;
    let grad_bias = grads
        .bias
        .context("a shifted solve must produce a bias gradient")?;

    // 3. Finite differences, one input at a time.
    let mut records = Vec::new();

    let numerical = numerical_gradient_mat(
        |a1| loss(&operator, &[a1.clone(), params[1].clone()], &b, &bias, &options),
        &params[0],
        &config,
    )?;
    records.push(GradCheckRecord::new(
        "A1",
        compare_mats(&grads.params[0], &numerical, &config)?,
    ));

    let numerical = numerical_gradient_mat(
        |d| loss(&operator, &[params[0].clone(), d.clone()], &b, &bias, &options),
        &params[1],
        &config,
    )?;
    records.push(GradCheckRecord::new(
        "diag",
        compare_mats(&grads.params[1], &numerical, &config)?,
    ));

    let numerical = numerical_gradient_batch(
        |b| loss(&operator, &params, b, &bias, &options),
        &b,
        &config,
    )?;
    records.push(GradCheckRecord::new(
        "B",
        compare_batches(&grads.rhs, &numerical, &config)?,
    ));

    let numerical = numerical_gradient_mat(
        |bias| loss(&operator, &params, &b, bias, &options),
        &bias,
        &config,
    )?;
    records.push(GradCheckRecord::new(
        "bias",
        compare_mats(&grad_bias, &numerical, &config)?,
    ));

    // 4. Write results to CSV.
    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Gradient verification complete.");
    Ok(())
}
