//! Experiment Runner for the Convergence Analysis.
//!
//! This executable solves the reference problem `(A1 + A1ᵀ + diag(1..n) - bias) X = B` with a
//! known random solution and records the largest preconditioned residual `max |ρ|` after every
//! CG iteration. It is used to compare preconditioned and unpreconditioned runs, and shifted
//! (possibly indefinite) against unshifted systems.

use adjoint_cg::{
    Batch, SolveRequest, SolverOptions, operators::PerturbedDiagonalOperator, solve_with_callback,
};
use anyhow::{Context, Result};
use clap::Parser;
use faer::Mat;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the convergence experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Records the per-iteration residual of the batched CG solver on the reference problem."
)]
struct ConvergenceArgs {
    /// Dimension of the operator.
    #[clap(long, default_value_t = 20)]
    n: usize,

    /// Number of independent problems in the batch.
    #[clap(long, default_value_t = 1)]
    nbatch: usize,

    /// Number of right-hand-side columns per problem.
    #[clap(long, default_value_t = 1)]
    ncols: usize,

    /// Scale of the random symmetric perturbation `A1`.
    #[clap(long, default_value_t = 1e-2)]
    perturbation: f64,

    /// Optional shift applied to every batch entry and column.
    #[clap(long)]
    bias: Option<f64>,

    /// Disable the Jacobi preconditioner.
    #[clap(long)]
    no_precond: bool,

    /// JSON file with solver options. Command-line values below override it.
    #[clap(long, value_name = "PATH")]
    options: Option<PathBuf>,

    /// Maximum number of CG iterations (default: n).
    #[clap(long)]
    max_iterations: Option<usize>,

    /// Residual threshold.
    #[clap(long)]
    min_residual: Option<f64>,

    /// Seed of the random problem.
    #[clap(long, default_value_t = 123)]
    seed: u64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the convergence CSV.
#[derive(Debug, Serialize)]
struct ConvergenceRecord {
    /// The CG iteration.
    iteration: usize,
    /// Largest absolute preconditioned residual over the batch.
    residual: f64,
}

fn load_options(args: &ConvergenceArgs) -> Result<SolverOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read options file {path:?}"))?;
            SolverOptions::from_json(&json)?
        }
        None => SolverOptions::default(),
    };
    if let Some(max_iterations) = args.max_iterations {
        options = options.with_max_iterations(max_iterations);
    }
    if let Some(min_residual) = args.min_residual {
        options = options.with_min_residual(min_residual);
    }
    Ok(options)
}

/// The main entry point for the convergence experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = ConvergenceArgs::parse();
    let options = load_options(&args)?;
    log::info!(
        "Starting convergence analysis: n = {}, nbatch = {}, ncols = {}, bias = {:?}, preconditioned = {}",
        args.n,
        args.nbatch,
        args.ncols,
        args.bias,
        !args.no_precond
    );

    // 1. Setup the reference problem with a known solution.
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut operator = PerturbedDiagonalOperator::new(args.n);
    if args.no_precond {
        operator = operator.without_preconditioner();
    }
    let params = operator.random_params(&mut rng, args.perturbation);
    let x_true = Batch::from_fn(args.nbatch, args.n, args.ncols, |_, _, _| rng.random());
    let bias = args
        .bias
        .map(|value| Mat::full(args.nbatch, args.ncols, value));

    let amat = operator.assemble(&params);
    let ax = x_true.map_blocks(|blk| &amat * blk);
    let b = match args.bias {
        Some(value) => ax.add_scaled_columns(&Mat::full(args.nbatch, args.ncols, -value), &x_true),
        None => ax,
    };

    let mut request = SolveRequest::new(&operator, &params, &b);
    if let Some(bias) = &bias {
        request = request.with_bias(bias);
    }

    // 2. Solve, recording the residual of every iteration.
    let mut records = Vec::new();
    let mut record = |iteration: usize, residual: f64| {
        records.push(ConvergenceRecord {
            iteration,
            residual,
        });
        true
    };
    let solution = solve_with_callback(&request, &options, &mut record)?;

    // The final iteration is not reported through the callback when it meets the threshold.
    if records.last().map(|r| r.iteration) != Some(solution.info.iterations) {
        records.push(ConvergenceRecord {
            iteration: solution.info.iterations,
            residual: solution.info.residual,
        });
    }

    let error = (&solution.x - &x_true).max_abs();
    log::info!(
        "Finished after {} iterations (converged = {}), max |x - x*| = {:.3e}",
        solution.info.iterations,
        solution.info.converged,
        error
    );

    // 3. Write results to CSV.
    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Convergence analysis complete.");
    Ok(())
}
