//! Batched matrix-free conjugate gradient for shifted symmetric systems, with an adjoint
//! gradient rule.
//!
//! This crate solves batched linear systems
//!
//! ```text
//! A(X, params) - bias ⊙ M(X, mparams) = B
//! ```
//!
//! where `A` and the optional `M` are matrix-free symmetric operators ([`LinearOperator`])
//! depending on differentiable parameter matrices, `B` has shape `(nbatch, n, ncols)` and the
//! optional `bias` holds one scalar per batch entry and column. Without a bias the system is
//! simply `A(X, params) = B`.
//!
//! ## Algorithm
//!
//! **Symmetrized CG** ([`algorithms::shift`], [`algorithms::cg`]): a shifted symmetric operator
//! `Aa` may be indefinite, so conjugate gradient is run on `Aa ∘ Aa` with right-hand side
//! `Aa(B)`, which is positive semi-definite by construction. The operator's preconditioner, if it
//! registers one, is applied twice as well. All batch entries and columns advance together with
//! independent step sizes.
//!
//! **Adjoint gradients** ([`adjoint`]): given `∂L/∂X`, the gradients with respect to `B`, the
//! bias and the parameters of `A` and `M` are obtained from a second solve of the same system,
//! with the incoming gradient as right-hand side, followed by one vector-Jacobian product per
//! operator. Nothing is differentiated through the iterations.
//!
//! ## Example Usage
//!
//! The following example solves a shifted diagonal system and differentiates the sum of the
//! solution with respect to the diagonal.
//!
//! ```rust
//! use adjoint_cg::{Batch, SolveRequest, SolverOptions, operators::DiagonalOperator};
//! use faer::mat;
//!
//! let op = DiagonalOperator::new(3);
//! let params = [mat![[2.0], [3.0], [4.0]]];
//! let b = Batch::from_fn(1, 3, 1, |_, i, _| (i + 1) as f64);
//! let bias = mat![[1.0]];
//!
//! let options = SolverOptions::default().with_min_residual(1e-20);
//! let request = SolveRequest::new(&op, &params, &b).with_bias(&bias);
//! let (x, node) = adjoint_cg::solve_differentiable(request, &options, &options).unwrap();
//!
//! // (diag(d) - 1) x = b, so x = [1, 1, 1].
//! assert!((0..3).all(|i| (x.get(0, i, 0) - 1.0).abs() < 1e-8));
//!
//! // L = Σ x, ∂L/∂d_i = -x_i / (d_i - 1).
//! let ones = Batch::from_fn(1, 3, 1, |_, _, _| 1.0);
//! let grads = node.backward(&ones).unwrap();
//! assert!((grads.params[0][(2, 0)] + 1.0 / 3.0).abs() < 1e-8);
//! ```
//!
//! ## Errors and convergence
//!
//! Structural problems (non-symmetric or non-square operator, mismatched shapes) and unknown
//! method names are reported as [`SolveError`] before any iteration. Running out of iterations
//! is not an error: [`solve`] returns the last iterate, and [`solve_with_info`] additionally
//! reports whether the residual threshold was met.

// Declare the modules that form the crate's API structure.
pub mod adjoint;
pub mod algorithms;
pub mod autodiff;
pub mod batch;
pub mod error;
pub mod operator;
pub mod operators;
pub mod options;
pub mod solvers;
pub mod utils;

// Re-export the main API for convenient access.
pub use adjoint::{GradientContext, ImplicitSolve, SolveGradients};
pub use batch::Batch;
pub use error::{SolveError, SolveErrorKind};
pub use operator::{LinearOperator, Preconditioner, Shift};
pub use options::{Method, SolverOptions};
pub use solvers::{
    Solution, SolveInfo, SolveRequest, solve, solve_differentiable, solve_with_callback,
    solve_with_info,
};
