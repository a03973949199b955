//! This module provides the high-level API: validation of the request, method dispatch and the
//! differentiable entry point.
//!
//! A solve is described by a [`SolveRequest`], which borrows the operator, its parameters, the
//! right-hand side and the optional shift, and by [`SolverOptions`]. The request solves
//!
//! ```text
//! A(X, params) - bias ⊙ M(X, mparams) = B
//! ```
//!
//! where the shift term is present only when a bias is supplied. A secondary operator `M`
//! without a bias is ignored. Without `M`, the shift is `bias ⊙ X`.

use crate::{
    adjoint::ImplicitSolve,
    algorithms::{CgCallback, cg::CgConfig, shift::ShiftedSystem},
    autodiff::FunctionNode,
    batch::Batch,
    error::{SolveError, SolveErrorKind},
    operator::{LinearOperator, Shift},
    options::{Method, SolverOptions},
};
use faer::Mat;
use log::debug;

/// Everything a single solve consumes. The core never mutates any of it.
#[derive(Clone, Copy)]
pub struct SolveRequest<'a> {
    pub operator: &'a dyn LinearOperator,
    pub params: &'a [Mat<f64>],
    pub rhs: &'a Batch,
    pub bias: Option<&'a Mat<f64>>,
    pub m: Option<&'a dyn LinearOperator>,
    pub mparams: &'a [Mat<f64>],
}

impl<'a> SolveRequest<'a> {
    /// A request for the unshifted system `A(X, params) = rhs`.
    pub fn new(operator: &'a dyn LinearOperator, params: &'a [Mat<f64>], rhs: &'a Batch) -> Self {
        Self {
            operator,
            params,
            rhs,
            bias: None,
            m: None,
            mparams: &[],
        }
    }

    /// Sets the per-(batch, column) bias, of shape `nbatch x ncols`.
    pub fn with_bias(mut self, bias: &'a Mat<f64>) -> Self {
        self.bias = Some(bias);
        self
    }

    /// Sets the secondary operator of the shift and its parameters.
    pub fn with_m(mut self, m: &'a dyn LinearOperator, mparams: &'a [Mat<f64>]) -> Self {
        self.m = Some(m);
        self.mparams = mparams;
        self
    }

    /// The shift term of the system. `None` without a bias, whether or not `M` is set.
    pub fn shift(&self) -> Option<Shift<'a>> {
        let bias = self.bias?;
        Some(Shift {
            bias,
            m: self.m,
            mparams: self.mparams,
        })
    }

    /// The dimension `n` of the system.
    pub fn dim(&self) -> usize {
        self.operator.shape().0
    }

    /// Checks the structural preconditions of the request.
    ///
    /// # Errors
    ///
    /// Fails with [`SolveErrorKind::NotSymmetric`], [`SolveErrorKind::NotSquare`],
    /// [`SolveErrorKind::DimensionMismatch`] or [`SolveErrorKind::ShapeMismatch`].
    pub fn validate(&self) -> Result<(), SolveError> {
        if !self.operator.is_symmetric() {
            return Err(SolveErrorKind::NotSymmetric.into());
        }

        let (nrows, ncols) = self.operator.shape();
        if nrows != ncols {
            return Err(SolveErrorKind::NotSquare { nrows, ncols }.into());
        }

        let (nbatch, n, rhs_cols) = self.rhs.shape();
        if n != ncols {
            return Err(SolveErrorKind::DimensionMismatch {
                operator_cols: ncols,
                vector_rows: n,
            }
            .into());
        }

        let Some(bias) = self.bias else {
            if self.m.is_some() {
                debug!("solve: no bias supplied, secondary operator M is ignored");
            }
            return Ok(());
        };

        if (bias.nrows(), bias.ncols()) != (nbatch, rhs_cols) {
            return Err(SolveErrorKind::ShapeMismatch {
                name: "bias".to_string(),
                expected: vec![nbatch, rhs_cols],
                actual: vec![bias.nrows(), bias.ncols()],
            }
            .into());
        }

        if let Some(m) = self.m {
            let (mrows, mcols) = m.shape();
            if (mrows, mcols) != (n, n) {
                return Err(SolveErrorKind::ShapeMismatch {
                    name: "M".to_string(),
                    expected: vec![n, n],
                    actual: vec![mrows, mcols],
                }
                .into());
            }
        }

        Ok(())
    }
}

/// Convergence report of a solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveInfo {
    pub method: Method,
    /// Number of iterations performed. `0` for a zero right-hand side.
    pub iterations: usize,
    /// Whether the residual threshold was met within the iteration budget.
    pub converged: bool,
    /// Last observed largest absolute preconditioned residual.
    pub residual: f64,
}

/// A solution together with its convergence report.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Batch,
    pub info: SolveInfo,
}

/// Solves the system described by `request`.
///
/// Non-convergence within the iteration budget is not an error: the last iterate is returned.
/// Use [`solve_with_info`] to find out whether the threshold was met.
///
/// # Errors
///
/// Structural violations (see [`SolveRequest::validate`]) and unknown method names are
/// reported before any iteration takes place.
///
/// # Example
///
/// ```rust
/// use adjoint_cg::{Batch, SolveRequest, SolverOptions, solve};
/// use faer::mat;
///
/// let a = mat![[4.0, 1.0], [1.0, 3.0]];
/// let b = Batch::from_mat(mat![[1.0], [2.0]]);
/// let options = SolverOptions::default().with_min_residual(1e-20);
///
/// let x = solve(&SolveRequest::new(&a, &[], &b), &options).unwrap();
/// assert!((x.get(0, 0, 0) - 1.0 / 11.0).abs() < 1e-10);
/// assert!((x.get(0, 1, 0) - 7.0 / 11.0).abs() < 1e-10);
/// ```
pub fn solve(request: &SolveRequest<'_>, options: &SolverOptions) -> Result<Batch, SolveError> {
    Ok(run(request, options, None)?.x)
}

/// Like [`solve`], but also reports the convergence status.
pub fn solve_with_info(
    request: &SolveRequest<'_>,
    options: &SolverOptions,
) -> Result<Solution, SolveError> {
    run(request, options, None)
}

/// Like [`solve_with_info`], invoking `callback` after every iteration with the iteration count
/// and the current residual. Returning `false` from the callback stops the iteration.
pub fn solve_with_callback(
    request: &SolveRequest<'_>,
    options: &SolverOptions,
    callback: &mut CgCallback<'_>,
) -> Result<Solution, SolveError> {
    run(request, options, Some(callback))
}

/// Solves the system and records it as a differentiable node.
///
/// `forward` configures this solve, `backward` configures the adjoint solve performed when the
/// node is differentiated. Both method names are resolved here, so a misconfigured backward
/// pass fails before the forward solve runs.
///
/// # Example
///
/// ```rust
/// use adjoint_cg::{Batch, SolveRequest, SolverOptions, solve_differentiable};
/// use faer::mat;
///
/// let a = mat![[2.0, 0.0], [0.0, 4.0]];
/// let b = Batch::from_mat(mat![[2.0], [2.0]]);
/// let bias = mat![[1.0]];
/// let options = SolverOptions::default().with_min_residual(1e-20);
///
/// let request = SolveRequest::new(&a, &[], &b).with_bias(&bias);
/// let (x, node) = solve_differentiable(request, &options, &options).unwrap();
/// // (A - I) x = b
/// assert!((x.get(0, 0, 0) - 2.0).abs() < 1e-10);
///
/// // loss = sum(x): the gradient w.r.t. b is (A - I)^-1 1.
/// let ones = Batch::from_fn(1, 2, 1, |_, _, _| 1.0);
/// let grads = node.backward(&ones).unwrap();
/// assert!((grads.rhs.get(0, 1, 0) - 1.0 / 3.0).abs() < 1e-10);
/// ```
pub fn solve_differentiable<'a>(
    request: SolveRequest<'a>,
    forward: &SolverOptions,
    backward: &SolverOptions,
) -> Result<(Batch, FunctionNode<'a, ImplicitSolve>), SolveError> {
    FunctionNode::apply(ImplicitSolve::new(forward.clone(), backward.clone()), request)
}

fn run(
    request: &SolveRequest<'_>,
    options: &SolverOptions,
    callback: Option<&mut CgCallback<'_>>,
) -> Result<Solution, SolveError> {
    request.validate()?;
    let method = options.method()?;

    let n = request.dim();
    let (nbatch, _, ncols) = request.rhs.shape();

    let output = match method {
        Method::ConjugateGradient => {
            let config = CgConfig {
                max_iterations: options.max_iterations_for(n),
                min_residual: options.min_residual,
                verbose: options.verbose,
            };
            let system = ShiftedSystem::new(request.operator, request.params, request.shift());
            system.solve_cg(request.rhs, &config, callback)
        }
    };

    debug!(
        "solve ({}): n = {}, nbatch = {}, ncols = {}, shifted = {}, iterations = {}, converged = {}, residual = {:.3e}",
        method,
        n,
        nbatch,
        ncols,
        request.bias.is_some(),
        output.iterations,
        output.converged,
        output.residual,
    );

    Ok(Solution {
        x: output.x,
        info: SolveInfo {
            method,
            iterations: output.iterations,
            converged: output.converged,
            residual: output.residual,
        },
    })
}
