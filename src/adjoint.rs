//! Adjoint-method gradients of a solve.
//!
//! The solution `x` of `Aa(x) = B`, with `Aa(X) = A(X, params) - bias ⊙ M(X, mparams)`, is
//! differentiated without looking at the iterations that produced it. Since `Aa` is symmetric,
//! the gradient of a scalar loss with respect to `B` is the solution `v` of the adjoint system
//!
//! ```text
//! Aa(v) = ∂L/∂x
//! ```
//!
//! which is obtained by calling the solver again, with the backward-pass options. All other
//! gradients follow from `v` and the forward solution:
//!
//! - `∂L/∂B = v`
//! - `∂L/∂bias = Σ_n v ⊙ M(x)` (with `M(x) = x` when no secondary operator is present)
//! - `∂L/∂params` is the vector-Jacobian product of `params ↦ A(x, params)` seeded by `-v`
//! - `∂L/∂mparams` is the vector-Jacobian product of `mparams ↦ M(x ⊙ bias, mparams)` seeded
//!   by `v`
//!
//! The result is exact up to the accuracy of the adjoint solve and does not depend on the number
//! of forward iterations.

use crate::{
    algorithms::column_dot,
    autodiff::CustomFunction,
    batch::Batch,
    error::{SolveError, SolveErrorKind},
    operator::LinearOperator,
    options::SolverOptions,
    solvers::{SolveRequest, solve, solve_with_info},
};
use faer::Mat;
use log::debug;

/// State retained from a forward solve for one later adjoint solve.
///
/// Forward options are not retained; the backward pass uses its own options.
pub struct GradientContext<'a> {
    operator: &'a dyn LinearOperator,
    params: &'a [Mat<f64>],
    bias: Option<&'a Mat<f64>>,
    m: Option<&'a dyn LinearOperator>,
    mparams: &'a [Mat<f64>],
    x: Batch,
}

/// Gradients of a loss with respect to every differentiable input of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveGradients {
    /// Gradient w.r.t. the right-hand side, shape `(nbatch, n, ncols)`.
    pub rhs: Batch,
    /// Gradient w.r.t. the bias, shape `nbatch x ncols`. `None` for an unshifted solve.
    pub bias: Option<Mat<f64>>,
    /// One gradient per operator parameter.
    pub params: Vec<Mat<f64>>,
    /// One gradient per parameter of `M`. Empty when `M` is absent.
    pub mparams: Vec<Mat<f64>>,
}

impl<'a> GradientContext<'a> {
    /// Captures the forward state. `M` is only retained together with a bias.
    pub fn new(request: &SolveRequest<'a>, x: Batch) -> Self {
        let m = request.bias.and(request.m);
        Self {
            operator: request.operator,
            params: request.params,
            bias: request.bias,
            m,
            mparams: if m.is_some() { request.mparams } else { &[] },
            x,
        }
    }

    /// The forward solution.
    pub fn solution(&self) -> &Batch {
        &self.x
    }

    /// Computes all input gradients from the gradient `grad_x` of a loss w.r.t. the solution.
    ///
    /// # Errors
    ///
    /// Fails if `grad_x` does not have the shape of the solution, if the adjoint solve fails, or
    /// if an operator's vector-Jacobian product fails or returns the wrong number of gradients.
    pub fn backward(
        self,
        grad_x: &Batch,
        options: &SolverOptions,
    ) -> Result<SolveGradients, SolveError> {
        if grad_x.shape() != self.x.shape() {
            let (nbatch, n, ncols) = self.x.shape();
            let (gb, gn, gc) = grad_x.shape();
            return Err(SolveErrorKind::ShapeMismatch {
                name: "grad_x".to_string(),
                expected: vec![nbatch, n, ncols],
                actual: vec![gb, gn, gc],
            }
            .into());
        }

        // Adjoint solve: Aa(v) = grad_x.
        let request = SolveRequest {
            operator: self.operator,
            params: self.params,
            rhs: grad_x,
            bias: self.bias,
            m: self.m,
            mparams: self.mparams,
        };
        let v = solve(&request, options)?;

        let bias = self.bias.map(|_| {
            let mx = match self.m {
                Some(m) => m.apply(&self.x, self.mparams),
                None => self.x.clone(),
            };
            column_dot(&v, &mx)
        });

        let params = self
            .operator
            .apply_vjp(&self.x, self.params, &-&v)
            .map_err(SolveError::vjp)?;
        check_gradients("params", self.params, &params)?;

        let mparams = match (self.m, self.bias) {
            (Some(m), Some(bias)) => {
                let xb = self.x.scale_columns(bias);
                let grads = m
                    .apply_vjp(&xb, self.mparams, &v)
                    .map_err(SolveError::vjp)?;
                check_gradients("mparams", self.mparams, &grads)?;
                grads
            }
            _ => Vec::new(),
        };

        Ok(SolveGradients {
            rhs: v,
            bias,
            params,
            mparams,
        })
    }
}

fn check_gradients(
    name: &str,
    params: &[Mat<f64>],
    grads: &[Mat<f64>],
) -> Result<(), SolveError> {
    if grads.len() != params.len() {
        return Err(SolveErrorKind::ParameterMismatch {
            param_name: name.to_string(),
            expected: params.len(),
            actual: grads.len(),
        }
        .into());
    }
    for (k, (p, g)) in params.iter().zip(grads).enumerate() {
        if (p.nrows(), p.ncols()) != (g.nrows(), g.ncols()) {
            return Err(SolveErrorKind::ShapeMismatch {
                name: format!("{name}[{k}]"),
                expected: vec![p.nrows(), p.ncols()],
                actual: vec![g.nrows(), g.ncols()],
            }
            .into());
        }
    }
    Ok(())
}

/// The solve as a differentiable operation, with distinct options for the forward solve and the
/// adjoint solve.
#[derive(Debug, Clone, Default)]
pub struct ImplicitSolve {
    pub forward: SolverOptions,
    pub backward: SolverOptions,
}

impl ImplicitSolve {
    pub fn new(forward: SolverOptions, backward: SolverOptions) -> Self {
        Self { forward, backward }
    }
}

impl<'a> CustomFunction<'a> for ImplicitSolve {
    type Input = SolveRequest<'a>;
    type Output = Batch;
    type Context = GradientContext<'a>;
    type Gradients = SolveGradients;

    fn name(&self) -> &'static str {
        "implicit_solve"
    }

    fn forward(&self, input: SolveRequest<'a>) -> Result<(Batch, GradientContext<'a>), SolveError> {
        self.backward.method()?;
        let solution = solve_with_info(&input, &self.forward)?;
        if !solution.info.converged {
            debug!(
                "{}: forward solve stopped after {} iterations without meeting the threshold",
                self.name(),
                solution.info.iterations
            );
        }
        let context = GradientContext::new(&input, solution.x.clone());
        Ok((solution.x, context))
    }

    fn backward(
        &self,
        context: GradientContext<'a>,
        grad_output: &Batch,
    ) -> Result<SolveGradients, SolveError> {
        context.backward(grad_output, &self.backward)
    }
}
