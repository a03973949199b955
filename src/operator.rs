//! This module defines the core abstraction for linear operators.
//!
//! The solver never looks at the individual elements of a matrix. Its only requirement is the
//! action of the operator on a batch of blocks, `Y = A(X, params)`, where `params` is an ordered
//! list of differentiable parameter matrices. Anything that can compute this action, be it a
//! dense matrix, a diagonal scaling or a user-written transformation, can be solved against.
//!
//! Three capabilities are consumed by the solver and the gradient engine:
//!
//! 1.  **Application**: [`LinearOperator::apply`], together with the declared square
//!     [`LinearOperator::shape`] and the [`LinearOperator::is_symmetric`] flag.
//! 2.  **Preconditioning** (optional): [`LinearOperator::preconditioner`] exposes a
//!     [`Preconditioner`] when the operator has one. Operators without one are
//!     preconditioned by the identity.
//! 3.  **Parameter gradients**: [`LinearOperator::apply_vjp`] returns the vector-Jacobian
//!     product of `params ↦ A(x, params)` at a given point, one gradient per parameter.
//!
//! The shifted operator `A - bias ⊙ M` is described by a [`Shift`], which bundles the bias with
//! the optional secondary operator `M` and its parameters.

use crate::batch::Batch;
use faer::Mat;

/// Represents a matrix-free linear operator acting on batches of shape `(nbatch, n, ncols)`.
///
/// The operator is borrowed for the duration of a solve and is never mutated.
///
/// # Example
///
/// A scaled identity with one scalar parameter.
///
/// ```rust
/// use adjoint_cg::{Batch, LinearOperator};
/// use faer::Mat;
///
/// struct ScaledIdentity(usize);
///
/// impl LinearOperator for ScaledIdentity {
///     fn shape(&self) -> (usize, usize) {
///         (self.0, self.0)
///     }
///
///     fn is_symmetric(&self) -> bool {
///         true
///     }
///
///     fn apply(&self, x: &Batch, params: &[Mat<f64>]) -> Batch {
///         x.scale(params[0][(0, 0)])
///     }
/// }
///
/// let op = ScaledIdentity(3);
/// let x = Batch::from_fn(1, 3, 1, |_, i, _| i as f64);
/// let y = op.apply(&x, &[Mat::full(1, 1, 2.0)]);
/// assert_eq!(y.get(0, 2, 0), 4.0);
/// ```
pub trait LinearOperator {
    /// Returns the declared `(nrows, ncols)` of the operator.
    fn shape(&self) -> (usize, usize);

    /// Whether the operator is symmetric. Solving is refused for non-symmetric operators.
    fn is_symmetric(&self) -> bool;

    /// Applies the operator to every block of `x`.
    ///
    /// # Panics
    ///
    /// Implementations are expected to panic if the inner dimension of the operator does not
    /// match the number of rows of `x`, or if `params` does not have the expected layout.
    fn apply(&self, x: &Batch, params: &[Mat<f64>]) -> Batch;

    /// The preconditioner registered with this operator, if any.
    fn preconditioner(&self) -> Option<&dyn Preconditioner> {
        None
    }

    /// Vector-Jacobian product of `params ↦ self.apply(x, params)` seeded by `cotangent`.
    ///
    /// Returns one gradient per entry of `params`, each with the shape of that parameter. The
    /// default implementation only supports parameter-free operators.
    fn apply_vjp(
        &self,
        x: &Batch,
        params: &[Mat<f64>],
        cotangent: &Batch,
    ) -> anyhow::Result<Vec<Mat<f64>>> {
        let _ = (x, cotangent);
        if params.is_empty() {
            Ok(Vec::new())
        } else {
            anyhow::bail!(
                "operator has {} parameter(s) but does not provide a vector-Jacobian product",
                params.len()
            )
        }
    }
}

/// Approximate inverse of an operator, applied to accelerate convergence.
///
/// The preconditioner receives the same parameters and shift as the operator it belongs to. It
/// must be symmetric and positive definite for CG to remain valid.
pub trait Preconditioner {
    fn precondition(&self, x: &Batch, params: &[Mat<f64>], shift: Option<&Shift<'_>>) -> Batch;
}

/// The shift term `bias ⊙ M(X)` of a shifted system `A(X) - bias ⊙ M(X)`.
///
/// `bias` has shape `nbatch x ncols` and is broadcast over the `n` axis. Without a secondary
/// operator, `M` is the identity.
#[derive(Clone, Copy)]
pub struct Shift<'a> {
    pub bias: &'a Mat<f64>,
    pub m: Option<&'a dyn LinearOperator>,
    pub mparams: &'a [Mat<f64>],
}

impl<'a> Shift<'a> {
    /// `M(x, mparams)`, or `x` itself when no secondary operator is present.
    pub fn apply_m(&self, x: &Batch) -> Batch {
        match self.m {
            Some(m) => m.apply(x, self.mparams),
            None => x.clone(),
        }
    }

    /// `bias ⊙ M(x, mparams)`.
    pub fn apply(&self, x: &Batch) -> Batch {
        self.apply_m(x).scale_columns(self.bias)
    }
}

/// A constant dense matrix applied blockwise. It has no differentiable parameters.
impl LinearOperator for Mat<f64> {
    #[inline]
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn is_symmetric(&self) -> bool {
        self.nrows() == self.ncols()
            && (0..self.nrows()).all(|i| (0..i).all(|j| self[(i, j)] == self[(j, i)]))
    }

    fn apply(&self, x: &Batch, _params: &[Mat<f64>]) -> Batch {
        // Ensure dimensional compatibility for the matrix product.
        assert_eq!(
            self.ncols(),
            x.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            x.nrows(),
        );
        x.map_blocks(|blk| self * blk)
    }
}
