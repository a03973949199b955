//! Shift and symmetrization adapter.
//!
//! A shifted system `Aa(X) = A(X) - bias ⊙ M(X) = B` is symmetric but generally indefinite, so
//! conjugate gradient cannot be run on it directly. The adapter solves the equivalent system
//!
//! ```text
//! Aa(Aa(X)) = Aa(B)
//! ```
//!
//! whose operator is positive semi-definite by construction (the eigenvalues of `Aa` are
//! squared). The preconditioner `P` is applied twice for the same reason. Every CG step then
//! costs two applications of `A` (and of `M` when present).

use super::{
    CgCallback, CgOutput,
    cg::{CgConfig, conjugate_gradient},
};
use crate::{
    batch::Batch,
    operator::{LinearOperator, Shift},
};
use faer::Mat;

/// An operator with its parameters and optional shift, ready to be solved against.
#[derive(Clone, Copy)]
pub struct ShiftedSystem<'a> {
    operator: &'a dyn LinearOperator,
    params: &'a [Mat<f64>],
    shift: Option<Shift<'a>>,
}

impl<'a> ShiftedSystem<'a> {
    pub fn new(
        operator: &'a dyn LinearOperator,
        params: &'a [Mat<f64>],
        shift: Option<Shift<'a>>,
    ) -> Self {
        Self {
            operator,
            params,
            shift,
        }
    }

    pub fn shift(&self) -> Option<&Shift<'a>> {
        self.shift.as_ref()
    }

    /// `Aa(x) = A(x) - bias ⊙ M(x)`, or `A(x)` without a shift.
    pub fn apply(&self, x: &Batch) -> Batch {
        let ax = self.operator.apply(x, self.params);
        match &self.shift {
            Some(shift) => &ax - &shift.apply(x),
            None => ax,
        }
    }

    /// The positive semi-definite effective operator `Aa ∘ Aa`.
    pub fn apply_effective(&self, x: &Batch) -> Batch {
        self.apply(&self.apply(x))
    }

    /// The registered preconditioner `P`, or the identity.
    pub fn precondition(&self, x: &Batch) -> Batch {
        match self.operator.preconditioner() {
            Some(p) => p.precondition(x, self.params, self.shift.as_ref()),
            None => x.clone(),
        }
    }

    /// The effective preconditioner `P ∘ P`.
    pub fn precondition_effective(&self, x: &Batch) -> Batch {
        match self.operator.preconditioner() {
            Some(_) => self.precondition(&self.precondition(x)),
            None => x.clone(),
        }
    }

    /// The transformed right-hand side `Aa(b)`.
    pub fn effective_rhs(&self, b: &Batch) -> Batch {
        self.apply(b)
    }

    /// Solves `Aa(X) = b` by running CG on the symmetrized system.
    pub fn solve_cg(
        &self,
        b: &Batch,
        config: &CgConfig,
        callback: Option<&mut CgCallback<'_>>,
    ) -> CgOutput {
        let rhs = self.effective_rhs(b);
        conjugate_gradient(
            |x: &Batch| self.apply_effective(x),
            &rhs,
            |x: &Batch| self.precondition_effective(x),
            config,
            callback,
        )
    }
}
