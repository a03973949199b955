//! Ready-made operator variants.
//!
//! Each type here implements [`LinearOperator`] for one concrete parameterization, with an exact
//! vector-Jacobian product and, where it makes sense, a Jacobi preconditioner. They serve as
//! reference problems for the test-suite and the experiment binaries, and as templates for
//! user-defined operators.

use crate::{
    batch::Batch,
    operator::{LinearOperator, Preconditioner, Shift},
};
use anyhow::ensure;
use faer::Mat;
use rand::Rng;

/// Jacobi preconditioner `X ↦ X / d`, where `d` is the `n x 1` parameter at `diag_index`.
///
/// The shift is ignored: the preconditioner only approximates the unshifted operator.
///
/// Every entry of `d` must be nonzero. A zero entry is not checked here; it turns the CG
/// iterates into NaN and the solve then reports non-convergence.
#[derive(Debug, Clone, Copy)]
pub struct JacobiPreconditioner {
    diag_index: usize,
}

impl JacobiPreconditioner {
    pub fn new(diag_index: usize) -> Self {
        Self { diag_index }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn precondition(&self, x: &Batch, params: &[Mat<f64>], _shift: Option<&Shift<'_>>) -> Batch {
        let d = &params[self.diag_index];
        x.map_blocks(|blk| Mat::from_fn(blk.nrows(), blk.ncols(), |i, j| blk[(i, j)] / d[(i, 0)]))
    }
}

/// The diagonal operator `Y = diag(d) X`, with parameters `[d (n x 1)]`.
#[derive(Debug, Clone)]
pub struct DiagonalOperator {
    n: usize,
    jacobi: Option<JacobiPreconditioner>,
}

impl DiagonalOperator {
    /// Creates the operator with its Jacobi preconditioner registered.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            jacobi: Some(JacobiPreconditioner::new(0)),
        }
    }

    pub fn without_preconditioner(mut self) -> Self {
        self.jacobi = None;
        self
    }
}

impl LinearOperator for DiagonalOperator {
    fn shape(&self) -> (usize, usize) {
        (self.n, self.n)
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn apply(&self, x: &Batch, params: &[Mat<f64>]) -> Batch {
        let d = &params[0];
        assert_eq!(
            (d.nrows(), d.ncols()),
            (self.n, 1),
            "DiagonalOperator expects a {}x1 diagonal.",
            self.n
        );
        x.map_blocks(|blk| Mat::from_fn(blk.nrows(), blk.ncols(), |i, j| d[(i, 0)] * blk[(i, j)]))
    }

    fn preconditioner(&self) -> Option<&dyn Preconditioner> {
        self.jacobi.as_ref().map(|p| p as &dyn Preconditioner)
    }

    fn apply_vjp(
        &self,
        x: &Batch,
        params: &[Mat<f64>],
        cotangent: &Batch,
    ) -> anyhow::Result<Vec<Mat<f64>>> {
        ensure!(
            params.len() == 1,
            "DiagonalOperator takes 1 parameter, got {}",
            params.len()
        );
        ensure!(
            x.shape() == cotangent.shape(),
            "cotangent shape {:?} does not match input shape {:?}",
            cotangent.shape(),
            x.shape()
        );
        let grad_d = Mat::from_fn(self.n, 1, |i, _| {
            (0..x.nbatch())
                .map(|b| {
                    (0..x.ncols())
                        .map(|j| cotangent.get(b, i, j) * x.get(b, i, j))
                        .sum::<f64>()
                })
                .sum()
        });
        Ok(vec![grad_d])
    }
}

/// The symmetric operator `Y = (A1 + A1ᵀ + diag(d)) X`, with parameters
/// `[A1 (n x n), d (n x 1)]`.
///
/// With a small `A1` the operator is diagonally dominant and `X / d` is a good preconditioner.
#[derive(Debug, Clone)]
pub struct PerturbedDiagonalOperator {
    n: usize,
    jacobi: Option<JacobiPreconditioner>,
}

impl PerturbedDiagonalOperator {
    /// Creates the operator with its Jacobi preconditioner registered.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            jacobi: Some(JacobiPreconditioner::new(1)),
        }
    }

    pub fn without_preconditioner(mut self) -> Self {
        self.jacobi = None;
        self
    }

    /// Random parameters of the reference problem: `A1` uniform in `[0, perturbation)` and
    /// `d = [1, 2, ..., n]`.
    pub fn random_params<R: Rng>(&self, rng: &mut R, perturbation: f64) -> Vec<Mat<f64>> {
        let a1 = Mat::from_fn(self.n, self.n, |_, _| rng.random::<f64>() * perturbation);
        let d = Mat::from_fn(self.n, 1, |i, _| (i + 1) as f64);
        vec![a1, d]
    }

    /// Assembles the dense matrix `A1 + A1ᵀ + diag(d)`.
    pub fn assemble(&self, params: &[Mat<f64>]) -> Mat<f64> {
        let (a1, d) = (&params[0], &params[1]);
        assert_eq!(
            (a1.nrows(), a1.ncols(), d.nrows(), d.ncols()),
            (self.n, self.n, self.n, 1),
            "PerturbedDiagonalOperator expects a {0}x{0} perturbation and a {0}x1 diagonal.",
            self.n
        );
        Mat::from_fn(self.n, self.n, |i, j| {
            let off = a1[(i, j)] + a1[(j, i)];
            if i == j { off + d[(i, 0)] } else { off }
        })
    }
}

impl LinearOperator for PerturbedDiagonalOperator {
    fn shape(&self) -> (usize, usize) {
        (self.n, self.n)
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn apply(&self, x: &Batch, params: &[Mat<f64>]) -> Batch {
        let amat = self.assemble(params);
        x.map_blocks(|blk| &amat * blk)
    }

    fn preconditioner(&self) -> Option<&dyn Preconditioner> {
        self.jacobi.as_ref().map(|p| p as &dyn Preconditioner)
    }

    fn apply_vjp(
        &self,
        x: &Batch,
        params: &[Mat<f64>],
        cotangent: &Batch,
    ) -> anyhow::Result<Vec<Mat<f64>>> {
        ensure!(
            params.len() == 2,
            "PerturbedDiagonalOperator takes 2 parameters, got {}",
            params.len()
        );
        ensure!(
            x.shape() == cotangent.shape(),
            "cotangent shape {:?} does not match input shape {:?}",
            cotangent.shape(),
            x.shape()
        );
        // G = Σ_b V_b X_bᵀ
        let mut g = Mat::<f64>::zeros(self.n, self.n);
        for b in 0..x.nbatch() {
            g = g + cotangent.block(b) * x.block(b).transpose();
        }
        let grad_a1 = Mat::from_fn(self.n, self.n, |i, j| g[(i, j)] + g[(j, i)]);
        let grad_d = Mat::from_fn(self.n, 1, |i, _| g[(i, i)]);
        Ok(vec![grad_a1, grad_d])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn pairing(a: &Batch, b: &Batch) -> f64 {
        crate::algorithms::column_dot(a, b).sum()
    }

    #[test]
    fn test_diagonal_apply_and_precondition() {
        let op = DiagonalOperator::new(3);
        let d = mat![[1.0], [2.0], [4.0]];
        let x = Batch::from_fn(2, 3, 1, |b, i, _| (b + i + 1) as f64);
        let y = op.apply(&x, std::slice::from_ref(&d));
        assert_eq!(y.get(1, 2, 0), 16.0);

        let p = op.preconditioner().unwrap();
        let back = p.precondition(&y, std::slice::from_ref(&d), None);
        assert_eq!(back, x);
        assert!(op.without_preconditioner().preconditioner().is_none());
    }

    #[test]
    fn test_assemble_is_symmetric() {
        let op = PerturbedDiagonalOperator::new(2);
        let params = [mat![[0.5, 1.0], [0.0, 0.25]], mat![[3.0], [4.0]]];
        let amat = op.assemble(&params);
        assert_eq!(amat, mat![[4.0, 1.0], [1.0, 4.5]]);
        assert!(amat.is_symmetric());
    }

    #[test]
    fn test_perturbed_vjp_matches_directional_derivative() {
        // The operator is linear in its parameters, so <v, A(x; p + t dp)> - <v, A(x; p)>
        // equals t <grad, dp> exactly.
        let op = PerturbedDiagonalOperator::new(3);
        let params = vec![
            Mat::from_fn(3, 3, |i, j| 0.1 * (i as f64) - 0.05 * (j as f64)),
            mat![[1.0], [2.0], [3.0]],
        ];
        let dparams = vec![
            Mat::from_fn(3, 3, |i, j| ((i * 3 + j) % 4) as f64 - 1.5),
            mat![[0.5], [-1.0], [2.0]],
        ];
        let x = Batch::from_fn(2, 3, 2, |b, i, j| (b as f64) - (i as f64) * 0.5 + (j as f64));
        let v = Batch::from_fn(2, 3, 2, |b, i, j| 1.0 + (b * i) as f64 - (j as f64) * 0.3);

        let grads = op.apply_vjp(&x, &params, &v).unwrap();
        assert_eq!(grads.len(), 2);

        let shifted: Vec<Mat<f64>> = params
            .iter()
            .zip(&dparams)
            .map(|(p, dp)| p + dp)
            .collect();
        let lhs = pairing(&v, &op.apply(&x, &shifted)) - pairing(&v, &op.apply(&x, &params));
        let rhs: f64 = grads
            .iter()
            .zip(&dparams)
            .map(|(g, dp)| {
                (0..g.nrows())
                    .flat_map(|i| (0..g.ncols()).map(move |j| (i, j)))
                    .map(|(i, j)| g[(i, j)] * dp[(i, j)])
                    .sum::<f64>()
            })
            .sum();
        assert!((lhs - rhs).abs() < 1e-10, "lhs = {lhs}, rhs = {rhs}");
    }

    #[test]
    fn test_diagonal_vjp() {
        let op = DiagonalOperator::new(2);
        let x = Batch::from_fn(2, 2, 1, |b, i, _| (b + 2 * i) as f64);
        let v = Batch::from_fn(2, 2, 1, |_, _, _| 1.0);
        let grads = op.apply_vjp(&x, &[mat![[1.0], [1.0]]], &v).unwrap();
        // Row 0: 0 + 1, row 1: 2 + 3.
        assert_eq!(grads[0], mat![[1.0], [5.0]]);
        assert!(op.apply_vjp(&x, &[], &v).is_err());
    }
}
