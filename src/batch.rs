//! Batched dense blocks.
//!
//! Every tensor flowing through the solver has the shape `(nbatch, n, ncols)`: `nbatch`
//! independent problems, each carrying `ncols` right-hand-side columns of length `n`. A [`Batch`]
//! stores one `faer` matrix of size `n x ncols` per batch entry. Reductions performed by the
//! solver only ever run over the `n` axis, so keeping the blocks separate lets every operator
//! work on plain `faer` matrices.
//!
//! Per-(batch, column) coefficients, such as the CG step sizes or a bias, are represented as a
//! `Mat<f64>` of shape `nbatch x ncols`.

use crate::error::{SolveError, SolveErrorKind};
use faer::{Mat, MatRef};
use std::ops::{Add, Neg, Sub};

/// A batch of `nbatch` dense blocks, each of shape `nrows x ncols`.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    blocks: Vec<Mat<f64>>,
    nrows: usize,
    ncols: usize,
}

impl Batch {
    /// Creates a batch filled with zeros.
    pub fn zeros(nbatch: usize, nrows: usize, ncols: usize) -> Self {
        Self {
            blocks: (0..nbatch).map(|_| Mat::zeros(nrows, ncols)).collect(),
            nrows,
            ncols,
        }
    }

    /// Creates a batch whose entry `(b, i, j)` is `f(b, i, j)`.
    pub fn from_fn(
        nbatch: usize,
        nrows: usize,
        ncols: usize,
        mut f: impl FnMut(usize, usize, usize) -> f64,
    ) -> Self {
        let blocks = (0..nbatch)
            .map(|b| Mat::from_fn(nrows, ncols, |i, j| f(b, i, j)))
            .collect();
        Self {
            blocks,
            nrows,
            ncols,
        }
    }

    /// Wraps a single matrix as a batch with `nbatch == 1`.
    pub fn from_mat(mat: Mat<f64>) -> Self {
        let (nrows, ncols) = (mat.nrows(), mat.ncols());
        Self {
            blocks: vec![mat],
            nrows,
            ncols,
        }
    }

    /// Builds a batch from a list of blocks.
    ///
    /// # Errors
    ///
    /// Returns [`SolveErrorKind::InputError`] if `blocks` is empty and
    /// [`SolveErrorKind::ShapeMismatch`] if the blocks do not all share the same shape.
    pub fn from_blocks(blocks: Vec<Mat<f64>>) -> Result<Self, SolveError> {
        let Some(first) = blocks.first() else {
            return Err(
                SolveErrorKind::InputError("a batch needs at least one block".to_string()).into(),
            );
        };
        let (nrows, ncols) = (first.nrows(), first.ncols());
        if let Some((b, block)) = blocks
            .iter()
            .enumerate()
            .find(|(_, m)| m.nrows() != nrows || m.ncols() != ncols)
        {
            return Err(SolveErrorKind::ShapeMismatch {
                name: format!("block {b}"),
                expected: vec![nrows, ncols],
                actual: vec![block.nrows(), block.ncols()],
            }
            .into());
        }
        Ok(Self {
            blocks,
            nrows,
            ncols,
        })
    }

    /// Returns `(nbatch, nrows, ncols)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.blocks.len(), self.nrows, self.ncols)
    }

    #[inline]
    pub fn nbatch(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Returns a view of the block of batch entry `b`.
    #[inline]
    pub fn block(&self, b: usize) -> MatRef<'_, f64> {
        self.blocks[b].as_ref()
    }

    #[inline]
    pub fn blocks(&self) -> &[Mat<f64>] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Mat<f64>> {
        self.blocks
    }

    #[inline]
    pub fn get(&self, b: usize, i: usize, j: usize) -> f64 {
        self.blocks[b][(i, j)]
    }

    /// Applies `f` to every block and collects the results into a new batch.
    ///
    /// # Panics
    ///
    /// Panics if `f` returns blocks of differing shapes.
    pub fn map_blocks(&self, mut f: impl FnMut(MatRef<'_, f64>) -> Mat<f64>) -> Self {
        let blocks: Vec<Mat<f64>> = self.blocks.iter().map(|m| f(m.as_ref())).collect();
        let (nrows, ncols) = blocks
            .first()
            .map_or((self.nrows, self.ncols), |m| (m.nrows(), m.ncols()));
        assert!(
            blocks.iter().all(|m| m.nrows() == nrows && m.ncols() == ncols),
            "map_blocks produced blocks of inconsistent shapes"
        );
        Self {
            blocks,
            nrows,
            ncols,
        }
    }

    /// Combines two batches of the same shape elementwise.
    pub fn zip_with(&self, other: &Batch, f: impl Fn(f64, f64) -> f64) -> Self {
        self.assert_same_shape(other);
        let blocks = self
            .blocks
            .iter()
            .zip(&other.blocks)
            .map(|(a, b)| Mat::from_fn(self.nrows, self.ncols, |i, j| f(a[(i, j)], b[(i, j)])))
            .collect();
        Self {
            blocks,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Elementwise product `self ⊙ other`.
    pub fn hadamard(&self, other: &Batch) -> Self {
        self.zip_with(other, |a, b| a * b)
    }

    /// Multiplies every entry by `s`.
    pub fn scale(&self, s: f64) -> Self {
        self.map_blocks(|m| Mat::from_fn(m.nrows(), m.ncols(), |i, j| s * m[(i, j)]))
    }

    /// Multiplies column `j` of block `b` by `coeffs[(b, j)]`.
    ///
    /// `coeffs` has shape `nbatch x ncols` and is broadcast over the `n` axis.
    pub fn scale_columns(&self, coeffs: &Mat<f64>) -> Self {
        self.assert_coeff_shape(coeffs);
        let blocks = self
            .blocks
            .iter()
            .enumerate()
            .map(|(b, m)| Mat::from_fn(self.nrows, self.ncols, |i, j| coeffs[(b, j)] * m[(i, j)]))
            .collect();
        Self {
            blocks,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Returns `self + coeffs ⊙ other`, with `coeffs` broadcast over the `n` axis.
    pub fn add_scaled_columns(&self, coeffs: &Mat<f64>, other: &Batch) -> Self {
        self.assert_same_shape(other);
        self.assert_coeff_shape(coeffs);
        let blocks = self
            .blocks
            .iter()
            .zip(&other.blocks)
            .enumerate()
            .map(|(b, (x, y))| {
                Mat::from_fn(self.nrows, self.ncols, |i, j| {
                    x[(i, j)] + coeffs[(b, j)] * y[(i, j)]
                })
            })
            .collect();
        Self {
            blocks,
            nrows: self.nrows,
            ncols: self.ncols,
        }
    }

    /// Largest absolute entry, `0.0` for an empty batch and NaN if any entry is NaN.
    pub fn max_abs(&self) -> f64 {
        let mut out = 0.0_f64;
        for m in &self.blocks {
            for j in 0..m.ncols() {
                for i in 0..m.nrows() {
                    let v = m[(i, j)].abs();
                    if v.is_nan() {
                        return f64::NAN;
                    }
                    out = out.max(v);
                }
            }
        }
        out
    }

    /// `true` if every entry is within `atol` of zero. Never `true` with a NaN entry.
    pub fn is_zero(&self, atol: f64) -> bool {
        self.max_abs() <= atol
    }

    fn assert_same_shape(&self, other: &Batch) {
        assert_eq!(
            self.shape(),
            other.shape(),
            "Batch shape mismatch: {:?} vs {:?}.",
            self.shape(),
            other.shape(),
        );
    }

    fn assert_coeff_shape(&self, coeffs: &Mat<f64>) {
        assert_eq!(
            (coeffs.nrows(), coeffs.ncols()),
            (self.nbatch(), self.ncols),
            "Coefficient shape mismatch: expected {}x{}, got {}x{}.",
            self.nbatch(),
            self.ncols,
            coeffs.nrows(),
            coeffs.ncols(),
        );
    }
}

impl Add for &Batch {
    type Output = Batch;

    fn add(self, rhs: &Batch) -> Batch {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl Sub for &Batch {
    type Output = Batch;

    fn sub(self, rhs: &Batch) -> Batch {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl Neg for &Batch {
    type Output = Batch;

    fn neg(self) -> Batch {
        self.scale(-1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_from_fn_layout() {
        let x = Batch::from_fn(2, 3, 4, |b, i, j| (100 * b + 10 * i + j) as f64);
        assert_eq!(x.shape(), (2, 3, 4));
        assert_eq!(x.get(1, 2, 3), 123.0);
        assert_eq!(x.block(0)[(1, 2)], 12.0);
    }

    #[test]
    fn test_from_blocks_rejects_inconsistent_shapes() {
        let err = Batch::from_blocks(vec![Mat::zeros(3, 2), Mat::zeros(2, 2)]).unwrap_err();
        assert_eq!(
            err.kind(),
            &SolveErrorKind::ShapeMismatch {
                name: "block 1".to_string(),
                expected: vec![3, 2],
                actual: vec![2, 2],
            }
        );
        assert!(Batch::from_blocks(Vec::new()).is_err());
    }

    #[test]
    fn test_column_scaling_broadcasts_over_rows() {
        let x = Batch::from_mat(mat![[1.0, 2.0], [3.0, 4.0]]);
        let coeffs = mat![[10.0, -1.0]];
        let y = x.scale_columns(&coeffs);
        assert_eq!(y, Batch::from_mat(mat![[10.0, -2.0], [30.0, -4.0]]));

        let z = x.add_scaled_columns(&coeffs, &x);
        assert_eq!(z, Batch::from_mat(mat![[11.0, 0.0], [33.0, 0.0]]));
    }

    #[test]
    fn test_arithmetic_and_norms() {
        let a = Batch::from_fn(2, 2, 1, |b, i, _| (b + i) as f64);
        let b = Batch::from_fn(2, 2, 1, |_, _, _| 1.0);
        assert_eq!(&(&a + &b) - &b, a);
        assert_eq!((-&a).max_abs(), 2.0);
        assert!(Batch::zeros(2, 3, 1).is_zero(0.0));
        assert!(!a.is_zero(1e-8));
        assert!(a.scale(1e-9).is_zero(1e-8));
    }

    #[test]
    fn test_nan_entries_propagate_through_norms() {
        let x = Batch::from_mat(mat![[0.0], [f64::NAN], [0.0]]);
        assert!(x.max_abs().is_nan());
        assert!(!x.is_zero(1e-8));
        assert!(!x.is_zero(f64::INFINITY));
    }

    #[test]
    #[should_panic(expected = "Batch shape mismatch")]
    fn test_shape_mismatch_panics() {
        let a = Batch::zeros(1, 2, 2);
        let b = Batch::zeros(1, 2, 3);
        let _ = &a + &b;
    }
}
