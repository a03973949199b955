//! This module defines the custom error types for the library.
//!
//! Every failure that can surface from a solve, forward or backward, is collected into a single
//! enum, [`SolveErrorKind`], wrapped by the public [`SolveError`] type.
//!
//! The taxonomy is deliberately small. Structural problems with the operator (not symmetric,
//! not square, incompatible shapes) and configuration problems (unknown method, malformed
//! options) fail fast, before any iteration takes place. Non-convergence is *not* an error:
//! the solver returns its best estimate and reports the status through
//! [`crate::solvers::SolveInfo`]. Near-singular denominators are handled locally by
//! [`crate::algorithms::safe_divide`].
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with minimal
//! boilerplate. Errors raised by caller-supplied vector-Jacobian products are `anyhow` errors;
//! they are carried through as their rendered message.
use thiserror::Error;

/// Represents all possible errors that can occur during a solve or its gradient computation.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SolveError(#[from] SolveErrorKind);

/// The distinct kinds of errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveErrorKind {
    /// The operator does not declare itself symmetric. Conjugate gradient on the squared
    /// operator is only valid for symmetric transformations.
    #[error("The solve function cannot be used for non-symmetric operators.")]
    NotSymmetric,

    /// The operator does not map a space onto itself.
    #[error("The solve function cannot be used for non-square operators (shape {nrows}x{ncols}).")]
    NotSquare { nrows: usize, ncols: usize },

    /// Indicates that the dimensions of the operator and the right-hand side are
    /// incompatible for an operator application.
    #[error(
        "Dimension mismatch: operator has {operator_cols} columns but vector has {vector_rows} rows."
    )]
    DimensionMismatch {
        operator_cols: usize,
        vector_rows: usize,
    },

    /// A tensor argument (bias, incoming gradient, secondary operator, ...) has the wrong shape.
    #[error("Shape mismatch for `{name}`: expected {expected:?}, got {actual:?}.")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A parameter list returned by an operator does not have the expected length.
    #[error("Parameter mismatch for `{param_name}`: expected {expected}, got {actual}.")]
    ParameterMismatch {
        param_name: String,
        expected: usize,
        actual: usize,
    },

    /// The requested solve method is not one of the supported methods.
    #[error("Unknown solve method: {0}")]
    UnknownMethod(String),

    /// The solver options could not be parsed or contain unrecognized keys.
    #[error("Invalid solver options: {0}")]
    InvalidOptions(String),

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// Wraps an error raised while computing a vector-Jacobian product of an operator.
    #[error("Vector-Jacobian product failed: {0}")]
    VjpError(String),
}

impl SolveError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> &SolveErrorKind {
        &self.0
    }

    /// `true` for structural violations of the operator contract, detected before iterating.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self.0,
            SolveErrorKind::NotSymmetric
                | SolveErrorKind::NotSquare { .. }
                | SolveErrorKind::DimensionMismatch { .. }
                | SolveErrorKind::ShapeMismatch { .. }
        )
    }

    /// `true` for errors caused by the solver configuration rather than by the problem.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.0,
            SolveErrorKind::UnknownMethod(_) | SolveErrorKind::InvalidOptions(_)
        )
    }

    pub(crate) fn vjp(err: anyhow::Error) -> Self {
        SolveErrorKind::VjpError(format!("{err:#}")).into()
    }
}

// Manually implement PartialEq for the public error type.
// We compare the inner `SolveErrorKind`.
impl PartialEq for SolveError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// Unit tests to ensure error messages are formatted correctly.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_symmetric_error_message() {
        let error = SolveError(SolveErrorKind::NotSymmetric);
        assert_eq!(
            error.to_string(),
            "The solve function cannot be used for non-symmetric operators."
        );
        assert!(error.is_precondition_violation());
        assert!(!error.is_configuration_error());
    }

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = SolveError(SolveErrorKind::DimensionMismatch {
            operator_cols: 100,
            vector_rows: 99,
        });
        let expected_message =
            "Dimension mismatch: operator has 100 columns but vector has 99 rows.";
        assert_eq!(error.to_string(), expected_message);
    }

    #[test]
    fn test_shape_mismatch_error_message() {
        let error = SolveError(SolveErrorKind::ShapeMismatch {
            name: "bias".to_string(),
            expected: vec![2, 3],
            actual: vec![3, 2],
        });
        assert_eq!(
            error.to_string(),
            "Shape mismatch for `bias`: expected [2, 3], got [3, 2]."
        );
    }

    #[test]
    fn test_unknown_method_is_configuration_error() {
        let error = SolveError::from(SolveErrorKind::UnknownMethod("gmres".to_string()));
        assert_eq!(error.to_string(), "Unknown solve method: gmres");
        assert!(error.is_configuration_error());
        assert!(!error.is_precondition_violation());
    }

    #[test]
    fn test_vjp_error_keeps_context() {
        let inner = anyhow::anyhow!("parameter 1 is not differentiable").context("operator VJP");
        let error = SolveError::vjp(inner);
        assert_eq!(
            error.to_string(),
            "Vector-Jacobian product failed: operator VJP: parameter 1 is not differentiable"
        );
        assert_eq!(
            error.kind(),
            &SolveErrorKind::VjpError(
                "operator VJP: parameter 1 is not differentiable".to_string()
            )
        );
    }
}
