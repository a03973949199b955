//! Solver configuration.
//!
//! Forward and backward solves are configured independently, each through its own
//! [`SolverOptions`]. A partial configuration is merged with the defaults by `serde`: missing
//! keys keep their default value, the legacy key names `max_niter` and `min_eps` are accepted as
//! aliases, and unknown keys are rejected.
//!
//! ```rust
//! use adjoint_cg::options::{Method, SolverOptions};
//!
//! let options = SolverOptions::from_json(r#"{ "max_niter": 50, "verbose": true }"#).unwrap();
//! assert_eq!(options.max_iterations_for(20), 50);
//! assert_eq!(options.min_residual, 1e-6);
//! assert_eq!(options.method().unwrap(), Method::ConjugateGradient);
//! ```

use crate::error::{SolveError, SolveErrorKind};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Default threshold on `max |ρ|` below which CG stops.
pub const DEFAULT_MIN_RESIDUAL: f64 = 1e-6;

/// The supported solve methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Preconditioned conjugate gradient on the symmetrized operator.
    ConjugateGradient,
}

impl FromStr for Method {
    type Err = SolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conjgrad" | "conjugate_gradient" | "cg" => Ok(Method::ConjugateGradient),
            _ => Err(SolveErrorKind::UnknownMethod(s.to_string()).into()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::ConjugateGradient => write!(f, "conjgrad"),
        }
    }
}

/// Options of a single solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverOptions {
    /// Name of the solve method, resolved by [`SolverOptions::method`].
    pub method: String,
    /// Iteration budget. `None` means the system dimension `n`.
    #[serde(alias = "max_niter")]
    pub max_iterations: Option<usize>,
    /// Threshold on the largest absolute preconditioned residual `max |ρ|`.
    #[serde(alias = "min_eps")]
    pub min_residual: f64,
    /// Log the residual of every iteration at `info` level.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            method: Method::ConjugateGradient.to_string(),
            max_iterations: None,
            min_residual: DEFAULT_MIN_RESIDUAL,
            verbose: false,
        }
    }
}

impl SolverOptions {
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_min_residual(mut self, min_residual: f64) -> Self {
        self.min_residual = min_residual;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolves the method name.
    ///
    /// # Errors
    ///
    /// Returns [`SolveErrorKind::UnknownMethod`] for any name other than the supported ones.
    pub fn method(&self) -> Result<Method, SolveError> {
        self.method.parse()
    }

    /// The iteration budget for a system of dimension `n`.
    pub fn max_iterations_for(&self, n: usize) -> usize {
        self.max_iterations.unwrap_or(n)
    }

    /// Parses a (partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, SolveError> {
        serde_json::from_str(json)
            .map_err(|e| SolveErrorKind::InvalidOptions(e.to_string()).into())
    }

    /// Converts an already parsed JSON value into options.
    pub fn from_value(value: serde_json::Value) -> Result<Self, SolveError> {
        serde_json::from_value(value)
            .map_err(|e| SolveErrorKind::InvalidOptions(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = SolverOptions::default();
        assert_eq!(options.method().unwrap(), Method::ConjugateGradient);
        assert_eq!(options.max_iterations_for(7), 7);
        assert_eq!(options.min_residual, 1e-6);
        assert!(!options.verbose);
        assert_eq!(SolverOptions::from_json("{}").unwrap(), options);
    }

    #[test]
    fn test_method_names() {
        for name in ["conjgrad", "CG", "Conjugate_Gradient", " cg "] {
            assert_eq!(name.parse::<Method>().unwrap(), Method::ConjugateGradient);
        }
        let err = "bicgstab".parse::<Method>().unwrap_err();
        assert_eq!(
            err.kind(),
            &SolveErrorKind::UnknownMethod("bicgstab".to_string())
        );
        assert_eq!(Method::ConjugateGradient.to_string(), "conjgrad");
    }

    #[test]
    fn test_aliases_and_partial_merge() {
        let options = SolverOptions::from_value(json!({ "min_eps": 1e-9, "max_niter": 3 })).unwrap();
        assert_eq!(options.min_residual, 1e-9);
        assert_eq!(options.max_iterations_for(100), 3);
        assert_eq!(options.method, "conjgrad");

        let options = SolverOptions::from_json(r#"{"min_residual": 1e-4}"#).unwrap();
        assert_eq!(options.min_residual, 1e-4);
        assert_eq!(options.max_iterations, None);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = SolverOptions::from_json(r#"{"tolerance": 1e-3}"#).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn test_unknown_method_survives_parsing() {
        // The method name is only resolved when a solve is requested.
        let options = SolverOptions::from_json(r#"{"method": "gmres"}"#).unwrap();
        assert!(options.method().is_err());
    }
}
