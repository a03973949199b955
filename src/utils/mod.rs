//! Diagnostic utilities used by the tests and the experiment binaries.
//!
//! - **`gradcheck`**: finite-difference verification of adjoint gradients, with configurable
//!   step size, tolerances and difference scheme.
//!
//! - **`symmetry`**: a randomized probe of the `<A x, y> = <x, A y>` identity, for checking an
//!   operator's declared symmetry. The solver itself never runs it.
//!

pub mod gradcheck;
pub mod symmetry;
