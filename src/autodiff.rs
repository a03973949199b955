//! Registration of custom differentiable operations.
//!
//! A host automatic-differentiation engine sees the solve as one opaque node: a forward
//! computation paired with an exact backward rule. [`CustomFunction`] is that pairing, with the
//! state passed from forward to backward made explicit as an associated `Context` type.
//! [`FunctionNode`] is a recorded application of a function: it owns the context and can be
//! differentiated exactly once.

use crate::error::SolveError;
use std::marker::PhantomData;

/// A differentiable operation defined by a forward computation and an explicit backward rule.
pub trait CustomFunction<'a> {
    /// Everything the forward pass consumes.
    type Input;
    /// The forward result, also the type of the incoming gradient.
    type Output;
    /// State retained from the forward pass for the backward pass.
    type Context;
    /// Gradients with respect to the differentiable inputs.
    type Gradients;

    /// Name of the operation, for logging.
    fn name(&self) -> &'static str;

    /// Runs the forward computation.
    fn forward(&self, input: Self::Input) -> Result<(Self::Output, Self::Context), SolveError>;

    /// Maps the gradient of a loss w.r.t. the output to gradients w.r.t. the inputs.
    fn backward(
        &self,
        context: Self::Context,
        grad_output: &Self::Output,
    ) -> Result<Self::Gradients, SolveError>;
}

/// One recorded application of a [`CustomFunction`].
pub struct FunctionNode<'a, F: CustomFunction<'a>> {
    function: F,
    context: F::Context,
    _lifetime: PhantomData<&'a ()>,
}

impl<'a, F: CustomFunction<'a>> FunctionNode<'a, F> {
    /// Runs the forward pass of `function` and records the node.
    pub fn apply(function: F, input: F::Input) -> Result<(F::Output, Self), SolveError> {
        let (output, context) = function.forward(input)?;
        log::trace!("recorded `{}` node", function.name());
        Ok((
            output,
            Self {
                function,
                context,
                _lifetime: PhantomData,
            },
        ))
    }

    pub fn name(&self) -> &'static str {
        self.function.name()
    }

    /// The state retained from the forward pass.
    pub fn context(&self) -> &F::Context {
        &self.context
    }

    /// Runs the backward rule. The node is consumed, so its context is used at most once.
    pub fn backward(self, grad_output: &F::Output) -> Result<F::Gradients, SolveError> {
        log::trace!("backward through `{}` node", self.function.name());
        self.function.backward(self.context, grad_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y = c * x` on plain scalars.
    struct Scale;

    impl<'a> CustomFunction<'a> for Scale {
        type Input = (f64, f64);
        type Output = f64;
        type Context = (f64, f64);
        type Gradients = (f64, f64);

        fn name(&self) -> &'static str {
            "scale"
        }

        fn forward(&self, (c, x): (f64, f64)) -> Result<(f64, (f64, f64)), SolveError> {
            Ok((c * x, (c, x)))
        }

        fn backward(&self, (c, x): (f64, f64), g: &f64) -> Result<(f64, f64), SolveError> {
            Ok((g * x, g * c))
        }
    }

    #[test]
    fn test_node_round_trip() {
        let (y, node) = FunctionNode::apply(Scale, (3.0, 2.0)).unwrap();
        assert_eq!(y, 6.0);
        assert_eq!(node.name(), "scale");
        assert_eq!(node.context(), &(3.0, 2.0));
        assert_eq!(node.backward(&1.0).unwrap(), (2.0, 3.0));
    }
}
