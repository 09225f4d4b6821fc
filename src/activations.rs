//! Weight-less elementwise activations.
//!
//! Activations preserve shape and dtype and are pure: identical inputs always
//! yield identical outputs. Each variant maps onto the corresponding Candle
//! kernel.

use std::sync::Arc;

use candle_core::Tensor;

use crate::error::Result;
use crate::layer::{expect_inputs, Arity, Layer};
use crate::signature::Signature;

/// Identifies which non-linearity an [`Activation`] computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// Elementwise `max(x, 0)`.
    Relu,
    /// Logistic sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
}

impl ActivationKind {
    fn name(self) -> &'static str {
        match self {
            ActivationKind::Relu => "Relu",
            ActivationKind::Sigmoid => "Sigmoid",
            ActivationKind::Tanh => "Tanh",
        }
    }
}

/// Shape-preserving activation layer.
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    /// Creates an activation of the given kind.
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }
}

impl Layer for Activation {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(self.name(), 1, inputs)?;
        Ok(vec![inputs[0].clone()])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(self.name(), 1, &inputs)?;
        let x = &inputs[0];
        let out = match self.kind {
            ActivationKind::Relu => x.relu()?,
            ActivationKind::Sigmoid => candle_nn::ops::sigmoid(x)?,
            ActivationKind::Tanh => x.tanh()?,
        };
        Ok(vec![out])
    }
}

/// Elementwise max-zero transform.
pub fn relu() -> Arc<dyn Layer> {
    Arc::new(Activation::new(ActivationKind::Relu))
}

/// Logistic sigmoid.
pub fn sigmoid() -> Arc<dyn Layer> {
    Arc::new(Activation::new(ActivationKind::Sigmoid))
}

/// Hyperbolic tangent.
pub fn tanh() -> Arc<dyn Layer> {
    Arc::new(Activation::new(ActivationKind::Tanh))
}
