//! The base layer abstraction shared by leaves and combinators.
//!
//! A layer computes a function from `n_in` input tensors to `n_out` output
//! tensors, optionally owning trainable weights and auxiliary state. Arity is
//! fixed per instance at construction. Weights are allocated exactly once per
//! instance by [`Layer::init`], so sharing an `Arc<dyn Layer>` across several
//! positions of a composed network ties the underlying parameters rather
//! than copying their values.
//!
//! Initialization never touches real data: combinators derive each sublayer's
//! input signature by simulating the stack transformation with
//! [`Layer::forward_signature`].

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;

use crate::error::{LayerError, Result};
use crate::signature::Signature;

/// Fixed input/output arity of a layer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    /// Number of tensors popped off the stack per invocation.
    pub n_in: usize,
    /// Number of tensors pushed back per invocation.
    pub n_out: usize,
}

impl Arity {
    /// Creates an arity descriptor.
    pub fn new(n_in: usize, n_out: usize) -> Self {
        Self { n_in, n_out }
    }
}

/// Outcome of an initialization call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Weights and state were freshly allocated by this call.
    Allocated,
    /// Nothing was allocated: the instance was already initialized, or owns
    /// no parameters.
    Skipped,
}

impl Init {
    /// Folds child outcomes into a combinator outcome.
    pub(crate) fn merge(self, other: Init) -> Init {
        match (self, other) {
            (Init::Skipped, Init::Skipped) => Init::Skipped,
            _ => Init::Allocated,
        }
    }
}

/// A unit of computation with fixed arity and optional weights/state.
pub trait Layer: Send + Sync {
    /// Human-readable name used in error messages.
    fn name(&self) -> &str;

    /// Declared input/output arity, fixed after construction.
    fn arity(&self) -> Arity;

    /// Allocates weights and state from an input signature.
    ///
    /// Deterministic for a fixed `rng` seed. At most one allocation happens
    /// per instance: repeat calls return [`Init::Skipped`] instead of
    /// re-allocating, which is what makes instance sharing equivalent to
    /// weight sharing. Layers without parameters skip unconditionally.
    fn init(&self, signature: &[Signature], device: &Device, rng: &mut StdRng) -> Result<Init> {
        let _ = (signature, device, rng);
        Ok(Init::Skipped)
    }

    /// Propagates signatures through the layer without computing on data.
    ///
    /// This is where shape contracts fail fast: errors raised here surface
    /// during initialization, before any tensor is processed.
    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>>;

    /// Applies the layer to its inputs (top-first order).
    ///
    /// Pure in its inputs and current weights; non-trainable state may be
    /// replaced in place, weights are only updated externally.
    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>>;

    /// Ordered sublayers, empty for leaf layers.
    fn sublayers(&self) -> &[Arc<dyn Layer>] {
        &[]
    }

    /// Arity-checked invocation used by combinators and callers alike.
    ///
    /// Validates both directions: the number of supplied inputs and the
    /// number of produced outputs must match the declared arity exactly.
    fn call(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let arity = self.arity();
        if inputs.len() != arity.n_in {
            return Err(LayerError::ArityMismatch {
                layer: self.name().to_string(),
                role: "input",
                expected: arity.n_in,
                actual: inputs.len(),
            });
        }
        let outputs = self.forward(inputs)?;
        if outputs.len() != arity.n_out {
            return Err(LayerError::ArityMismatch {
                layer: self.name().to_string(),
                role: "output",
                expected: arity.n_out,
                actual: outputs.len(),
            });
        }
        Ok(outputs)
    }

    /// Convenience surface for interactive use: applies a 1-in/1-out layer
    /// directly to a raw tensor, with no stack object involved.
    fn apply(&self, input: &Tensor) -> Result<Tensor> {
        let arity = self.arity();
        if arity != Arity::new(1, 1) {
            return Err(LayerError::ArityMismatch {
                layer: self.name().to_string(),
                role: "apply (requires 1-in/1-out)",
                expected: 1,
                actual: arity.n_in.max(arity.n_out),
            });
        }
        let mut outputs = self.call(vec![input.clone()])?;
        outputs.pop().ok_or_else(|| LayerError::ArityMismatch {
            layer: self.name().to_string(),
            role: "output",
            expected: 1,
            actual: 0,
        })
    }
}

impl std::fmt::Debug for dyn Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name())
            .field("arity", &self.arity())
            .finish()
    }
}

/// Validates the number of inputs handed to a leaf layer.
pub(crate) fn expect_inputs<T>(layer: &str, expected: usize, inputs: &[T]) -> Result<()> {
    if inputs.len() != expected {
        return Err(LayerError::ArityMismatch {
            layer: layer.to_string(),
            role: "input",
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// Signature propagation with arity validation on both sides.
pub(crate) fn propagate(layer: &dyn Layer, inputs: &[Signature]) -> Result<Vec<Signature>> {
    let arity = layer.arity();
    if inputs.len() != arity.n_in {
        return Err(LayerError::ArityMismatch {
            layer: layer.name().to_string(),
            role: "input signature",
            expected: arity.n_in,
            actual: inputs.len(),
        });
    }
    let outputs = layer.forward_signature(inputs)?;
    if outputs.len() != arity.n_out {
        return Err(LayerError::ArityMismatch {
            layer: layer.name().to_string(),
            role: "output signature",
            expected: arity.n_out,
            actual: outputs.len(),
        });
    }
    Ok(outputs)
}
