//! Parallel fan-out over a shared view of the stack top.
//!
//! Each branch reads its own prefix of the top of the stack, so inputs
//! overlap: several branches may look at the same positions. The combinator
//! consumes as many items as the deepest branch reaches and pushes every
//! branch's outputs back in branch order. Tensors handed to the branches are
//! cheap clones of refcounted storage, not value copies.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;

use crate::error::Result;
use crate::layer::{propagate, Arity, Init, Layer};
use crate::signature::Signature;

/// Parallel combinator; holds no parameters beyond its children's.
pub struct Branch {
    branches: Vec<Arc<dyn Layer>>,
    arity: Arity,
}

impl Branch {
    /// Fans the stack top out over `branches`.
    ///
    /// Consumed input count is the maximum depth referenced across branches;
    /// produced output count is the sum of every branch's output arity.
    pub fn new(branches: Vec<Arc<dyn Layer>>) -> Self {
        let n_in = branches
            .iter()
            .map(|layer| layer.arity().n_in)
            .max()
            .unwrap_or(0);
        let n_out = branches.iter().map(|layer| layer.arity().n_out).sum();
        Self {
            branches,
            arity: Arity::new(n_in, n_out),
        }
    }

    fn check_depth(&self, available: usize) -> Result<()> {
        if available < self.arity.n_in {
            return Err(crate::error::LayerError::StackUnderflow {
                requested: self.arity.n_in,
                available,
            });
        }
        Ok(())
    }
}

impl Layer for Branch {
    fn name(&self) -> &str {
        "Branch"
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn init(&self, signature: &[Signature], device: &Device, rng: &mut StdRng) -> Result<Init> {
        self.check_depth(signature.len())?;
        let mut outcome = Init::Skipped;
        for layer in &self.branches {
            let view = &signature[..layer.arity().n_in];
            outcome = outcome.merge(layer.init(view, device, rng)?);
        }
        Ok(outcome)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        self.check_depth(inputs.len())?;
        let mut outputs = Vec::with_capacity(self.arity.n_out);
        for layer in &self.branches {
            let view = &inputs[..layer.arity().n_in];
            outputs.extend(propagate(layer.as_ref(), view)?);
        }
        Ok(outputs)
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        self.check_depth(inputs.len())?;
        let mut outputs = Vec::with_capacity(self.arity.n_out);
        for layer in &self.branches {
            let view = inputs[..layer.arity().n_in].to_vec();
            outputs.extend(layer.call(view)?);
        }
        Ok(outputs)
    }

    fn sublayers(&self) -> &[Arc<dyn Layer>] {
        &self.branches
    }
}

/// Builds a parallel fan-out as a shareable layer handle.
pub fn branch(branches: Vec<Arc<dyn Layer>>) -> Arc<dyn Layer> {
    Arc::new(Branch::new(branches))
}
