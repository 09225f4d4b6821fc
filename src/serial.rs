//! Sequential composition over the data stack.
//!
//! `Serial` applies its sublayers in order: each sublayer pops its declared
//! input count off the stack top, is invoked, and pushes its outputs back.
//! When every sublayer's output arity matches the next one's input arity this
//! is plain function composition; when arities differ, earlier surpluses stay
//! on the stack below later activity and are picked up by whichever sublayer
//! reaches down for them.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;

use crate::error::Result;
use crate::layer::{propagate, Arity, Init, Layer};
use crate::signature::Signature;
use crate::stack::Stack;

/// Sequential combinator; holds no parameters beyond its children's.
pub struct Serial {
    layers: Vec<Arc<dyn Layer>>,
    arity: Arity,
}

impl Serial {
    /// Composes `layers` in application order.
    ///
    /// The combinator's arity is computed by simulating the stack balance:
    /// `n_in` is the total deficit pulled from the caller's inputs, `n_out`
    /// the depth remaining once every sublayer has run.
    pub fn new(layers: Vec<Arc<dyn Layer>>) -> Self {
        let arity = stack_balance(&layers);
        Self { layers, arity }
    }

    /// The empty composition, which behaves as the identity layer.
    pub fn identity() -> Self {
        Self::new(Vec::new())
    }
}

fn stack_balance(layers: &[Arc<dyn Layer>]) -> Arity {
    let mut depth = 0usize;
    let mut pulled = 0usize;
    for layer in layers {
        let arity = layer.arity();
        if arity.n_in > depth {
            pulled += arity.n_in - depth;
            depth = 0;
        } else {
            depth -= arity.n_in;
        }
        depth += arity.n_out;
    }
    Arity::new(pulled, depth)
}

impl Layer for Serial {
    fn name(&self) -> &str {
        "Serial"
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn init(&self, signature: &[Signature], device: &Device, rng: &mut StdRng) -> Result<Init> {
        let mut outcome = Init::Skipped;
        let mut stack = Stack::from_items(signature.to_vec());
        for layer in &self.layers {
            let inputs = stack.pop_n(layer.arity().n_in)?;
            outcome = outcome.merge(layer.init(&inputs, device, rng)?);
            stack.push_front(propagate(layer.as_ref(), &inputs)?);
        }
        Ok(outcome)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        let mut stack = Stack::from_items(inputs.to_vec());
        for layer in &self.layers {
            let popped = stack.pop_n(layer.arity().n_in)?;
            stack.push_front(propagate(layer.as_ref(), &popped)?);
        }
        Ok(stack.into_items())
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let mut stack = Stack::from_items(inputs);
        for layer in &self.layers {
            let popped = stack.pop_n(layer.arity().n_in)?;
            stack.push_front(layer.call(popped)?);
        }
        Ok(stack.into_items())
    }

    fn sublayers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }
}

/// Builds a sequential composition as a shareable layer handle.
pub fn serial(layers: Vec<Arc<dyn Layer>>) -> Arc<dyn Layer> {
    Arc::new(Serial::new(layers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::relu;
    use crate::pure::fn_layer;
    use candle_core::{DType, Device};

    fn double() -> Arc<dyn Layer> {
        fn_layer("Double", |x: &Tensor| {
            x.affine(2.0, 0.0).map_err(Into::into)
        })
    }

    #[test]
    fn matches_function_composition() -> Result<()> {
        let device = Device::Cpu;
        let composed = Serial::new(vec![relu(), double()]);
        assert_eq!(composed.arity(), Arity::new(1, 1));

        let x = Tensor::from_slice(&[-1.0f32, 0.5, 2.0], (3,), &device)?;
        let serial_out = composed.apply(&x)?;
        let manual = double().apply(&relu().apply(&x)?)?;
        assert_eq!(
            serial_out.to_vec1::<f32>()?,
            manual.to_vec1::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn deeper_layers_reach_below_earlier_outputs() -> Result<()> {
        let device = Device::Cpu;
        // Double consumes one input; Sub then pops the doubled value and the
        // caller's second input from underneath it.
        let sub = fn_layer("Sub", |a: &Tensor, b: &Tensor| {
            a.sub(b).map_err(Into::into)
        });
        let composed = Serial::new(vec![double(), sub]);
        assert_eq!(composed.arity(), Arity::new(2, 1));

        let a = Tensor::from_slice(&[3.0f32], (1,), &device)?;
        let b = Tensor::from_slice(&[1.0f32], (1,), &device)?;
        let out = composed.call(vec![a, b])?;
        assert_eq!(out[0].to_vec1::<f32>()?, vec![5.0]);
        Ok(())
    }

    #[test]
    fn empty_serial_is_the_identity() -> Result<()> {
        let device = Device::Cpu;
        let identity = Serial::identity();
        assert_eq!(identity.arity(), Arity::new(0, 0));

        let sigs = identity.forward_signature(&[])?;
        assert!(sigs.is_empty());

        // As part of a composition it forwards nothing and consumes nothing.
        let wrapped = Serial::new(vec![Arc::new(Serial::identity()), relu()]);
        let x = Tensor::from_slice(&[-2.0f32, 4.0], (2,), &device)?;
        assert_eq!(wrapped.apply(&x)?.to_vec1::<f32>()?, vec![0.0, 4.0]);
        Ok(())
    }

    #[test]
    fn signature_propagation_mirrors_forward_shapes() -> Result<()> {
        let composed = Serial::new(vec![relu(), double()]);
        let sigs = composed.forward_signature(&[Signature::new(vec![2, 5], DType::F32)])?;
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].dims, vec![2, 5]);
        Ok(())
    }
}
