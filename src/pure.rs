//! Ad-hoc weight-less layers wrapped around plain functions.
//!
//! [`fn_layer`] lifts a side-effect-free closure over positional tensor
//! arguments into a layer. Input arity is inferred from the closure's
//! parameter count through the [`PureFn`] trait, which is implemented for
//! one-, two-, and three-argument closures returning a single tensor.
//! Multi-output functions must state their output arity explicitly via
//! [`fn_layer_n`]; the produced count is validated on every call.
//!
//! Signature propagation for wrapped functions cannot inspect the closure
//! body, so it probes the function once with zero-filled tensors matching the
//! input signature and reads the shapes off the results. The probe runs on
//! the CPU and its outputs are discarded.

use std::sync::Arc;

use candle_core::{Device, Tensor};

use crate::error::Result;
use crate::layer::{expect_inputs, Arity, Layer};
use crate::signature::{signature_of, Signature};

/// A pure mapping from a fixed number of positional tensors to one output.
///
/// The `Args` parameter is a marker that lets the arity be read off the
/// closure type, mirroring arity inference from a function's declared
/// positional parameters. Rust's signatures admit no default or keyword
/// arguments, so the ambiguous cases cannot be expressed at all.
pub trait PureFn<Args>: Send + Sync + 'static {
    /// Number of positional tensor parameters the function declares.
    const N_IN: usize;

    /// Invokes the function on `inputs` (top-first, length `N_IN`).
    fn invoke(&self, inputs: &[Tensor]) -> Result<Tensor>;
}

impl<F> PureFn<(Tensor,)> for F
where
    F: Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    const N_IN: usize = 1;

    fn invoke(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self(&inputs[0])
    }
}

impl<F> PureFn<(Tensor, Tensor)> for F
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    const N_IN: usize = 2;

    fn invoke(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self(&inputs[0], &inputs[1])
    }
}

impl<F> PureFn<(Tensor, Tensor, Tensor)> for F
where
    F: Fn(&Tensor, &Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    const N_IN: usize = 3;

    fn invoke(&self, inputs: &[Tensor]) -> Result<Tensor> {
        self(&inputs[0], &inputs[1], &inputs[2])
    }
}

type BoxedFn = Box<dyn Fn(&[Tensor]) -> Result<Vec<Tensor>> + Send + Sync>;

/// Weight-less layer wrapping an arbitrary pure function.
pub struct FnLayer {
    name: String,
    arity: Arity,
    function: BoxedFn,
}

impl Layer for FnLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(&self.name, self.arity.n_in, inputs)?;
        let device = Device::Cpu;
        let probes = inputs
            .iter()
            .map(|sig| Tensor::zeros(sig.dims.clone(), sig.dtype, &device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let outputs = (self.function)(&probes)?;
        Ok(signature_of(&outputs))
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(&self.name, self.arity.n_in, &inputs)?;
        (self.function)(&inputs)
    }
}

/// Wraps a single-output pure function; input arity is inferred.
pub fn fn_layer<Args, F>(name: impl Into<String>, function: F) -> Arc<dyn Layer>
where
    Args: 'static,
    F: PureFn<Args>,
{
    Arc::new(FnLayer {
        name: name.into(),
        arity: Arity::new(F::N_IN, 1),
        function: Box::new(move |inputs| function.invoke(inputs).map(|out| vec![out])),
    })
}

/// Wraps a multi-output pure function with explicit arities.
pub fn fn_layer_n<F>(
    name: impl Into<String>,
    n_in: usize,
    n_out: usize,
    function: F,
) -> Arc<dyn Layer>
where
    F: Fn(&[Tensor]) -> Result<Vec<Tensor>> + Send + Sync + 'static,
{
    Arc::new(FnLayer {
        name: name.into(),
        arity: Arity::new(n_in, n_out),
        function: Box::new(function),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LayerError;
    use candle_core::{DType, Device};

    #[test]
    fn arity_is_inferred_from_parameter_count() {
        let one = fn_layer("One", |x: &Tensor| Ok(x.clone()));
        assert_eq!(one.arity(), Arity::new(1, 1));

        let two = fn_layer("Two", |a: &Tensor, b: &Tensor| {
            a.broadcast_add(b).map_err(Into::into)
        });
        assert_eq!(two.arity(), Arity::new(2, 1));

        let three = fn_layer("Three", |a: &Tensor, b: &Tensor, c: &Tensor| {
            a.broadcast_add(b)?.broadcast_add(c).map_err(Into::into)
        });
        assert_eq!(three.arity(), Arity::new(3, 1));
    }

    #[test]
    fn wrapped_function_is_pure_across_calls() -> Result<()> {
        let device = Device::Cpu;
        let square = fn_layer("Square", |x: &Tensor| x.sqr().map_err(Into::into));
        let x = Tensor::from_slice(&[1.5f32, -2.0], (2,), &device)?;
        let first = square.apply(&x)?.to_vec1::<f32>()?;
        let second = square.apply(&x)?.to_vec1::<f32>()?;
        assert_eq!(first, second);
        assert_eq!(first, vec![2.25, 4.0]);
        Ok(())
    }

    #[test]
    fn signature_probe_reports_output_shapes() -> Result<()> {
        let widen = fn_layer("Widen", |x: &Tensor| {
            x.reshape((1, x.elem_count())).map_err(Into::into)
        });
        let sigs = widen.forward_signature(&[Signature::new(vec![6], DType::F32)])?;
        assert_eq!(sigs[0].dims, vec![1, 6]);
        Ok(())
    }

    #[test]
    fn multi_output_count_is_validated() {
        let device = Device::Cpu;
        // Claims two outputs but produces one.
        let broken = fn_layer_n("Broken", 1, 2, |inputs: &[Tensor]| {
            Ok(vec![inputs[0].clone()])
        });
        let x = Tensor::from_slice(&[1.0f32], (1,), &device).unwrap();
        let err = broken.call(vec![x]).unwrap_err();
        assert!(matches!(err, LayerError::ArityMismatch { .. }));
    }
}
